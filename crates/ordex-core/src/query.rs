//! The three read operations of the index.
//!
//! `output_ranges` is a point lookup. `outputs_containing` and
//! `current_location` are full ordered scans of the output subspace — there
//! is deliberately no secondary index keyed by ordinal — so both run over a
//! store snapshot and honor a [`Cancel`] flag between scan chunks, keeping a
//! disconnected client from pinning a multi-hour scan.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bitcoin::OutPoint;

use crate::engine::SatIndex;
use crate::error::QueryError;
use crate::types::{IndexMode, OutputEntry};

/// Entries scanned between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 1024;

// ==============================================================================
// Cancellation
// ==============================================================================

/// A shared cancellation flag for long scans. Cloning is cheap; cancelling
/// any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ==============================================================================
// Queries
// ==============================================================================

impl SatIndex {
    /// The ranges held (or last held, if spent) by `outpoint`.
    pub fn output_ranges(&self, outpoint: &OutPoint) -> Result<OutputEntry, QueryError> {
        self.store()
            .snapshot()
            .output(outpoint)?
            .ok_or(QueryError::NotFound)
    }

    /// Every output across history whose ranges contain `ordinal`, in key
    /// order. Spent entries are included where the mode retains them.
    pub fn outputs_containing(
        &self,
        ordinal: u64,
        cancel: &Cancel,
    ) -> Result<Vec<OutPoint>, QueryError> {
        let snapshot = self.store().snapshot();
        let mut matches = Vec::new();
        for (scanned, item) in snapshot.scan_outputs().enumerate() {
            if scanned % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(QueryError::Cancelled);
            }
            let (outpoint, entry) = item?;
            if entry.ranges.contains(ordinal) {
                matches.push(outpoint);
            }
        }
        Ok(matches)
    }

    /// The single unspent output currently holding `ordinal`.
    ///
    /// Requires rewrite-spent mode: in the other modes spent entries are
    /// deleted (immediately or after the prune horizon), so "unspent" cannot
    /// be distinguished from "unknown". Should several unspent matches exist
    /// (spend-then-resend patterns inside a reorg window), the entry with
    /// the greatest creation height wins, tie-broken by the smallest
    /// `(txid, vout)`.
    pub fn current_location(
        &self,
        ordinal: u64,
        cancel: &Cancel,
    ) -> Result<OutPoint, QueryError> {
        if self.mode() != IndexMode::RewriteSpent {
            return Err(QueryError::ModeRequired);
        }

        let snapshot = self.store().snapshot();
        let mut best: Option<(OutPoint, u32)> = None;
        for (scanned, item) in snapshot.scan_outputs().enumerate() {
            if scanned % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(QueryError::Cancelled);
            }
            let (outpoint, entry) = item?;
            if entry.spent || !entry.ranges.contains(ordinal) {
                continue;
            }
            let better = match &best {
                None => true,
                Some((best_op, best_height)) => {
                    entry.block_height > *best_height
                        || (entry.block_height == *best_height && outpoint < *best_op)
                }
            };
            if better {
                best = Some((outpoint, entry.block_height));
            }
        }
        best.map(|(outpoint, _)| outpoint).ok_or(QueryError::NotFound)
    }
}

// ==============================================================================
// Tests
// ==============================================================================

#[cfg(test)]
mod tests {
    use bitcoin::OutPoint;

    use super::*;
    use crate::engine::{IndexOptions, SatIndex};
    use crate::ranges::{RangeList, SatRange};
    use crate::test_util::*;

    const FIFTY_BTC: u64 = 5_000_000_000;

    fn open(dir: &TempDir, mode: IndexMode) -> SatIndex {
        SatIndex::open(
            dir.path(),
            IndexOptions {
                mode,
                prune_horizon: 6,
            },
        )
        .expect("open index")
    }

    /// Genesis plus one block moving the genesis output to a fresh outpoint.
    fn index_with_transfer(index: &SatIndex) -> (OutPoint, OutPoint) {
        let genesis = genesis_block(&[FIFTY_BTC]);
        index.connect_block(&genesis, 0).expect("connect genesis");
        let funding = OutPoint::new(genesis.txdata[0].compute_txid(), 0);

        let spend = spend_tx(&[funding], &[FIFTY_BTC]);
        let block1 = build_block(
            genesis.block_hash(),
            1,
            vec![coinbase_tx(1, &[FIFTY_BTC]), spend.clone()],
        );
        index.connect_block(&block1, 1).expect("connect block 1");
        (funding, OutPoint::new(spend.compute_txid(), 0))
    }

    #[test]
    fn output_ranges_returns_the_entry() {
        let dir = TempDir::new();
        let index = open(&dir, IndexMode::Full);
        let genesis = genesis_block(&[FIFTY_BTC]);
        index.connect_block(&genesis, 0).expect("connect genesis");

        let cb = OutPoint::new(genesis.txdata[0].compute_txid(), 0);
        let entry = index.output_ranges(&cb).expect("entry exists");
        assert_eq!(
            entry.ranges,
            RangeList::from(vec![SatRange::new(0, FIFTY_BTC)])
        );
        assert_eq!(entry.block_height, 0);
        assert!(!entry.spent);
    }

    #[test]
    fn output_ranges_unknown_outpoint_is_not_found() {
        let dir = TempDir::new();
        let index = open(&dir, IndexMode::Full);
        assert!(matches!(
            index.output_ranges(&outpoint(9, 0)),
            Err(QueryError::NotFound)
        ));
    }

    #[test]
    fn outputs_containing_spans_history_in_rewrite_mode() {
        let dir = TempDir::new();
        let index = open(&dir, IndexMode::RewriteSpent);
        let (funding, destination) = index_with_transfer(&index);

        let mut expected = vec![funding, destination];
        expected.sort();
        let mut found = index
            .outputs_containing(0, &Cancel::new())
            .expect("scan succeeds");
        found.sort();
        assert_eq!(found, expected);

        // Exactly one of them is unspent.
        let unspent: Vec<_> = found
            .iter()
            .filter(|op| !index.output_ranges(op).expect("entry").spent)
            .collect();
        assert_eq!(unspent, vec![&destination]);
    }

    #[test]
    fn outputs_containing_unmined_ordinal_is_empty() {
        let dir = TempDir::new();
        let index = open(&dir, IndexMode::RewriteSpent);
        index_with_transfer(&index);

        let found = index
            .outputs_containing(2 * FIFTY_BTC + 1, &Cancel::new())
            .expect("scan succeeds");
        assert!(found.is_empty());
    }

    #[test]
    fn current_location_tracks_the_unspent_holder() {
        let dir = TempDir::new();
        let index = open(&dir, IndexMode::RewriteSpent);
        let (_, destination) = index_with_transfer(&index);

        let location = index
            .current_location(0, &Cancel::new())
            .expect("ordinal is live");
        assert_eq!(location, destination);
    }

    #[test]
    fn current_location_requires_rewrite_spent_mode() {
        for mode in [IndexMode::Full, IndexMode::Prune] {
            let dir = TempDir::new();
            let index = open(&dir, mode);
            assert!(matches!(
                index.current_location(0, &Cancel::new()),
                Err(QueryError::ModeRequired)
            ));
        }
    }

    #[test]
    fn current_location_unmined_ordinal_is_not_found() {
        let dir = TempDir::new();
        let index = open(&dir, IndexMode::RewriteSpent);
        index_with_transfer(&index);
        assert!(matches!(
            index.current_location(2 * FIFTY_BTC, &Cancel::new()),
            Err(QueryError::NotFound)
        ));
    }

    #[test]
    fn cancelled_scan_stops_early() {
        let dir = TempDir::new();
        let index = open(&dir, IndexMode::RewriteSpent);
        index_with_transfer(&index);

        let cancel = Cancel::new();
        cancel.cancel();
        assert!(matches!(
            index.outputs_containing(0, &cancel),
            Err(QueryError::Cancelled)
        ));
        assert!(matches!(
            index.current_location(0, &cancel),
            Err(QueryError::Cancelled)
        ));
    }
}
