//! The per-block flow engine: connecting blocks moves satoshi ranges from
//! consumed inputs to new outputs, disconnecting blocks rewinds exactly.
//!
//! Connection applies transactions in block order with the coinbase handled
//! last, so the fees collected from every other transaction are known by the
//! time the coinbase absorbs them. Within the coinbase input pool the minted
//! range precedes the fee ranges; this ordering decides which output of a
//! multi-output coinbase receives new satoshis versus fees under FIFO
//! assignment, and must match across implementations.
//!
//! Every mutation of a block — output entries, `last_ordinal`, the best
//! block, undo and pending-prune records — is committed as one atomic batch.

use std::collections::HashMap;
use std::path::Path;

use bitcoin::{Block, OutPoint, Script, Transaction};

use crate::error::IndexError;
use crate::ranges::{SatPool, SatRange};
use crate::store::{Batch, Store};
use crate::subsidy::subsidy;
use crate::types::{BestBlock, IndexMode, OutputEntry, UndoRecord};

// ==============================================================================
// Options
// ==============================================================================

/// Index configuration, fixed at creation time.
#[derive(Debug, Clone, Copy)]
pub struct IndexOptions {
    pub mode: IndexMode,
    /// Blocks a spent entry survives before physical deletion in prune mode.
    /// A reorg deeper than this leaves a pruned index inconsistent and
    /// requires a reindex.
    pub prune_horizon: u32,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            mode: IndexMode::Full,
            prune_horizon: 6,
        }
    }
}

// ==============================================================================
// SatIndex
// ==============================================================================

/// The satoshi-range index: a [`Store`] plus the block apply/rewind logic.
///
/// State mutation is single-writer by design — exactly one task connects or
/// disconnects blocks — while queries read concurrently through store
/// snapshots. The engine itself therefore needs no locking.
pub struct SatIndex {
    store: Store,
    mode: IndexMode,
    prune_horizon: u32,
}

impl SatIndex {
    pub fn open(path: &Path, options: IndexOptions) -> Result<Self, IndexError> {
        let store = Store::open(path, options.mode, options.prune_horizon)?;
        Ok(Self {
            store,
            mode: options.mode,
            prune_horizon: options.prune_horizon,
        })
    }

    pub fn mode(&self) -> IndexMode {
        self.mode
    }

    pub fn best_block(&self) -> Result<Option<BestBlock>, IndexError> {
        self.store.best_block()
    }

    pub fn last_ordinal(&self) -> Result<u64, IndexError> {
        self.store.last_ordinal()
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    // ==========================================================================
    // Connect
    // ==========================================================================

    /// Apply a block on top of the indexed tip.
    pub fn connect_block(&self, block: &Block, height: u32) -> Result<(), IndexError> {
        let hash = block.block_hash();
        self.check_extends_tip(block, height)?;

        let coinbase = match block.txdata.first() {
            Some(tx) if tx.is_coinbase() => tx,
            _ => {
                return Err(IndexError::Corrupt(format!(
                    "block {hash} at height {height} has no coinbase"
                )))
            }
        };

        let mut batch = Batch::new();
        // Entries created or spent-marked in this block, written at the end;
        // looked up before the store so transactions can spend outputs
        // created earlier in the same block.
        let mut pending: HashMap<OutPoint, OutputEntry> = HashMap::new();
        // Stored entries hard-deleted by this block (full mode only).
        let mut deletions: Vec<OutPoint> = Vec::new();
        let mut undo = UndoRecord::default();
        let mut prune_list: Vec<OutPoint> = Vec::new();
        let mut fee_pool = SatPool::new();

        for tx in block.txdata.iter().skip(1) {
            let mut pool = SatPool::new();
            self.pool_inputs(
                tx,
                &mut pool,
                &mut pending,
                &mut deletions,
                &mut undo,
                &mut prune_list,
            )?;
            assign_outputs(tx, height, &mut pool, &mut pending)?;
            // The leftover after all outputs is this transaction's fee.
            fee_pool.append(&mut pool);
        }

        // Coinbase last: mint range first, then the block's fees, in
        // transaction order.
        let last_ordinal = self.store.last_ordinal()?;
        let minted = subsidy(height);
        let mut pool = SatPool::new();
        if minted > 0 {
            pool.feed_range(SatRange::new(last_ordinal, last_ordinal + minted));
        }
        let fees = fee_pool.size();
        pool.append(&mut fee_pool);

        let claimed: u64 = coinbase.output.iter().map(|o| o.value.to_sat()).sum();
        if claimed != pool.size() {
            return Err(IndexError::SupplyMismatch {
                height,
                claimed,
                available: pool.size(),
            });
        }
        assign_outputs(coinbase, height, &mut pool, &mut pending)?;

        // Prune step: physically drop the entries spent `prune_horizon`
        // blocks ago, preserving them in this block's undo record so a
        // one-block disconnect can still restore them.
        if self.mode == IndexMode::Prune {
            if let Some(target) = height.checked_sub(self.prune_horizon) {
                if let Some(outpoints) = self.store.pending_prune(target)? {
                    for op in &outpoints {
                        let entry = self.store.output(op)?.ok_or_else(|| {
                            IndexError::Corrupt(format!("pending-prune entry {op} missing"))
                        })?;
                        undo.entries.push((*op, entry));
                        batch.delete_output(op);
                    }
                    batch.delete_pending_prune(target);
                }
            }
        }

        for op in &deletions {
            batch.delete_output(op);
        }
        for (op, entry) in &pending {
            batch.put_output(op, entry);
        }
        match self.mode {
            IndexMode::Full | IndexMode::Prune => batch.put_undo(height, &undo),
            IndexMode::RewriteSpent => {}
        }
        if self.mode == IndexMode::Prune && !prune_list.is_empty() {
            batch.put_pending_prune(height, &prune_list);
        }
        batch.put_last_ordinal(last_ordinal + minted);
        batch.put_best_block(&BestBlock { height, hash });

        self.store.commit(&batch)?;
        tracing::debug!(
            height,
            %hash,
            txs = block.txdata.len(),
            fees,
            minted,
            "connected block"
        );
        Ok(())
    }

    /// Gather the input ranges of a non-coinbase transaction into `pool`,
    /// consuming the spent entries according to the index mode.
    fn pool_inputs(
        &self,
        tx: &Transaction,
        pool: &mut SatPool,
        pending: &mut HashMap<OutPoint, OutputEntry>,
        deletions: &mut Vec<OutPoint>,
        undo: &mut UndoRecord,
        prune_list: &mut Vec<OutPoint>,
    ) -> Result<(), IndexError> {
        for input in &tx.input {
            let op = input.previous_output;
            let entry = match pending.remove(&op) {
                Some(entry) => {
                    if entry.spent {
                        return Err(IndexError::MissingPrevOut(op));
                    }
                    entry
                }
                None => {
                    let entry = self
                        .store
                        .output(&op)?
                        .ok_or(IndexError::MissingPrevOut(op))?;
                    if entry.spent {
                        return Err(IndexError::MissingPrevOut(op));
                    }
                    if self.mode == IndexMode::Full {
                        deletions.push(op);
                    }
                    entry
                }
            };
            pool.feed(&entry.ranges);

            if self.mode.rewrites_spent() {
                let mut spent_entry = entry;
                spent_entry.spent = true;
                pending.insert(op, spent_entry);
                if self.mode == IndexMode::Prune {
                    prune_list.push(op);
                }
            } else {
                undo.entries.push((op, entry));
            }
        }
        Ok(())
    }

    // ==========================================================================
    // Disconnect
    // ==========================================================================

    /// Rewind the indexed tip. `block` must be the block the tip points at.
    pub fn disconnect_block(&self, block: &Block, height: u32) -> Result<(), IndexError> {
        let hash = block.block_hash();
        let tip = self.store.best_block()?.ok_or_else(|| IndexError::NotAtTip {
            height,
            detail: "index is empty".into(),
        })?;
        if tip.height != height || tip.hash != hash {
            return Err(IndexError::NotAtTip {
                height,
                detail: format!("indexed tip is {} at height {}", tip.hash, tip.height),
            });
        }

        let mut batch = Batch::new();
        let undo = self.store.undo(height)?;
        let mut undo_map: HashMap<OutPoint, OutputEntry> = match self.mode {
            IndexMode::Full => undo
                .as_ref()
                .map(|u| u.entries.iter().cloned().collect())
                .unwrap_or_default(),
            _ => HashMap::new(),
        };

        for tx in block.txdata.iter().rev() {
            let txid = tx.compute_txid();
            for vout in 0..tx.output.len() {
                batch.delete_output(&OutPoint::new(txid, vout as u32));
            }
            if tx.is_coinbase() {
                continue;
            }
            for input in &tx.input {
                let op = input.previous_output;
                if self.mode == IndexMode::Full {
                    let entry = undo_map.remove(&op).ok_or(IndexError::NoUndoData(height))?;
                    batch.put_output(&op, &entry);
                } else {
                    let mut entry = self
                        .store
                        .output(&op)?
                        .ok_or(IndexError::NoUndoData(height))?;
                    if !entry.spent {
                        return Err(IndexError::Corrupt(format!(
                            "entry {op} should be marked spent at height {height}"
                        )));
                    }
                    entry.spent = false;
                    batch.put_output(&op, &entry);
                }
            }
        }

        let last_ordinal = self.store.last_ordinal()?;
        let minted = subsidy(height);
        if last_ordinal < minted {
            return Err(IndexError::Corrupt(format!(
                "last ordinal {last_ordinal} below subsidy at height {height}"
            )));
        }
        batch.put_last_ordinal(last_ordinal - minted);

        if self.mode == IndexMode::Prune {
            batch.delete_pending_prune(height);
            // Restore what the prune step removed when this block connected.
            if let Some(undo) = &undo {
                let mut outpoints = Vec::with_capacity(undo.entries.len());
                for (op, entry) in &undo.entries {
                    batch.put_output(op, entry);
                    outpoints.push(*op);
                }
                if let (false, Some(target)) =
                    (outpoints.is_empty(), height.checked_sub(self.prune_horizon))
                {
                    batch.put_pending_prune(target, &outpoints);
                }
            }
        }
        if self.mode != IndexMode::RewriteSpent {
            batch.delete_undo(height);
        }

        if height == 0 {
            batch.clear_best_block();
        } else {
            batch.put_best_block(&BestBlock {
                height: height - 1,
                hash: block.header.prev_blockhash,
            });
        }

        self.store.commit(&batch)?;
        tracing::debug!(height, %hash, "disconnected block");
        Ok(())
    }

    fn check_extends_tip(&self, block: &Block, height: u32) -> Result<(), IndexError> {
        match self.store.best_block()? {
            None if height == 0 => Ok(()),
            None => Err(IndexError::NotAtTip {
                height,
                detail: "index is empty, expected the genesis block".into(),
            }),
            Some(tip) if height == tip.height + 1 && block.header.prev_blockhash == tip.hash => {
                Ok(())
            }
            Some(tip) => Err(IndexError::NotAtTip {
                height,
                detail: format!("indexed tip is {} at height {}", tip.hash, tip.height),
            }),
        }
    }
}

// ==============================================================================
// Output Assignment
// ==============================================================================

/// FIFO-assign ranges from `pool` to every output of `tx`, in output order.
/// Zero-value outputs receive an empty range list but are still persisted.
fn assign_outputs(
    tx: &Transaction,
    height: u32,
    pool: &mut SatPool,
    pending: &mut HashMap<OutPoint, OutputEntry>,
) -> Result<(), IndexError> {
    let txid = tx.compute_txid();
    for (vout, output) in tx.output.iter().enumerate() {
        let taken = pool.skim(output.value.to_sat())?;
        let entry = OutputEntry {
            ranges: taken,
            block_height: height,
            spent: false,
            inscription: has_inscription_marker(&output.script_pubkey),
        };
        // A duplicate txid (the two historical BIP 30 collisions) overwrites
        // the prior entry; the prior ordinals are destroyed for indexing
        // purposes.
        pending.insert(OutPoint::new(txid, vout as u32), entry);
    }
    Ok(())
}

/// OP_RETURN whose first push is the bytes `"ord"`. The payload itself is
/// never decoded.
fn has_inscription_marker(script: &Script) -> bool {
    script.is_op_return() && script.as_bytes().get(1..5) == Some(&[3, b'o', b'r', b'd'])
}

// ==============================================================================
// Tests
// ==============================================================================
