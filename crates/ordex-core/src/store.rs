//! rocksdb-backed store for the satoshi-range index.
//!
//! One column family, partitioned by single-byte key tags:
//!
//! | key                              | value                          |
//! |----------------------------------|--------------------------------|
//! | `b"O" ++ txid ++ vout (BE)`      | [`OutputEntry`] (CBOR)         |
//! | `b"L"`                           | `last_ordinal` (u64 LE)        |
//! | `b"B"`                           | best block: height LE ++ hash  |
//! | `b"M"`                           | mode byte ++ prune horizon LE  |
//! | `b"P" ++ height (BE)`            | pending-prune outpoints (CBOR) |
//! | `b"U" ++ height (BE)`            | [`UndoRecord`] (CBOR)          |
//!
//! All per-block mutations are staged in a [`Batch`] and committed as one
//! atomic rocksdb `WriteBatch`, so a crash leaves the index either fully
//! before or fully after a block. Queries read through a [`StoreSnapshot`]
//! for isolation from concurrent commits.

use std::path::Path;

use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, OutPoint, Txid};
use rocksdb::{DBIteratorWithThreadMode, Direction, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::IndexError;
use crate::types::{BestBlock, IndexMode, OutputEntry, UndoRecord};

const OUTPUT_TAG: u8 = b'O';
const LAST_ORDINAL_KEY: [u8; 1] = [b'L'];
const BEST_BLOCK_KEY: [u8; 1] = [b'B'];
const MODE_KEY: [u8; 1] = [b'M'];
const PENDING_PRUNE_TAG: u8 = b'P';
const UNDO_TAG: u8 = b'U';

// ==============================================================================
// Key and Value Encoding
// ==============================================================================

fn output_key(outpoint: &OutPoint) -> [u8; 37] {
    let mut key = [0u8; 37];
    key[0] = OUTPUT_TAG;
    key[1..33].copy_from_slice(&outpoint.txid.to_byte_array());
    key[33..37].copy_from_slice(&outpoint.vout.to_be_bytes());
    key
}

fn decode_output_key(key: &[u8]) -> Result<OutPoint, IndexError> {
    if key.len() != 37 || key[0] != OUTPUT_TAG {
        return Err(IndexError::Corrupt(format!(
            "malformed output key ({} bytes)",
            key.len()
        )));
    }
    let txid = Txid::from_byte_array(
        key[1..33]
            .try_into()
            .expect("slice length checked above"),
    );
    let vout = u32::from_be_bytes(key[33..37].try_into().expect("slice length checked above"));
    Ok(OutPoint::new(txid, vout))
}

fn height_key(tag: u8, height: u32) -> [u8; 5] {
    let mut key = [0u8; 5];
    key[0] = tag;
    key[1..5].copy_from_slice(&height.to_be_bytes());
    key
}

fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).expect("CBOR encoding to memory cannot fail");
    buf
}

fn decode<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T, IndexError> {
    ciborium::de::from_reader(bytes)
        .map_err(|e| IndexError::Corrupt(format!("bad {what} record: {e}")))
}

// ==============================================================================
// Batch
// ==============================================================================

enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Staged per-block mutations, materialized into a rocksdb `WriteBatch` at
/// commit time. Keeping our own op list lets [`Store::commit`] rebuild the
/// batch for its single retry, which a consumed `WriteBatch` would not allow.
#[derive(Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_output(&mut self, outpoint: &OutPoint, entry: &OutputEntry) {
        self.ops
            .push(BatchOp::Put(output_key(outpoint).to_vec(), encode(entry)));
    }

    pub fn delete_output(&mut self, outpoint: &OutPoint) {
        self.ops.push(BatchOp::Delete(output_key(outpoint).to_vec()));
    }

    pub fn put_last_ordinal(&mut self, last_ordinal: u64) {
        self.ops.push(BatchOp::Put(
            LAST_ORDINAL_KEY.to_vec(),
            last_ordinal.to_le_bytes().to_vec(),
        ));
    }

    pub fn put_best_block(&mut self, best: &BestBlock) {
        let mut value = Vec::with_capacity(36);
        value.extend_from_slice(&best.height.to_le_bytes());
        value.extend_from_slice(&best.hash.to_byte_array());
        self.ops.push(BatchOp::Put(BEST_BLOCK_KEY.to_vec(), value));
    }

    pub fn clear_best_block(&mut self) {
        self.ops.push(BatchOp::Delete(BEST_BLOCK_KEY.to_vec()));
    }

    pub fn put_pending_prune(&mut self, height: u32, outpoints: &[OutPoint]) {
        self.ops.push(BatchOp::Put(
            height_key(PENDING_PRUNE_TAG, height).to_vec(),
            encode(&outpoints),
        ));
    }

    pub fn delete_pending_prune(&mut self, height: u32) {
        self.ops
            .push(BatchOp::Delete(height_key(PENDING_PRUNE_TAG, height).to_vec()));
    }

    pub fn put_undo(&mut self, height: u32, undo: &UndoRecord) {
        self.ops.push(BatchOp::Put(
            height_key(UNDO_TAG, height).to_vec(),
            encode(undo),
        ));
    }

    pub fn delete_undo(&mut self, height: u32) {
        self.ops
            .push(BatchOp::Delete(height_key(UNDO_TAG, height).to_vec()));
    }

    fn materialize(&self) -> WriteBatch {
        let mut batch = WriteBatch::default();
        for op in &self.ops {
            match op {
                BatchOp::Put(key, value) => batch.put(key, value),
                BatchOp::Delete(key) => batch.delete(key),
            }
        }
        batch
    }
}

// ==============================================================================
// Store
// ==============================================================================

pub struct Store {
    db: DB,
}

impl Store {
    /// Open (or create) the index database at `path`.
    ///
    /// The mode and prune horizon are persisted on first creation and
    /// verified on every subsequent open: the index layout depends on both,
    /// so changing either requires a reindex.
    pub fn open(path: &Path, mode: IndexMode, prune_horizon: u32) -> Result<Self, IndexError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;

        match db.get(MODE_KEY)? {
            Some(record) => {
                if record.len() != 5 {
                    return Err(IndexError::Corrupt("malformed mode record".into()));
                }
                let on_disk = IndexMode::from_byte(record[0])
                    .ok_or_else(|| IndexError::Corrupt("unknown index mode byte".into()))?;
                if on_disk != mode {
                    return Err(IndexError::ModeMismatch {
                        on_disk,
                        requested: mode,
                    });
                }
                let on_disk_horizon =
                    u32::from_le_bytes(record[1..5].try_into().expect("length checked above"));
                if on_disk_horizon != prune_horizon {
                    return Err(IndexError::Corrupt(format!(
                        "prune horizon changed from {on_disk_horizon} to {prune_horizon} (reindex required)"
                    )));
                }
            }
            None => {
                let mut record = Vec::with_capacity(5);
                record.push(mode.as_byte());
                record.extend_from_slice(&prune_horizon.to_le_bytes());
                db.put(MODE_KEY, record)?;
            }
        }

        Ok(Self { db })
    }

    pub fn output(&self, outpoint: &OutPoint) -> Result<Option<OutputEntry>, IndexError> {
        match self.db.get(output_key(outpoint))? {
            Some(bytes) => Ok(Some(decode(&bytes, "output")?)),
            None => Ok(None),
        }
    }

    /// The exclusive upper bound of the materialized ordinal space. Zero for
    /// a fresh index.
    pub fn last_ordinal(&self) -> Result<u64, IndexError> {
        match self.db.get(LAST_ORDINAL_KEY)? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| IndexError::Corrupt("malformed last-ordinal record".into()))?;
                Ok(u64::from_le_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    pub fn best_block(&self) -> Result<Option<BestBlock>, IndexError> {
        match self.db.get(BEST_BLOCK_KEY)? {
            Some(bytes) => {
                if bytes.len() != 36 {
                    return Err(IndexError::Corrupt("malformed best-block record".into()));
                }
                let height =
                    u32::from_le_bytes(bytes[0..4].try_into().expect("length checked above"));
                let hash = BlockHash::from_byte_array(
                    bytes[4..36].try_into().expect("length checked above"),
                );
                Ok(Some(BestBlock { height, hash }))
            }
            None => Ok(None),
        }
    }

    pub fn pending_prune(&self, height: u32) -> Result<Option<Vec<OutPoint>>, IndexError> {
        match self.db.get(height_key(PENDING_PRUNE_TAG, height))? {
            Some(bytes) => Ok(Some(decode(&bytes, "pending-prune")?)),
            None => Ok(None),
        }
    }

    pub fn undo(&self, height: u32) -> Result<Option<UndoRecord>, IndexError> {
        match self.db.get(height_key(UNDO_TAG, height))? {
            Some(bytes) => Ok(Some(decode(&bytes, "undo")?)),
            None => Ok(None),
        }
    }

    /// Commit a staged batch atomically. A failed write is retried once
    /// before the error propagates and aborts the block.
    pub fn commit(&self, batch: &Batch) -> Result<(), IndexError> {
        if let Err(first) = self.db.write(batch.materialize()) {
            tracing::warn!(error = %first, "batch write failed, retrying once");
            self.db.write(batch.materialize())?;
        }
        Ok(())
    }

    /// A consistent point-in-time view for queries. Readers see a committed
    /// block boundary, never a partial batch.
    pub fn snapshot(&self) -> StoreSnapshot<'_> {
        StoreSnapshot {
            snapshot: self.db.snapshot(),
        }
    }

    /// Every key/value pair in the store, for state comparisons in tests.
    #[cfg(test)]
    pub(crate) fn dump(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, IndexError> {
        let mut pairs = Vec::new();
        for item in self.db.iterator(IteratorMode::Start) {
            let (key, value) = item?;
            pairs.push((key.to_vec(), value.to_vec()));
        }
        Ok(pairs)
    }
}

// ==============================================================================
// Snapshot Reads
// ==============================================================================

pub struct StoreSnapshot<'a> {
    snapshot: rocksdb::Snapshot<'a>,
}

impl StoreSnapshot<'_> {
    pub fn output(&self, outpoint: &OutPoint) -> Result<Option<OutputEntry>, IndexError> {
        match self.snapshot.get(output_key(outpoint))? {
            Some(bytes) => Ok(Some(decode(&bytes, "output")?)),
            None => Ok(None),
        }
    }

    /// Ordered scan of every output entry in the snapshot.
    pub fn scan_outputs(&self) -> OutputScan<'_> {
        OutputScan {
            inner: self
                .snapshot
                .iterator(IteratorMode::From(&[OUTPUT_TAG], Direction::Forward)),
            done: false,
        }
    }
}

/// Iterator over the output subspace, stopping at the first key that leaves
/// the `b"O"` prefix.
pub struct OutputScan<'a> {
    inner: DBIteratorWithThreadMode<'a, DB>,
    done: bool,
}

impl Iterator for OutputScan<'_> {
    type Item = Result<(OutPoint, OutputEntry), IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next()? {
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
            Ok((key, value)) => {
                if key.first() != Some(&OUTPUT_TAG) {
                    self.done = true;
                    return None;
                }
                let item = decode_output_key(&key)
                    .and_then(|outpoint| Ok((outpoint, decode(&value, "output")?)));
                Some(item)
            }
        }
    }
}

// ==============================================================================
// Tests
// ==============================================================================
