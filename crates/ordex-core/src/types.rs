//! Domain types for the satoshi-range index: the per-output persistent
//! entry, the index mode, and the small records the store keeps per height.

use bitcoin::{BlockHash, OutPoint};
use serde::{Deserialize, Serialize};

use crate::ranges::RangeList;

// ==============================================================================
// Index Mode
// ==============================================================================

/// Spent-entry policy, fixed at index creation. Changing the mode of an
/// existing index requires a reindex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Spent entries are deleted from the store as they are consumed; undo
    /// records written at connect time make disconnection possible.
    Full,
    /// Spent entries are kept forever with `spent = true` and serve as their
    /// own undo data. Prerequisite for locating an ordinal's current output.
    RewriteSpent,
    /// Spent entries are kept with `spent = true` for a fixed number of
    /// blocks, then physically deleted. Saves disk; current-location queries
    /// are unavailable.
    Prune,
}

impl IndexMode {
    /// Whether consumption marks entries `spent = true` instead of deleting
    /// them outright.
    pub fn rewrites_spent(&self) -> bool {
        matches!(self, IndexMode::RewriteSpent | IndexMode::Prune)
    }

    pub(crate) fn as_byte(&self) -> u8 {
        match self {
            IndexMode::Full => 0,
            IndexMode::RewriteSpent => 1,
            IndexMode::Prune => 2,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(IndexMode::Full),
            1 => Some(IndexMode::RewriteSpent),
            2 => Some(IndexMode::Prune),
            _ => None,
        }
    }
}

impl std::fmt::Display for IndexMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexMode::Full => write!(f, "full"),
            IndexMode::RewriteSpent => write!(f, "rewrite-spent"),
            IndexMode::Prune => write!(f, "prune"),
        }
    }
}

// ==============================================================================
// Output Entry
// ==============================================================================

/// The persistent value stored per transaction output, and the shape of the
/// `rangesOf` query response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEntry {
    /// The ordinals the output currently holds, or held when spent, in
    /// assignment order.
    pub ranges: RangeList,
    /// Height of the block that created the output.
    pub block_height: u32,
    /// True once the output has been consumed, in rewrite-spent policies.
    pub spent: bool,
    /// Best-effort flag: the output script is an OP_RETURN whose first push
    /// is the bytes `"ord"`. No payload is decoded.
    pub inscription: bool,
}

// ==============================================================================
// Per-height Records
// ==============================================================================

/// The indexed chain tip, persisted so a restart resumes where it left off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BestBlock {
    pub height: u32,
    pub hash: BlockHash,
}

/// Connect-time record enabling exact rewind of one block.
///
/// In full mode it holds the pre-spend entries of every consumed input; in
/// prune mode it holds the entries physically deleted by the prune step at
/// that height. Rewrite-spent mode writes no undo records at all — the
/// spent-marked entries are their own undo data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UndoRecord {
    pub entries: Vec<(OutPoint, OutputEntry)>,
}
