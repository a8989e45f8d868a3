//! Error types for ordex-core.

use bitcoin::OutPoint;

use crate::types::IndexMode;

// ==============================================================================
// Index Errors (block apply / rewind path)
// ==============================================================================

/// Failures raised while connecting or disconnecting a block.
///
/// Every variant on this path is fail-stop for the index: the per-block
/// batch is discarded, the index stays at its last committed block, and the
/// operator remedy is a reindex. The node itself keeps running.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("missing previous output {0} (corrupt index or mis-sequenced block)")]
    MissingPrevOut(OutPoint),

    #[error("coinbase at height {height} claims {claimed} sats, supply is {available}")]
    SupplyMismatch {
        height: u32,
        claimed: u64,
        available: u64,
    },

    #[error("range list holds {available} sats, {requested} requested")]
    InsufficientSupply { requested: u64, available: u64 },

    #[error("no undo data for height {0}")]
    NoUndoData(u32),

    #[error("block at height {height} does not extend the indexed tip: {detail}")]
    NotAtTip { height: u32, detail: String },

    #[error("index was created in {on_disk} mode but opened in {requested} mode (reindex required)")]
    ModeMismatch {
        on_disk: IndexMode,
        requested: IndexMode,
    },

    #[error("store: {0}")]
    Store(#[from] rocksdb::Error),

    #[error("index corrupt: {0}")]
    Corrupt(String),
}

// ==============================================================================
// Query Errors (read path)
// ==============================================================================

/// Failures raised by the three read operations.
///
/// Unlike [`IndexError`], these are returned to the caller and never affect
/// the health of the index itself.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("not found")]
    NotFound,

    #[error("satoshi index is not enabled")]
    IndexDisabled,

    #[error("query requires rewrite-spent mode")]
    ModeRequired,

    #[error("scan cancelled")]
    Cancelled,

    #[error("store: {0}")]
    Store(#[from] rocksdb::Error),

    #[error("index corrupt: {0}")]
    Corrupt(String),
}

impl From<IndexError> for QueryError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Store(e) => QueryError::Store(e),
            IndexError::Corrupt(msg) => QueryError::Corrupt(msg),
            // The remaining variants belong to the apply path and cannot be
            // produced by a read; fold them into the corruption bucket.
            other => QueryError::Corrupt(other.to_string()),
        }
    }
}

// ==============================================================================
// RPC Errors (node client)
// ==============================================================================

/// Structured errors from the node's JSON-RPC layer.
///
/// Each variant captures a specific failure mode rather than collapsing
/// everything into a single `String`, which makes programmatic error
/// handling (e.g. retries on transport errors vs. logic errors) possible.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("HTTP transport: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("JSON-RPC error: code={code}, message={message}")]
    ServerError { code: i64, message: String },

    #[error("invalid JSON-RPC response: {0}")]
    InvalidResponse(String),
}

// ==============================================================================
// Sync Errors (chain follower)
// ==============================================================================

/// Top-level error for the chain follower, distinguishing transient node
/// communication failures (retried on the next poll) from index failures
/// (fail-stop).
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Index(#[from] IndexError),
}
