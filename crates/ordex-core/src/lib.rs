//! Core library for **Ordex** — a satoshi-range index layered on a Bitcoin
//! full node.
//!
//! For every transaction output the index records the contiguous ranges of
//! satoshi ordinal numbers (mining-order sequence numbers, the first satoshi
//! ever mined being ordinal 0) the output holds. The crate provides the
//! range algebra, the per-block flow engine that moves ranges from spent
//! inputs to new outputs, the rocksdb-backed store with atomic per-block
//! batches, the reorg/pruning controller, the three read queries, and the
//! node RPC adapter used to catch up to the chain tip. It is intentionally
//! transport-agnostic: the [`rpc::NodeRpc`] trait can be backed by HTTP
//! JSON-RPC, a mock, or any future transport.

pub mod engine;
pub mod error;
pub mod query;
pub mod ranges;
pub mod rpc;
pub mod store;
pub mod subsidy;
pub mod sync;
pub mod types;

#[cfg(test)]
pub(crate) mod test_util;

pub use engine::{IndexOptions, SatIndex};
pub use error::{IndexError, QueryError, RpcError, SyncError};
pub use query::Cancel;
pub use ranges::{RangeList, SatRange};
pub use types::{BestBlock, IndexMode, OutputEntry};
