//! Node RPC abstraction layer.
//!
//! Defines the [`NodeRpc`] trait the chain follower consumes and provides
//! an HTTP JSON-RPC implementation ([`HttpNodeClient`]) plus a test mock
//! (`mock::MockNodeRpc`).

mod http;
#[cfg(test)]
pub mod mock;

pub use http::HttpNodeClient;

use async_trait::async_trait;
use bitcoin::{Block, BlockHash};
use serde::Deserialize;

use crate::error::RpcError;

/// Minimal trait covering the node RPC methods the index needs to catch up
/// to the chain tip and to fetch blocks for reorg rewinds.
///
/// Implementations are expected to handle authentication, connection
/// management, and response deserialization internally.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Height of the node's chain tip.
    async fn get_block_count(&self) -> Result<u64, RpcError>;

    /// Hash of the block at `height` on the node's active chain.
    async fn get_block_hash(&self, height: u64) -> Result<BlockHash, RpcError>;

    /// Fetch and decode a full block by hash.
    async fn get_block(&self, hash: &BlockHash) -> Result<Block, RpcError>;

    /// Fetch basic chain info (network, block count, pruning status).
    async fn get_blockchain_info(&self) -> Result<ChainInfo, RpcError>;
}

/// Basic chain information from `getblockchaininfo`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainInfo {
    pub chain: String,
    pub blocks: u64,
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: BlockHash,
    pub pruned: bool,
}
