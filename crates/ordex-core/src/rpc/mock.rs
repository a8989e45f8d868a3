//! Mock [`NodeRpc`] implementation for unit tests.
//!
//! Holds a synthetic chain as a vector of blocks indexed by height. The
//! chain can be swapped mid-test with [`MockNodeRpc::set_chain`] to simulate
//! a reorganization; replaced blocks stay fetchable by hash, the way a real
//! node keeps stale blocks on disk.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{Block, BlockHash};

use crate::error::RpcError;

use super::{ChainInfo, NodeRpc};

pub struct MockNodeRpc {
    chain: Mutex<Vec<Block>>,
    /// Blocks ever seen, by hash, so disconnected blocks remain fetchable.
    by_hash: Mutex<HashMap<BlockHash, Block>>,
}

impl MockNodeRpc {
    pub fn new(chain: Vec<Block>) -> Self {
        let by_hash = chain
            .iter()
            .map(|block| (block.block_hash(), block.clone()))
            .collect();
        Self {
            chain: Mutex::new(chain),
            by_hash: Mutex::new(by_hash),
        }
    }

    /// Replace the active chain, keeping old blocks fetchable by hash.
    pub fn set_chain(&self, chain: Vec<Block>) {
        let mut by_hash = self.by_hash.lock().expect("mock lock");
        for block in &chain {
            by_hash.insert(block.block_hash(), block.clone());
        }
        *self.chain.lock().expect("mock lock") = chain;
    }
}

#[async_trait]
impl NodeRpc for MockNodeRpc {
    async fn get_block_count(&self) -> Result<u64, RpcError> {
        let chain = self.chain.lock().expect("mock lock");
        Ok(chain.len().saturating_sub(1) as u64)
    }

    async fn get_block_hash(&self, height: u64) -> Result<BlockHash, RpcError> {
        let chain = self.chain.lock().expect("mock lock");
        chain
            .get(height as usize)
            .map(Block::block_hash)
            .ok_or(RpcError::ServerError {
                code: -8,
                message: "Block height out of range".into(),
            })
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<Block, RpcError> {
        let by_hash = self.by_hash.lock().expect("mock lock");
        by_hash.get(hash).cloned().ok_or(RpcError::ServerError {
            code: -5,
            message: "Block not found".into(),
        })
    }

    async fn get_blockchain_info(&self) -> Result<ChainInfo, RpcError> {
        let chain = self.chain.lock().expect("mock lock");
        Ok(ChainInfo {
            chain: "regtest".into(),
            blocks: chain.len().saturating_sub(1) as u64,
            best_block_hash: chain
                .last()
                .map(Block::block_hash)
                .unwrap_or_else(BlockHash::all_zeros),
            pruned: false,
        })
    }
}
