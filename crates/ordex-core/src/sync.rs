//! Chain follower: keeps the index caught up with the node's active chain.
//!
//! On startup (and on every poll) the follower compares the indexed tip to
//! the node's chain. Blocks ahead of the tip are fetched and connected in
//! order; a hash mismatch at the indexed height means the chain reorganized,
//! and indexed blocks are disconnected one by one until the chains rejoin.
//!
//! The follower is the index's only writer. Apply errors are fail-stop for
//! the index alone: the follower halts, queries keep serving the last good
//! block, and the operator remedy is a reindex.

use std::sync::Arc;
use std::time::Duration;

use crate::engine::SatIndex;
use crate::error::{IndexError, SyncError};
use crate::rpc::NodeRpc;

/// Walk the index from its persisted best block to the node's current tip.
/// Returns the number of blocks connected.
pub async fn catch_up(rpc: &dyn NodeRpc, index: &SatIndex) -> Result<u64, SyncError> {
    let mut applied = 0;
    loop {
        let tip = rpc.get_block_count().await?;
        let best = index.best_block()?;

        if let Some(best) = best {
            // The indexed tip must still be on the node's active chain;
            // otherwise rewind until the chains rejoin.
            if u64::from(best.height) > tip
                || rpc.get_block_hash(u64::from(best.height)).await? != best.hash
            {
                rewind_tip(rpc, index).await?;
                continue;
            }
            if u64::from(best.height) == tip {
                return Ok(applied);
            }
            connect_next(rpc, index, best.height + 1).await?;
        } else {
            connect_next(rpc, index, 0).await?;
        }
        applied += 1;
    }
}

/// Poll the node forever, catching up after every interval.
pub async fn run(rpc: Arc<dyn NodeRpc>, index: Arc<SatIndex>, poll_interval: Duration) {
    loop {
        match catch_up(rpc.as_ref(), &index).await {
            Ok(applied) if applied > 0 => tracing::debug!(applied, "caught up with node tip"),
            Ok(_) => {}
            Err(SyncError::Rpc(e)) => {
                tracing::warn!(error = %e, "node RPC failed; retrying on next poll");
            }
            Err(SyncError::Index(IndexError::NotAtTip { .. })) => {
                tracing::warn!("node tip moved mid-update; retrying on next poll");
            }
            Err(SyncError::Index(e)) => {
                tracing::error!(
                    error = %e,
                    "index update failed; halted at the last good block, reindex to recover"
                );
                return;
            }
        }
        tokio::time::sleep(poll_interval).await;
    }
}

async fn connect_next(rpc: &dyn NodeRpc, index: &SatIndex, height: u32) -> Result<(), SyncError> {
    let hash = rpc.get_block_hash(u64::from(height)).await?;
    let block = rpc.get_block(&hash).await?;
    index.connect_block(&block, height)?;
    tracing::info!(height, %hash, txs = block.txdata.len(), "indexed block");
    Ok(())
}

async fn rewind_tip(rpc: &dyn NodeRpc, index: &SatIndex) -> Result<(), SyncError> {
    let best = index
        .best_block()?
        .ok_or_else(|| IndexError::Corrupt("cannot rewind an empty index".into()))?;
    tracing::warn!(
        height = best.height,
        hash = %best.hash,
        "chain reorganization: disconnecting indexed tip"
    );
    let block = rpc.get_block(&best.hash).await?;
    index.disconnect_block(&block, best.height)?;
    Ok(())
}

// ==============================================================================
// Tests
// ==============================================================================
