//! Shared test helpers for `ordex-core` unit tests.
//!
//! Consolidates the temp-directory guard used by store-backed tests and the
//! builder functions for synthetic blocks and transactions so that tests
//! across modules share a single source of truth for dummy data
//! construction.

use std::path::{Path, PathBuf};

use bitcoin::absolute::LockTime;
use bitcoin::block::Header;
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, Block, BlockHash, CompactTarget, OutPoint, ScriptBuf, Sequence, Transaction, TxIn,
    TxMerkleNode, TxOut, Txid, Witness,
};

// ==============================================================================
// Temp Directories
// ==============================================================================

/// A uniquely named directory under the system temp dir, removed on drop.
pub(crate) struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("ordex-test-{:016x}", rand::random::<u64>()));
        std::fs::create_dir_all(&path).expect("create temp dir");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

// ==============================================================================
// Txid Helpers
// ==============================================================================

/// Create a deterministic `Txid` from a single distinguishing byte.
pub(crate) fn txid_from_byte(b: u8) -> Txid {
    let mut bytes = [0u8; 32];
    bytes[0] = b;
    Txid::from_byte_array(bytes)
}

pub(crate) fn outpoint(b: u8, vout: u32) -> OutPoint {
    OutPoint::new(txid_from_byte(b), vout)
}

// ==============================================================================
// Transaction Builders
// ==============================================================================

/// A coinbase transaction with one output per entry of `values`.
///
/// The height is pushed into the script sig so coinbase txids differ across
/// heights, the way BIP 34 makes them differ on mainnet.
pub(crate) fn coinbase_tx(height: u32, values: &[u64]) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: bitcoin::script::Builder::new()
                .push_int(i64::from(height))
                .into_script(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: outputs_of(values),
    }
}

/// A transaction spending `inputs` into one output per entry of `values`.
pub(crate) fn spend_tx(inputs: &[OutPoint], values: &[u64]) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs
            .iter()
            .map(|op| TxIn {
                previous_output: *op,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs_of(values),
    }
}

fn outputs_of(values: &[u64]) -> Vec<TxOut> {
    values
        .iter()
        .map(|v| TxOut {
            value: Amount::from_sat(*v),
            script_pubkey: ScriptBuf::new(),
        })
        .collect()
}

// ==============================================================================
// Block Builders
// ==============================================================================

/// Assemble a block on top of `prev`. The merkle root is computed from the
/// transactions so blocks with different contents hash differently.
pub(crate) fn build_block(prev: BlockHash, height: u32, txdata: Vec<Transaction>) -> Block {
    let mut block = Block {
        header: Header {
            version: bitcoin::block::Version::TWO,
            prev_blockhash: prev,
            merkle_root: TxMerkleNode::all_zeros(),
            time: 1_231_006_505 + height,
            bits: CompactTarget::from_consensus(0x1d00ffff),
            nonce: height,
        },
        txdata,
    };
    if let Some(root) = block.compute_merkle_root() {
        block.header.merkle_root = root;
    }
    block
}

/// A genesis block whose single coinbase transaction has one output per
/// entry of `values`.
pub(crate) fn genesis_block(values: &[u64]) -> Block {
    build_block(BlockHash::all_zeros(), 0, vec![coinbase_tx(0, values)])
}
