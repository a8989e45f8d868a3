use std::path::PathBuf;
use std::sync::Once;
use std::{env, fs};

use ordex_core::rpc::{HttpNodeClient, NodeRpc};
use ordex_core::{Cancel, IndexMode, IndexOptions, SatIndex};

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ordex_core=debug")),
            )
            .with_target(true)
            .try_init();
    });
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires local regtest bitcoind with mined blocks"]
async fn regtest_catch_up_indexes_to_the_node_tip() {
    init_tracing();

    let rpc_url = env::var("ORDEX_TEST_RPC_URL").expect("ORDEX_TEST_RPC_URL must be set");
    let rpc_user = env::var("ORDEX_TEST_RPC_USER").expect("ORDEX_TEST_RPC_USER must be set");
    let rpc_pass = env::var("ORDEX_TEST_RPC_PASS").expect("ORDEX_TEST_RPC_PASS must be set");

    let rpc = HttpNodeClient::new(&rpc_url, Some(&rpc_user), Some(&rpc_pass));

    eprintln!("[itest] checking get_blockchain_info against {rpc_url}");
    let info = rpc
        .get_blockchain_info()
        .await
        .expect("regtest get_blockchain_info must succeed");
    assert_eq!(info.chain, "regtest");
    assert!(
        info.blocks >= 1,
        "regtest must have mined at least one block before running index checks"
    );

    let db_dir: PathBuf =
        env::temp_dir().join(format!("ordex-regtest-{}", std::process::id()));
    let _ = fs::remove_dir_all(&db_dir);
    let index = SatIndex::open(
        &db_dir,
        IndexOptions {
            mode: IndexMode::RewriteSpent,
            prune_horizon: 6,
        },
    )
    .expect("index must open");

    let applied = ordex_core::sync::catch_up(&rpc, &index)
        .await
        .expect("regtest catch-up must succeed");
    eprintln!("[itest] connected {applied} blocks");

    let best = index
        .best_block()
        .expect("best block must be readable")
        .expect("index must have a tip after catch-up");
    let node_tip = rpc.get_block_count().await.expect("block count");
    assert_eq!(u64::from(best.height), node_tip, "index must reach the node tip");

    // Ordinal 0 was minted by the genesis coinbase and must be locatable.
    let holders = index
        .outputs_containing(0, &Cancel::new())
        .expect("scan must succeed");
    assert!(!holders.is_empty(), "ordinal 0 must have a holder");
    index
        .current_location(0, &Cancel::new())
        .expect("ordinal 0 must have exactly one unspent holder");

    let _ = fs::remove_dir_all(&db_dir);
}
