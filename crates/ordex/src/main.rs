use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{eyre, WrapErr};

use ordex::{cli, server};
use ordex_core::rpc::{HttpNodeClient, NodeRpc};
use ordex_core::{IndexMode, IndexOptions, SatIndex};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    let mode = match (args.prune_mode, args.rewrite_spent_mode) {
        (true, true) => {
            return Err(eyre!(
                "--prune-mode and --rewrite-spent-mode are mutually exclusive"
            ))
        }
        (true, false) => IndexMode::Prune,
        (false, true) => IndexMode::RewriteSpent,
        (false, false) => IndexMode::Full,
    };

    let mut state = server::AppState { index: None };

    if args.enable_index {
        let index = Arc::new(
            SatIndex::open(
                &args.db_dir,
                IndexOptions {
                    mode,
                    prune_horizon: args.prune_horizon,
                },
            )
            .wrap_err("open satoshi index")?,
        );
        tracing::info!(%mode, db = %args.db_dir.display(), "satoshi index open");

        // Connect to the node RPC and verify the connection succeeds before
        // starting the follower and the server.
        let rpc: Arc<dyn NodeRpc> = Arc::new(HttpNodeClient::new(
            &args.rpc_url,
            args.rpc_user.as_deref(),
            args.rpc_pass.as_deref(),
        ));
        let chain_info = rpc
            .get_blockchain_info()
            .await
            .map_err(|err| eyre!("could not connect to RPC endpoint `{}`: {err}", args.rpc_url))
            .wrap_err("while attempting to connect to the node RPC")?;
        tracing::info!(
            chain = %chain_info.chain,
            blocks = chain_info.blocks,
            "connected to node"
        );
        if chain_info.pruned {
            tracing::warn!("node is pruned — deep catch-up or reorg rewinds may fail");
        }

        tokio::spawn(ordex_core::sync::run(
            rpc,
            index.clone(),
            Duration::from_secs(args.poll_interval_secs),
        ));
        state.index = Some(index);
    } else {
        tracing::warn!("satoshi index disabled; every query will fail with IndexDisabled");
    }

    let bind_addr = format!("{}:{}", args.bind, args.port);
    let origin = format!("http://{}:{}", args.bind, args.port);
    let router = server::build_router(state, &origin);

    if args.bind == "0.0.0.0" {
        tracing::warn!("server is bound to 0.0.0.0 — it is accessible from the network");
    }

    println!();
    println!("  Ordex is running:");
    println!("    JSON-RPC: http://{bind_addr}");
    println!();

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .context("bind TCP listener")?;

    tracing::info!("listening on {bind_addr}");
    axum::serve(listener, router)
        .await
        .context("run HTTP server")?;

    Ok(())
}
