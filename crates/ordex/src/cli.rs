use clap::Parser;

fn parse_nonzero_u32(s: &str) -> Result<u32, String> {
    let n: u32 = s.parse().map_err(|e| format!("{e}"))?;
    if n == 0 {
        return Err("value must be at least 1".to_string());
    }
    Ok(n)
}

/// Ordex — satoshi-range index over a Bitcoin full node, with a JSON-RPC
/// query surface.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Maintain the satoshi index. When off, no database is opened and every
    /// query fails with "satoshi index is not enabled".
    #[arg(long, env = "ORDEX_ENABLE_INDEX")]
    pub enable_index: bool,

    /// Physically delete spent entries once they fall behind the prune
    /// horizon. Saves disk; locateordinal becomes unavailable.
    #[arg(long, env = "ORDEX_PRUNE_MODE")]
    pub prune_mode: bool,

    /// Keep spent entries with a spent marker instead of deleting them.
    /// Required for locateordinal. Mutually exclusive with --prune-mode.
    #[arg(long, env = "ORDEX_REWRITE_SPENT_MODE")]
    pub rewrite_spent_mode: bool,

    /// Blocks a spent entry survives before deletion in prune mode. A reorg
    /// deeper than this requires a reindex.
    #[arg(long, default_value = "6", value_parser = parse_nonzero_u32)]
    pub prune_horizon: u32,

    /// Directory holding the index database.
    #[arg(long, default_value = "ordex-db", env = "ORDEX_DB_DIR")]
    pub db_dir: std::path::PathBuf,

    /// Bitcoin Core RPC URL.
    #[arg(long, default_value = "http://127.0.0.1:8332", env = "ORDEX_RPC_URL")]
    pub rpc_url: String,

    /// RPC username (optional; not needed for cookie-less local setups).
    #[arg(long, env = "ORDEX_RPC_USER")]
    pub rpc_user: Option<String>,

    /// RPC password.
    #[arg(long, env = "ORDEX_RPC_PASS")]
    pub rpc_pass: Option<String>,

    /// Address to bind the query server to.
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: String,

    /// Port to listen on.
    #[arg(long, default_value = "3090")]
    pub port: u16,

    /// Seconds between polls of the node's chain tip.
    #[arg(long, default_value = "5")]
    pub poll_interval_secs: u64,
}
