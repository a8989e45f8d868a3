//! HTTP implementation of [`NodeRpc`] for Bitcoin Core compatible nodes.
//!
//! Issues JSON-RPC 2.0 calls over `reqwest` with optional basic auth.
//! Blocks are requested in raw form (`getblock` verbosity 0) and
//! consensus-decoded, so the index sees exactly the bytes the node
//! validated.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bitcoin::{Block, BlockHash};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::RpcError;

use super::{ChainInfo, NodeRpc};

/// HTTP-based node JSON-RPC client.
pub struct HttpNodeClient {
    client: reqwest::Client,
    url: String,
    auth: Option<(String, String)>,
    next_id: AtomicU64,
}

impl HttpNodeClient {
    /// Build a client for the node at `url`. Basic auth is enabled when both
    /// `user` and `pass` are given.
    pub fn new(url: &str, user: Option<&str>, pass: Option<&str>) -> Self {
        let auth = match (user, pass) {
            (Some(u), Some(p)) => Some((u.to_owned(), p.to_owned())),
            _ => None,
        };

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            // Raw blocks run to multiple megabytes; allow a slow fetch.
            .timeout(Duration::from_secs(120))
            .build()
            .expect("statically valid client configuration");

        Self {
            client,
            url: url.to_owned(),
            auth,
            next_id: AtomicU64::new(seed_request_id()),
        }
    }

    async fn rpc_call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some((user, pass)) = &self.auth {
            builder = builder.basic_auth(user, Some(pass));
        }

        debug!(method, id, "calling node rpc");
        let response = builder.send().await.map_err(RpcError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(RpcError::Transport)?;
        trace!(method, id, %status, body = %body, "node rpc replied");

        let reply: JsonRpcResponse = serde_json::from_str(&body).map_err(|e| {
            RpcError::InvalidResponse(format!("{method} reply is not JSON-RPC ({e}): {body}"))
        })?;
        if let Some(error) = reply.error {
            return Err(parse_jsonrpc_error(error));
        }
        Ok(reply.result.unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl NodeRpc for HttpNodeClient {
    async fn get_block_count(&self) -> Result<u64, RpcError> {
        let raw = self.rpc_call("getblockcount", Vec::new()).await?;
        raw.as_u64()
            .ok_or_else(|| RpcError::InvalidResponse(format!("non-numeric block count: {raw}")))
    }

    async fn get_block_hash(&self, height: u64) -> Result<BlockHash, RpcError> {
        let raw = self
            .rpc_call("getblockhash", vec![serde_json::json!(height)])
            .await?;
        let hash = raw
            .as_str()
            .ok_or_else(|| RpcError::InvalidResponse(format!("non-string block hash: {raw}")))?;
        hash.parse()
            .map_err(|e| RpcError::InvalidResponse(format!("invalid block hash `{hash}`: {e}")))
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<Block, RpcError> {
        let raw = self
            .rpc_call(
                "getblock",
                vec![serde_json::json!(hash.to_string()), serde_json::json!(0)],
            )
            .await?;
        let hex = raw
            .as_str()
            .ok_or_else(|| RpcError::InvalidResponse(format!("non-string block body: {raw}")))?;
        bitcoin::consensus::encode::deserialize_hex(hex)
            .map_err(|e| RpcError::InvalidResponse(format!("undecodable block {hash}: {e}")))
    }

    async fn get_blockchain_info(&self) -> Result<ChainInfo, RpcError> {
        let raw = self.rpc_call("getblockchaininfo", Vec::new()).await?;
        serde_json::from_value(raw).map_err(|e| {
            RpcError::InvalidResponse(format!("invalid getblockchaininfo result: {e}"))
        })
    }
}

// ==============================================================================
// JSON-RPC Protocol Types
// ==============================================================================

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
}

/// Convert the `error` member of a JSON-RPC reply into an [`RpcError`].
///
/// A well-formed node error carries an integer `code` and a string
/// `message`; anything else is reported raw as an invalid response.
fn parse_jsonrpc_error(error: serde_json::Value) -> RpcError {
    let code = error.get("code").and_then(serde_json::Value::as_i64);
    let message = error.get("message").and_then(serde_json::Value::as_str);
    match (code, message) {
        (Some(code), Some(message)) => RpcError::ServerError {
            code,
            message: message.to_owned(),
        },
        _ => RpcError::InvalidResponse(format!("malformed error object: {error}")),
    }
}

/// Request ids only need to be unique per connection; seeding from the clock
/// keeps them from repeating across restarts.
fn seed_request_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(1, |d| d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_jsonrpc_error_standard_shape() {
        let err = parse_jsonrpc_error(serde_json::json!({
            "code": -8,
            "message": "Block height out of range"
        }));
        assert!(matches!(
            err,
            RpcError::ServerError { code: -8, ref message } if message == "Block height out of range"
        ));
    }

    #[test]
    fn parse_jsonrpc_error_missing_code() {
        let err = parse_jsonrpc_error(serde_json::json!({ "message": "boom" }));
        assert!(matches!(err, RpcError::InvalidResponse(_)));
    }

    #[test]
    fn parse_jsonrpc_error_non_object() {
        let err = parse_jsonrpc_error(serde_json::json!("boom"));
        assert!(matches!(err, RpcError::InvalidResponse(_)));
    }
}
