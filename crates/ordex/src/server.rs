use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, CorsLayer};

use bitcoin::{OutPoint, Txid};
use ordex_core::{Cancel, QueryError, SatIndex};

// ==============================================================================
// Application State
// ==============================================================================

pub struct AppState {
    /// `None` when the index is disabled; queries then fail with
    /// "satoshi index is not enabled".
    pub index: Option<Arc<SatIndex>>,
}

type SharedState = Arc<AppState>;

// ==============================================================================
// JSON-RPC Error Codes
// ==============================================================================

/// Bad argument (malformed txid, negative vout, wrong parameter types).
const RPC_INVALID_PARAMETER: i64 = -8;
/// Unknown method, disabled index, or a query the current mode cannot serve.
const RPC_METHOD_NOT_FOUND: i64 = -32601;
/// Not found and internal failures.
const RPC_MISC_ERROR: i64 = -5;
/// Request body is not valid JSON-RPC.
const RPC_PARSE_ERROR: i64 = -32700;

struct RpcFailure {
    code: i64,
    message: String,
}

impl RpcFailure {
    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: RPC_INVALID_PARAMETER,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            code: RPC_MISC_ERROR,
            message: message.into(),
        }
    }
}

fn map_query_error(err: QueryError) -> RpcFailure {
    match err {
        QueryError::NotFound => RpcFailure {
            code: RPC_MISC_ERROR,
            message: err.to_string(),
        },
        QueryError::IndexDisabled | QueryError::ModeRequired => RpcFailure {
            code: RPC_METHOD_NOT_FOUND,
            message: err.to_string(),
        },
        QueryError::Cancelled => RpcFailure::internal(err.to_string()),
        QueryError::Store(_) | QueryError::Corrupt(_) => {
            tracing::error!(error = %err, "query failed against the index store");
            RpcFailure::internal(err.to_string())
        }
    }
}

// ==============================================================================
// Router
// ==============================================================================

pub fn build_router(state: AppState, origin: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::exact(
            origin.parse().expect("valid origin header value"),
        ))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/", post(rpc))
        .layer(cors)
        .with_state(Arc::new(state))
}

// ==============================================================================
// Handlers
// ==============================================================================

async fn health(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let indexed_height = state
        .index
        .as_ref()
        .and_then(|index| index.best_block().ok().flatten())
        .map(|best| best.height);
    Json(serde_json::json!({ "status": "ok", "indexed_height": indexed_height }))
}

#[derive(Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: serde_json::Value,
    method: String,
    #[serde(default)]
    params: Vec<serde_json::Value>,
}

/// Single JSON-RPC 2.0 endpoint carrying the three index queries.
async fn rpc(State(state): State<SharedState>, body: String) -> Json<serde_json::Value> {
    let request: RpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            return Json(error_response(
                serde_json::Value::Null,
                RpcFailure {
                    code: RPC_PARSE_ERROR,
                    message: format!("parse error: {e}"),
                },
            ))
        }
    };

    let id = request.id.clone();
    match dispatch(&state, request).await {
        Ok(result) => Json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        })),
        Err(failure) => Json(error_response(id, failure)),
    }
}

fn error_response(id: serde_json::Value, failure: RpcFailure) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": failure.code, "message": failure.message },
    })
}

async fn dispatch(
    state: &SharedState,
    request: RpcRequest,
) -> Result<serde_json::Value, RpcFailure> {
    match request.method.as_str() {
        "getoutputranges" => get_output_ranges(state, &request.params).await,
        "findordinaloutputs" => find_ordinal_outputs(state, &request.params).await,
        "locateordinal" => locate_ordinal(state, &request.params).await,
        other => Err(RpcFailure {
            code: RPC_METHOD_NOT_FOUND,
            message: format!("method not found: {other}"),
        }),
    }
}

async fn get_output_ranges(
    state: &SharedState,
    params: &[serde_json::Value],
) -> Result<serde_json::Value, RpcFailure> {
    let txid = parse_txid(params, 0)?;
    let vout = parse_vout(params, 1)?;
    let index = require_index(state)?;

    let outpoint = OutPoint::new(txid, vout);
    let entry = run_query(move |_| index.output_ranges(&outpoint)).await?;
    serde_json::to_value(entry).map_err(|e| RpcFailure::internal(e.to_string()))
}

async fn find_ordinal_outputs(
    state: &SharedState,
    params: &[serde_json::Value],
) -> Result<serde_json::Value, RpcFailure> {
    let ordinal = parse_ordinal(params, 0)?;
    let index = require_index(state)?;

    let outputs = run_query(move |cancel| index.outputs_containing(ordinal, &cancel)).await?;
    serde_json::to_value(outputs).map_err(|e| RpcFailure::internal(e.to_string()))
}

async fn locate_ordinal(
    state: &SharedState,
    params: &[serde_json::Value],
) -> Result<serde_json::Value, RpcFailure> {
    let ordinal = parse_ordinal(params, 0)?;
    let index = require_index(state)?;

    let location = run_query(move |cancel| index.current_location(ordinal, &cancel)).await?;
    serde_json::to_value(location).map_err(|e| RpcFailure::internal(e.to_string()))
}

// ==============================================================================
// Query Execution
// ==============================================================================

/// Cancels the wrapped flag when dropped, so a client disconnect (which
/// drops the handler future) stops an in-flight scan at its next chunk
/// boundary instead of pinning it to completion.
struct CancelOnDrop(Cancel);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Run a (potentially scanning) query on the blocking pool.
async fn run_query<T, F>(query: F) -> Result<T, RpcFailure>
where
    T: Send + 'static,
    F: FnOnce(Cancel) -> Result<T, QueryError> + Send + 'static,
{
    let cancel = Cancel::new();
    let _guard = CancelOnDrop(cancel.clone());
    match tokio::task::spawn_blocking(move || query(cancel)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(map_query_error(err)),
        Err(join) => Err(RpcFailure::internal(format!("query task failed: {join}"))),
    }
}

fn require_index(state: &SharedState) -> Result<Arc<SatIndex>, RpcFailure> {
    state
        .index
        .clone()
        .ok_or_else(|| map_query_error(QueryError::IndexDisabled))
}

// ==============================================================================
// Parameter Parsing
// ==============================================================================

fn parse_txid(params: &[serde_json::Value], position: usize) -> Result<Txid, RpcFailure> {
    let value = params
        .get(position)
        .ok_or_else(|| RpcFailure::invalid_params("missing txid parameter"))?;
    let s = value
        .as_str()
        .ok_or_else(|| RpcFailure::invalid_params("txid must be a hex string"))?;
    s.parse()
        .map_err(|e| RpcFailure::invalid_params(format!("invalid txid: {e}")))
}

fn parse_vout(params: &[serde_json::Value], position: usize) -> Result<u32, RpcFailure> {
    let value = params
        .get(position)
        .ok_or_else(|| RpcFailure::invalid_params("missing vout parameter"))?;
    if value.as_i64().is_some_and(|n| n < 0) {
        return Err(RpcFailure::invalid_params("vout may not be negative"));
    }
    let n = value
        .as_u64()
        .ok_or_else(|| RpcFailure::invalid_params("vout must be an integer"))?;
    u32::try_from(n).map_err(|_| RpcFailure::invalid_params(format!("vout out of range: {n}")))
}

fn parse_ordinal(params: &[serde_json::Value], position: usize) -> Result<u64, RpcFailure> {
    let value = params
        .get(position)
        .ok_or_else(|| RpcFailure::invalid_params("missing ordinal parameter"))?;
    if value.as_i64().is_some_and(|n| n < 0) {
        return Err(RpcFailure::invalid_params("ordinal may not be negative"));
    }
    value
        .as_u64()
        .ok_or_else(|| RpcFailure::invalid_params("ordinal must be an integer"))
}
