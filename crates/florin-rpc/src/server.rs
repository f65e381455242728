//! The JSON-RPC endpoint.

use crate::error::{RPC_INVALID_REQUEST, RPC_METHOD_NOT_FOUND, RPC_PARSE_ERROR};
use crate::handlers::{generating, mining, staking};
use crate::{AppState, RpcError};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{debug, info};

/// Dispatch one JSON-RPC method call.
pub async fn dispatch(state: &AppState, method: &str, params: &[Value]) -> Result<Value, RpcError> {
    match method {
        "getnetworkhashps" => mining::get_network_hash_ps(state, params),
        "getmininginfo" => mining::get_mining_info(state, params),
        "getstakinginfo" => mining::get_staking_info(state, params),
        "getblocktemplate" => mining::get_block_template(state, params).await,
        "submitblock" => mining::submit_block(state, params),
        "submitheader" => mining::submit_header(state, params),
        "estimatefee" => mining::estimate_fee(state, params),
        "generatetoaddress" => generating::generate_to_address(state, params),
        "generatetodescriptor" => generating::generate_to_descriptor(state, params),
        "generateblock" => generating::generate_block_rpc(state, params),
        "staking" => staking::staking(state, params).await,
        "checkkernel" => staking::check_kernel_rpc(state, params),
        "generate" => Err(RpcError::new(
            RPC_METHOD_NOT_FOUND,
            "generate has been replaced by the -generate cli option. Refer to -help for more information.",
        )),
        other => Err(RpcError::method_not_found(other)),
    }
}

async fn handle_rpc(State(state): State<AppState>, body: Result<Json<Value>, axum::extract::rejection::JsonRejection>) -> Json<Value> {
    let Ok(Json(request)) = body else {
        return Json(json!({
            "result": Value::Null,
            "error": RpcError::new(RPC_PARSE_ERROR, "Parse error").to_value(),
            "id": Value::Null,
        }));
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let Some(method) = request.get("method").and_then(Value::as_str) else {
        return Json(json!({
            "result": Value::Null,
            "error": RpcError::new(RPC_INVALID_REQUEST, "Missing method").to_value(),
            "id": id,
        }));
    };
    let params = match request.get("params") {
        Some(Value::Array(values)) => values.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.clone()],
    };

    debug!(method, params = params.len(), "RPC call");
    match dispatch(&state, method, &params).await {
        Ok(result) => Json(json!({ "result": result, "error": Value::Null, "id": id })),
        Err(err) => Json(json!({ "result": Value::Null, "error": err.to_value(), "id": id })),
    }
}

/// Build the axum router serving the JSON-RPC endpoint at `/`.
pub fn build_router(state: AppState) -> Router {
    Router::new().route("/", post(handle_rpc)).with_state(state)
}

/// Serve JSON-RPC until the listener errors or the task is aborted.
pub async fn serve(bind: &str, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "RPC server listening");
    axum::serve(listener, build_router(state)).await
}
