//! Typed JSON-RPC errors.

use serde_json::{json, Value};
use thiserror::Error;

pub const RPC_MISC_ERROR: i64 = -1;
pub const RPC_TYPE_ERROR: i64 = -3;
pub const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
pub const RPC_OUT_OF_MEMORY: i64 = -7;
pub const RPC_INVALID_PARAMETER: i64 = -8;
pub const RPC_CLIENT_NOT_CONNECTED: i64 = -9;
pub const RPC_CLIENT_IN_INITIAL_DOWNLOAD: i64 = -10;
pub const RPC_DESERIALIZATION_ERROR: i64 = -22;
pub const RPC_VERIFY_ERROR: i64 = -25;
pub const RPC_INVALID_REQUEST: i64 = -32600;
pub const RPC_METHOD_NOT_FOUND: i64 = -32601;
pub const RPC_INTERNAL_ERROR: i64 = -32603;
pub const RPC_PARSE_ERROR: i64 = -32700;

/// A JSON-RPC error: numeric code plus message.
#[derive(Error, Debug, Clone)]
#[error("RPC error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(RPC_INVALID_PARAMETER, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RPC_INTERNAL_ERROR, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(RPC_METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    /// The JSON-RPC error object for a response body.
    pub fn to_value(&self) -> Value {
        json!({ "code": self.code, "message": self.message })
    }
}

/// Result type for RPC handlers.
pub type RpcResult<T> = Result<T, RpcError>;
