//! RPC wire frames
//!
//! Requests carry a method name, the channel prefix and a positional
//! argument array; responses carry either a result or a named error:
//!
//! ```json
//! { "method": "send_transfer", "prefix": "peer.t.", "args": [ ... ] }
//! { "result": true }
//! { "error": { "name": "NotAcceptedError", "message": "..." } }
//! ```

use crate::types::PluginError;
use serde::{Deserialize, Serialize};

/// Method names understood by the dispatch layer
pub mod methods {
    pub const SEND_TRANSFER: &str = "send_transfer";
    pub const SEND_MESSAGE: &str = "send_message";
    pub const SEND_REQUEST: &str = "send_request";
    pub const FULFILL_CONDITION: &str = "fulfill_condition";
    pub const REJECT_INCOMING_TRANSFER: &str = "reject_incoming_transfer";
    pub const EXPIRE_TRANSFER: &str = "expire_transfer";
    pub const GET_LIMIT: &str = "get_limit";
    pub const GET_BALANCE: &str = "get_balance";
    pub const GET_INFO: &str = "get_info";
    pub const GET_FULFILLMENT: &str = "get_fulfillment";
}

/// An RPC request frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Method name (see [`methods`])
    pub method: String,

    /// Channel prefix the call belongs to
    pub prefix: String,

    /// Positional arguments
    pub args: Vec<serde_json::Value>,
}

/// The `error` body of a failed response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorBody {
    /// Stable error name (see [`PluginError::wire_name`])
    pub name: String,

    /// Human-readable message
    pub message: String,
}

/// An RPC response frame: a result or a named error
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcResponse {
    /// Successful call
    Result { result: serde_json::Value },
    /// Failed call
    Error { error: RpcErrorBody },
}

impl RpcResponse {
    /// Wrap a successful result
    pub fn from_result(result: serde_json::Value) -> Self {
        RpcResponse::Result { result }
    }

    /// Wrap an error with its wire name
    pub fn from_error(error: &PluginError) -> Self {
        RpcResponse::Error {
            error: RpcErrorBody {
                name: error.wire_name().to_string(),
                message: error.to_string(),
            },
        }
    }

    /// Unwrap into the caller's result type
    pub fn into_result(self) -> Result<serde_json::Value, PluginError> {
        match self {
            RpcResponse::Result { result } => Ok(result),
            RpcResponse::Error { error } => Err(PluginError::from_wire(&error.name, &error.message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_frame_shape() {
        let request = RpcRequest {
            method: methods::SEND_TRANSFER.to_string(),
            prefix: "peer.t.".to_string(),
            args: vec![serde_json::json!({"id": "x"})],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["method"], "send_transfer");
        assert_eq!(json["prefix"], "peer.t.");
        assert!(json["args"].is_array());
    }

    #[test]
    fn test_response_result_roundtrip() {
        let response = RpcResponse::from_result(serde_json::json!(true));
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"result":true}"#);

        let parsed: RpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.into_result().unwrap(), serde_json::json!(true));
    }

    #[test]
    fn test_response_error_roundtrip() {
        let error = PluginError::not_accepted("balance exceeds maximum");
        let json = serde_json::to_string(&RpcResponse::from_error(&error)).unwrap();

        let parsed: RpcResponse = serde_json::from_str(&json).unwrap();
        let back = parsed.into_result().unwrap_err();
        assert!(matches!(back, PluginError::NotAccepted { .. }));
        assert!(back.to_string().contains("balance exceeds maximum"));
    }
}
