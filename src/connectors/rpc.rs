//! JSON-RPC 2.0 envelopes shared by the WebSocket and HTTP bindings.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ClientError;

#[derive(Debug, Serialize)]
pub(crate) struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

impl<'a> JsonRpcRequest<'a> {
    pub(crate) fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    /// Returns the result, or the node's error object as a [`ClientError`].
    pub(crate) fn into_result(self) -> Result<Value, ClientError> {
        if let Some(error) = self.error {
            return Err(ClientError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// Notification pushed by the node for an active subscription.
#[derive(Debug, Deserialize)]
pub(crate) struct SubscriptionNotification {
    pub params: NotificationParams,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NotificationParams {
    pub subscription: String,
    pub result: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = JsonRpcRequest::new(7, "eth_getBalance", serde_json::json!(["0xabc", "0x1"]));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 7);
        assert_eq!(json["method"], "eth_getBalance");
        assert_eq!(json["params"][1], "0x1");
    }

    #[test]
    fn test_error_response_becomes_rpc_error() {
        let resp: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"limit exceeded"}}"#,
        )
        .unwrap();
        match resp.into_result() {
            Err(ClientError::Rpc { code, message }) => {
                assert_eq!(code, -32005);
                assert_eq!(message, "limit exceeded");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
