//! JSON-RPC 2.0 message types
//!
//! One JSON object per WebSocket text frame. Ids are echoed verbatim;
//! only pre-parse failures answer with a null id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC error code: malformed JSON
pub const PARSE_ERROR: i64 = -32700;
/// JSON-RPC error code: not a valid request object
pub const INVALID_REQUEST: i64 = -32600;
/// JSON-RPC error code: unknown method / no route
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC error code: internal failure
pub const INTERNAL_ERROR: i64 = -32603;

/// Incoming request or notification
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub jsonrpc: String,
    /// Absent for notifications
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    /// Parse a single frame. `Err` carries the -32700 response to send.
    pub fn parse(frame: &str) -> std::result::Result<Self, Response> {
        match serde_json::from_str::<Request>(frame) {
            Ok(req) if req.method.is_empty() => {
                Err(Response::error(Value::Null, INVALID_REQUEST, "invalid request"))
            }
            Ok(req) => Ok(req),
            Err(e) => Err(Response::error(
                Value::Null,
                PARSE_ERROR,
                &format!("parse error: {}", e),
            )),
        }
    }

    /// Whether this is a notification (no id, no reply expected)
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Outgoing response
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Error member of a response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl Response {
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: &str) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.to_string(),
            }),
        }
    }

    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            // A response we built ourselves always serializes; keep the
            // connection alive if it somehow does not.
            format!(
                r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":{},"message":"serialization failure"}}}}"#,
                INTERNAL_ERROR
            )
        })
    }
}

/// Build a notification frame (no id)
pub fn notification(method: &str, params: Value) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request_echoes_id() {
        let req = Request::parse(r#"{"jsonrpc":"2.0","id":7,"method":"initialize"}"#).unwrap();
        assert_eq!(req.id, Some(json!(7)));
        assert_eq!(req.method, "initialize");
        assert!(!req.is_notification());
    }

    #[test]
    fn test_parse_notification() {
        let req =
            Request::parse(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn test_parse_error_has_null_id() {
        let resp = Request::parse("{not json").unwrap_err();
        assert_eq!(resp.id, Value::Null);
        assert_eq!(resp.error.as_ref().unwrap().code, PARSE_ERROR);
    }

    #[test]
    fn test_missing_method_is_parse_error() {
        let resp = Request::parse(r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert_eq!(resp.error.as_ref().unwrap().code, PARSE_ERROR);
    }

    #[test]
    fn test_empty_method_is_invalid_request() {
        let resp = Request::parse(r#"{"jsonrpc":"2.0","id":1,"method":""}"#).unwrap_err();
        assert_eq!(resp.error.as_ref().unwrap().code, INVALID_REQUEST);
    }

    #[test]
    fn test_response_frames() {
        let ok = Response::result(json!(3), json!({"x": 1}));
        let frame: Value = serde_json::from_str(&ok.to_frame()).unwrap();
        assert_eq!(frame["id"], json!(3));
        assert_eq!(frame["result"]["x"], json!(1));
        assert!(frame.get("error").is_none());

        let err = Response::error(json!("abc"), METHOD_NOT_FOUND, "Method not found");
        let frame: Value = serde_json::from_str(&err.to_frame()).unwrap();
        assert_eq!(frame["id"], json!("abc"));
        assert_eq!(frame["error"]["code"], json!(METHOD_NOT_FOUND));
    }

    #[test]
    fn test_notification_has_no_id() {
        let frame: Value =
            serde_json::from_str(&notification("initialized", json!({"a": 1}))).unwrap();
        assert!(frame.get("id").is_none());
        assert_eq!(frame["method"], json!("initialized"));
    }
}
