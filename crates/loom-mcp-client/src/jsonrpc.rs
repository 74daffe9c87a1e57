// SPDX-License-Identifier: Apache-2.0
//! Minimal JSON-RPC 2.0 types for MCP's `tools/list` and `tools/call`
//! methods, plus request/response id correlation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub jsonrpc: &'static str,
    pub id: String,
    pub method: String,
    pub params: Value,
}

impl Request {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema", rename = "inputSchema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

/// Find the response matching `id` among out-of-order frames, as the stdio
/// and streamable transports may interleave notifications with replies.
pub fn correlate<'a>(frames: &'a [Response], id: &str) -> Option<&'a Response> {
    frames.iter().find(|r| r.id.as_deref() == Some(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_with_jsonrpc_version() {
        let req = Request::new("1", "tools/list", Value::Null);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"tools/list\""));
    }

    #[test]
    fn response_parses_success() {
        let raw = r#"{"id":"1","result":{"tools":[]}}"#;
        let resp: Response = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.id.as_deref(), Some("1"));
        assert!(resp.error.is_none());
    }

    #[test]
    fn response_parses_error() {
        let raw = r#"{"id":"1","error":{"code":-32601,"message":"Method not found"}}"#;
        let resp: Response = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.error.unwrap().code, -32601);
    }

    #[test]
    fn correlate_finds_matching_id_among_out_of_order_frames() {
        let frames = vec![
            Response { id: Some("2".into()), result: None, error: None },
            Response { id: Some("1".into()), result: Some(Value::Bool(true)), error: None },
        ];
        let found = correlate(&frames, "1").unwrap();
        assert_eq!(found.result, Some(Value::Bool(true)));
    }

    #[test]
    fn correlate_returns_none_when_absent() {
        let frames = vec![Response { id: Some("9".into()), result: None, error: None }];
        assert!(correlate(&frames, "1").is_none());
    }

    #[test]
    fn tool_descriptor_defaults_missing_schema_to_object() {
        let raw = r#"{"name":"search","description":"search things"}"#;
        let desc: McpToolDescriptor = serde_json::from_str(raw).unwrap();
        assert_eq!(desc.input_schema, serde_json::json!({"type": "object"}));
    }
}
