// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! JSON-RPC message types for the MCP stdio wire.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self { jsonrpc: "2.0", id, method: method.to_string(), params }
    }
}

#[derive(Debug, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
}

impl JsonRpcNotification {
    pub fn new(method: &str) -> Self {
        Self { jsonrpc: "2.0", method: method.to_string() }
    }
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl JsonRpcResponse {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Parameters of the `initialize` request.
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "clientInfo": {
            "name": "crew",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "capabilities": {},
    })
}

/// A tool offered by a server, as returned by `tools/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<McpToolDef>,
}

/// One content item of a `tools/call` result.  Only text is interpreted;
/// anything else contributes a placeholder so counts stay honest.
#[derive(Debug, Deserialize)]
pub struct McpContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<McpContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Flatten the content items to a single text blob.
    pub fn to_text(&self) -> String {
        self.content
            .iter()
            .map(|c| match (&c.kind[..], &c.text) {
                (_, Some(text)) => text.clone(),
                (kind, None) => format!("[{kind} content]"),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_to_jsonrpc_2() {
        let req = JsonRpcRequest::new(7, "tools/list", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":7"));
        assert!(!json.contains("params"));
    }

    #[test]
    fn tools_list_result_parses_input_schema() {
        let raw = r#"{"tools":[{"name":"read","description":"Read a file",
            "inputSchema":{"type":"object","properties":{"path":{"type":"string"}}}}]}"#;
        let result: ToolsListResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.tools.len(), 1);
        assert_eq!(result.tools[0].name, "read");
        assert!(result.tools[0].input_schema["properties"]["path"].is_object());
    }

    #[test]
    fn call_result_flattens_text_content() {
        let raw = r#"{"content":[{"type":"text","text":"line 1"},{"type":"text","text":"line 2"}]}"#;
        let result: ToolCallResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.to_text(), "line 1\nline 2");
        assert!(!result.is_error);
    }

    #[test]
    fn call_result_honours_is_error_flag() {
        let raw = r#"{"content":[{"type":"text","text":"denied"}],"isError":true}"#;
        let result: ToolCallResult = serde_json::from_str(raw).unwrap();
        assert!(result.is_error);
    }

    #[test]
    fn non_text_content_leaves_a_marker() {
        let raw = r#"{"content":[{"type":"image"}]}"#;
        let result: ToolCallResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.to_text(), "[image content]");
    }

    #[test]
    fn initialize_params_carry_protocol_version() {
        let params = initialize_params();
        assert_eq!(params["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(params["clientInfo"]["name"], "crew");
    }
}
