// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crew_tools::{Tool, ToolCall, ToolOutput};

use crate::supervisor::SupervisorHandle;

/// Manual reconnect for a disconnected MCP server.
///
/// The supervisor never retries on its own, so this tool is the recovery
/// path after a crash: it re-spawns the process, redoes the handshake, and
/// republishes the server's tools.
pub struct McpReconnectTool {
    supervisor: SupervisorHandle,
}

impl McpReconnectTool {
    pub fn new(supervisor: SupervisorHandle) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl Tool for McpReconnectTool {
    fn name(&self) -> &str {
        "mcp_reconnect"
    }

    fn description(&self) -> &str {
        "Reconnect a disconnected MCP tool server by id and republish its tools."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "server": { "type": "string", "description": "The MCP server id to reconnect" }
            },
            "required": ["server"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(server) = call.args["server"].as_str() else {
            return ToolOutput::err(&call.id, "mcp_reconnect requires a \"server\" string");
        };
        let Some(supervisor) = self.supervisor.upgrade() else {
            return ToolOutput::err(&call.id, "mcp supervisor is not running");
        };
        match supervisor.connect(server).await {
            Ok(count) => ToolOutput::ok(
                &call.id,
                format!("reconnected mcp server '{server}' with {count} tools"),
            ),
            Err(e) => ToolOutput::err(&call.id, format!("reconnect failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_server_argument_is_an_error() {
        let tool = McpReconnectTool::new(SupervisorHandle::new());
        let call = ToolCall { id: "c".into(), name: "mcp_reconnect".into(), args: json!({}) };
        let out = tool.execute(&call).await;
        assert!(out.is_error);
        assert!(out.content.contains("server"));
    }
}
