// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crew_tools::{Tool, ToolCall, ToolOutput};

use crate::protocol::McpToolDef;
use crate::supervisor::SupervisorHandle;
use crate::McpError;

/// Registry-facing proxy for one MCP-hosted tool.
///
/// Holds a weak supervisor handle (the registry must not keep the supervisor
/// alive) and marshals arguments over the server's stdio transport.  Any
/// transport-level failure surfaces as a "server unavailable" error result;
/// the supervisor has already unregistered the dead server's tools by the
/// time the model sees it.
pub struct McpProxyTool {
    supervisor: SupervisorHandle,
    server_id: String,
    def: McpToolDef,
    namespaced_name: String,
    timeout: Duration,
}

impl McpProxyTool {
    pub fn new(
        supervisor: SupervisorHandle,
        server_id: String,
        def: McpToolDef,
        namespaced_name: String,
        timeout: Duration,
    ) -> Self {
        Self { supervisor, server_id, def, namespaced_name, timeout }
    }

    fn unavailable(&self, call_id: &str) -> ToolOutput {
        ToolOutput::err(
            call_id,
            format!("mcp server '{}' unavailable", self.server_id),
        )
    }
}

#[async_trait]
impl Tool for McpProxyTool {
    fn name(&self) -> &str {
        &self.namespaced_name
    }

    fn description(&self) -> &str {
        &self.def.description
    }

    fn parameters_schema(&self) -> Value {
        self.def.input_schema.clone()
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(supervisor) = self.supervisor.upgrade() else {
            return self.unavailable(&call.id);
        };
        match supervisor
            .call_tool(&self.server_id, &self.def.name, call.args.clone())
            .await
        {
            Ok(result) => {
                if result.is_error {
                    ToolOutput::err(&call.id, result.to_text())
                } else {
                    ToolOutput::ok(&call.id, result.to_text())
                }
            }
            Err(McpError::ServerDown(_) | McpError::Transport(_)) => self.unavailable(&call.id),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn proxy() -> McpProxyTool {
        McpProxyTool::new(
            SupervisorHandle::new(),
            "fs".into(),
            McpToolDef {
                name: "read".into(),
                description: "Read a file".into(),
                input_schema: json!({"type": "object"}),
            },
            "fs.read".into(),
            Duration::from_secs(120),
        )
    }

    #[test]
    fn proxy_exposes_namespaced_name() {
        let p = proxy();
        assert_eq!(p.name(), "fs.read");
        assert_eq!(p.description(), "Read a file");
        assert_eq!(p.timeout(), Some(Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn dead_supervisor_reads_as_unavailable() {
        let p = proxy();
        let call = ToolCall { id: "c1".into(), name: "fs.read".into(), args: json!({}) };
        let out = p.execute(&call).await;
        assert!(out.is_error);
        assert_eq!(out.content, "mcp server 'fs' unavailable");
    }
}
