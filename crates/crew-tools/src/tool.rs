// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier assigned by the provider (forwarded verbatim).
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

/// The result of executing a tool.
///
/// Failures are values, not errors: a failed execution returns
/// `is_error = true` and the turn continues — the model sees the error text
/// as the tool result and decides what to do next.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn err(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: message.into(),
            is_error: true,
        }
    }
}

/// A tool schema — mirrors `crew_model::ToolSchema` but keeps this crate
/// independent from the model crate.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Where a registered tool came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSource {
    Builtin,
    /// Republished from an MCP server; the string is the server id.
    Mcp(String),
}

/// Trait every builtin and proxied tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the arguments object.
    fn parameters_schema(&self) -> Value;
    /// Wall-clock limit the registry applies around `execute`.  `None`
    /// disables the limit; subprocess-backed tools override this.
    fn timeout(&self) -> Option<Duration> {
        None
    }
    /// Execute the tool.  Failures are reported via [`ToolOutput::err`].
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NoopTool;

    #[async_trait]
    impl Tool for NoopTool {
        fn name(&self) -> &str {
            "noop"
        }
        fn description(&self) -> &str {
            "does nothing"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, "done")
        }
    }

    #[test]
    fn default_timeout_is_none() {
        assert!(NoopTool.timeout().is_none());
    }

    #[test]
    fn ok_and_err_set_the_flag() {
        assert!(!ToolOutput::ok("1", "x").is_error);
        assert!(ToolOutput::err("1", "x").is_error);
    }

    #[tokio::test]
    async fn execute_carries_call_id() {
        let call = ToolCall { id: "abc".into(), name: "noop".into(), args: json!({}) };
        let out = NoopTool.execute(&call).await;
        assert_eq!(out.call_id, "abc");
    }
}
