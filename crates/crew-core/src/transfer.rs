// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The `transfer` tool: the handoff contract between agents.
//!
//! The schema is what the model sees; the engine intercepts the call before
//! dispatch and routes it through the agent manager, so the handler below is
//! a stub that never runs in a live turn.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crew_tools::{Tool, ToolCall, ToolOutput};

pub const TRANSFER_TOOL: &str = "transfer";

/// Parsed arguments of a `transfer` call.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferRequest {
    pub target_agent: String,
    pub task: String,
    /// Indices into the source agent's history.  Negative and out-of-range
    /// entries are dropped during projection.
    #[serde(default)]
    pub relevant_messages: Vec<i64>,
}

/// Registry entry for the transfer tool.
pub struct TransferTool;

#[async_trait]
impl Tool for TransferTool {
    fn name(&self) -> &str {
        TRANSFER_TOOL
    }

    fn description(&self) -> &str {
        "Hand the conversation to another agent. Pass the task to perform and \
         the indices of your history messages the target needs as context."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "target_agent": {
                    "type": "string",
                    "description": "Name of the agent to hand control to"
                },
                "task": {
                    "type": "string",
                    "description": "What the target agent should do"
                },
                "relevant_messages": {
                    "type": "array",
                    "items": { "type": "integer", "minimum": 0 },
                    "description": "Indices of history messages to share with the target"
                }
            },
            "required": ["target_agent", "task"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        // Reached only when something other than the engine dispatches the
        // call (e.g. a direct registry invocation in tests).
        ToolOutput::ok(&call.id, "transfer is performed by the conversation runtime")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_full_arguments() {
        let v = json!({
            "target_agent": "Coder",
            "task": "fix bug in foo.py",
            "relevant_messages": [0, 2]
        });
        let req: TransferRequest = serde_json::from_value(v).unwrap();
        assert_eq!(req.target_agent, "Coder");
        assert_eq!(req.relevant_messages, vec![0, 2]);
    }

    #[test]
    fn relevant_messages_defaults_to_empty() {
        let v = json!({ "target_agent": "Coder", "task": "go" });
        let req: TransferRequest = serde_json::from_value(v).unwrap();
        assert!(req.relevant_messages.is_empty());
    }

    #[test]
    fn missing_target_is_a_parse_error() {
        let v = json!({ "task": "go" });
        assert!(serde_json::from_value::<TransferRequest>(v).is_err());
    }

    #[test]
    fn schema_requires_target_and_task() {
        let schema = TransferTool.parameters_schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("target_agent")));
        assert!(required.contains(&json!("task")));
    }
}
