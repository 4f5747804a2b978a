// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

/// Events the turn engine emits towards the front-end.
///
/// Deltas are delivered with `try_send` on a bounded channel: a lagging UI
/// loses display chunks, never history.  Everything else is sent reliably.
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// A chunk of assistant text.
    TextDelta(String),
    /// A chunk of reasoning text; only shown when the UI subscribes.
    ThinkingDelta(String),
    /// A tool call is about to execute.
    ToolCallStarted { id: String, name: String, args: Value },
    /// A tool call finished (successfully or not).
    ToolCallFinished {
        id: String,
        name: String,
        output: String,
        is_error: bool,
    },
    /// Control moved to another agent.
    AgentTransferred { from: String, to: String, task: String },
    /// Token usage and cost for the stream that just finished.
    Usage {
        input_tokens: u32,
        output_tokens: u32,
        cost_usd: f64,
    },
    /// The turn is over; the engine is idle again.
    TurnCompleted,
    /// A user-visible, non-fatal notice (persistence retry, truncation...).
    Notice(String),
}
