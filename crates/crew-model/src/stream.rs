// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;
use std::str::FromStr;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A lazy, forward-only sequence of [`StreamEvent`]s.
///
/// The boxed stream owns the underlying HTTP response; dropping the handle
/// releases the connection and any partial state on every exit path,
/// including cancellation.
pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamEvent>> + Send>>;

/// One streamed event from a provider adapter.
///
/// This is the uniform contract every adapter translates its vendor wire
/// format into.  The enum is serializable because the A2A endpoint relays it
/// verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A chunk of assistant text.
    TextDelta(String),
    /// A chunk of reasoning text.
    ThinkingDelta(String),
    /// The integrity signature closing the current thinking block.  Opaque;
    /// must be preserved verbatim and never shown or logged as plain text.
    ThinkingSignature(String),
    /// The model opened a tool call.
    ToolCallStart { id: String, name: String },
    /// A fragment of the call's JSON arguments.
    ToolCallArgsDelta { id: String, partial_json: String },
    /// The call's arguments are complete.  A parse failure fails this one
    /// call (`ToolArgs::Malformed`), never the stream.
    ToolCallEnd { id: String, name: String, args: ToolArgs },
    /// Token usage and the cost computed from the model's catalog prices.
    UsageUpdate {
        input_tokens: u32,
        output_tokens: u32,
        cost_usd: f64,
    },
    /// The stream finished.
    Stop(StopReason),
}

/// Terminal state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Error,
}

/// Accumulated tool-call arguments, parsed or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolArgs {
    Parsed(Value),
    Malformed { raw: String, error: String },
}

impl ToolArgs {
    /// Parse an accumulated JSON argument string.  An empty string parses as
    /// the empty object — several providers emit no delta for nullary calls.
    pub fn from_raw(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::Parsed(Value::Object(Default::default()));
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(v) => Self::Parsed(v),
            Err(e) => Self::Malformed {
                raw: raw.to_string(),
                error: e.to_string(),
            },
        }
    }
}

// ─── Thinking negotiation ─────────────────────────────────────────────────────

/// Requested thinking mode, as negotiated via `/think`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingSetting {
    #[default]
    Off,
    /// Token budget for budget-based providers.  Minimum 1024; smaller
    /// values are raised silently with a warning.
    Budget(u32),
    /// Effort level for effort-based providers.
    Effort(ThinkingEffort),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingEffort {
    Low,
    Medium,
    High,
}

impl FromStr for ThinkingSetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" | "none" | "off" => Ok(Self::Off),
            "low" => Ok(Self::Effort(ThinkingEffort::Low)),
            "medium" => Ok(Self::Effort(ThinkingEffort::Medium)),
            "high" => Ok(Self::Effort(ThinkingEffort::High)),
            other => other
                .parse::<u32>()
                .map(Self::Budget)
                .map_err(|_| format!("expected a token budget, a level (low/medium/high), 0, or none — got {other:?}")),
        }
    }
}

impl std::fmt::Display for ThinkingSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Budget(n) => write!(f, "{n} tokens"),
            Self::Effort(ThinkingEffort::Low) => write!(f, "low"),
            Self::Effort(ThinkingEffort::Medium) => write!(f, "medium"),
            Self::Effort(ThinkingEffort::High) => write!(f, "high"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_args_parses_valid_json() {
        let args = ToolArgs::from_raw(r#"{"query": "go"}"#);
        assert_eq!(args, ToolArgs::Parsed(json!({"query": "go"})));
    }

    #[test]
    fn tool_args_empty_string_is_empty_object() {
        assert_eq!(ToolArgs::from_raw(""), ToolArgs::Parsed(json!({})));
        assert_eq!(ToolArgs::from_raw("  "), ToolArgs::Parsed(json!({})));
    }

    #[test]
    fn tool_args_malformed_keeps_raw() {
        match ToolArgs::from_raw(r#"{"query": "#) {
            ToolArgs::Malformed { raw, error } => {
                assert_eq!(raw, r#"{"query": "#);
                assert!(!error.is_empty());
            }
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn stream_event_round_trips_through_json() {
        let events = vec![
            StreamEvent::TextDelta("hi".into()),
            StreamEvent::ThinkingSignature("c2ln".into()),
            StreamEvent::ToolCallEnd {
                id: "t1".into(),
                name: "web_search".into(),
                args: ToolArgs::Parsed(json!({"q": "x"})),
            },
            StreamEvent::UsageUpdate { input_tokens: 10, output_tokens: 5, cost_usd: 0.001 },
            StreamEvent::Stop(StopReason::ToolUse),
        ];
        for ev in events {
            let json = serde_json::to_string(&ev).unwrap();
            let back: StreamEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(back, ev, "mismatch for {json}");
        }
    }

    #[test]
    fn thinking_setting_parses_budget_and_levels() {
        assert_eq!("2048".parse::<ThinkingSetting>(), Ok(ThinkingSetting::Budget(2048)));
        assert_eq!("none".parse::<ThinkingSetting>(), Ok(ThinkingSetting::Off));
        assert_eq!("0".parse::<ThinkingSetting>(), Ok(ThinkingSetting::Off));
        assert_eq!(
            "high".parse::<ThinkingSetting>(),
            Ok(ThinkingSetting::Effort(ThinkingEffort::High))
        );
        assert!("max".parse::<ThinkingSetting>().is_err());
    }
}
