// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Canonical message model ──────────────────────────────────────────────────

/// A single message in an agent's conversation history.
///
/// This is the provider-agnostic superset form: every adapter down-converts
/// it to its vendor wire shape at serialization time, and up-converts stream
/// output back into it.  Persistence, transfer, and the A2A wire all operate
/// on this record, never on vendor payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
    /// Set on tool-role messages so providers can match results to calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One content part of a [`Message`].
///
/// Binary payloads (`Image`, `Document`) carry base64 data so the canonical
/// form stays valid JSON end to end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    Image {
        mime: String,
        data: String,
    },
    Document {
        mime: String,
        data: String,
        name: String,
    },
    ToolCall {
        id: String,
        name: String,
        args: Value,
    },
    ToolResult {
        id: String,
        content: ToolResultContent,
        is_error: bool,
    },
    /// A provider-emitted reasoning trace.  When `signature` is present the
    /// block is cryptographically signed and must be replayed byte-for-byte
    /// on tool-use continuations.
    Thinking {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
}

/// Tool result content: plain text or a structured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Structured(Value),
}

impl ToolResultContent {
    /// Flatten to plain text.  Structured values are serialized; this is the
    /// lossy direction and callers log it at debug level where it matters.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Structured(v) => v.to_string(),
        }
    }
}

impl From<String> for ToolResultContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for ToolResultContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl Message {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            role,
            parts,
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Part::Text { text: text.into() }])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::Text { text: text.into() }])
    }

    pub fn user_with_parts(parts: Vec<Part>) -> Self {
        Self::new(Role::User, parts)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![Part::Text { text: text.into() }])
    }

    /// A tool-role message carrying one result for the given call id.
    pub fn tool_result(
        id: impl Into<String>,
        content: impl Into<ToolResultContent>,
        is_error: bool,
    ) -> Self {
        let id = id.into();
        let mut msg = Self::new(
            Role::Tool,
            vec![Part::ToolResult {
                id: id.clone(),
                content: content.into(),
                is_error,
            }],
        );
        msg.tool_call_id = Some(id);
        msg
    }

    /// The concatenated text of all `Text` parts.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for p in &self.parts {
            if let Part::Text { text } = p {
                out.push_str(text);
            }
        }
        out
    }

    /// The first `Text` part, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.parts.iter().find_map(|p| match p {
            Part::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }

    /// All tool-call parts as `(id, name, args)` tuples.
    pub fn tool_calls(&self) -> Vec<(&str, &str, &Value)> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolCall { id, name, args } => Some((id.as_str(), name.as_str(), args)),
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::ToolCall { .. }))
    }

    pub fn has_thinking(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::Thinking { .. }))
    }
}

// ─── Tool schema ──────────────────────────────────────────────────────────────

/// A tool schema as presented to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
