// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! A2A: expose each local agent over HTTP and call remote ones.
//!
//! Every local agent is reachable at `<base-url>/<agent-name>`.  A POST with
//! a task envelope runs the task against that agent and streams canonical
//! [`StreamEvent`]s back as newline-delimited JSON.  Authentication is a
//! deployment concern and intentionally absent here.

mod client;
mod server;

pub use client::A2aClient;
pub use server::{serve, A2aConfig};

use serde::{Deserialize, Serialize};

use crew_model::Message;

/// The request body accepted by `POST /<agent-name>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task: String,
    /// Context messages the caller projects into the agent's turn.
    #[serde(default)]
    pub relevant_messages: Vec<Message>,
}

/// One row of the `GET /agents` listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub description: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips() {
        let envelope = TaskEnvelope {
            task: "summarize".into(),
            relevant_messages: vec![Message::user("context")],
        };
        let json = serde_json::to_string(&envelope).unwrap();
        let back: TaskEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.task, "summarize");
        assert_eq!(back.relevant_messages.len(), 1);
    }

    #[test]
    fn envelope_relevant_messages_default_empty() {
        let back: TaskEnvelope = serde_json::from_str(r#"{"task":"x"}"#).unwrap();
        assert!(back.relevant_messages.is_empty());
    }
}
