// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crew_model::Message;

use crate::StoreError;

const PREVIEW_CHARS: usize = 60;

/// One conversation: the per-agent canonical histories plus the turn log.
///
/// Histories are keyed by agent name.  Nothing in here is provider-specific;
/// the file on disk is exactly this struct as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Sortable id: UTC timestamp prefix plus a random suffix.
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub histories: BTreeMap<String, Vec<Message>>,
    #[serde(default)]
    pub turn_log: Vec<TurnMarker>,
}

/// A jump-back anchor recorded when a user turn starts.
///
/// `indices` holds, per participating agent, the history length immediately
/// after the turn's user message was appended (other agents are snapshotted
/// at their length at turn start).  Jumping truncates each history to its
/// recorded length, so the conversation resumes just past that user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnMarker {
    /// Agent that received the user message.
    pub agent: String,
    /// First line of the user message, for `/list`-style display.
    pub preview: String,
    pub indices: BTreeMap<String, usize>,
}

impl Conversation {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: new_conversation_id(now),
            title: String::new(),
            created_at: now,
            updated_at: now,
            histories: BTreeMap::new(),
            turn_log: Vec::new(),
        }
    }

    /// Agents with a recorded history.
    pub fn participating_agents(&self) -> Vec<String> {
        self.histories.keys().cloned().collect()
    }

    /// Derive the title from the first user input, once.
    pub fn set_title_from(&mut self, text: &str) {
        if self.title.is_empty() {
            self.title = preview(text);
        }
    }

    pub fn record_turn(&mut self, marker: TurnMarker) {
        self.turn_log.push(marker);
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Rewind to just past the user message of turn `turn` (0-based).
    ///
    /// Every agent recorded in the marker is truncated to its stored length;
    /// later turns disappear from the log.  Content after the cut is
    /// discarded for good — the next snapshot overwrites the file.
    pub fn jump(&mut self, turn: usize) -> Result<(), StoreError> {
        let marker = self
            .turn_log
            .get(turn)
            .cloned()
            .ok_or(StoreError::UnknownTurn(turn))?;
        for (agent, len) in &marker.indices {
            if let Some(history) = self.histories.get_mut(agent) {
                history.truncate(*len);
            }
        }
        self.turn_log.truncate(turn + 1);
        self.touch();
        Ok(())
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Sortable conversation id: `20240131T120000Z-1a2b3c4d`.
fn new_conversation_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.format("%Y%m%dT%H%M%SZ"), &suffix[..8])
}

/// First line of `text`, shortened for display.
pub fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= PREVIEW_CHARS {
        line.to_string()
    } else {
        let cut: String = line.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}…")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
