// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Durable conversation storage: one JSON file per conversation.
//!
//! Snapshots happen after every assistant turn, so a write must never leave a
//! torn file behind: content goes to a temp file in the same directory, is
//! fsynced, then renamed over the target.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::Conversation;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot encode conversation: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("no such conversation: {0}")]
    NotFound(String),

    #[error("no such turn: {0}")]
    UnknownTurn(usize),
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io { path: path.to_path_buf(), source }
}

/// Listing entry: metadata without the message bodies.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationMeta {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

/// File-per-conversation store rooted at one directory.
pub struct ConversationStore {
    dir: PathBuf,
}

impl ConversationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Write the conversation atomically (temp file, fsync, rename).
    pub fn save(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let mut encoded = serde_json::to_vec_pretty(conversation)?;
        encoded.push(b'\n');

        let target = self.path_for(&conversation.id);
        let tmp = self.dir.join(format!("{}.json.tmp", conversation.id));
        {
            let mut file = fs::File::create(&tmp).map_err(|e| io_err(&tmp, e))?;
            file.write_all(&encoded).map_err(|e| io_err(&tmp, e))?;
            file.sync_all().map_err(|e| io_err(&tmp, e))?;
        }
        fs::rename(&tmp, &target).map_err(|e| io_err(&target, e))?;
        debug!(id = %conversation.id, path = %target.display(), "conversation saved");
        Ok(())
    }

    /// Metadata of every stored conversation, newest first.  Unreadable
    /// files are skipped with a warning rather than failing the listing.
    pub fn list(&self) -> Result<Vec<ConversationMeta>, StoreError> {
        let mut out = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(raw) => match serde_json::from_str::<ConversationMeta>(&raw) {
                    Ok(meta) => out.push(meta),
                    Err(e) => warn!(path = %path.display(), error = %e,
                        "skipping unreadable conversation file"),
                },
                Err(e) => warn!(path = %path.display(), error = %e,
                    "skipping unreadable conversation file"),
            }
        }
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    /// Load a conversation by id.
    pub fn load(&self, id: &str) -> Result<Conversation, StoreError> {
        let path = self.path_for(id);
        let raw = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(id.to_string())
            } else {
                io_err(&path, e)
            }
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Remove conversations last updated before `now - horizon`.  Returns
    /// how many files were removed.
    pub fn prune(&self, horizon: Duration) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - horizon;
        let mut removed = 0;
        for meta in self.list()? {
            if meta.updated_at < cutoff {
                let path = self.path_for(&meta.id);
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e,
                        "could not prune conversation"),
                }
            }
        }
        if removed > 0 {
            info!(removed, "pruned old conversations");
        }
        Ok(removed)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
