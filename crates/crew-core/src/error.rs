// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use crew_config::ConfigError;
use crew_model::ProviderError;
use crew_store::StoreError;

/// Handoff failures.  A missing target fails the whole turn; bad indices
/// never get here — they are dropped during projection.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("unknown target agent: {0}")]
    UnknownTarget(String),

    #[error("invalid transfer arguments: {0}")]
    InvalidArguments(String),

    #[error("no agent is active to transfer from")]
    NoActiveAgent,

    #[error("remote transfer failed: {0}")]
    Remote(String),
}

/// Errors surfaced by the orchestration core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Operation illegal in the engine's current state; the history is
    /// untouched and the caller shows this as a control response.
    #[error("{0}")]
    State(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The stream failed after it was opened.
    #[error("stream failed: {0}")]
    Stream(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
