// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("duplicate agent name: {0}")]
    DuplicateAgent(String),

    #[error("agent {agent} references unknown tool: {tool}")]
    UnknownTool { agent: String, tool: String },

    #[error("no agents defined in the agent configuration")]
    NoAgents,

    #[error("custom provider {0} must have type \"openai_compatible\"")]
    UnsupportedProviderType(String),

    #[error("custom provider {0} lists no models")]
    EmptyCustomProvider(String),
}
