// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
/// Errors raised by the model layer: adapter construction, registry lookups,
/// and the initial phase of a stream.  Transient retry is an adapter-internal
/// concern; everything surfaced here is terminal for the current operation.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("missing credentials: {0} is not set")]
    MissingCredentials(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("network error talking to {provider}: {message}")]
    Network { provider: String, message: String },

    #[error("authentication rejected by {provider}: {message}")]
    Auth { provider: String, message: String },

    #[error("rate limited by {provider}: {message}")]
    RateLimit { provider: String, message: String },

    #[error("model not found on {provider}: {model}")]
    ModelNotFound { provider: String, model: String },

    #[error("{provider} error {status}: {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },
}

impl ProviderError {
    /// Classify a non-success HTTP status into the taxonomy.
    pub(crate) fn from_status(provider: &str, model: &str, status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Auth { provider: provider.to_string(), message: body },
            404 => Self::ModelNotFound {
                provider: provider.to_string(),
                model: model.to_string(),
            },
            429 => Self::RateLimit { provider: provider.to_string(), message: body },
            _ => Self::Api {
                provider: provider.to_string(),
                status,
                message: body,
            },
        }
    }
}
