// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod config;
mod protocol;
mod proxy;
mod reconnect;
mod supervisor;
mod transport;

pub use config::{load_manifest, McpManifest, McpServerConfig};
pub use protocol::{McpToolDef, ToolCallResult};
pub use proxy::McpProxyTool;
pub use reconnect::McpReconnectTool;
pub use supervisor::{McpSupervisor, ServerState, SupervisorHandle};
pub use transport::{StdioTransport, TransportError};

/// Errors specific to MCP operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("mcp transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("mcp protocol error: {0}")]
    Protocol(String),

    #[error("mcp server not found: {0}")]
    ServerNotFound(String),

    #[error("mcp server is down: {0}")]
    ServerDown(String),

    #[error("mcp manifest error: {0}")]
    Manifest(String),
}
