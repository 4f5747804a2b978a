// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::McpError;

/// The MCP servers file: a JSON map keyed by server id.
pub type McpManifest = HashMap<String, McpServerConfig>;

/// One configured tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Display name; defaults to the map key.
    #[serde(default)]
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Agent names allowed to use this server's tools.  An empty list or a
    /// literal `"*"` entry exposes them to every agent.
    #[serde(default, rename = "enabledForAgents")]
    pub enabled_for_agents: Vec<String>,
}

impl McpServerConfig {
    /// Translate the allow-list into a registry scope.
    pub fn scope(&self) -> crew_tools::AgentScope {
        if self.enabled_for_agents.is_empty()
            || self.enabled_for_agents.iter().any(|a| a == "*")
        {
            crew_tools::AgentScope::All
        } else {
            crew_tools::AgentScope::agents(self.enabled_for_agents.iter().cloned())
        }
    }
}

/// Load the manifest from a JSON file.
pub fn load_manifest(path: &Path) -> Result<McpManifest, McpError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| McpError::Manifest(format!("cannot read {}: {e}", path.display())))?;
    let manifest: McpManifest = serde_json::from_str(&raw)
        .map_err(|e| McpError::Manifest(format!("malformed {}: {e}", path.display())))?;
    Ok(manifest)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
