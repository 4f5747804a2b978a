// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{AgentsFile, ConfigError, GlobalConfig};

/// Default location of the global config file:
/// `$XDG_CONFIG_HOME/crew/config.json`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("crew")
        .join("config.json")
}

/// Load the global JSON config.
///
/// A missing file is not an error — defaults apply — but an unreadable or
/// malformed file is.
pub fn load_global_config(path: Option<&Path>) -> Result<GlobalConfig, ConfigError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        debug!(path = %path.display(), "no global config file, using defaults");
        return Ok(GlobalConfig::default());
    }
    let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let cfg: GlobalConfig = serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.clone(),
        message: e.to_string(),
    })?;
    validate_global(&cfg)?;
    debug!(path = %path.display(), custom_providers = cfg.custom_llm_providers.len(),
        "global config loaded");
    Ok(cfg)
}

fn validate_global(cfg: &GlobalConfig) -> Result<(), ConfigError> {
    for p in &cfg.custom_llm_providers {
        if p.provider_type != "openai_compatible" {
            return Err(ConfigError::UnsupportedProviderType(p.name.clone()));
        }
        if p.available_models.is_empty() {
            return Err(ConfigError::EmptyCustomProvider(p.name.clone()));
        }
    }
    Ok(())
}

/// Load and validate the agents file (TOML).
///
/// Validation here covers what the file alone can prove: at least one agent
/// and unique names.  Tool-name resolution against the registry happens at
/// bootstrap, once the registry exists.
pub fn load_agents_file(path: &Path) -> Result<AgentsFile, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: AgentsFile = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    if file.agents.is_empty() {
        return Err(ConfigError::NoAgents);
    }
    let mut seen = HashSet::new();
    for agent in &file.agents {
        if !seen.insert(agent.name.as_str()) {
            return Err(ConfigError::DuplicateAgent(agent.name.clone()));
        }
    }
    Ok(file)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
