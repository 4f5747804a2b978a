// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should be enabled unless explicitly disabled need a named function.
fn default_true() -> bool {
    true
}

fn default_prune_days() -> u32 {
    30
}

fn default_tool_timeout() -> u64 {
    120
}

/// Process-wide configuration, read from a JSON file.
///
/// API keys configured here supersede environment variables of the same name
/// (`ANTHROPIC_API_KEY`, `OPENAI_API_KEY`, `GEMINI_API_KEY`, `GROQ_API_KEY`,
/// `DEEPINFRA_API_KEY`, `TAVILY_API_KEY`, `VOYAGE_API_KEY`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// API keys keyed by the canonical env-var name, e.g.
    /// `{"ANTHROPIC_API_KEY": "sk-ant-..."}`.
    #[serde(default)]
    pub api_keys: HashMap<String, String>,

    /// Additional OpenAI-compatible endpoints with their model lists.
    #[serde(default)]
    pub custom_llm_providers: Vec<CustomProvider>,

    /// Directory holding persisted conversations.  Defaults to the platform
    /// data directory (`~/.local/share/crew/conversations`).
    #[serde(default)]
    pub conversation_dir: Option<PathBuf>,

    /// Conversations older than this many days are removed by pruning.
    #[serde(default = "default_prune_days")]
    pub prune_after_days: u32,

    /// Timeout applied to subprocess-hosted (MCP) tool invocations, seconds.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
}

impl GlobalConfig {
    /// Resolve an API key by its canonical env-var name.
    ///
    /// Keys in the config file win over the process environment.
    pub fn api_key(&self, env_name: &str) -> Option<String> {
        if let Some(k) = self.api_keys.get(env_name) {
            return Some(k.clone());
        }
        std::env::var(env_name).ok()
    }
}

/// A user-configured OpenAI-compatible endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomProvider {
    /// Provider name used as the `provider` field of its models.
    pub name: String,
    /// Wire type.  Only `"openai_compatible"` is recognized.
    #[serde(rename = "type")]
    pub provider_type: String,
    pub api_base_url: String,
    /// Explicit key; prefer env vars in version-controlled files.
    #[serde(default)]
    pub api_key: Option<String>,
    pub default_model_id: String,
    #[serde(default = "default_true")]
    pub is_stream: bool,
    #[serde(default)]
    pub available_models: Vec<CustomModel>,
}

/// One model offered by a custom provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomModel {
    pub id: String,
    pub provider: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Capability names: `tool_use`, `vision`, `thinking`, `streaming`.
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub input_token_price_1m: f64,
    #[serde(default)]
    pub output_token_price_1m: f64,
}

/// The agents file (TOML): an ordered list of agent records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentsFile {
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

/// One declarative agent record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique agent name; selection, transfer, and the A2A path use it.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Tool names this agent may call.  Must match registry entries.
    #[serde(default)]
    pub tools: Vec<String>,
    /// System prompt template.  `{current_date}` is substituted at
    /// activation time as `YYYY-MM-DD`.
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Base URL of a remote A2A endpoint hosting this agent.  When set the
    /// agent has no local history; transfers are forwarded over HTTP.
    #[serde(default)]
    pub remote_endpoint: Option<String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
