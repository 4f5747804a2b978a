// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::Utc;
use tracing::{debug, warn};

use crew_config::AgentConfig;
use crew_model::{Message, ProviderAdapter};
use crew_tools::ToolRegistry;

/// One agent: a named prompt/tool configuration with a private history.
///
/// The history is owned exclusively by the agent; the only cross-agent path
/// is the explicit transfer projection performed by the manager between
/// turns.
#[derive(Debug)]
pub struct Agent {
    pub name: String,
    pub description: String,
    system_prompt_template: String,
    pub tool_names: Vec<String>,
    pub temperature: Option<f32>,
    pub remote_endpoint: Option<String>,
    pub history: Vec<Message>,
    active: bool,
    tools_registered: bool,
}

impl Agent {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            name: config.name.clone(),
            description: config.description.clone(),
            system_prompt_template: config.system_prompt.clone(),
            tool_names: config.tools.clone(),
            temperature: config.temperature,
            remote_endpoint: config.remote_endpoint.clone(),
            history: Vec::new(),
            active: false,
            tools_registered: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_remote(&self) -> bool {
        self.remote_endpoint.is_some()
    }

    /// Render the system prompt template.  `{current_date}` becomes the
    /// current UTC date as `YYYY-MM-DD`.
    pub fn render_system_prompt(&self) -> String {
        self.system_prompt_template
            .replace("{current_date}", &Utc::now().format("%Y-%m-%d").to_string())
    }

    /// Install this agent on an adapter: system prompt, temperature, and its
    /// tool schemas (replacing whatever was registered before).
    ///
    /// A tool name that no longer resolves is skipped with a warning — the
    /// configuration was validated at startup, so this only happens when an
    /// MCP server died in the meantime.
    pub fn activate(&mut self, adapter: &mut dyn ProviderAdapter, tools: &ToolRegistry) {
        adapter.set_system_prompt(&self.render_system_prompt());
        adapter.set_temperature(self.temperature);
        adapter.clear_tools();
        for name in &self.tool_names {
            match tools.schema(name) {
                Some(schema) => adapter.register_tool(crew_model::ToolSchema {
                    name: schema.name,
                    description: schema.description,
                    parameters: schema.parameters,
                }),
                None => warn!(agent = %self.name, tool = %name,
                    "tool is not registered, skipping"),
            }
        }
        self.active = true;
        self.tools_registered = true;
        debug!(agent = %self.name, tools = self.tool_names.len(), "agent activated");
    }

    /// Remove this agent's installation from the adapter.
    pub fn deactivate(&mut self, adapter: &mut dyn ProviderAdapter) {
        adapter.clear_tools();
        self.active = false;
        self.tools_registered = false;
        debug!(agent = %self.name, "agent deactivated");
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
