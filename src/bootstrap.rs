// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Startup wiring: configs → registries → supervisor → session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

use crew_a2a::A2aClient;
use crew_config::{load_agents_file, load_global_config, AgentConfig, AgentsFile, GlobalConfig};
use crew_core::{AgentManager, ChatSession, TransferTool};
use crew_mcp::{load_manifest, McpReconnectTool, McpSupervisor};
use crew_model::ModelRegistry;
use crew_store::ConversationStore;
use crew_tools::{
    builtin::{WebFetchTool, WebSearchTool},
    AgentScope, ToolRegistry, ToolSource,
};

#[derive(Debug, Default)]
pub struct BootstrapOptions {
    pub config_path: Option<PathBuf>,
    pub agent_config: Option<PathBuf>,
    pub mcp_config: Option<PathBuf>,
    pub provider: Option<String>,
}

/// Everything a front-end needs to run conversations.
pub struct Runtime {
    pub session: ChatSession,
    pub mcp: Option<Arc<McpSupervisor>>,
    pub config: Arc<GlobalConfig>,
}

/// Build the full runtime: global config, model registry, tool registry with
/// builtins, MCP servers, agents, store, and an initialized session with the
/// first agent selected.
pub async fn bootstrap(opts: BootstrapOptions) -> anyhow::Result<Runtime> {
    let config = Arc::new(load_global_config(opts.config_path.as_deref())?);
    let models = Arc::new(ModelRegistry::from_config(&config)?);
    if let Some(provider) = &opts.provider {
        models.set_current_provider(provider)?;
    }

    let tools = Arc::new(ToolRegistry::new());
    tools
        .register(Arc::new(TransferTool), ToolSource::Builtin, AgentScope::All)
        .context("registering transfer tool")?;
    tools
        .register(
            Arc::new(WebSearchTool::new(config.api_key("TAVILY_API_KEY"))),
            ToolSource::Builtin,
            AgentScope::All,
        )
        .context("registering web_search")?;
    tools
        .register(
            Arc::new(WebFetchTool::default()),
            ToolSource::Builtin,
            AgentScope::All,
        )
        .context("registering web_fetch")?;

    let mcp = match &opts.mcp_config {
        Some(path) => {
            let manifest = load_manifest(path)?;
            let supervisor = McpSupervisor::new(
                manifest,
                Arc::clone(&tools),
                Duration::from_secs(config.tool_timeout_secs),
            );
            supervisor.launch_all().await;
            tools
                .register(
                    Arc::new(McpReconnectTool::new(Arc::downgrade(&supervisor))),
                    ToolSource::Builtin,
                    AgentScope::All,
                )
                .context("registering mcp_reconnect")?;
            Some(supervisor)
        }
        None => None,
    };

    let agents_file = match &opts.agent_config {
        Some(path) => load_agents_file(path)?,
        None => default_agents(),
    };

    let store = Arc::new(ConversationStore::new(conversation_dir(&config))?);
    if let Err(e) = store.prune(chrono::Duration::days(config.prune_after_days as i64)) {
        warn!(error = %e, "conversation pruning failed");
    }

    let mut manager = AgentManager::new(
        &agents_file.agents,
        models,
        tools,
        Arc::clone(&config),
    )?;
    manager.set_remote_client(Arc::new(A2aClient::new()));

    let mut session = ChatSession::new(manager, store);
    session.select_agent(&agents_file.agents[0].name)?;

    Ok(Runtime { session, mcp, config })
}

fn conversation_dir(config: &GlobalConfig) -> PathBuf {
    config.conversation_dir.clone().unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("crew")
            .join("conversations")
    })
}

/// The stock population when no agents file is given: one general assistant
/// with the builtin tools.
fn default_agents() -> AgentsFile {
    AgentsFile {
        agents: vec![AgentConfig {
            name: "Assistant".into(),
            description: "General-purpose assistant".into(),
            tools: vec!["web_search".into(), "web_fetch".into()],
            system_prompt: "You are a helpful assistant. Today is {current_date}.".into(),
            temperature: None,
            remote_endpoint: None,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_agents_reference_builtin_tools_only() {
        let agents = default_agents();
        assert_eq!(agents.agents.len(), 1);
        for tool in &agents.agents[0].tools {
            assert!(["web_search", "web_fetch"].contains(&tool.as_str()));
        }
    }
}
