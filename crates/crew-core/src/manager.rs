// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crew_config::{AgentConfig, ConfigError, GlobalConfig};
use crew_model::{
    adapter_for, EventStream, Message, ModelEntry, ModelRegistry, ProviderAdapter,
    ThinkingSetting,
};
use crew_tools::ToolRegistry;

use crate::agent::Agent;
use crate::error::{CoreError, TransferError};

/// Client side of the A2A wire, implemented by the server crate.  Passed in
/// as a capability handle so the core never depends on HTTP machinery.
#[async_trait]
pub trait RemoteAgentClient: Send + Sync {
    /// Open an event stream for a task posted to a remote agent.
    async fn stream_task(
        &self,
        endpoint: &str,
        agent: &str,
        task: &str,
        relevant_messages: Vec<Message>,
    ) -> Result<EventStream, TransferError>;
}

/// Registry of agents, the current-agent pointer, and the provider adapter
/// they run against.
///
/// Exactly one agent is active on the adapter at a time; every path that
/// changes the current agent deactivates the previous one first.
pub struct AgentManager {
    agents: Vec<Agent>,
    current: Option<usize>,
    adapter: Box<dyn ProviderAdapter>,
    models: Arc<ModelRegistry>,
    tools: Arc<ToolRegistry>,
    config: Arc<GlobalConfig>,
    remote: Option<Arc<dyn RemoteAgentClient>>,
}

impl AgentManager {
    /// Build the population from declarative config and activate nothing.
    ///
    /// Tool references are resolved here: an agent naming a tool the
    /// registry does not know is a configuration error (exit code 1
    /// territory, not a runtime surprise).
    pub fn new(
        agent_configs: &[AgentConfig],
        models: Arc<ModelRegistry>,
        tools: Arc<ToolRegistry>,
        config: Arc<GlobalConfig>,
    ) -> Result<Self, CoreError> {
        for ac in agent_configs {
            for tool in &ac.tools {
                if !tools.contains(tool) {
                    return Err(ConfigError::UnknownTool {
                        agent: ac.name.clone(),
                        tool: tool.clone(),
                    }
                    .into());
                }
            }
        }
        let entry = models.current();
        let adapter = adapter_for(&entry, &models, &config)?;
        info!(model = %entry.id, provider = %entry.provider, agents = agent_configs.len(),
            "agent manager ready");
        Ok(Self {
            agents: agent_configs.iter().map(Agent::from_config).collect(),
            current: None,
            adapter,
            models,
            tools,
            config,
            remote: None,
        })
    }

    /// Like [`AgentManager::new`] but with an explicit adapter instead of
    /// one resolved from the registry's current model.  Used by tests that
    /// drive the engine with scripted adapters.
    pub fn with_adapter(
        agent_configs: &[AgentConfig],
        adapter: Box<dyn ProviderAdapter>,
        models: Arc<ModelRegistry>,
        tools: Arc<ToolRegistry>,
        config: Arc<GlobalConfig>,
    ) -> Result<Self, CoreError> {
        let mut manager = Self::new(agent_configs, models, tools, config)?;
        manager.adapter = adapter;
        Ok(manager)
    }

    /// Install the A2A client used for remote agents.
    pub fn set_remote_client(&mut self, client: Arc<dyn RemoteAgentClient>) {
        self.remote = Some(client);
    }

    pub fn remote_client(&self) -> Option<Arc<dyn RemoteAgentClient>> {
        self.remote.clone()
    }

    // ── Lookup ────────────────────────────────────────────────────────────────

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name.clone()).collect()
    }

    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn agent_mut(&mut self, name: &str) -> Option<&mut Agent> {
        self.agents.iter_mut().find(|a| a.name == name)
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.agents.iter().position(|a| a.name == name)
    }

    pub fn current_name(&self) -> Option<String> {
        self.current.map(|i| self.agents[i].name.clone())
    }

    pub fn current_agent(&self) -> Option<&Agent> {
        self.current.map(|i| &self.agents[i])
    }

    pub fn current_agent_mut(&mut self) -> Option<&mut Agent> {
        let i = self.current?;
        Some(&mut self.agents[i])
    }

    pub fn adapter(&self) -> &dyn ProviderAdapter {
        self.adapter.as_ref()
    }

    pub fn current_model(&self) -> ModelEntry {
        self.models.current()
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    // ── Activation ────────────────────────────────────────────────────────────

    /// Make `name` the current agent: deactivate the previous one, install
    /// the new one on the adapter.  Callers guarantee no turn is running.
    pub fn select(&mut self, name: &str) -> Result<(), CoreError> {
        let idx = self
            .index_of(name)
            .ok_or_else(|| TransferError::UnknownTarget(name.to_string()))?;
        if let Some(prev) = self.current {
            if prev != idx {
                self.agents[prev].deactivate(self.adapter.as_mut());
            }
        }
        self.agents[idx].activate(self.adapter.as_mut(), &self.tools);
        self.current = Some(idx);
        debug!(agent = %name, "agent selected");
        Ok(())
    }

    /// Forward a thinking request to the adapter.
    pub fn set_thinking(&mut self, setting: ThinkingSetting) -> bool {
        self.adapter.set_thinking(setting)
    }

    /// Switch to another model (and possibly provider).
    ///
    /// The adapter is rebuilt for the new entry; the current agent moves
    /// with it — deactivated on the old adapter, reactivated (tools
    /// re-registered) on the new one.  Histories are canonical, so the wire
    /// translation difference is handled per stream by the normalizer.
    pub fn switch_model(&mut self, model_id: &str) -> Result<ModelEntry, CoreError> {
        let entry = self.models.set_current(model_id)?;
        let new_adapter = adapter_for(&entry, &self.models, &self.config)?;
        if let Some(idx) = self.current {
            self.agents[idx].deactivate(self.adapter.as_mut());
        }
        self.adapter = new_adapter;
        if let Some(idx) = self.current {
            self.agents[idx].activate(self.adapter.as_mut(), &self.tools);
        }
        info!(model = %entry.id, provider = %entry.provider, "model switched");
        Ok(entry)
    }

    // ── Transfer ──────────────────────────────────────────────────────────────

    /// Project a history slice onto the target and hand over control.
    ///
    /// The target's new history is exactly: its rendered system prompt, the
    /// selected source messages (bad indices dropped silently), and a
    /// synthetic user message carrying the task.  The source history is not
    /// touched.  Transfers chain; there is no return.
    pub fn transfer(
        &mut self,
        target_name: &str,
        task: &str,
        relevant_messages: &[i64],
    ) -> Result<(), TransferError> {
        let source_idx = self.current.ok_or(TransferError::NoActiveAgent)?;
        let target_idx = self
            .index_of(target_name)
            .ok_or_else(|| TransferError::UnknownTarget(target_name.to_string()))?;

        let projected = {
            let source = &self.agents[source_idx];
            let target = &self.agents[target_idx];
            let mut history = vec![Message::system(target.render_system_prompt())];
            for &idx in relevant_messages {
                match usize::try_from(idx).ok().and_then(|i| source.history.get(i)) {
                    Some(msg) => history.push(msg.clone()),
                    None => debug!(index = idx, source = %source.name,
                        "dropping out-of-range transfer index"),
                }
            }
            history.push(Message::user(task));
            history
        };

        if source_idx != target_idx {
            self.agents[source_idx].deactivate(self.adapter.as_mut());
        }
        let target = &mut self.agents[target_idx];
        target.history = projected;
        target.activate(self.adapter.as_mut(), &self.tools);
        self.current = Some(target_idx);
        info!(from = %self.agents[source_idx].name, to = %target_name, "transfer complete");
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crew_tools::{AgentScope, ToolSource};
    use std::sync::Arc;

    fn agent_config(name: &str, tools: &[&str]) -> AgentConfig {
        AgentConfig {
            name: name.into(),
            description: String::new(),
            tools: tools.iter().map(|s| s.to_string()).collect(),
            system_prompt: format!("You are {name}."),
            temperature: None,
            remote_endpoint: None,
        }
    }

    fn manager_with(configs: &[AgentConfig]) -> AgentManager {
        let config = Arc::new(GlobalConfig::default());
        let models = Arc::new(ModelRegistry::from_config(&config).unwrap());
        models.set_current("mock-model").unwrap();
        let tools = Arc::new(ToolRegistry::new());
        tools
            .register(
                Arc::new(crate::transfer::TransferTool),
                ToolSource::Builtin,
                AgentScope::All,
            )
            .unwrap();
        AgentManager::new(configs, models, tools, config).unwrap()
    }

    #[test]
    fn unknown_tool_in_agent_is_a_config_error() {
        let config = Arc::new(GlobalConfig::default());
        let models = Arc::new(ModelRegistry::from_config(&config).unwrap());
        models.set_current("mock-model").unwrap();
        let tools = Arc::new(ToolRegistry::new());
        let err = AgentManager::new(
            &[agent_config("A", &["no_such_tool"])],
            models,
            tools,
            config,
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            CoreError::Config(ConfigError::UnknownTool { agent, tool })
                if agent == "A" && tool == "no_such_tool"
        ));
    }

    #[test]
    fn select_activates_exactly_one_agent() {
        let mut mgr = manager_with(&[agent_config("A", &[]), agent_config("B", &[])]);
        mgr.select("A").unwrap();
        assert!(mgr.agent("A").unwrap().is_active());
        mgr.select("B").unwrap();
        assert!(!mgr.agent("A").unwrap().is_active());
        assert!(mgr.agent("B").unwrap().is_active());
        let active = mgr.agents().iter().filter(|a| a.is_active()).count();
        assert_eq!(active, 1);
        assert_eq!(mgr.current_name().as_deref(), Some("B"));
    }

    #[test]
    fn select_unknown_agent_fails() {
        let mut mgr = manager_with(&[agent_config("A", &[])]);
        assert!(mgr.select("Ghost").is_err());
    }

    #[test]
    fn transfer_projects_history_and_moves_control() {
        let mut mgr = manager_with(&[
            agent_config("Router", &["transfer"]),
            agent_config("Coder", &[]),
        ]);
        mgr.select("Router").unwrap();
        mgr.agent_mut("Router").unwrap().history = vec![
            Message::user("fix bug in foo.py"),
            Message::assistant("routing"),
        ];

        mgr.transfer("Coder", "fix bug in foo.py", &[0]).unwrap();

        let coder = mgr.agent("Coder").unwrap();
        assert_eq!(coder.history.len(), 3);
        assert_eq!(coder.history[0].role, crew_model::Role::System);
        assert_eq!(coder.history[1].text(), "fix bug in foo.py");
        assert_eq!(coder.history[2].role, crew_model::Role::User);
        assert_eq!(coder.history[2].text(), "fix bug in foo.py");
        assert_eq!(mgr.current_name().as_deref(), Some("Coder"));
        assert!(coder.is_active());
        assert!(!mgr.agent("Router").unwrap().is_active());
    }

    #[test]
    fn transfer_leaves_source_history_unchanged() {
        let mut mgr = manager_with(&[
            agent_config("Router", &["transfer"]),
            agent_config("Coder", &[]),
        ]);
        mgr.select("Router").unwrap();
        mgr.agent_mut("Router").unwrap().history =
            vec![Message::user("a"), Message::assistant("b")];
        let before = mgr.agent("Router").unwrap().history.clone();

        mgr.transfer("Coder", "task", &[0, 1]).unwrap();

        assert_eq!(mgr.agent("Router").unwrap().history, before);
    }

    #[test]
    fn transfer_drops_out_of_range_and_negative_indices() {
        let mut mgr = manager_with(&[
            agent_config("Router", &["transfer"]),
            agent_config("Coder", &[]),
        ]);
        mgr.select("Router").unwrap();
        mgr.agent_mut("Router").unwrap().history = vec![Message::user("only")];

        mgr.transfer("Coder", "task", &[-3, 0, 99]).unwrap();

        // System prompt + history[0] + task.
        assert_eq!(mgr.agent("Coder").unwrap().history.len(), 3);
    }

    #[test]
    fn transfer_to_unknown_target_fails() {
        let mut mgr = manager_with(&[agent_config("Router", &["transfer"])]);
        mgr.select("Router").unwrap();
        let err = mgr.transfer("Ghost", "task", &[]).unwrap_err();
        assert!(matches!(err, TransferError::UnknownTarget(t) if t == "Ghost"));
    }

    #[test]
    fn transfer_replaces_previous_target_history() {
        let mut mgr = manager_with(&[
            agent_config("Router", &["transfer"]),
            agent_config("Coder", &[]),
        ]);
        mgr.select("Router").unwrap();
        mgr.agent_mut("Coder").unwrap().history = vec![Message::user("stale context")];

        mgr.transfer("Coder", "fresh task", &[]).unwrap();

        let coder = mgr.agent("Coder").unwrap();
        assert!(coder.history.iter().all(|m| m.text() != "stale context"));
    }

    #[test]
    fn switch_model_keeps_current_agent_active() {
        let mut mgr = manager_with(&[agent_config("A", &[])]);
        mgr.select("A").unwrap();
        // mock → mock is a provider-preserving switch; the agent must end up
        // active on the rebuilt adapter.
        let entry = mgr.switch_model("mock-model").unwrap();
        assert_eq!(entry.provider, "mock");
        assert!(mgr.agent("A").unwrap().is_active());
    }
}
