// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Session facade: one live conversation bound to an agent manager and a
//! turn engine.  The console REPL and the A2A server both drive this.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crew_model::{Message, Part, Role, ThinkingSetting};
use crew_store::{Conversation, ConversationMeta, ConversationStore};

use crate::engine::{TurnEngine, TurnOutcome};
use crate::error::CoreError;
use crate::events::UiEvent;
use crate::manager::AgentManager;

pub struct ChatSession {
    pub manager: AgentManager,
    engine: TurnEngine,
    pub conversation: Conversation,
    store: Arc<ConversationStore>,
}

impl ChatSession {
    pub fn new(manager: AgentManager, store: Arc<ConversationStore>) -> Self {
        Self {
            engine: TurnEngine::new(Arc::clone(manager.tools()), Arc::clone(&store)),
            manager,
            conversation: Conversation::new(),
            store,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.engine.is_idle()
    }

    fn ensure_idle(&self, what: &str) -> Result<(), CoreError> {
        if self.engine.is_idle() {
            Ok(())
        } else {
            Err(CoreError::State(format!("{what} is not possible mid-turn")))
        }
    }

    /// Run one user turn against the current agent.
    pub async fn run_turn(
        &mut self,
        input: Vec<Part>,
        tx: &mpsc::Sender<UiEvent>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, CoreError> {
        self.engine
            .run_turn(&mut self.manager, &mut self.conversation, input, tx, cancel)
            .await
    }

    /// Serve an A2A task: replace the agent's history with the projected
    /// context (rendered system prompt plus the caller's relevant messages)
    /// and run the task as a user turn.
    pub async fn run_remote_task(
        &mut self,
        agent_name: &str,
        task: &str,
        relevant_messages: Vec<Message>,
        tx: &mpsc::Sender<UiEvent>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, CoreError> {
        self.ensure_idle("a2a task")?;
        self.select_agent(agent_name)?;
        let agent = self
            .manager
            .agent_mut(agent_name)
            .expect("selected agent exists");
        let mut history = vec![Message::system(agent.render_system_prompt())];
        history.extend(relevant_messages);
        agent.history = history;
        self.run_turn(vec![Part::Text { text: task.to_string() }], tx, cancel)
            .await
    }

    // ── Control operations (rejected mid-turn) ────────────────────────────────

    pub fn select_agent(&mut self, name: &str) -> Result<(), CoreError> {
        self.ensure_idle("agent selection")?;
        self.manager.select(name)
    }

    pub fn switch_model(&mut self, model_id: &str) -> Result<crew_model::ModelEntry, CoreError> {
        self.ensure_idle("model switch")?;
        self.manager.switch_model(model_id)
    }

    pub fn set_thinking(&mut self, setting: ThinkingSetting) -> Result<bool, CoreError> {
        self.ensure_idle("thinking change")?;
        Ok(self.manager.set_thinking(setting))
    }

    /// Rewind the conversation to just past the user message of `turn`.
    pub fn jump(&mut self, turn: usize) -> Result<(), CoreError> {
        self.ensure_idle("jump")?;
        self.sync_conversation_from_agents();
        self.conversation.jump(turn)?;
        self.sync_agents_from_conversation();
        self.store.save(&self.conversation)?;
        Ok(())
    }

    /// Start a fresh conversation; stored files are untouched.
    pub fn clear(&mut self) -> Result<(), CoreError> {
        self.ensure_idle("clear")?;
        self.conversation = Conversation::new();
        for name in self.manager.names() {
            if let Some(agent) = self.manager.agent_mut(&name) {
                agent.history.clear();
            }
        }
        Ok(())
    }

    /// Stored conversations, newest first.
    pub fn list_conversations(&self) -> Result<Vec<ConversationMeta>, CoreError> {
        Ok(self.store.list()?)
    }

    /// Load a stored conversation and re-point the live state at it.
    pub fn load(&mut self, id: &str) -> Result<(), CoreError> {
        self.ensure_idle("load")?;
        self.conversation = self.store.load(id)?;
        self.sync_agents_from_conversation();
        Ok(())
    }

    /// The most recent assistant text across the conversation (for `/copy`).
    pub fn last_assistant_text(&self) -> Option<String> {
        let current = self.manager.current_name()?;
        let agent = self.manager.agent(&current)?;
        agent
            .history
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.text().trim().is_empty())
            .map(|m| m.text())
    }

    fn sync_conversation_from_agents(&mut self) {
        for agent in self.manager.agents() {
            if !agent.history.is_empty() {
                self.conversation
                    .histories
                    .insert(agent.name.clone(), agent.history.clone());
            }
        }
    }

    fn sync_agents_from_conversation(&mut self) {
        for name in self.manager.names() {
            let restored = self.conversation.histories.get(&name).cloned();
            if let Some(agent) = self.manager.agent_mut(&name) {
                agent.history = restored.unwrap_or_default();
            }
        }
    }
}
