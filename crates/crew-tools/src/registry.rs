// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::{Tool, ToolCall, ToolOutput, ToolSchema, ToolSource};

/// Which agents may see and call a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentScope {
    All,
    Agents(BTreeSet<String>),
}

impl AgentScope {
    pub fn agents<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Agents(names.into_iter().map(Into::into).collect())
    }

    pub fn allows(&self, agent: &str) -> bool {
        match self {
            Self::All => true,
            Self::Agents(set) => set.contains(agent),
        }
    }
}

/// Registration failures.  Everything at invocation time is a [`ToolOutput`]
/// with `is_error = true`, never an `Err`.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("duplicate tool: {0} is already registered with a different descriptor")]
    Duplicate(String),
}

struct Registered {
    tool: Arc<dyn Tool>,
    schema: ToolSchema,
    source: ToolSource,
    scope: AgentScope,
}

/// Central catalog of tools with per-agent allow-lists.
///
/// Interior locking lets MCP servers register and unregister tools behind a
/// shared `Arc` long after startup.  The lock is never held across an await:
/// `invoke` clones the handler `Arc` out first.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Registered>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.
    ///
    /// Idempotent on an identical descriptor (same schema, source, and
    /// scope); a name collision with a different descriptor is refused —
    /// renaming after registration is likewise impossible because entries
    /// are keyed by name forever.
    pub fn register(
        &self,
        tool: Arc<dyn Tool>,
        source: ToolSource,
        scope: AgentScope,
    ) -> Result<(), ToolError> {
        let schema = ToolSchema {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
        };
        let mut tools = self.tools.write().expect("tool registry lock");
        if let Some(existing) = tools.get(&schema.name) {
            if existing.schema == schema && existing.source == source && existing.scope == scope {
                debug!(tool = %schema.name, "identical re-registration ignored");
                return Ok(());
            }
            return Err(ToolError::Duplicate(schema.name));
        }
        debug!(tool = %schema.name, source = ?source, "tool registered");
        tools.insert(schema.name.clone(), Registered { tool, schema, source, scope });
        Ok(())
    }

    /// Remove a single tool by name.
    pub fn unregister(&self, name: &str) -> bool {
        self.tools
            .write()
            .expect("tool registry lock")
            .remove(name)
            .is_some()
    }

    /// Remove every tool republished from the given MCP server.  Returns the
    /// removed names.
    pub fn unregister_server(&self, server_id: &str) -> Vec<String> {
        let mut tools = self.tools.write().expect("tool registry lock");
        let doomed: Vec<String> = tools
            .iter()
            .filter(|(_, r)| matches!(&r.source, ToolSource::Mcp(id) if id == server_id))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &doomed {
            tools.remove(name);
        }
        if !doomed.is_empty() {
            warn!(server_id, count = doomed.len(), "unregistered tools of a dead MCP server");
        }
        doomed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools
            .read()
            .expect("tool registry lock")
            .contains_key(name)
    }

    /// Schema of one tool.
    pub fn schema(&self, name: &str) -> Option<ToolSchema> {
        self.tools
            .read()
            .expect("tool registry lock")
            .get(name)
            .map(|r| r.schema.clone())
    }

    /// Schemas of all tools visible to the given agent, sorted by name.
    pub fn list_for(&self, agent: &str) -> Vec<ToolSchema> {
        let tools = self.tools.read().expect("tool registry lock");
        let mut schemas: Vec<ToolSchema> = tools
            .values()
            .filter(|r| r.scope.allows(agent))
            .map(|r| r.schema.clone())
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .expect("tool registry lock")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Execute a call on behalf of an agent.
    ///
    /// An unknown name, a name outside the agent's scope, a handler failure,
    /// and a timeout all come back as error outputs — a tool can never kill
    /// the turn.
    pub async fn invoke_for(&self, agent: &str, call: &ToolCall) -> ToolOutput {
        let (tool, timeout) = {
            let tools = self.tools.read().expect("tool registry lock");
            match tools.get(&call.name) {
                Some(r) if r.scope.allows(agent) => (Arc::clone(&r.tool), r.tool.timeout()),
                _ => {
                    return ToolOutput::err(&call.id, format!("unknown tool: {}", call.name));
                }
            }
        };
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, tool.execute(call)).await {
                Ok(out) => out,
                Err(_) => ToolOutput::err(
                    &call.id,
                    format!("timeout: {} exceeded {}s", call.name, limit.as_secs()),
                ),
            },
            None => tool.execute(call).await,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
