// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Supervisor for external tool-server subprocesses.
//!
//! For every manifest entry the supervisor spawns the process, performs the
//! initialize handshake, lists the offered tools, and republishes each one
//! into the shared [`ToolRegistry`] under `<server-id>.<tool-name>`.  Servers
//! launch concurrently and independently: one failure never aborts the rest.
//!
//! When a transport dies mid-call the server's tools are unregistered and the
//! server is recorded as disconnected.  There is no automatic retry; the
//! `mcp_reconnect` tool performs manual reconnection.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{info, warn};

use crew_tools::{ToolRegistry, ToolSource};

use crate::config::{McpManifest, McpServerConfig};
use crate::protocol::{initialize_params, McpToolDef, ToolCallResult, ToolsListResult};
use crate::proxy::McpProxyTool;
use crate::transport::{StdioTransport, TransportError, PROTOCOL_TIMEOUT};
use crate::McpError;

/// A live connection to one server.
pub struct McpConnection {
    pub id: String,
    pub tools: Vec<McpToolDef>,
    transport: StdioTransport,
}

impl McpConnection {
    /// Spawn, handshake, and discover tools.
    async fn establish(id: &str, config: &McpServerConfig) -> Result<Self, McpError> {
        let transport = StdioTransport::spawn(config)?;

        let resp = transport
            .send_request("initialize", Some(initialize_params()), PROTOCOL_TIMEOUT)
            .await?;
        if resp.is_error() {
            return Err(McpError::Protocol(format!(
                "initialize failed: {}",
                resp.error.unwrap_or(Value::Null)
            )));
        }
        transport.send_notification("notifications/initialized").await?;

        let tools_resp = transport
            .send_request("tools/list", None, PROTOCOL_TIMEOUT)
            .await?;
        let tools = if tools_resp.is_error() {
            warn!(server_id = %id, "tools/list returned an error, server offers no tools");
            Vec::new()
        } else {
            let value = tools_resp.result.unwrap_or(Value::Null);
            match serde_json::from_value::<ToolsListResult>(value) {
                Ok(r) => r.tools,
                Err(e) => {
                    warn!(server_id = %id, error = %e, "failed to parse tools/list result");
                    Vec::new()
                }
            }
        };

        info!(server_id = %id, tool_count = tools.len(), "MCP server initialized");
        Ok(Self { id: id.to_string(), tools, transport })
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ToolCallResult, McpError> {
        if !self.is_alive() {
            return Err(McpError::ServerDown(self.id.clone()));
        }
        let params = json!({ "name": tool_name, "arguments": arguments });
        let resp = self
            .transport
            .send_request("tools/call", Some(params), timeout)
            .await?;
        if resp.is_error() {
            return Err(McpError::Protocol(format!(
                "tools/call failed: {}",
                resp.error.unwrap_or(Value::Null)
            )));
        }
        serde_json::from_value(resp.result.unwrap_or(Value::Null))
            .map_err(|e| McpError::Protocol(format!("failed to parse tools/call result: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Connected,
    Disconnected,
}

struct ServerSlot {
    connection: Option<Arc<McpConnection>>,
}

/// Process-wide supervisor over all configured MCP servers.
pub struct McpSupervisor {
    configs: McpManifest,
    servers: RwLock<HashMap<String, ServerSlot>>,
    tools: Arc<ToolRegistry>,
    call_timeout: Duration,
}

impl McpSupervisor {
    pub fn new(configs: McpManifest, tools: Arc<ToolRegistry>, call_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            configs,
            servers: RwLock::new(HashMap::new()),
            tools,
            call_timeout,
        })
    }

    /// Launch every configured server concurrently.  Failures are logged and
    /// recorded as disconnected.
    pub async fn launch_all(self: &Arc<Self>) {
        let ids: Vec<String> = self.configs.keys().cloned().collect();
        let launches = ids.iter().map(|id| {
            let sup = Arc::clone(self);
            async move {
                if let Err(e) = sup.connect(id).await {
                    warn!(server_id = %id, error = %e, "failed to initialize MCP server");
                }
            }
        });
        join_all(launches).await;

        let connected = self.status().iter().filter(|(_, s, _)| *s == ServerState::Connected).count();
        if !self.configs.is_empty() {
            info!(configured = self.configs.len(), connected, "MCP supervisor ready");
        }
    }

    /// Connect (or reconnect) one server and republish its tools.
    pub async fn connect(self: &Arc<Self>, server_id: &str) -> Result<usize, McpError> {
        let config = self
            .configs
            .get(server_id)
            .ok_or_else(|| McpError::ServerNotFound(server_id.to_string()))?
            .clone();

        let connection = Arc::new(McpConnection::establish(server_id, &config).await?);
        let count = connection.tools.len();

        // Republish under the namespaced name.  Registration is idempotent
        // for identical descriptors, so reconnecting a healthy server with an
        // unchanged tool set is a no-op.
        for def in &connection.tools {
            let namespaced = format!("{server_id}.{}", def.name);
            let proxy = McpProxyTool::new(
                Arc::downgrade(self),
                server_id.to_string(),
                def.clone(),
                namespaced.clone(),
                self.call_timeout,
            );
            if let Err(e) = self.tools.register(
                Arc::new(proxy),
                ToolSource::Mcp(server_id.to_string()),
                config.scope(),
            ) {
                warn!(tool = %namespaced, error = %e, "could not republish MCP tool");
            }
        }

        self.servers
            .write()
            .expect("supervisor lock")
            .insert(server_id.to_string(), ServerSlot { connection: Some(connection) });
        Ok(count)
    }

    /// Forward one invocation to a server.
    ///
    /// A dead transport flips the server to disconnected and unregisters its
    /// tools before the error is returned.
    pub async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, McpError> {
        let connection = {
            let servers = self.servers.read().expect("supervisor lock");
            servers
                .get(server_id)
                .and_then(|slot| slot.connection.clone())
        };
        let Some(connection) = connection else {
            return Err(McpError::ServerDown(server_id.to_string()));
        };

        let result = connection
            .call_tool(tool_name, arguments, self.call_timeout)
            .await;
        if matches!(
            &result,
            Err(McpError::Transport(TransportError::ProcessExited)) | Err(McpError::ServerDown(_))
        ) {
            self.mark_disconnected(server_id);
        }
        result
    }

    /// Record a server as dead and remove its tools from the registry.
    pub fn mark_disconnected(&self, server_id: &str) {
        let had_connection = {
            let mut servers = self.servers.write().expect("supervisor lock");
            match servers.get_mut(server_id) {
                Some(slot) => slot.connection.take().is_some(),
                None => {
                    servers.insert(server_id.to_string(), ServerSlot { connection: None });
                    false
                }
            }
        };
        if had_connection {
            warn!(server_id, "MCP server disconnected");
        }
        self.tools.unregister_server(server_id);
    }

    /// `(id, state, tool_count)` for every configured server.
    pub fn status(&self) -> Vec<(String, ServerState, usize)> {
        let servers = self.servers.read().expect("supervisor lock");
        let mut out: Vec<(String, ServerState, usize)> = self
            .configs
            .keys()
            .map(|id| match servers.get(id).and_then(|s| s.connection.as_ref()) {
                Some(conn) if conn.is_alive() => {
                    (id.clone(), ServerState::Connected, conn.tools.len())
                }
                _ => (id.clone(), ServerState::Disconnected, 0),
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Shut all servers down concurrently.
    pub async fn shutdown(&self) {
        let connections: Vec<Arc<McpConnection>> = {
            let mut servers = self.servers.write().expect("supervisor lock");
            servers
                .values_mut()
                .filter_map(|slot| slot.connection.take())
                .collect()
        };
        join_all(connections.iter().map(|c| c.transport.shutdown())).await;
    }
}

/// Shared handle type for tools that need to reach back into the supervisor
/// without keeping it alive (the registry outlives nobody).
pub type SupervisorHandle = Weak<McpSupervisor>;

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_with(command: &str) -> McpManifest {
        let mut m = McpManifest::new();
        m.insert(
            "fs".into(),
            McpServerConfig {
                name: "fs".into(),
                command: command.into(),
                args: vec![],
                env: HashMap::new(),
                enabled_for_agents: vec![],
            },
        );
        m
    }

    #[tokio::test]
    async fn failed_server_is_recorded_disconnected() {
        let tools = Arc::new(ToolRegistry::new());
        let sup = McpSupervisor::new(
            manifest_with("definitely-not-a-real-binary-xyz"),
            Arc::clone(&tools),
            Duration::from_secs(1),
        );
        sup.launch_all().await;
        let status = sup.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].1, ServerState::Disconnected);
        assert!(tools.names().is_empty());
    }

    #[tokio::test]
    async fn call_on_disconnected_server_is_server_down() {
        let tools = Arc::new(ToolRegistry::new());
        let sup = McpSupervisor::new(
            manifest_with("definitely-not-a-real-binary-xyz"),
            tools,
            Duration::from_secs(1),
        );
        let err = sup.call_tool("fs", "read", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::ServerDown(id) if id == "fs"));
    }

    #[tokio::test]
    async fn reconnect_of_unknown_server_is_not_found() {
        let tools = Arc::new(ToolRegistry::new());
        let sup = McpSupervisor::new(McpManifest::new(), tools, Duration::from_secs(1));
        let err = sup.connect("ghost").await.unwrap_err();
        assert!(matches!(err, McpError::ServerNotFound(_)));
    }

    #[tokio::test]
    async fn mark_disconnected_unregisters_namespaced_tools() {
        use async_trait::async_trait;
        use crew_tools::{AgentScope, Tool, ToolCall, ToolOutput};

        struct FakeTool;
        #[async_trait]
        impl Tool for FakeTool {
            fn name(&self) -> &str {
                "fs.read"
            }
            fn description(&self) -> &str {
                "read"
            }
            fn parameters_schema(&self) -> Value {
                json!({"type": "object"})
            }
            async fn execute(&self, call: &ToolCall) -> ToolOutput {
                ToolOutput::ok(&call.id, "x")
            }
        }

        let tools = Arc::new(ToolRegistry::new());
        tools
            .register(Arc::new(FakeTool), ToolSource::Mcp("fs".into()), AgentScope::All)
            .unwrap();
        let sup = McpSupervisor::new(manifest_with("cat"), Arc::clone(&tools), Duration::from_secs(1));
        sup.mark_disconnected("fs");
        assert!(tools.names().is_empty());
        assert_eq!(sup.status()[0].1, ServerState::Disconnected);
    }
}
