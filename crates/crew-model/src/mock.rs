// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use serde_json::json;

use crate::adapter::{AdapterState, ProviderAdapter};
use crate::catalog::builtin_catalog;
use crate::{
    EventStream, Message, ModelEntry, Part, ProviderError, Role, StopReason, StreamEvent,
    ThinkingSetting, ToolArgs, ToolSchema,
};

fn mock_entry() -> ModelEntry {
    builtin_catalog()
        .into_iter()
        .find(|e| e.provider == "mock")
        .expect("catalog carries the mock model")
}

/// Deterministic adapter for tests and offline runs.  Echoes the last user
/// message back as the assistant response.
pub struct MockAdapter {
    state: AdapterState,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self { state: AdapterState::new(mock_entry()) }
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn provider(&self) -> &str {
        "mock"
    }
    fn model_id(&self) -> &str {
        &self.state.entry.id
    }
    fn set_system_prompt(&mut self, prompt: &str) {
        self.state.system_prompt = Some(prompt.to_string());
    }
    fn set_temperature(&mut self, temperature: Option<f32>) {
        self.state.temperature = temperature;
    }
    fn register_tool(&mut self, schema: ToolSchema) {
        self.state.tools.push(schema);
    }
    fn clear_tools(&mut self) {
        self.state.tools.clear();
    }
    fn set_thinking(&mut self, setting: ThinkingSetting) -> bool {
        self.state.set_thinking_budget(setting)
    }

    async fn stream(&self, messages: &[Message]) -> Result<EventStream, ProviderError> {
        let reply = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(Message::text)
            .unwrap_or_else(|| "[no input]".into());
        let events = vec![
            Ok(StreamEvent::TextDelta(reply)),
            Ok(StreamEvent::UsageUpdate { input_tokens: 10, output_tokens: 10, cost_usd: 0.0 }),
            Ok(StreamEvent::Stop(StopReason::EndTurn)),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

// ─── Scripted adapter ─────────────────────────────────────────────────────────

/// Shared inspection/scripting state, so tests keep a handle after the
/// adapter itself is boxed away into the agent manager.
#[derive(Default)]
struct ScriptState {
    scripts: Vec<Vec<StreamEvent>>,
    /// Message lists seen by `stream`, in call order.
    requests: Vec<Vec<Message>>,
    /// When set, every stream after the first must replay a thinking part
    /// carrying exactly this signature, mirroring the server-side integrity
    /// check of signed-thinking providers.
    required_signature: Option<String>,
}

/// Handle for inspecting a [`ScriptedAdapter`] from a test after the adapter
/// has been moved into the runtime.
#[derive(Clone, Default)]
pub struct ScriptHandle(Arc<Mutex<ScriptState>>);

impl ScriptHandle {
    /// All message lists submitted so far.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.0.lock().unwrap().requests.clone()
    }

    /// Number of streams opened.
    pub fn calls(&self) -> usize {
        self.0.lock().unwrap().requests.len()
    }

    /// Queue another response script.
    pub fn push_script(&self, events: Vec<StreamEvent>) {
        self.0.lock().unwrap().scripts.push(events);
    }
}

/// A pre-scripted adapter: each `stream` call pops the next event script, so
/// tests specify exact sequences — tool calls, thinking, stops — without
/// network access.
pub struct ScriptedAdapter {
    state: AdapterState,
    shared: ScriptHandle,
}

impl ScriptedAdapter {
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        let shared = ScriptHandle::default();
        shared.0.lock().unwrap().scripts = scripts;
        Self { state: AdapterState::new(mock_entry()), shared }
    }

    /// Inspection handle; clone it out before boxing the adapter.
    pub fn handle(&self) -> ScriptHandle {
        self.shared.clone()
    }

    /// Require that continuation streams replay the given thinking signature
    /// byte-for-byte; a missing or altered block makes `stream` fail with a
    /// 400, the way signed-thinking providers do.
    pub fn require_thinking_signature(self, signature: impl Into<String>) -> Self {
        self.shared.0.lock().unwrap().required_signature = Some(signature.into());
        self
    }

    /// Convenience: one script that streams `text` and stops.
    pub fn always_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(vec![vec![
            StreamEvent::TextDelta(text),
            StreamEvent::UsageUpdate { input_tokens: 5, output_tokens: 5, cost_usd: 0.0 },
            StreamEvent::Stop(StopReason::EndTurn),
        ]])
    }

    /// Convenience: a tool-use round followed by a text round.
    pub fn tool_then_text(
        id: impl Into<String>,
        name: impl Into<String>,
        args: serde_json::Value,
        final_text: impl Into<String>,
    ) -> Self {
        let id = id.into();
        let name = name.into();
        Self::new(vec![
            vec![
                StreamEvent::TextDelta("Let me check.".into()),
                StreamEvent::ToolCallStart { id: id.clone(), name: name.clone() },
                StreamEvent::ToolCallEnd { id, name, args: ToolArgs::Parsed(args) },
                StreamEvent::Stop(StopReason::ToolUse),
            ],
            vec![
                StreamEvent::TextDelta(final_text.into()),
                StreamEvent::Stop(StopReason::EndTurn),
            ],
        ])
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider(&self) -> &str {
        "mock"
    }
    fn model_id(&self) -> &str {
        &self.state.entry.id
    }
    fn set_system_prompt(&mut self, prompt: &str) {
        self.state.system_prompt = Some(prompt.to_string());
    }
    fn set_temperature(&mut self, temperature: Option<f32>) {
        self.state.temperature = temperature;
    }
    fn register_tool(&mut self, schema: ToolSchema) {
        self.state.tools.push(schema);
    }
    fn clear_tools(&mut self) {
        self.state.tools.clear();
    }
    fn set_thinking(&mut self, setting: ThinkingSetting) -> bool {
        self.state.set_thinking_budget(setting)
    }

    async fn stream(&self, messages: &[Message]) -> Result<EventStream, ProviderError> {
        let events = {
            let mut st = self.shared.0.lock().unwrap();
            st.requests.push(messages.to_vec());

            if let Some(required) = st.required_signature.clone() {
                if st.requests.len() > 1 {
                    let replayed = messages.iter().any(|m| {
                        m.parts.iter().any(|p| {
                            matches!(p, Part::Thinking { signature: Some(sig), .. }
                                if *sig == required)
                        })
                    });
                    if !replayed {
                        return Err(ProviderError::Api {
                            provider: "mock".into(),
                            status: 400,
                            message: json!({
                                "error": "thinking block signature missing or altered"
                            })
                            .to_string(),
                        });
                    }
                }
            }

            if st.scripts.is_empty() {
                vec![
                    StreamEvent::TextDelta("[no more scripts]".into()),
                    StreamEvent::Stop(StopReason::EndTurn),
                ]
            } else {
                st.scripts.remove(0)
            }
        };
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn collect(mut s: EventStream) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        while let Some(ev) = s.next().await {
            out.push(ev.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let a = MockAdapter::new();
        let events = collect(a.stream(&[Message::user("ping")]).await.unwrap()).await;
        assert_eq!(events[0], StreamEvent::TextDelta("ping".into()));
        assert_eq!(*events.last().unwrap(), StreamEvent::Stop(StopReason::EndTurn));
    }

    #[tokio::test]
    async fn scripted_pops_scripts_in_order() {
        let a = ScriptedAdapter::tool_then_text("t1", "web_search", json!({"q": 1}), "done");
        let first = collect(a.stream(&[Message::user("x")]).await.unwrap()).await;
        assert!(first
            .iter()
            .any(|e| matches!(e, StreamEvent::ToolCallEnd { name, .. } if name == "web_search")));
        let second = collect(a.stream(&[Message::user("x")]).await.unwrap()).await;
        assert_eq!(second[0], StreamEvent::TextDelta("done".into()));
    }

    #[tokio::test]
    async fn scripted_records_requests_for_inspection() {
        let a = ScriptedAdapter::always_text("hi");
        let handle = a.handle();
        a.stream(&[Message::user("payload")]).await.unwrap();
        assert_eq!(handle.calls(), 1);
        assert_eq!(handle.requests()[0][0].text(), "payload");
    }

    #[tokio::test]
    async fn signature_requirement_rejects_missing_replay() {
        let a = ScriptedAdapter::new(vec![vec![], vec![]])
            .require_thinking_signature("sig-1");
        // First stream passes unconditionally.
        assert!(a.stream(&[Message::user("x")]).await.is_ok());
        // Continuation without the thinking block is rejected with a 400.
        let err = a.stream(&[Message::user("x")]).await.err().unwrap();
        assert!(matches!(err, ProviderError::Api { status: 400, .. }));
    }

    #[tokio::test]
    async fn signature_requirement_accepts_verbatim_replay() {
        let a = ScriptedAdapter::new(vec![vec![], vec![]])
            .require_thinking_signature("sig-1");
        assert!(a.stream(&[Message::user("x")]).await.is_ok());
        let continuation = vec![Message::new(
            Role::Assistant,
            vec![
                Part::Thinking { text: "plan".into(), signature: Some("sig-1".into()) },
                Part::Text { text: " ".into() },
            ],
        )];
        assert!(a.stream(&continuation).await.is_ok());
    }
}
