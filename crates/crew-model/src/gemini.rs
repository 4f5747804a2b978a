// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Google Gemini driver — Generative Language API.
//!
//! Uses `streamGenerateContent?alt=sse`.  Function calls arrive whole (no
//! argument deltas) and carry no ids, so the adapter synthesizes sequential
//! ids and keeps an id→name map when serializing results back: Gemini matches
//! `functionResponse` parts to calls by name, not id.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::adapter::{strip_unsupported_media, AdapterState, ProviderAdapter};
use crate::sse::drain_data_lines;
use crate::{
    EventStream, Message, ModelEntry, Part, ProviderError, Role, StopReason, StreamEvent,
    ThinkingSetting, ToolArgs, ToolSchema,
};

pub struct GeminiAdapter {
    state: AdapterState,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiAdapter {
    pub fn new(entry: ModelEntry, api_key: String, base_url: Option<String>) -> Self {
        Self {
            state: AdapterState::new(entry),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".into()),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn provider(&self) -> &str {
        "gemini"
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
        let body = build_gemini_body(&self.state, messages);
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.state.entry.id
        );
        debug!(model = %self.state.entry.id, message_count = messages.len(),
            "sending gemini request");

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network {
                provider: "gemini".into(),
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(
                "gemini",
                &self.state.entry.id,
                status,
                text,
            ));
        }

        Ok(gemini_event_stream(resp, self.state.entry.clone()))
    }
}

// ─── Request serialization (canonical → wire) ────────────────────────────────

pub(crate) fn build_gemini_body(state: &AdapterState, messages: &[Message]) -> Value {
    let messages = strip_unsupported_media(messages, state.strip_images());

    // functionResponse parts need the function *name*; canonical results only
    // carry the call id, so collect the id→name map first.
    let mut call_names: HashMap<String, String> = HashMap::new();
    for m in &messages {
        for (id, name, _) in m.tool_calls() {
            call_names.insert(id.to_string(), name.to_string());
        }
    }

    let mut contents: Vec<Value> = Vec::new();
    for m in &messages {
        if m.role == Role::System {
            continue;
        }
        let role = match m.role {
            Role::Assistant => "model",
            _ => "user",
        };
        let parts = message_to_gemini_parts(m, &call_names);
        if parts.is_empty() {
            continue;
        }
        contents.push(json!({ "role": role, "parts": parts }));
    }

    let mut generation = json!({});
    if let Some(t) = state.temperature {
        generation["temperature"] = json!(t);
    }
    if let ThinkingSetting::Budget(n) = state.thinking {
        generation["thinkingConfig"] = json!({ "thinkingBudget": n });
    }

    let mut body = json!({ "contents": contents, "generationConfig": generation });
    if let Some(system) = state.system_text(&messages) {
        if !system.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
    }
    if !state.tools.is_empty() {
        let declarations: Vec<Value> = state
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect();
        body["tools"] = json!([{ "functionDeclarations": declarations }]);
    }
    body
}

fn message_to_gemini_parts(m: &Message, call_names: &HashMap<String, String>) -> Vec<Value> {
    let mut parts = Vec::with_capacity(m.parts.len());
    for part in &m.parts {
        match part {
            Part::Text { text } => {
                if !text.is_empty() {
                    parts.push(json!({ "text": text }));
                }
            }
            Part::Thinking { .. } => {
                // Gemini has no replay channel for reasoning output.
                debug!("dropping thinking part for a gemini request");
            }
            Part::Image { mime, data } | Part::Document { mime, data, .. } => {
                parts.push(json!({
                    "inlineData": { "mimeType": mime, "data": data },
                }));
            }
            Part::ToolCall { name, args, .. } => {
                parts.push(json!({ "functionCall": { "name": name, "args": args } }));
            }
            Part::ToolResult { id, content, is_error } => {
                let name = call_names.get(id).cloned().unwrap_or_else(|| id.clone());
                let key = if *is_error { "error" } else { "content" };
                parts.push(json!({
                    "functionResponse": {
                        "name": name,
                        "response": { key: content.to_text() },
                    }
                }));
            }
        }
    }
    parts
}

// ─── Response parsing (wire → events) ────────────────────────────────────────

fn gemini_event_stream(resp: reqwest::Response, entry: ModelEntry) -> EventStream {
    let stream = async_stream::stream! {
        let mut resp = resp;
        let mut buffer = String::new();
        let mut st = StreamState::default();

        loop {
            match resp.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for payload in drain_data_lines(&mut buffer) {
                        let Ok(v) = serde_json::from_str::<Value>(&payload) else {
                            continue;
                        };
                        for ev in parse_gemini_chunk(&v, &mut st, &entry) {
                            yield Ok(ev);
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    yield Err(anyhow::anyhow!("gemini stream error: {e}"));
                    return;
                }
            }
        }

        if let Some((input, output)) = st.usage {
            yield Ok(StreamEvent::UsageUpdate {
                input_tokens: input,
                output_tokens: output,
                cost_usd: entry.cost(input, output),
            });
        }
        let reason = if st.saw_function_call {
            StopReason::ToolUse
        } else {
            st.finish.unwrap_or(StopReason::EndTurn)
        };
        yield Ok(StreamEvent::Stop(reason));
    };
    Box::pin(stream)
}

#[derive(Default)]
struct StreamState {
    next_call: u32,
    saw_function_call: bool,
    finish: Option<StopReason>,
    usage: Option<(u32, u32)>,
}

fn parse_gemini_chunk(v: &Value, st: &mut StreamState, _entry: &ModelEntry) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let candidate = &v["candidates"][0];

    if let Some(parts) = candidate["content"]["parts"].as_array() {
        for part in parts {
            if let Some(text) = part["text"].as_str() {
                if text.is_empty() {
                    continue;
                }
                if part["thought"].as_bool().unwrap_or(false) {
                    events.push(StreamEvent::ThinkingDelta(text.to_string()));
                } else {
                    events.push(StreamEvent::TextDelta(text.to_string()));
                }
            } else if let Some(call) = part.get("functionCall") {
                // Calls arrive whole; synthesize a stable id for the turn.
                let id = format!("gm_{}", st.next_call);
                st.next_call += 1;
                st.saw_function_call = true;
                let name = call["name"].as_str().unwrap_or("").to_string();
                let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                events.push(StreamEvent::ToolCallStart { id: id.clone(), name: name.clone() });
                events.push(StreamEvent::ToolCallEnd {
                    id,
                    name,
                    args: ToolArgs::Parsed(args),
                });
            }
        }
    }

    if let Some(reason) = candidate["finishReason"].as_str() {
        st.finish = Some(match reason {
            "MAX_TOKENS" => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        });
    }

    if let Some(usage) = v.get("usageMetadata") {
        let input = usage["promptTokenCount"].as_u64().unwrap_or(0) as u32;
        let output = usage["candidatesTokenCount"].as_u64().unwrap_or(0) as u32;
        st.usage = Some((input, output));
    }

    events
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
