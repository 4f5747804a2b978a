// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Anthropic driver — native Messages API.
//!
//! Speaks `POST /v1/messages` with SSE streaming.  Thinking blocks arrive as
//! `thinking_delta` / `signature_delta` content deltas; the signature closes
//! the block and must be replayed verbatim on tool-use continuations, which
//! is why [`build_anthropic_messages`] serializes `Part::Thinking` back into
//! a signed `thinking` block without touching a byte of it.

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

const DEFAULT_MAX_TOKENS: u32 = 8192;

pub struct AnthropicAdapter {
    state: AdapterState,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(entry: ModelEntry, api_key: String, base_url: Option<String>) -> Self {
        Self {
            state: AdapterState::new(entry),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> &str {
        "anthropic"
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
        let body = build_anthropic_body(&self.state, messages);
        debug!(
            model = %self.state.entry.id,
            message_count = messages.len(),
            tool_count = self.state.tools.len(),
            "sending anthropic request"
        );

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network {
                provider: "anthropic".into(),
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(
                "anthropic",
                &self.state.entry.id,
                status,
                text,
            ));
        }

        Ok(anthropic_event_stream(resp, self.state.entry.clone()))
    }
}

// ─── Request serialization (canonical → wire) ────────────────────────────────

pub(crate) fn build_anthropic_body(state: &AdapterState, messages: &[Message]) -> Value {
    let messages = strip_unsupported_media(messages, state.strip_images());
    let system = state.system_text(&messages);
    let wire_messages = build_anthropic_messages(&messages);

    let max_tokens = match state.thinking {
        // The output budget must leave room above the thinking budget.
        ThinkingSetting::Budget(n) => n + DEFAULT_MAX_TOKENS,
        _ => DEFAULT_MAX_TOKENS,
    };

    let mut body = json!({
        "model": state.entry.id,
        "messages": wire_messages,
        "max_tokens": max_tokens,
        "stream": true,
    });
    if let Some(system) = system {
        if !system.is_empty() {
            body["system"] = json!(system);
        }
    }
    if !state.tools.is_empty() {
        let tools: Vec<Value> = state
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }
    if let ThinkingSetting::Budget(n) = state.thinking {
        body["thinking"] = json!({ "type": "enabled", "budget_tokens": n });
        // Thinking requires the default temperature; the field is omitted.
    } else if let Some(t) = state.temperature {
        body["temperature"] = json!(t);
    }
    body
}

/// Convert canonical messages into the Anthropic conversation array.
///
/// System messages are excluded (they travel in the top-level `system`
/// field); tool-role messages are reinterpreted as user messages carrying
/// `tool_result` blocks, which is Anthropic's wire shape for results.
pub(crate) fn build_anthropic_messages(messages: &[Message]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len());
    for m in messages {
        if m.role == Role::System {
            continue;
        }
        let role = match m.role {
            Role::Assistant => "assistant",
            _ => "user",
        };
        let mut content: Vec<Value> = Vec::with_capacity(m.parts.len());
        for part in &m.parts {
            match part {
                Part::Text { text } => {
                    if !text.is_empty() {
                        content.push(json!({ "type": "text", "text": text }));
                    }
                }
                Part::Thinking { text, signature } => match signature {
                    Some(sig) => content.push(json!({
                        "type": "thinking",
                        "thinking": text,
                        "signature": sig,
                    })),
                    None => {
                        debug!("dropping unsigned thinking block from outgoing request");
                    }
                },
                Part::Image { mime, data } => content.push(json!({
                    "type": "image",
                    "source": { "type": "base64", "media_type": mime, "data": data },
                })),
                Part::Document { mime, data, name } => {
                    if mime == "application/pdf" {
                        content.push(json!({
                            "type": "document",
                            "source": { "type": "base64", "media_type": mime, "data": data },
                        }));
                    } else {
                        debug!(%name, %mime, "flattening non-PDF document to a text marker");
                        content.push(json!({
                            "type": "text",
                            "text": format!("[attachment: {name}]"),
                        }));
                    }
                }
                Part::ToolCall { id, name, args } => content.push(json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": args,
                })),
                Part::ToolResult { id, content: c, is_error } => {
                    if matches!(c, crate::ToolResultContent::Structured(_)) {
                        debug!(call_id = %id, "flattening structured tool result to text");
                    }
                    content.push(json!({
                        "type": "tool_result",
                        "tool_use_id": id,
                        "content": c.to_text(),
                        "is_error": is_error,
                    }));
                }
            }
        }
        if content.is_empty() {
            debug!(role = ?m.role, "skipping message with no renderable content");
            continue;
        }
        out.push(json!({ "role": role, "content": content }));
    }
    out
}

// ─── Response parsing (wire → events) ────────────────────────────────────────

#[derive(Default)]
struct StreamState {
    /// Open tool_use blocks keyed by content index.
    blocks: HashMap<u64, ToolAcc>,
    stop: Option<StopReason>,
    input_tokens: u32,
}

struct ToolAcc {
    id: String,
    name: String,
    args: String,
}

fn anthropic_event_stream(resp: reqwest::Response, entry: ModelEntry) -> EventStream {
    let stream = async_stream::stream! {
        let mut resp = resp;
        let mut buffer = String::new();
        let mut st = StreamState::default();
        let mut stopped = false;

        loop {
            match resp.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for payload in drain_data_lines(&mut buffer) {
                        let Ok(v) = serde_json::from_str::<Value>(&payload) else {
                            continue;
                        };
                        for ev in parse_anthropic_event(&v, &mut st, &entry) {
                            if matches!(ev, Ok(StreamEvent::Stop(_))) {
                                stopped = true;
                            }
                            yield ev;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    yield Err(anyhow::anyhow!("anthropic stream error: {e}"));
                    return;
                }
            }
        }
        if !stopped {
            // Body closed without message_stop: flush and synthesize a stop.
            for ev in flush_open_calls(&mut st) {
                yield Ok(ev);
            }
            yield Ok(StreamEvent::Stop(st.stop.unwrap_or(StopReason::EndTurn)));
        }
    };
    Box::pin(stream)
}

fn flush_open_calls(st: &mut StreamState) -> Vec<StreamEvent> {
    let mut indices: Vec<u64> = st.blocks.keys().copied().collect();
    indices.sort_unstable();
    indices
        .into_iter()
        .filter_map(|i| st.blocks.remove(&i))
        .map(|acc| StreamEvent::ToolCallEnd {
            id: acc.id,
            name: acc.name,
            args: ToolArgs::from_raw(&acc.args),
        })
        .collect()
}

/// Translate one wire event into zero or more canonical stream events.
fn parse_anthropic_event(
    v: &Value,
    st: &mut StreamState,
    entry: &ModelEntry,
) -> Vec<anyhow::Result<StreamEvent>> {
    match v["type"].as_str().unwrap_or("") {
        "message_start" => {
            st.input_tokens = v["message"]["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
            vec![]
        }
        "content_block_start" => {
            let index = v["index"].as_u64().unwrap_or(0);
            let block = &v["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                let id = block["id"].as_str().unwrap_or("").to_string();
                let name = block["name"].as_str().unwrap_or("").to_string();
                st.blocks.insert(
                    index,
                    ToolAcc { id: id.clone(), name: name.clone(), args: String::new() },
                );
                vec![Ok(StreamEvent::ToolCallStart { id, name })]
            } else {
                vec![]
            }
        }
        "content_block_delta" => {
            let index = v["index"].as_u64().unwrap_or(0);
            let delta = &v["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => {
                    let text = delta["text"].as_str().unwrap_or("");
                    if text.is_empty() {
                        vec![]
                    } else {
                        vec![Ok(StreamEvent::TextDelta(text.to_string()))]
                    }
                }
                "thinking_delta" => {
                    let text = delta["thinking"].as_str().unwrap_or("");
                    if text.is_empty() {
                        vec![]
                    } else {
                        vec![Ok(StreamEvent::ThinkingDelta(text.to_string()))]
                    }
                }
                "signature_delta" => {
                    let sig = delta["signature"].as_str().unwrap_or("").to_string();
                    vec![Ok(StreamEvent::ThinkingSignature(sig))]
                }
                "input_json_delta" => {
                    let partial = delta["partial_json"].as_str().unwrap_or("");
                    if let Some(acc) = st.blocks.get_mut(&index) {
                        acc.args.push_str(partial);
                        vec![Ok(StreamEvent::ToolCallArgsDelta {
                            id: acc.id.clone(),
                            partial_json: partial.to_string(),
                        })]
                    } else {
                        vec![]
                    }
                }
                _ => vec![],
            }
        }
        "content_block_stop" => {
            let index = v["index"].as_u64().unwrap_or(0);
            match st.blocks.remove(&index) {
                Some(acc) => vec![Ok(StreamEvent::ToolCallEnd {
                    id: acc.id,
                    name: acc.name,
                    args: ToolArgs::from_raw(&acc.args),
                })],
                None => vec![],
            }
        }
        "message_delta" => {
            let mut events = Vec::new();
            if let Some(reason) = v["delta"]["stop_reason"].as_str() {
                st.stop = Some(match reason {
                    "tool_use" => StopReason::ToolUse,
                    "max_tokens" => StopReason::MaxTokens,
                    _ => StopReason::EndTurn,
                });
            }
            if let Some(out) = v["usage"]["output_tokens"].as_u64() {
                let output = out as u32;
                events.push(Ok(StreamEvent::UsageUpdate {
                    input_tokens: st.input_tokens,
                    output_tokens: output,
                    cost_usd: entry.cost(st.input_tokens, output),
                }));
            }
            events
        }
        "message_stop" => {
            let mut events: Vec<anyhow::Result<StreamEvent>> =
                flush_open_calls(st).into_iter().map(Ok).collect();
            events.push(Ok(StreamEvent::Stop(st.stop.unwrap_or(StopReason::EndTurn))));
            events
        }
        "error" => {
            let message = v["error"]["message"].as_str().unwrap_or("unknown error");
            vec![Err(anyhow::anyhow!("anthropic: {message}"))]
        }
        // "ping" and future event types.
        _ => vec![],
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::builtin_catalog;
    use serde_json::json;

    fn entry() -> ModelEntry {
        builtin_catalog()
            .into_iter()
            .find(|e| e.provider == "anthropic")
            .unwrap()
    }

    fn state() -> AdapterState {
        AdapterState::new(entry())
    }

    fn parse_all(events: &[Value]) -> Vec<StreamEvent> {
        let mut st = StreamState::default();
        let e = entry();
        events
            .iter()
            .flat_map(|v| parse_anthropic_event(v, &mut st, &e))
            .map(|r| r.unwrap())
            .collect()
    }

    // ── Wire serialization ────────────────────────────────────────────────────

    #[test]
    fn system_message_moves_to_system_field() {
        let mut st = state();
        st.system_prompt = Some("be terse".into());
        let body = build_anthropic_body(&st, &[Message::user("hi")]);
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn tool_result_becomes_user_message_with_tool_result_block() {
        let msgs = vec![Message::tool_result("t1", "4 results", false)];
        let wire = build_anthropic_messages(&msgs);
        assert_eq!(wire[0]["role"], "user");
        let block = &wire[0]["content"][0];
        assert_eq!(block["type"], "tool_result");
        assert_eq!(block["tool_use_id"], "t1");
        assert_eq!(block["is_error"], false);
    }

    #[test]
    fn signed_thinking_block_is_replayed_verbatim() {
        let msgs = vec![Message::new(
            Role::Assistant,
            vec![
                Part::Thinking { text: "let me check".into(), signature: Some("RXFSa0xt".into()) },
                Part::Text { text: " ".into() },
                Part::ToolCall { id: "t1".into(), name: "web_search".into(), args: json!({}) },
            ],
        )];
        let wire = build_anthropic_messages(&msgs);
        let thinking = &wire[0]["content"][0];
        assert_eq!(thinking["type"], "thinking");
        assert_eq!(thinking["thinking"], "let me check");
        assert_eq!(thinking["signature"], "RXFSa0xt");
    }

    #[test]
    fn unsigned_thinking_block_is_dropped() {
        let msgs = vec![Message::new(
            Role::Assistant,
            vec![
                Part::Thinking { text: "hm".into(), signature: None },
                Part::Text { text: "answer".into() },
            ],
        )];
        let wire = build_anthropic_messages(&msgs);
        let content = wire[0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0]["type"], "text");
    }

    #[test]
    fn thinking_budget_reserves_output_headroom() {
        let mut st = state();
        assert!(st.set_thinking_budget(ThinkingSetting::Budget(4096)));
        let body = build_anthropic_body(&st, &[Message::user("x")]);
        assert_eq!(body["thinking"]["budget_tokens"], 4096);
        assert!(body["max_tokens"].as_u64().unwrap() > 4096);
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn tool_schemas_use_input_schema_field() {
        let mut st = state();
        st.tools.push(ToolSchema {
            name: "web_search".into(),
            description: "search".into(),
            parameters: json!({"type": "object"}),
        });
        let body = build_anthropic_body(&st, &[Message::user("x")]);
        assert_eq!(body["tools"][0]["name"], "web_search");
        assert!(body["tools"][0]["input_schema"].is_object());
    }

    // ── Stream parsing ────────────────────────────────────────────────────────

    #[test]
    fn text_deltas_pass_through() {
        let events = parse_all(&[json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "text_delta", "text": "hello" }
        })]);
        assert_eq!(events, vec![StreamEvent::TextDelta("hello".into())]);
    }

    #[test]
    fn tool_call_accumulates_across_deltas() {
        let events = parse_all(&[
            json!({
                "type": "content_block_start",
                "index": 1,
                "content_block": { "type": "tool_use", "id": "toolu_01", "name": "web_search" }
            }),
            json!({
                "type": "content_block_delta",
                "index": 1,
                "delta": { "type": "input_json_delta", "partial_json": "{\"query\":" }
            }),
            json!({
                "type": "content_block_delta",
                "index": 1,
                "delta": { "type": "input_json_delta", "partial_json": "\"go\"}" }
            }),
            json!({ "type": "content_block_stop", "index": 1 }),
        ]);
        assert!(matches!(&events[0], StreamEvent::ToolCallStart { id, name }
            if id == "toolu_01" && name == "web_search"));
        assert!(matches!(
            events.last().unwrap(),
            StreamEvent::ToolCallEnd { args: ToolArgs::Parsed(v), .. }
                if v == &json!({"query": "go"})
        ));
    }

    #[test]
    fn malformed_tool_json_fails_the_call_not_the_stream() {
        let events = parse_all(&[
            json!({
                "type": "content_block_start",
                "index": 0,
                "content_block": { "type": "tool_use", "id": "t", "name": "f" }
            }),
            json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": { "type": "input_json_delta", "partial_json": "{\"oops\":" }
            }),
            json!({ "type": "content_block_stop", "index": 0 }),
            json!({ "type": "message_stop" }),
        ]);
        assert!(matches!(
            &events[2],
            StreamEvent::ToolCallEnd { args: ToolArgs::Malformed { .. }, .. }
        ));
        assert_eq!(*events.last().unwrap(), StreamEvent::Stop(StopReason::EndTurn));
    }

    #[test]
    fn thinking_and_signature_events_emitted() {
        let events = parse_all(&[
            json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": { "type": "thinking_delta", "thinking": "step one" }
            }),
            json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": { "type": "signature_delta", "signature": "c2lnbmF0dXJl" }
            }),
        ]);
        assert_eq!(
            events,
            vec![
                StreamEvent::ThinkingDelta("step one".into()),
                StreamEvent::ThinkingSignature("c2lnbmF0dXJl".into()),
            ]
        );
    }

    #[test]
    fn stop_reason_tool_use_flows_through_message_stop() {
        let events = parse_all(&[
            json!({ "type": "message_delta", "delta": { "stop_reason": "tool_use" } }),
            json!({ "type": "message_stop" }),
        ]);
        assert_eq!(*events.last().unwrap(), StreamEvent::Stop(StopReason::ToolUse));
    }

    #[test]
    fn usage_combines_input_from_message_start() {
        let events = parse_all(&[
            json!({
                "type": "message_start",
                "message": { "usage": { "input_tokens": 100, "output_tokens": 0 } }
            }),
            json!({
                "type": "message_delta",
                "delta": { "stop_reason": "end_turn" },
                "usage": { "output_tokens": 40 }
            }),
        ]);
        match &events[0] {
            StreamEvent::UsageUpdate { input_tokens, output_tokens, cost_usd } => {
                assert_eq!(*input_tokens, 100);
                assert_eq!(*output_tokens, 40);
                assert!(*cost_usd > 0.0);
            }
            other => panic!("expected usage, got {other:?}"),
        }
    }

    #[test]
    fn max_tokens_stop_flushes_open_tool_call() {
        let events = parse_all(&[
            json!({
                "type": "content_block_start",
                "index": 0,
                "content_block": { "type": "tool_use", "id": "t", "name": "f" }
            }),
            json!({ "type": "message_delta", "delta": { "stop_reason": "max_tokens" } }),
            json!({ "type": "message_stop" }),
        ]);
        // The unterminated call is flushed before the stop event.
        assert!(matches!(&events[1], StreamEvent::ToolCallEnd { .. }));
        assert_eq!(*events.last().unwrap(), StreamEvent::Stop(StopReason::MaxTokens));
    }
}
