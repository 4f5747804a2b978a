// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared driver for OpenAI-compatible chat completion APIs.
//!
//! OpenAI, Groq, DeepInfra, and every configured custom endpoint speak the
//! same `/chat/completions` SSE wire format, so one adapter serves them all;
//! only the base URL, auth, and provider id differ.
//!
//! Thinking here is effort-based (`reasoning_effort`).  Reasoning deltas
//! arrive as `reasoning_content` (DeepSeek-style) or `reasoning`
//! (aggregators); both map to `ThinkingDelta`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::adapter::{strip_unsupported_media, AdapterState, ProviderAdapter};
use crate::sse::drain_data_lines;
use crate::{
    EventStream, Message, ModelEntry, Part, ProviderError, Role, StopReason, StreamEvent,
    ThinkingEffort, ThinkingSetting, ToolArgs, ToolSchema,
};

pub struct OpenAiCompatAdapter {
    state: AdapterState,
    provider_id: String,
    api_key: Option<String>,
    chat_url: String,
    client: reqwest::Client,
}

impl OpenAiCompatAdapter {
    pub fn new(
        provider_id: impl Into<String>,
        entry: ModelEntry,
        api_key: Option<String>,
        base_url: &str,
    ) -> Self {
        Self {
            state: AdapterState::new(entry),
            provider_id: provider_id.into(),
            api_key,
            chat_url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    fn provider(&self) -> &str {
        &self.provider_id
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
        self.state.set_thinking_effort(setting)
    }

    async fn stream(&self, messages: &[Message]) -> Result<EventStream, ProviderError> {
        let body = build_openai_body(&self.state, messages);
        debug!(
            provider = %self.provider_id,
            model = %self.state.entry.id,
            message_count = messages.len(),
            "sending completion request"
        );

        let mut req = self.client.post(&self.chat_url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| ProviderError::Network {
            provider: self.provider_id.clone(),
            message: e.to_string(),
        })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(
                &self.provider_id,
                &self.state.entry.id,
                status,
                text,
            ));
        }

        Ok(openai_event_stream(resp, self.state.entry.clone()))
    }
}

// ─── Request serialization (canonical → wire) ────────────────────────────────

pub(crate) fn build_openai_body(state: &AdapterState, messages: &[Message]) -> Value {
    let messages = strip_unsupported_media(messages, state.strip_images());
    let mut wire = Vec::new();
    if let Some(system) = state.system_text(&messages) {
        if !system.is_empty() {
            wire.push(json!({ "role": "system", "content": system }));
        }
    }
    wire.extend(build_openai_messages(&messages));

    let mut body = json!({
        "model": state.entry.id,
        "messages": wire,
        "stream": true,
        "stream_options": { "include_usage": true },
    });
    if let Some(t) = state.temperature {
        body["temperature"] = json!(t);
    }
    if !state.tools.is_empty() {
        let tools: Vec<Value> = state
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }
    if let ThinkingSetting::Effort(level) = state.thinking {
        body["reasoning_effort"] = json!(match level {
            ThinkingEffort::Low => "low",
            ThinkingEffort::Medium => "medium",
            ThinkingEffort::High => "high",
        });
    }
    body
}

/// Convert canonical messages into the OpenAI message array (system excluded;
/// the caller prepends it).
///
/// Thinking parts are dropped here — this wire has no replay channel for
/// reasoning blocks — and structured tool results are flattened to text.
pub(crate) fn build_openai_messages(messages: &[Message]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len());
    for m in messages {
        match m.role {
            Role::System => continue,
            Role::Assistant => {
                let text = m.text();
                let tool_calls: Vec<Value> = m
                    .tool_calls()
                    .iter()
                    .map(|(id, name, args)| {
                        json!({
                            "id": id,
                            "type": "function",
                            "function": { "name": name, "arguments": args.to_string() },
                        })
                    })
                    .collect();
                if m.has_thinking() {
                    debug!("dropping thinking parts for an openai-wire request");
                }
                let mut msg = json!({ "role": "assistant" });
                if !text.is_empty() {
                    msg["content"] = json!(text);
                }
                if !tool_calls.is_empty() {
                    msg["tool_calls"] = json!(tool_calls);
                }
                if msg.get("content").is_none() && tool_calls.is_empty() {
                    continue;
                }
                out.push(msg);
            }
            Role::Tool => {
                for part in &m.parts {
                    if let Part::ToolResult { id, content, is_error: _ } = part {
                        out.push(json!({
                            "role": "tool",
                            "tool_call_id": id,
                            "content": content.to_text(),
                        }));
                    }
                }
            }
            Role::User => {
                let mut parts: Vec<Value> = Vec::new();
                for part in &m.parts {
                    match part {
                        Part::Text { text } => {
                            parts.push(json!({ "type": "text", "text": text }));
                        }
                        Part::Image { mime, data } => parts.push(json!({
                            "type": "image_url",
                            "image_url": { "url": format!("data:{mime};base64,{data}") },
                        })),
                        Part::Document { mime, data, name } => {
                            // Text documents inline; anything else leaves a marker.
                            if mime.starts_with("text/") {
                                use base64::Engine as _;
                                let decoded = base64::engine::general_purpose::STANDARD
                                    .decode(data)
                                    .ok()
                                    .and_then(|b| String::from_utf8(b).ok())
                                    .unwrap_or_default();
                                parts.push(json!({
                                    "type": "text",
                                    "text": format!("[{name}]\n{decoded}"),
                                }));
                            } else {
                                debug!(%name, %mime, "flattening document to a text marker");
                                parts.push(json!({
                                    "type": "text",
                                    "text": format!("[attachment: {name}]"),
                                }));
                            }
                        }
                        _ => {}
                    }
                }
                // Single text part collapses to a plain string.
                if parts.len() == 1 && parts[0]["type"] == "text" {
                    let text = parts[0]["text"].clone();
                    out.push(json!({ "role": "user", "content": text }));
                } else {
                    out.push(json!({ "role": "user", "content": parts }));
                }
            }
        }
    }
    out
}

// ─── Response parsing (wire → events) ────────────────────────────────────────

#[derive(Default)]
struct StreamState {
    /// Tool-call fragments keyed by the wire `index` field.
    calls: HashMap<u64, ToolAcc>,
    /// Index order of first appearance, for deterministic flush order.
    order: Vec<u64>,
    started: std::collections::HashSet<u64>,
    pending_stop: Option<StopReason>,
    flushed: bool,
}

#[derive(Default)]
struct ToolAcc {
    id: String,
    name: String,
    args: String,
}

fn openai_event_stream(resp: reqwest::Response, entry: ModelEntry) -> EventStream {
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
                        for ev in parse_openai_payload(&payload, &mut st, &entry) {
                            if matches!(ev, Ok(StreamEvent::Stop(_))) {
                                stopped = true;
                            }
                            yield ev;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    yield Err(anyhow::anyhow!("stream error: {e}"));
                    return;
                }
            }
        }
        if !stopped {
            for ev in flush_calls(&mut st) {
                yield Ok(ev);
            }
            yield Ok(StreamEvent::Stop(st.pending_stop.unwrap_or(StopReason::EndTurn)));
        }
    };
    Box::pin(stream)
}

fn flush_calls(st: &mut StreamState) -> Vec<StreamEvent> {
    if st.flushed {
        return Vec::new();
    }
    st.flushed = true;
    let order = std::mem::take(&mut st.order);
    order
        .into_iter()
        .filter_map(|i| st.calls.remove(&i))
        .map(|acc| StreamEvent::ToolCallEnd {
            id: acc.id,
            name: acc.name,
            args: ToolArgs::from_raw(&acc.args),
        })
        .collect()
}

/// Translate one `data:` payload into canonical events.
fn parse_openai_payload(
    payload: &str,
    st: &mut StreamState,
    entry: &ModelEntry,
) -> Vec<anyhow::Result<StreamEvent>> {
    if payload == "[DONE]" {
        let mut events: Vec<anyhow::Result<StreamEvent>> =
            flush_calls(st).into_iter().map(Ok).collect();
        events.push(Ok(StreamEvent::Stop(
            st.pending_stop.unwrap_or(StopReason::EndTurn),
        )));
        return events;
    }
    let Ok(v) = serde_json::from_str::<Value>(payload) else {
        return vec![];
    };

    // Usage-only chunk, emitted last when stream_options.include_usage is set.
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        let input = usage["prompt_tokens"].as_u64().unwrap_or(0) as u32;
        let output = usage["completion_tokens"].as_u64().unwrap_or(0) as u32;
        return vec![Ok(StreamEvent::UsageUpdate {
            input_tokens: input,
            output_tokens: output,
            cost_usd: entry.cost(input, output),
        })];
    }

    let choice = &v["choices"][0];
    let mut events: Vec<anyhow::Result<StreamEvent>> = Vec::new();
    let delta = &choice["delta"];

    if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
        for tc in tool_calls {
            let index = tc["index"].as_u64().unwrap_or(0);
            let acc = st.calls.entry(index).or_insert_with(|| {
                st.order.push(index);
                ToolAcc::default()
            });
            if let Some(id) = tc["id"].as_str() {
                if !id.is_empty() {
                    acc.id = id.to_string();
                }
            }
            if let Some(name) = tc["function"]["name"].as_str() {
                if !name.is_empty() {
                    acc.name = name.to_string();
                }
            }
            if !acc.id.is_empty() && st.started.insert(index) {
                events.push(Ok(StreamEvent::ToolCallStart {
                    id: acc.id.clone(),
                    name: acc.name.clone(),
                }));
            }
            if let Some(frag) = tc["function"]["arguments"].as_str() {
                if !frag.is_empty() {
                    acc.args.push_str(frag);
                    events.push(Ok(StreamEvent::ToolCallArgsDelta {
                        id: acc.id.clone(),
                        partial_json: frag.to_string(),
                    }));
                }
            }
        }
    }

    // Reasoning deltas: `reasoning_content` (DeepSeek wire) or `reasoning`.
    let thinking = delta
        .get("reasoning_content")
        .and_then(Value::as_str)
        .or_else(|| delta.get("reasoning").and_then(Value::as_str));
    if let Some(text) = thinking {
        if !text.is_empty() {
            events.push(Ok(StreamEvent::ThinkingDelta(text.to_string())));
        }
    }

    if let Some(text) = delta.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            events.push(Ok(StreamEvent::TextDelta(text.to_string())));
        }
    }

    match choice["finish_reason"].as_str() {
        Some("tool_calls") => {
            events.extend(flush_calls(st).into_iter().map(Ok));
            st.pending_stop = Some(StopReason::ToolUse);
        }
        Some("length") => {
            events.extend(flush_calls(st).into_iter().map(Ok));
            st.pending_stop = Some(StopReason::MaxTokens);
        }
        Some("stop") => {
            st.pending_stop = Some(StopReason::EndTurn);
        }
        _ => {}
    }

    events
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::builtin_catalog;
    use serde_json::json;

    fn entry() -> ModelEntry {
        builtin_catalog().into_iter().find(|e| e.id == "gpt-4o").unwrap()
    }

    fn parse_all(payloads: &[&str]) -> Vec<StreamEvent> {
        let mut st = StreamState::default();
        let e = entry();
        payloads
            .iter()
            .flat_map(|p| parse_openai_payload(p, &mut st, &e))
            .map(|r| r.unwrap())
            .collect()
    }

    // ── Wire serialization ────────────────────────────────────────────────────

    #[test]
    fn chat_url_appends_path() {
        let a = OpenAiCompatAdapter::new("groq", entry(), None, "https://api.groq.com/openai/v1/");
        assert_eq!(a.chat_url, "https://api.groq.com/openai/v1/chat/completions");
    }

    #[test]
    fn assistant_tool_calls_merge_into_one_message() {
        let msg = Message::new(
            Role::Assistant,
            vec![
                Part::Text { text: " ".into() },
                Part::ToolCall { id: "a".into(), name: "f".into(), args: json!({"x": 1}) },
                Part::ToolCall { id: "b".into(), name: "g".into(), args: json!({}) },
            ],
        );
        let wire = build_openai_messages(&[msg]);
        assert_eq!(wire.len(), 1);
        let calls = wire[0]["tool_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0]["function"]["arguments"], "{\"x\":1}");
    }

    #[test]
    fn tool_result_uses_tool_role() {
        let wire = build_openai_messages(&[Message::tool_result("t1", "ok", false)]);
        assert_eq!(wire[0]["role"], "tool");
        assert_eq!(wire[0]["tool_call_id"], "t1");
        assert_eq!(wire[0]["content"], "ok");
    }

    #[test]
    fn single_text_user_message_collapses_to_string() {
        let wire = build_openai_messages(&[Message::user("hi")]);
        assert_eq!(wire[0]["content"], "hi");
    }

    #[test]
    fn user_image_becomes_image_url_part() {
        let msg = Message::user_with_parts(vec![
            Part::Text { text: "see".into() },
            Part::Image { mime: "image/png".into(), data: "QUJD".into() },
        ]);
        // gpt-4o supports vision, so the image survives body building too.
        let st = AdapterState::new(entry());
        let body = build_openai_body(&st, &[msg]);
        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,QUJD");
    }

    #[test]
    fn reasoning_effort_set_for_thinking_models() {
        let e = builtin_catalog().into_iter().find(|e| e.id == "o3-mini").unwrap();
        let mut st = AdapterState::new(e);
        assert!(st.set_thinking_effort(ThinkingSetting::Effort(ThinkingEffort::High)));
        let body = build_openai_body(&st, &[Message::user("x")]);
        assert_eq!(body["reasoning_effort"], "high");
    }

    // ── Stream parsing ────────────────────────────────────────────────────────

    #[test]
    fn text_deltas_pass_through() {
        let events = parse_all(&[r#"{"choices":[{"delta":{"content":"hi"}}]}"#]);
        assert_eq!(events, vec![StreamEvent::TextDelta("hi".into())]);
    }

    #[test]
    fn tool_call_fragments_accumulate_until_finish() {
        let events = parse_all(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"web_search","arguments":""}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"query\":"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"go\"}"}}]}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "[DONE]",
        ]);
        assert!(matches!(&events[0], StreamEvent::ToolCallStart { id, name }
            if id == "call_1" && name == "web_search"));
        let end = events
            .iter()
            .find(|e| matches!(e, StreamEvent::ToolCallEnd { .. }))
            .unwrap();
        assert!(matches!(end, StreamEvent::ToolCallEnd { args: ToolArgs::Parsed(v), .. }
            if v == &json!({"query": "go"})));
        assert_eq!(*events.last().unwrap(), StreamEvent::Stop(StopReason::ToolUse));
    }

    #[test]
    fn parallel_tool_calls_flush_in_index_order() {
        let events = parse_all(&[
            r#"{"choices":[{"delta":{"tool_calls":[
                {"index":0,"id":"a","function":{"name":"f","arguments":"{}"}},
                {"index":1,"id":"b","function":{"name":"g","arguments":"{}"}}]}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "[DONE]",
        ]);
        let ends: Vec<&StreamEvent> = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::ToolCallEnd { .. }))
            .collect();
        assert_eq!(ends.len(), 2);
        assert!(matches!(ends[0], StreamEvent::ToolCallEnd { id, .. } if id == "a"));
        assert!(matches!(ends[1], StreamEvent::ToolCallEnd { id, .. } if id == "b"));
    }

    #[test]
    fn usage_chunk_arrives_before_done_stop() {
        let events = parse_all(&[
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":3}}"#,
            "[DONE]",
        ]);
        assert!(matches!(events[0], StreamEvent::UsageUpdate { input_tokens: 12, output_tokens: 3, .. }));
        assert_eq!(*events.last().unwrap(), StreamEvent::Stop(StopReason::EndTurn));
    }

    #[test]
    fn reasoning_content_maps_to_thinking_delta() {
        let events = parse_all(&[r#"{"choices":[{"delta":{"reasoning_content":"mull"}}]}"#]);
        assert_eq!(events, vec![StreamEvent::ThinkingDelta("mull".into())]);
    }

    #[test]
    fn finish_reason_length_maps_to_max_tokens() {
        let events = parse_all(&[
            r#"{"choices":[{"delta":{},"finish_reason":"length"}]}"#,
            "[DONE]",
        ]);
        assert_eq!(*events.last().unwrap(), StreamEvent::Stop(StopReason::MaxTokens));
    }
}
