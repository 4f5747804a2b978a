// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{Tool, ToolCall, ToolOutput};

const TAVILY_URL: &str = "https://api.tavily.com/search";
const MAX_RESULTS: usize = 5;

/// Web search backed by the Tavily API.
///
/// Registered even without a key so agents can discover it; an invocation
/// without credentials returns an error result telling the model (and the
/// user reading the transcript) what is missing.
pub struct WebSearchTool {
    pub api_key: Option<String>,
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(api_key: Option<String>) -> Self {
        Self { api_key, client: reqwest::Client::new() }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns a short answer plus the top results with titles and URLs."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The search query" }
            },
            "required": ["query"]
        })
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(30))
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(query) = call.args["query"].as_str().filter(|q| !q.is_empty()) else {
            return ToolOutput::err(&call.id, "web_search requires a non-empty \"query\" string");
        };
        let Some(key) = &self.api_key else {
            return ToolOutput::err(&call.id, "web search unavailable: TAVILY_API_KEY is not set");
        };

        debug!(%query, "tavily search");
        let body = json!({
            "api_key": key,
            "query": query,
            "max_results": MAX_RESULTS,
            "include_answer": true,
        });
        let resp = match self.client.post(TAVILY_URL).json(&body).send().await {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call.id, format!("web search failed: {e}")),
        };
        if !resp.status().is_success() {
            let status = resp.status();
            return ToolOutput::err(&call.id, format!("web search failed: HTTP {status}"));
        }
        let v: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => return ToolOutput::err(&call.id, format!("web search failed: {e}")),
        };

        ToolOutput::ok(&call.id, format_results(&v))
    }
}

fn format_results(v: &Value) -> String {
    let mut out = String::new();
    if let Some(answer) = v["answer"].as_str().filter(|a| !a.is_empty()) {
        out.push_str(answer);
        out.push_str("\n\n");
    }
    if let Some(results) = v["results"].as_array() {
        for (i, r) in results.iter().take(MAX_RESULTS).enumerate() {
            let title = r["title"].as_str().unwrap_or("(untitled)");
            let url = r["url"].as_str().unwrap_or("");
            let snippet = r["content"].as_str().unwrap_or("");
            out.push_str(&format!("{}. {title}\n   {url}\n   {snippet}\n", i + 1));
        }
    }
    if out.is_empty() {
        out.push_str("no results");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_query_is_an_error_result() {
        let tool = WebSearchTool::new(Some("key".into()));
        let call = ToolCall { id: "c".into(), name: "web_search".into(), args: json!({}) };
        let out = tool.execute(&call).await;
        assert!(out.is_error);
        assert!(out.content.contains("query"));
    }

    #[tokio::test]
    async fn missing_key_is_an_error_result() {
        let tool = WebSearchTool::new(None);
        let call = ToolCall {
            id: "c".into(),
            name: "web_search".into(),
            args: json!({"query": "rust"}),
        };
        let out = tool.execute(&call).await;
        assert!(out.is_error);
        assert!(out.content.contains("TAVILY_API_KEY"));
    }

    #[test]
    fn format_results_lists_answer_then_hits() {
        let v = json!({
            "answer": "Go 1.23 is the latest.",
            "results": [
                { "title": "Go releases", "url": "https://go.dev/dl", "content": "Downloads" }
            ]
        });
        let text = format_results(&v);
        assert!(text.starts_with("Go 1.23"));
        assert!(text.contains("1. Go releases"));
        assert!(text.contains("https://go.dev/dl"));
    }

    #[test]
    fn format_results_empty_says_so() {
        assert_eq!(format_results(&json!({})), "no results");
    }
}
