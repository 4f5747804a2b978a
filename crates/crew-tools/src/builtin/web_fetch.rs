// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{Tool, ToolCall, ToolOutput};

/// Keep fetched pages small enough not to crowd out the conversation.
const MAX_CONTENT_CHARS: usize = 20_000;

/// Fetch a web page and return its readable text.
#[derive(Default)]
pub struct WebFetchTool {
    client: reqwest::Client,
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return the page content as plain text."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The http(s) URL to fetch" }
            },
            "required": ["url"]
        })
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(30))
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(url) = call.args["url"].as_str() else {
            return ToolOutput::err(&call.id, "web_fetch requires a \"url\" string");
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolOutput::err(&call.id, format!("not an http(s) URL: {url}"));
        }

        let resp = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call.id, format!("fetch failed: {e}")),
        };
        if !resp.status().is_success() {
            let status = resp.status();
            return ToolOutput::err(&call.id, format!("fetch failed: HTTP {status}"));
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => return ToolOutput::err(&call.id, format!("fetch failed: {e}")),
        };

        let text = if content_type.contains("text/html") {
            html2text::from_read(body.as_bytes(), 100)
        } else {
            body
        };
        ToolOutput::ok(&call.id, truncate(&text, MAX_CONTENT_CHARS))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}\n[truncated]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_http_urls() {
        let tool = WebFetchTool::default();
        let call = ToolCall {
            id: "c".into(),
            name: "web_fetch".into(),
            args: json!({"url": "file:///etc/passwd"}),
        };
        let out = tool.execute(&call).await;
        assert!(out.is_error);
        assert!(out.content.contains("not an http(s) URL"));
    }

    #[tokio::test]
    async fn missing_url_is_an_error_result() {
        let tool = WebFetchTool::default();
        let call = ToolCall { id: "c".into(), name: "web_fetch".into(), args: json!({}) };
        let out = tool.execute(&call).await;
        assert!(out.is_error);
    }

    #[test]
    fn truncate_leaves_short_text_alone() {
        assert_eq!(truncate("short", 100), "short");
    }

    #[test]
    fn truncate_marks_long_text() {
        let long = "x".repeat(50);
        let cut = truncate(&long, 10);
        assert!(cut.starts_with("xxxxxxxxxx"));
        assert!(cut.ends_with("[truncated]"));
    }
}
