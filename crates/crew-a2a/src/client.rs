// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use tracing::debug;

use crew_core::{RemoteAgentClient, TransferError};
use crew_model::{EventStream, Message, StreamEvent};

use crate::TaskEnvelope;

/// HTTP client side of the A2A wire.  Installed into the agent manager as
/// the capability handle used for transfers to remote agents.
#[derive(Default)]
pub struct A2aClient {
    client: reqwest::Client,
}

impl A2aClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemoteAgentClient for A2aClient {
    async fn stream_task(
        &self,
        endpoint: &str,
        agent: &str,
        task: &str,
        relevant_messages: Vec<Message>,
    ) -> Result<EventStream, TransferError> {
        let url = format!("{}/{agent}", endpoint.trim_end_matches('/'));
        debug!(%url, "posting a2a task");
        let envelope = TaskEnvelope { task: task.to_string(), relevant_messages };

        let resp = self
            .client
            .post(&url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| TransferError::Remote(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransferError::Remote(format!("{url} returned {status}: {body}")));
        }

        Ok(ndjson_event_stream(resp))
    }
}

/// Decode a newline-delimited JSON body into canonical stream events.
///
/// Lines can split across chunks; a carry-over buffer holds the tail.
/// Unparseable lines are skipped rather than killing the stream.
fn ndjson_event_stream(resp: reqwest::Response) -> EventStream {
    let stream = async_stream::stream! {
        let mut resp = resp;
        let mut buffer = String::new();
        loop {
            match resp.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    while let Some(pos) = buffer.find('\n') {
                        let line: String = buffer.drain(..=pos).collect();
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<StreamEvent>(line) {
                            Ok(event) => yield Ok(event),
                            Err(e) => debug!(error = %e, "skipping unparseable a2a line"),
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    yield Err(anyhow::anyhow!("a2a stream error: {e}"));
                    return;
                }
            }
        }
    };
    Box::pin(stream)
}
