// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crew_core::{ChatSession, UiEvent};
use crew_model::{StopReason, StreamEvent};

use crate::{AgentInfo, TaskEnvelope};

#[derive(Debug, Clone)]
pub struct A2aConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
}

impl Default for A2aConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8310,
            base_url: "http://127.0.0.1:8310".into(),
        }
    }
}

#[derive(Clone)]
struct AppState {
    session: Arc<Mutex<ChatSession>>,
    base_url: String,
}

/// Run the A2A server until the process ends.
///
/// Turns are serialized through the session mutex, matching the engine's
/// one-turn-at-a-time contract; concurrent posts queue.
pub async fn serve(session: Arc<Mutex<ChatSession>>, config: A2aConfig) -> anyhow::Result<()> {
    let state = AppState { session, base_url: config.base_url.clone() };
    let app = Router::new()
        .route("/agents", get(list_agents))
        .route("/:agent", post(run_task))
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, base_url = %config.base_url, "a2a server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentInfo>> {
    let session = state.session.lock().await;
    let agents = session
        .manager
        .agents()
        .iter()
        .filter(|a| !a.is_remote())
        .map(|a| AgentInfo {
            name: a.name.clone(),
            description: a.description.clone(),
            url: format!("{}/{}", state.base_url.trim_end_matches('/'), a.name),
        })
        .collect();
    Json(agents)
}

async fn run_task(
    State(state): State<AppState>,
    Path(agent): Path<String>,
    Json(envelope): Json<TaskEnvelope>,
) -> Response {
    {
        let session = state.session.lock().await;
        if session.manager.agent(&agent).is_none() {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": format!("unknown agent: {agent}") })),
            )
                .into_response();
        }
    }

    let (ui_tx, ui_rx) = mpsc::channel::<UiEvent>(256);
    let (line_tx, line_rx) = mpsc::channel::<Result<String, std::convert::Infallible>>(256);

    // Relay engine events to the wire as they arrive.
    tokio::spawn(relay_events(ui_rx, line_tx));

    let session = Arc::clone(&state.session);
    tokio::spawn(async move {
        let cancel = CancellationToken::new();
        let mut session = session.lock().await;
        if let Err(e) = session
            .run_remote_task(&agent, &envelope.task, envelope.relevant_messages, &ui_tx, &cancel)
            .await
        {
            warn!(%agent, error = %e, "a2a task failed");
            let _ = ui_tx.send(UiEvent::Notice(e.to_string())).await;
        }
        // Dropping ui_tx closes the relay, which closes the response body.
    });

    let body = Body::from_stream(ReceiverStream::new(line_rx));
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/x-ndjson")
        .body(body)
        .expect("static response parts are valid")
}

/// Translate engine events into serialized canonical stream events, one JSON
/// object per line.
async fn relay_events(
    mut ui_rx: mpsc::Receiver<UiEvent>,
    line_tx: mpsc::Sender<Result<String, std::convert::Infallible>>,
) {
    let mut failed = false;
    while let Some(event) = ui_rx.recv().await {
        let mapped = match event {
            UiEvent::TextDelta(text) => Some(StreamEvent::TextDelta(text)),
            UiEvent::ThinkingDelta(text) => Some(StreamEvent::ThinkingDelta(text)),
            UiEvent::ToolCallStarted { id, name, .. } => {
                Some(StreamEvent::ToolCallStart { id, name })
            }
            UiEvent::Usage { input_tokens, output_tokens, cost_usd } => {
                Some(StreamEvent::UsageUpdate { input_tokens, output_tokens, cost_usd })
            }
            UiEvent::TurnCompleted => Some(StreamEvent::Stop(StopReason::EndTurn)),
            UiEvent::Notice(text) => {
                // Failure path: surface the message, then a terminal error stop.
                failed = true;
                let _ = send_line(&line_tx, &StreamEvent::TextDelta(text)).await;
                Some(StreamEvent::Stop(StopReason::Error))
            }
            UiEvent::ToolCallFinished { .. } | UiEvent::AgentTransferred { .. } => None,
        };
        if let Some(event) = mapped {
            let done = matches!(event, StreamEvent::Stop(_));
            if send_line(&line_tx, &event).await.is_err() || done {
                break;
            }
        }
        if failed {
            break;
        }
    }
}

async fn send_line(
    line_tx: &mpsc::Sender<Result<String, std::convert::Infallible>>,
    event: &StreamEvent,
) -> Result<(), ()> {
    let mut line = serde_json::to_string(event).expect("stream events serialize");
    line.push('\n');
    line_tx.send(Ok(line)).await.map_err(|_| ())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
