// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The turn engine: one user input in, one completed assistant turn out.
//!
//! A turn is a loop of streams.  Each stream either ends the turn
//! (`Stop(end_turn)`) or requests tools (`Stop(tool_use)`); tool results are
//! appended and the stream reopens with the grown history.  A `transfer`
//! call short-circuits the loop: siblings are suppressed, control moves to
//! the target agent, and streaming resumes there with the projected history.
//!
//! Cancellation is all-or-nothing: every participating history rolls back to
//! its state at turn start and the recorded turn marker is withdrawn.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crew_model::{Message, Part, Role, StopReason, StreamEvent, ToolArgs};
use crew_store::{preview, Conversation, ConversationStore, TurnMarker};
use crew_tools::{ToolCall, ToolOutput, ToolRegistry};

use crate::error::{CoreError, TransferError};
use crate::events::UiEvent;
use crate::manager::AgentManager;
use crate::transfer::{TransferRequest, TRANSFER_TOOL};

/// How many tool calls of one batch may run at once.
const DEFAULT_TOOL_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Streaming,
    Tools,
}

/// How a turn ended from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Cancelled,
}

/// What the engine does after a handled transfer.
enum TransferFlow {
    /// Re-enter streaming against the (local) target agent.
    Resume,
    /// The handoff finished the turn itself (remote A2A target).
    TurnDone,
}

pub struct TurnEngine {
    tools: Arc<ToolRegistry>,
    store: Arc<ConversationStore>,
    state: TurnState,
    concurrency: usize,
}

/// The in-flight assistant message: accumulated deltas that have not been
/// committed to history yet.
#[derive(Default)]
struct Draft {
    /// Closed thinking blocks, in arrival order.
    thinking: Vec<(String, Option<String>)>,
    /// The block currently receiving deltas.
    open_thinking: Option<String>,
    text: String,
    /// Completed tool calls in `ToolCallEnd` arrival order.
    calls: Vec<PendingCall>,
}

#[derive(Clone)]
struct PendingCall {
    id: String,
    name: String,
    args: ToolArgs,
}

impl Draft {
    /// Fold duplicate ids into one call — repeated `ToolCallEnd` for an id
    /// means the provider split one call across blocks; the last end wins.
    fn push_call(&mut self, id: String, name: String, args: ToolArgs) {
        if let Some(existing) = self.calls.iter_mut().find(|c| c.id == id) {
            if !name.is_empty() {
                existing.name = name;
            }
            existing.args = args;
        } else {
            self.calls.push(PendingCall { id, name, args });
        }
    }

    /// Turn the draft into history parts.  An assistant message that has
    /// tool calls but no text gets a single space — some providers reject
    /// empty text next to tool calls.
    fn into_message(mut self) -> Option<Message> {
        if let Some(open) = self.open_thinking.take() {
            self.thinking.push((open, None));
        }
        let mut parts = Vec::new();
        for (text, signature) in self.thinking {
            parts.push(Part::Thinking { text, signature });
        }
        let text = if self.text.is_empty() && !self.calls.is_empty() {
            " ".to_string()
        } else {
            self.text
        };
        if !text.is_empty() {
            parts.push(Part::Text { text });
        }
        for call in &self.calls {
            let args = match &call.args {
                ToolArgs::Parsed(v) => v.clone(),
                ToolArgs::Malformed { .. } => serde_json::Value::Object(Default::default()),
            };
            parts.push(Part::ToolCall { id: call.id.clone(), name: call.name.clone(), args });
        }
        if parts.is_empty() {
            return None;
        }
        Some(Message::new(Role::Assistant, parts))
    }
}

impl TurnEngine {
    pub fn new(tools: Arc<ToolRegistry>, store: Arc<ConversationStore>) -> Self {
        Self {
            tools,
            store,
            state: TurnState::Idle,
            concurrency: DEFAULT_TOOL_CONCURRENCY,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == TurnState::Idle
    }

    /// Run one user turn against the current agent.
    ///
    /// Rejected with a state error while another turn is running; user turns
    /// within a conversation are strictly serialized.
    pub async fn run_turn(
        &mut self,
        manager: &mut AgentManager,
        conversation: &mut Conversation,
        input: Vec<Part>,
        tx: &mpsc::Sender<UiEvent>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, CoreError> {
        if self.state != TurnState::Idle {
            return Err(CoreError::State("a turn is already in progress".into()));
        }
        let agent_name = manager
            .current_name()
            .ok_or_else(|| CoreError::State("no agent is selected".into()))?;

        // Rollback point: full history contents at turn start.  Lengths are
        // not enough — a transfer replaces the target's history wholesale.
        let rollback: Vec<(String, Vec<Message>)> = manager
            .agents()
            .iter()
            .map(|a| (a.name.clone(), a.history.clone()))
            .collect();

        let user_message = Message::user_with_parts(input);
        let user_text = user_message.text();
        conversation.set_title_from(&user_text);

        let agent = manager
            .current_agent_mut()
            .expect("current agent resolved above");
        agent.history.push(user_message);

        // Jump anchor: current agent just past the user message, everyone
        // else at their turn-start length.
        let mut indices: BTreeMap<String, usize> = rollback
            .iter()
            .filter(|(_, history)| !history.is_empty())
            .map(|(name, history)| (name.clone(), history.len()))
            .collect();
        indices.insert(
            agent_name.clone(),
            manager.agent(&agent_name).expect("current agent").history.len(),
        );
        conversation.record_turn(TurnMarker {
            agent: agent_name.clone(),
            preview: preview(&user_text),
            indices,
        });

        self.state = TurnState::Streaming;
        let result = self.drive(manager, conversation, tx, cancel).await;
        self.state = TurnState::Idle;

        match result {
            Ok(TurnOutcome::Cancelled) => {
                // No partial-turn commit: restore every history and withdraw
                // the marker recorded above.
                for (name, history) in rollback {
                    if let Some(agent) = manager.agent_mut(&name) {
                        agent.history = history;
                    }
                }
                conversation.turn_log.pop();
                debug!("turn cancelled, histories restored");
                Ok(TurnOutcome::Cancelled)
            }
            other => other,
        }
    }

    /// The stream/tools loop.  Returns only through end-of-turn,
    /// cancellation, or error.
    async fn drive(
        &mut self,
        manager: &mut AgentManager,
        conversation: &mut Conversation,
        tx: &mpsc::Sender<UiEvent>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, CoreError> {
        loop {
            self.state = TurnState::Streaming;
            let history = manager
                .current_agent()
                .ok_or_else(|| CoreError::State("no agent is selected".into()))?
                .history
                .clone();

            let mut stream = manager.adapter().stream(&history).await?;

            let mut draft = Draft::default();
            let mut stop = StopReason::EndTurn;
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(TurnOutcome::Cancelled),
                    ev = futures::StreamExt::next(&mut stream) => ev,
                };
                match event {
                    None => break,
                    Some(Err(e)) => return Err(CoreError::Stream(e.to_string())),
                    Some(Ok(ev)) => {
                        if let Some(reason) = self.absorb(ev, &mut draft, tx).await {
                            stop = reason;
                            break;
                        }
                    }
                }
            }
            // Scope exit for the stream: connection and partial state go
            // with it on every path out of this loop body.
            drop(stream);

            match stop {
                StopReason::Error => {
                    return Err(CoreError::Stream("provider reported a stream error".into()));
                }
                StopReason::EndTurn | StopReason::MaxTokens if draft.calls.is_empty() => {
                    if let Some(msg) = draft.into_message() {
                        self.current_history(manager)?.push(msg);
                    }
                    if stop == StopReason::MaxTokens {
                        let _ = tx
                            .send(UiEvent::Notice("response truncated: output token limit".into()))
                            .await;
                    }
                    self.snapshot(manager, conversation, tx).await;
                    let _ = tx.send(UiEvent::TurnCompleted).await;
                    return Ok(TurnOutcome::Completed);
                }
                StopReason::MaxTokens => {
                    // Truncated mid-call: commit what we have, answer every
                    // buffered call with an error so the call/result pairing
                    // stays intact, and end the turn.
                    let calls = draft.calls.clone();
                    if let Some(msg) = draft.into_message() {
                        self.current_history(manager)?.push(msg);
                    }
                    for call in &calls {
                        self.current_history(manager)?.push(Message::tool_result(
                            &call.id,
                            "not executed (output truncated)",
                            true,
                        ));
                    }
                    let _ = tx
                        .send(UiEvent::Notice("response truncated: output token limit".into()))
                        .await;
                    self.snapshot(manager, conversation, tx).await;
                    let _ = tx.send(UiEvent::TurnCompleted).await;
                    return Ok(TurnOutcome::Completed);
                }
                StopReason::EndTurn | StopReason::ToolUse => {
                    let calls = draft.calls.clone();
                    if let Some(msg) = draft.into_message() {
                        self.current_history(manager)?.push(msg);
                    }
                    if calls.is_empty() {
                        // Tool-use stop with nothing buffered: treat as end.
                        self.snapshot(manager, conversation, tx).await;
                        let _ = tx.send(UiEvent::TurnCompleted).await;
                        return Ok(TurnOutcome::Completed);
                    }

                    // Transfer wins over every sibling in the batch.
                    if let Some(idx) = calls.iter().position(|c| c.name == TRANSFER_TOOL) {
                        match self
                            .handle_transfer(manager, conversation, &calls, idx, tx)
                            .await?
                        {
                            // Local handoff: streaming resumes with the target.
                            TransferFlow::Resume => continue,
                            // Remote handoff already completed the turn.
                            TransferFlow::TurnDone => return Ok(TurnOutcome::Completed),
                        }
                    }

                    self.state = TurnState::Tools;
                    let outputs = self.execute_batch(manager, &calls, tx, cancel).await;
                    if cancel.is_cancelled() {
                        return Ok(TurnOutcome::Cancelled);
                    }
                    // Results land in ToolCallEnd arrival order, whatever
                    // the completion order was.
                    for output in outputs {
                        self.current_history(manager)?.push(Message::tool_result(
                            &output.call_id,
                            output.content,
                            output.is_error,
                        ));
                    }
                }
            }
        }
    }

    /// Feed one stream event into the draft; returns the stop reason when
    /// the stream is over.
    async fn absorb(
        &self,
        event: StreamEvent,
        draft: &mut Draft,
        tx: &mpsc::Sender<UiEvent>,
    ) -> Option<StopReason> {
        match event {
            StreamEvent::TextDelta(text) => {
                draft.text.push_str(&text);
                // Drop-oldest-for-UI-only: a full channel loses the delta,
                // the draft does not.
                let _ = tx.try_send(UiEvent::TextDelta(text));
                None
            }
            StreamEvent::ThinkingDelta(text) => {
                draft.open_thinking.get_or_insert_with(String::new).push_str(&text);
                let _ = tx.try_send(UiEvent::ThinkingDelta(text));
                None
            }
            StreamEvent::ThinkingSignature(signature) => {
                let text = draft.open_thinking.take().unwrap_or_default();
                draft.thinking.push((text, Some(signature)));
                None
            }
            StreamEvent::ToolCallStart { .. } | StreamEvent::ToolCallArgsDelta { .. } => None,
            StreamEvent::ToolCallEnd { id, name, args } => {
                draft.push_call(id, name, args);
                None
            }
            StreamEvent::UsageUpdate { input_tokens, output_tokens, cost_usd } => {
                let _ = tx
                    .send(UiEvent::Usage { input_tokens, output_tokens, cost_usd })
                    .await;
                None
            }
            StreamEvent::Stop(reason) => Some(reason),
        }
    }

    fn current_history<'m>(
        &self,
        manager: &'m mut AgentManager,
    ) -> Result<&'m mut Vec<Message>, CoreError> {
        manager
            .current_agent_mut()
            .map(|a| &mut a.history)
            .ok_or_else(|| CoreError::State("no agent is selected".into()))
    }

    /// Execute a batch of tool calls with bounded parallelism.
    ///
    /// Outputs come back in call order.  Malformed arguments never reach the
    /// registry; they answer directly with an error result.
    async fn execute_batch(
        &self,
        manager: &AgentManager,
        calls: &[PendingCall],
        tx: &mpsc::Sender<UiEvent>,
        cancel: &CancellationToken,
    ) -> Vec<ToolOutput> {
        let agent_name = manager.current_name().unwrap_or_default();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(calls.len());

        for call in calls {
            let args_preview = match &call.args {
                ToolArgs::Parsed(v) => v.clone(),
                ToolArgs::Malformed { raw, .. } => serde_json::Value::String(raw.clone()),
            };
            let _ = tx
                .send(UiEvent::ToolCallStarted {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    args: args_preview,
                })
                .await;

            let call = call.clone();
            let tools = Arc::clone(&self.tools);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let agent = agent_name.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                match call.args {
                    ToolArgs::Malformed { error, .. } => {
                        ToolOutput::err(&call.id, format!("invalid tool arguments: {error}"))
                    }
                    ToolArgs::Parsed(args) => {
                        let tc = ToolCall { id: call.id.clone(), name: call.name.clone(), args };
                        tokio::select! {
                            _ = cancel.cancelled() => ToolOutput::err(&call.id, "cancelled"),
                            out = tools.invoke_for(&agent, &tc) => out,
                        }
                    }
                }
            }));
        }

        let mut outputs = Vec::with_capacity(calls.len());
        for (i, handle) in handles.into_iter().enumerate() {
            let output = match handle.await {
                Ok(out) => out,
                Err(e) => ToolOutput::err(&calls[i].id, format!("tool panicked: {e}")),
            };
            let _ = tx
                .send(UiEvent::ToolCallFinished {
                    id: output.call_id.clone(),
                    name: calls[i].name.clone(),
                    output: output.content.clone(),
                    is_error: output.is_error,
                })
                .await;
            outputs.push(output);
        }
        outputs
    }

    /// Intercept a transfer call: suppress siblings, settle the source's
    /// call/result pairing, and move control.
    async fn handle_transfer(
        &mut self,
        manager: &mut AgentManager,
        conversation: &mut Conversation,
        calls: &[PendingCall],
        transfer_idx: usize,
        tx: &mpsc::Sender<UiEvent>,
    ) -> Result<TransferFlow, CoreError> {
        let parsed: Result<TransferRequest, TransferError> = match &calls[transfer_idx].args {
            ToolArgs::Parsed(v) => serde_json::from_value(v.clone())
                .map_err(|e| TransferError::InvalidArguments(e.to_string())),
            ToolArgs::Malformed { error, .. } => {
                Err(TransferError::InvalidArguments(error.clone()))
            }
        };
        let checked = parsed.and_then(|request| {
            if manager.agent(&request.target_agent).is_some() {
                Ok(request)
            } else {
                Err(TransferError::UnknownTarget(request.target_agent))
            }
        });

        // Settle every buffered call on the source before anything else —
        // even a failed transfer must leave the call/result pairing intact
        // for the provider, or the source's next stream is rejected.
        for (i, call) in calls.iter().enumerate() {
            let (content, is_error) = if i != transfer_idx {
                ("not executed (superseded by transfer)".to_string(), true)
            } else {
                match &checked {
                    Ok(request) => {
                        (format!("control transferred to {}", request.target_agent), false)
                    }
                    Err(e) => (e.to_string(), true),
                }
            };
            self.current_history(manager)?
                .push(Message::tool_result(&call.id, content, is_error));
        }

        let request = checked?;
        let source = manager
            .current_name()
            .ok_or(TransferError::NoActiveAgent)?;

        let _ = tx
            .send(UiEvent::AgentTransferred {
                from: source,
                to: request.target_agent.clone(),
                task: request.task.clone(),
            })
            .await;

        if manager
            .agent(&request.target_agent)
            .map(|a| a.is_remote())
            .unwrap_or(false)
        {
            self.remote_transfer(manager, conversation, &request, tx).await?;
            return Ok(TransferFlow::TurnDone);
        }

        manager.transfer(&request.target_agent, &request.task, &request.relevant_messages)?;
        Ok(TransferFlow::Resume)
    }

    /// Forward a transfer to a remote A2A agent and relay its stream.
    ///
    /// The remote side owns the task; locally the exchange is mirrored into
    /// the remote agent's history so persistence shows the full
    /// conversation.  Control stays with the local source afterwards.
    async fn remote_transfer(
        &mut self,
        manager: &mut AgentManager,
        conversation: &mut Conversation,
        request: &TransferRequest,
        tx: &mpsc::Sender<UiEvent>,
    ) -> Result<(), CoreError> {
        let client = manager
            .remote_client()
            .ok_or_else(|| TransferError::Remote("no A2A client configured".into()))?;
        let endpoint = manager
            .agent(&request.target_agent)
            .and_then(|a| a.remote_endpoint.clone())
            .ok_or_else(|| TransferError::Remote("agent has no endpoint".into()))?;

        let relevant: Vec<Message> = {
            let source = manager
                .current_agent()
                .ok_or(TransferError::NoActiveAgent)?;
            request
                .relevant_messages
                .iter()
                .filter_map(|&i| usize::try_from(i).ok())
                .filter_map(|i| source.history.get(i).cloned())
                .collect()
        };

        let mut stream = client
            .stream_task(&endpoint, &request.target_agent, &request.task, relevant)
            .await?;

        let mut text = String::new();
        while let Some(event) = futures::StreamExt::next(&mut stream).await {
            match event {
                Ok(StreamEvent::TextDelta(t)) => {
                    text.push_str(&t);
                    let _ = tx.try_send(UiEvent::TextDelta(t));
                }
                Ok(StreamEvent::Stop(_)) => break,
                Ok(_) => {}
                Err(e) => return Err(TransferError::Remote(e.to_string()).into()),
            }
        }

        if let Some(mirror) = manager.agent_mut(&request.target_agent) {
            mirror.history.push(Message::user(&request.task));
            mirror.history.push(Message::assistant(&text));
        }
        self.snapshot(manager, conversation, tx).await;
        let _ = tx.send(UiEvent::TurnCompleted).await;
        Ok(())
    }

    /// Mirror agent histories into the conversation and persist it.
    ///
    /// A write failure keeps the turn in memory and tells the user; the next
    /// snapshot retries.
    async fn snapshot(
        &self,
        manager: &AgentManager,
        conversation: &mut Conversation,
        tx: &mpsc::Sender<UiEvent>,
    ) {
        for agent in manager.agents() {
            if !agent.history.is_empty() {
                conversation
                    .histories
                    .insert(agent.name.clone(), agent.history.clone());
            }
        }
        conversation.touch();
        if let Err(e) = self.store.save(conversation) {
            warn!(error = %e, "snapshot failed, turn retained in memory");
            let _ = tx
                .send(UiEvent::Notice(format!(
                    "could not persist conversation (will retry): {e}"
                )))
                .await;
        }
    }
}
