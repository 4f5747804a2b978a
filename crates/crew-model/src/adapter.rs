// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use tracing::warn;

use crate::{
    Capability, EventStream, Message, ModelEntry, Part, ProviderError, ThinkingSetting,
    ToolSchema,
};

/// Minimum thinking budget accepted by budget-based providers.
pub const MIN_THINKING_BUDGET: u32 = 1024;

/// Uniform streaming contract against one LLM backend.
///
/// The configuration methods (`set_system_prompt`, tool registration,
/// `set_thinking`, `set_temperature`) side-effect the next `stream` call.
/// The returned [`EventStream`] borrows nothing from the adapter, so holding
/// it does not block reconfiguration for subsequent turns; dropping it on any
/// exit path releases the connection.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider id (e.g. `"anthropic"`).
    fn provider(&self) -> &str;

    /// Model identifier forwarded to the API.
    fn model_id(&self) -> &str;

    /// Install the system prompt for subsequent streams.
    fn set_system_prompt(&mut self, prompt: &str);

    /// Sampling temperature override; `None` uses the provider default.
    fn set_temperature(&mut self, temperature: Option<f32>);

    /// Add a tool schema to the set the next stream carries.
    fn register_tool(&mut self, schema: ToolSchema);

    /// Remove all registered tool schemas.
    fn clear_tools(&mut self);

    /// Negotiate thinking mode.  Returns `true` when the model supports the
    /// requested form.  `Off` always succeeds.
    fn set_thinking(&mut self, setting: ThinkingSetting) -> bool;

    /// Open a stream for the given canonical history.
    async fn stream(&self, messages: &[Message]) -> Result<EventStream, ProviderError>;
}

// ─── Shared adapter state ─────────────────────────────────────────────────────

/// Mutable configuration shared by every concrete adapter.
///
/// Provider variants hold one of these plus their wire specifics; the state
/// handling (including thinking negotiation) is identical across them.
#[derive(Debug, Clone)]
pub(crate) struct AdapterState {
    pub entry: ModelEntry,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub tools: Vec<ToolSchema>,
    pub thinking: ThinkingSetting,
}

impl AdapterState {
    pub fn new(entry: ModelEntry) -> Self {
        Self {
            entry,
            system_prompt: None,
            temperature: None,
            tools: Vec::new(),
            thinking: ThinkingSetting::Off,
        }
    }

    /// Negotiation for budget-based providers (Anthropic, Gemini): budgets
    /// below the minimum are raised silently with a warning; effort levels
    /// are not accepted.
    pub fn set_thinking_budget(&mut self, setting: ThinkingSetting) -> bool {
        match setting {
            ThinkingSetting::Off => {
                self.thinking = ThinkingSetting::Off;
                true
            }
            ThinkingSetting::Budget(n) => {
                if !self.entry.supports(Capability::Thinking) {
                    return false;
                }
                let budget = if n < MIN_THINKING_BUDGET {
                    warn!(
                        requested = n,
                        minimum = MIN_THINKING_BUDGET,
                        model = %self.entry.id,
                        "thinking budget below provider minimum, raising"
                    );
                    MIN_THINKING_BUDGET
                } else {
                    n
                };
                self.thinking = ThinkingSetting::Budget(budget);
                true
            }
            ThinkingSetting::Effort(_) => false,
        }
    }

    /// Negotiation for effort-based providers (OpenAI wire): only the three
    /// levels are accepted; budgets are not.
    pub fn set_thinking_effort(&mut self, setting: ThinkingSetting) -> bool {
        match setting {
            ThinkingSetting::Off => {
                self.thinking = ThinkingSetting::Off;
                true
            }
            ThinkingSetting::Effort(level) => {
                if !self.entry.supports(Capability::Thinking) {
                    return false;
                }
                self.thinking = ThinkingSetting::Effort(level);
                true
            }
            ThinkingSetting::Budget(_) => false,
        }
    }

    /// The effective system text for a request.
    ///
    /// System messages present in the history (placed there by a transfer)
    /// take precedence over the installed prompt so the two never stack.
    pub fn system_text(&self, messages: &[Message]) -> Option<String> {
        let from_history: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == crate::Role::System)
            .filter_map(Message::first_text)
            .collect();
        if !from_history.is_empty() {
            return Some(from_history.join("\n\n"));
        }
        self.system_prompt.clone()
    }

    /// Whether image parts must be stripped for this model.
    pub fn strip_images(&self) -> bool {
        !self.entry.supports(Capability::Vision)
    }
}

/// Drop media parts the model cannot accept, logging what was lost.
///
/// Total conversion: the result is always a valid message list, never an
/// error.  The debug log is the only trace of the loss.
pub(crate) fn strip_unsupported_media(messages: &[Message], strip_images: bool) -> Vec<Message> {
    if !strip_images {
        return messages.to_vec();
    }
    messages
        .iter()
        .map(|m| {
            let mut msg = m.clone();
            let before = msg.parts.len();
            msg.parts.retain(|p| !matches!(p, Part::Image { .. }));
            if msg.parts.len() < before {
                tracing::debug!(
                    dropped = before - msg.parts.len(),
                    "dropping image parts for non-vision model"
                );
            }
            if msg.parts.is_empty() {
                msg.parts.push(Part::Text { text: String::new() });
            }
            msg
        })
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::builtin_catalog;

    fn entry(id: &str) -> ModelEntry {
        builtin_catalog().into_iter().find(|e| e.id == id).unwrap()
    }

    #[test]
    fn budget_below_minimum_is_raised() {
        let mut st = AdapterState::new(entry("claude-sonnet-4-5"));
        assert!(st.set_thinking_budget(ThinkingSetting::Budget(100)));
        assert_eq!(st.thinking, ThinkingSetting::Budget(MIN_THINKING_BUDGET));
    }

    #[test]
    fn budget_above_minimum_kept() {
        let mut st = AdapterState::new(entry("claude-sonnet-4-5"));
        assert!(st.set_thinking_budget(ThinkingSetting::Budget(8192)));
        assert_eq!(st.thinking, ThinkingSetting::Budget(8192));
    }

    #[test]
    fn budget_provider_rejects_effort() {
        let mut st = AdapterState::new(entry("claude-sonnet-4-5"));
        assert!(!st.set_thinking_budget(ThinkingSetting::Effort(crate::ThinkingEffort::Low)));
        assert_eq!(st.thinking, ThinkingSetting::Off);
    }

    #[test]
    fn effort_provider_rejects_budget() {
        let mut st = AdapterState::new(entry("o3-mini"));
        assert!(!st.set_thinking_effort(ThinkingSetting::Budget(2048)));
        assert!(st.set_thinking_effort(ThinkingSetting::Effort(crate::ThinkingEffort::High)));
    }

    #[test]
    fn thinking_requires_capability() {
        // gpt-4o does not advertise thinking.
        let mut st = AdapterState::new(entry("gpt-4o"));
        assert!(!st.set_thinking_effort(ThinkingSetting::Effort(crate::ThinkingEffort::Low)));
        // Off still accepted.
        assert!(st.set_thinking_effort(ThinkingSetting::Off));
    }

    #[test]
    fn history_system_message_overrides_installed_prompt() {
        let mut st = AdapterState::new(entry("claude-sonnet-4-5"));
        st.system_prompt = Some("installed".into());
        let msgs = vec![Message::system("from transfer"), Message::user("hi")];
        assert_eq!(st.system_text(&msgs).as_deref(), Some("from transfer"));
        let msgs_plain = vec![Message::user("hi")];
        assert_eq!(st.system_text(&msgs_plain).as_deref(), Some("installed"));
    }

    #[test]
    fn strip_unsupported_media_removes_images_only() {
        let msgs = vec![Message::user_with_parts(vec![
            Part::Text { text: "look".into() },
            Part::Image { mime: "image/png".into(), data: "QUJD".into() },
        ])];
        let out = strip_unsupported_media(&msgs, true);
        assert_eq!(out[0].parts.len(), 1);
        assert!(matches!(out[0].parts[0], Part::Text { .. }));

        let kept = strip_unsupported_media(&msgs, false);
        assert_eq!(kept[0].parts.len(), 2);
    }
}
