// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod catalog;
pub mod registry;
mod adapter;
mod anthropic;
mod error;
mod gemini;
mod mock;
mod openai_compat;
mod sse;
mod stream;
mod types;

pub use adapter::{ProviderAdapter, MIN_THINKING_BUDGET};
pub use anthropic::AnthropicAdapter;
pub use catalog::{builtin_catalog, Capability, ModelEntry};
pub use error::ProviderError;
pub use gemini::GeminiAdapter;
pub use mock::{MockAdapter, ScriptHandle, ScriptedAdapter};
pub use openai_compat::OpenAiCompatAdapter;
pub use registry::{provider_meta, ModelRegistry, ProviderMeta, Wire, PROVIDERS};
pub use stream::{
    EventStream, StopReason, StreamEvent, ThinkingEffort, ThinkingSetting, ToolArgs,
};
pub use types::{Message, Part, Role, ToolResultContent, ToolSchema};

use crew_config::GlobalConfig;

/// Construct a boxed [`ProviderAdapter`] for a model entry.
///
/// Built-in providers resolve their key from the global config (which
/// supersedes the environment) via the canonical env-var name; custom
/// OpenAI-compatible providers come from the registry's config section.
/// Hosted providers without a key fail here with `MissingCredentials`, which
/// the CLI maps to its credentials exit code.
pub fn adapter_for(
    entry: &ModelEntry,
    registry: &ModelRegistry,
    config: &GlobalConfig,
) -> Result<Box<dyn ProviderAdapter>, ProviderError> {
    if let Some(meta) = provider_meta(&entry.provider) {
        let key = match meta.api_key_env {
            Some(env) => Some(
                config
                    .api_key(env)
                    .ok_or_else(|| ProviderError::MissingCredentials(env.to_string()))?,
            ),
            None => None,
        };
        return Ok(match meta.wire {
            Wire::Anthropic => Box::new(AnthropicAdapter::new(
                entry.clone(),
                key.expect("anthropic requires a key"),
                None,
            )),
            Wire::Gemini => Box::new(GeminiAdapter::new(
                entry.clone(),
                key.expect("gemini requires a key"),
                None,
            )),
            Wire::OpenAiCompat => Box::new(OpenAiCompatAdapter::new(
                meta.id,
                entry.clone(),
                key,
                meta.base_url.expect("compat providers carry a base url"),
            )),
            Wire::Mock => Box::new(MockAdapter::new()),
        });
    }

    if let Some(custom) = registry.custom_provider(&entry.provider) {
        return Ok(Box::new(OpenAiCompatAdapter::new(
            custom.name.clone(),
            entry.clone(),
            custom.api_key.clone(),
            &custom.api_base_url,
        )));
    }

    Err(ProviderError::UnknownProvider(entry.provider.clone()))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crew_config::{CustomModel, CustomProvider};

    fn registry(config: &GlobalConfig) -> ModelRegistry {
        ModelRegistry::from_config(config).unwrap()
    }

    #[test]
    fn mock_adapter_needs_no_credentials() {
        let cfg = GlobalConfig::default();
        let reg = registry(&cfg);
        let entry = reg.get("mock-model").unwrap();
        let adapter = adapter_for(&entry, &reg, &cfg).unwrap();
        assert_eq!(adapter.provider(), "mock");
    }

    #[test]
    fn hosted_provider_without_key_is_missing_credentials() {
        let mut cfg = GlobalConfig::default();
        // Guarantee no ambient key interferes with the assertion.
        cfg.api_keys.remove("ANTHROPIC_API_KEY");
        std::env::remove_var("ANTHROPIC_API_KEY");
        let reg = registry(&cfg);
        let entry = reg.get("claude-sonnet-4-5").unwrap();
        let err = adapter_for(&entry, &reg, &cfg).err().unwrap();
        assert!(matches!(err, ProviderError::MissingCredentials(env)
            if env == "ANTHROPIC_API_KEY"));
    }

    #[test]
    fn config_key_constructs_anthropic_adapter() {
        let mut cfg = GlobalConfig::default();
        cfg.api_keys
            .insert("ANTHROPIC_API_KEY".into(), "sk-test".into());
        let reg = registry(&cfg);
        let entry = reg.get("claude-sonnet-4-5").unwrap();
        let adapter = adapter_for(&entry, &reg, &cfg).unwrap();
        assert_eq!(adapter.provider(), "anthropic");
        assert_eq!(adapter.model_id(), "claude-sonnet-4-5");
    }

    #[test]
    fn custom_provider_builds_compat_adapter() {
        let mut cfg = GlobalConfig::default();
        cfg.custom_llm_providers.push(CustomProvider {
            name: "local_vllm".into(),
            provider_type: "openai_compatible".into(),
            api_base_url: "http://localhost:8000/v1".into(),
            api_key: None,
            default_model_id: "qwen".into(),
            is_stream: true,
            available_models: vec![CustomModel {
                id: "qwen".into(),
                provider: "local_vllm".into(),
                name: "Qwen".into(),
                description: String::new(),
                capabilities: vec!["streaming".into()],
                input_token_price_1m: 0.0,
                output_token_price_1m: 0.0,
            }],
        });
        let reg = registry(&cfg);
        let entry = reg.get("qwen").unwrap();
        let adapter = adapter_for(&entry, &reg, &cfg).unwrap();
        assert_eq!(adapter.provider(), "local_vllm");
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let cfg = GlobalConfig::default();
        let reg = registry(&cfg);
        let entry = ModelEntry {
            id: "x".into(),
            display_name: "X".into(),
            provider: "nowhere".into(),
            capabilities: vec![],
            input_price_per_million: 0.0,
            output_price_per_million: 0.0,
            default: false,
        };
        let err = adapter_for(&entry, &reg, &cfg).err().unwrap();
        assert!(matches!(err, ProviderError::UnknownProvider(_)));
    }
}
