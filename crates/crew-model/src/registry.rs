// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Provider metadata and the process-wide model registry.

use std::sync::RwLock;

use crew_config::{CustomProvider, GlobalConfig};

use crate::catalog::{builtin_catalog, Capability, ModelEntry};
use crate::error::ProviderError;

/// Wire protocol an adapter speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wire {
    Anthropic,
    Gemini,
    OpenAiCompat,
    Mock,
}

/// Metadata describing a built-in provider adapter.
#[derive(Debug, Clone)]
pub struct ProviderMeta {
    /// Provider id as used in `ModelEntry::provider`.
    pub id: &'static str,
    /// Human-readable display name.
    pub name: &'static str,
    /// Canonical env var holding the API key.  `None` for keyless providers.
    pub api_key_env: Option<&'static str>,
    /// Default API base URL.
    pub base_url: Option<&'static str>,
    pub wire: Wire,
}

/// Built-in provider adapters.
pub static PROVIDERS: &[ProviderMeta] = &[
    ProviderMeta {
        id: "anthropic",
        name: "Anthropic",
        api_key_env: Some("ANTHROPIC_API_KEY"),
        base_url: Some("https://api.anthropic.com"),
        wire: Wire::Anthropic,
    },
    ProviderMeta {
        id: "openai",
        name: "OpenAI",
        api_key_env: Some("OPENAI_API_KEY"),
        base_url: Some("https://api.openai.com/v1"),
        wire: Wire::OpenAiCompat,
    },
    ProviderMeta {
        id: "gemini",
        name: "Google Gemini",
        api_key_env: Some("GEMINI_API_KEY"),
        base_url: Some("https://generativelanguage.googleapis.com"),
        wire: Wire::Gemini,
    },
    ProviderMeta {
        id: "groq",
        name: "Groq",
        api_key_env: Some("GROQ_API_KEY"),
        base_url: Some("https://api.groq.com/openai/v1"),
        wire: Wire::OpenAiCompat,
    },
    ProviderMeta {
        id: "deepinfra",
        name: "DeepInfra",
        api_key_env: Some("DEEPINFRA_API_KEY"),
        base_url: Some("https://api.deepinfra.com/v1/openai"),
        wire: Wire::OpenAiCompat,
    },
    ProviderMeta {
        id: "mock",
        name: "Mock",
        api_key_env: None,
        base_url: None,
        wire: Wire::Mock,
    },
];

/// Look up a built-in provider by id.
pub fn provider_meta(id: &str) -> Option<&'static ProviderMeta> {
    PROVIDERS.iter().find(|p| p.id == id)
}

// ─── Model registry ───────────────────────────────────────────────────────────

struct Inner {
    entries: Vec<ModelEntry>,
    current: String,
}

/// Catalog of known models plus the current selection.
///
/// Constructed once at startup from the bundled catalog and the global
/// config's custom providers, then shared by reference.  Setting the current
/// model is atomic with respect to concurrent reads.
pub struct ModelRegistry {
    inner: RwLock<Inner>,
    custom: Vec<CustomProvider>,
}

impl ModelRegistry {
    /// Build the registry from the bundled catalog plus custom providers.
    ///
    /// Every custom model must name its own provider (the custom provider's
    /// name); models claiming an unknown provider are rejected.
    pub fn from_config(config: &GlobalConfig) -> Result<Self, ProviderError> {
        let mut entries = builtin_catalog();
        for provider in &config.custom_llm_providers {
            for model in &provider.available_models {
                if model.provider != provider.name && provider_meta(&model.provider).is_none() {
                    return Err(ProviderError::UnknownProvider(model.provider.clone()));
                }
                entries.push(ModelEntry {
                    id: model.id.clone(),
                    display_name: model.name.clone(),
                    provider: model.provider.clone(),
                    capabilities: model
                        .capabilities
                        .iter()
                        .filter_map(|c| Capability::parse(c))
                        .collect(),
                    input_price_per_million: model.input_token_price_1m,
                    output_price_per_million: model.output_token_price_1m,
                    default: false,
                });
            }
        }

        let current = entries
            .iter()
            .find(|e| e.default)
            .or_else(|| entries.first())
            .map(|e| e.id.clone())
            .ok_or_else(|| ProviderError::UnknownModel("<empty catalog>".into()))?;

        Ok(Self {
            inner: RwLock::new(Inner { entries, current }),
            custom: config.custom_llm_providers.clone(),
        })
    }

    /// All models, catalog order.
    pub fn list(&self) -> Vec<ModelEntry> {
        self.inner.read().expect("registry lock").entries.clone()
    }

    /// Models for one provider.
    pub fn list_by_provider(&self, provider: &str) -> Vec<ModelEntry> {
        self.inner
            .read()
            .expect("registry lock")
            .entries
            .iter()
            .filter(|e| e.provider == provider)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<ModelEntry> {
        self.inner
            .read()
            .expect("registry lock")
            .entries
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    /// The currently selected model.
    pub fn current(&self) -> ModelEntry {
        let inner = self.inner.read().expect("registry lock");
        inner
            .entries
            .iter()
            .find(|e| e.id == inner.current)
            .cloned()
            .expect("current model always resolves")
    }

    /// Select a model by id.  Returns the entry on success.
    pub fn set_current(&self, id: &str) -> Result<ModelEntry, ProviderError> {
        let mut inner = self.inner.write().expect("registry lock");
        let entry = inner
            .entries
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownModel(id.to_string()))?;
        inner.current = entry.id.clone();
        Ok(entry)
    }

    /// Select the first model of a provider (used by `--provider`).
    pub fn set_current_provider(&self, provider: &str) -> Result<ModelEntry, ProviderError> {
        let id = self
            .list_by_provider(provider)
            .first()
            .map(|e| e.id.clone())
            .ok_or_else(|| ProviderError::UnknownProvider(provider.to_string()))?;
        self.set_current(&id)
    }

    /// Custom provider record by name, for adapter construction.
    pub fn custom_provider(&self, name: &str) -> Option<&CustomProvider> {
        self.custom.iter().find(|p| p.name == name)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crew_config::CustomModel;

    fn registry() -> ModelRegistry {
        ModelRegistry::from_config(&GlobalConfig::default()).unwrap()
    }

    #[test]
    fn default_model_is_current_at_startup() {
        let reg = registry();
        assert!(reg.current().default);
    }

    #[test]
    fn set_current_switches_and_persists() {
        let reg = registry();
        let entry = reg.set_current("gpt-4o").unwrap();
        assert_eq!(entry.provider, "openai");
        assert_eq!(reg.current().id, "gpt-4o");
    }

    #[test]
    fn set_current_unknown_model_errors() {
        let reg = registry();
        let err = reg.set_current("no-such-model").unwrap_err();
        assert!(matches!(err, ProviderError::UnknownModel(_)));
    }

    #[test]
    fn list_by_provider_filters() {
        let reg = registry();
        let models = reg.list_by_provider("groq");
        assert!(!models.is_empty());
        assert!(models.iter().all(|m| m.provider == "groq"));
    }

    #[test]
    fn set_current_provider_picks_first_model() {
        let reg = registry();
        let entry = reg.set_current_provider("gemini").unwrap();
        assert_eq!(entry.provider, "gemini");
    }

    fn config_with_custom() -> GlobalConfig {
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
                capabilities: vec!["tool_use".into(), "streaming".into()],
                input_token_price_1m: 0.0,
                output_token_price_1m: 0.0,
            }],
        });
        cfg
    }

    #[test]
    fn custom_models_are_registered() {
        let reg = ModelRegistry::from_config(&config_with_custom()).unwrap();
        let entry = reg.get("qwen").expect("custom model present");
        assert_eq!(entry.provider, "local_vllm");
        assert!(entry.supports(Capability::ToolUse));
        assert!(reg.custom_provider("local_vllm").is_some());
    }

    #[test]
    fn custom_model_with_unknown_provider_rejected() {
        let mut cfg = config_with_custom();
        cfg.custom_llm_providers[0].available_models[0].provider = "elsewhere".into();
        let err = ModelRegistry::from_config(&cfg).err().unwrap();
        assert!(matches!(err, ProviderError::UnknownProvider(p) if p == "elsewhere"));
    }
}
