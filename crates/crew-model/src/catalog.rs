// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model catalog: static metadata for known models.

use serde::{Deserialize, Serialize};

/// A capability a model advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ToolUse,
    Vision,
    Thinking,
    Streaming,
}

impl Capability {
    /// Parse a capability name as used in the global config.  Unknown names
    /// return `None` so config typos degrade to a missing capability rather
    /// than a load failure.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "tool_use" => Some(Self::ToolUse),
            "vision" => Some(Self::Vision),
            "thinking" => Some(Self::Thinking),
            "streaming" => Some(Self::Streaming),
            _ => None,
        }
    }
}

/// Metadata for a single model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Provider-scoped model identifier (e.g. `"claude-sonnet-4-5"`).
    pub id: String,
    /// Human-readable display name.
    pub display_name: String,
    /// Provider identifier: a built-in adapter id or a custom provider name.
    pub provider: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// USD per million input tokens.
    #[serde(default)]
    pub input_price_per_million: f64,
    /// USD per million output tokens.
    #[serde(default)]
    pub output_price_per_million: f64,
    /// Marks the model selected at startup when no override is given.
    #[serde(default)]
    pub default: bool,
}

impl ModelEntry {
    pub fn supports(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }

    /// Turn cost in USD for the given token counts.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_price_per_million
            + (output_tokens as f64 / 1_000_000.0) * self.output_price_per_million
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    models: Vec<ModelEntry>,
}

/// Return all entries from the bundled static catalog.
pub fn builtin_catalog() -> Vec<ModelEntry> {
    let yaml = include_str!("../models.yaml");
    let catalog: CatalogFile =
        serde_yaml::from_str(yaml).expect("bundled models.yaml must be valid");
    catalog.models
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_non_empty() {
        assert!(!builtin_catalog().is_empty());
    }

    #[test]
    fn catalog_has_exactly_one_default() {
        let defaults: Vec<_> = builtin_catalog().into_iter().filter(|e| e.default).collect();
        assert_eq!(defaults.len(), 1, "catalog must mark exactly one default model");
    }

    #[test]
    fn catalog_ids_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for e in builtin_catalog() {
            assert!(seen.insert(e.id.clone()), "duplicate model id: {}", e.id);
        }
    }

    #[test]
    fn catalog_covers_required_providers() {
        let providers: std::collections::HashSet<String> =
            builtin_catalog().into_iter().map(|e| e.provider).collect();
        for required in ["anthropic", "openai", "gemini", "groq", "deepinfra", "mock"] {
            assert!(providers.contains(required), "missing provider: {required}");
        }
    }

    #[test]
    fn anthropic_models_support_thinking() {
        for e in builtin_catalog().iter().filter(|e| e.provider == "anthropic") {
            assert!(e.supports(Capability::Thinking), "{} lacks thinking", e.id);
        }
    }

    #[test]
    fn cost_scales_with_prices() {
        let e = builtin_catalog()
            .into_iter()
            .find(|e| e.id == "claude-sonnet-4-5")
            .unwrap();
        // 1M input + 1M output at 3.0 / 15.0.
        let cost = e.cost(1_000_000, 1_000_000);
        assert!((cost - 18.0).abs() < 1e-9, "got {cost}");
    }

    #[test]
    fn capability_parse_rejects_unknown_names() {
        assert_eq!(Capability::parse("tool_use"), Some(Capability::ToolUse));
        assert_eq!(Capability::parse("telepathy"), None);
    }
}
