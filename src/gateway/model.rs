//! Provider/model string parsing and a small capability registry.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Parse a `providerId/modelId` string. A bare `modelId` (no slash) is only
/// accepted when `known_providers` contains exactly one entry, in which
/// case that provider is assumed; otherwise this is ambiguous and fails
/// with "Invalid model format".
pub fn parse_model(model: &str, known_providers: &[&str]) -> Result<(String, String)> {
    if let Some((provider, model_id)) = model.split_once('/') {
        if provider.is_empty() || model_id.is_empty() {
            return Err(Error::invalid_input("Invalid model format"));
        }
        return Ok((provider.to_string(), model_id.to_string()));
    }

    match known_providers {
        [] => Err(Error::invalid_input("Invalid model format")),
        [only] => Ok((only.to_string(), model.to_string())),
        _ => Err(Error::invalid_input(format!(
            "Invalid model format: '{model}' is ambiguous across {} providers",
            known_providers.len()
        ))),
    }
}

/// Per-model capability metadata, used to decide what to include in a
/// provider request (temperature, reasoning, tool-calling) and to report
/// context limits to callers.
#[derive(Debug, Clone, Copy)]
pub struct ModelCapabilities {
    pub supports_temperature: bool,
    pub supports_tools: bool,
    pub supports_reasoning: bool,
    pub context_window: u32,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        ModelCapabilities {
            supports_temperature: true,
            supports_tools: true,
            supports_reasoning: false,
            context_window: 32_768,
        }
    }
}

/// Registry of per-model capability overrides; unknown models fall back to
/// [`ModelCapabilities::default`].
#[derive(Default)]
pub struct CapabilityRegistry {
    overrides: HashMap<String, ModelCapabilities>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        CapabilityRegistry::default()
    }

    pub fn set(&mut self, model_id: &str, capabilities: ModelCapabilities) {
        self.overrides.insert(model_id.to_string(), capabilities);
    }

    pub fn get(&self, model_id: &str) -> ModelCapabilities {
        self.overrides.get(model_id).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_explicit_provider_slash_model() {
        let (provider, model) = parse_model("lmstudio/qwen2.5-32b", &[]).unwrap();
        assert_eq!(provider, "lmstudio");
        assert_eq!(model, "qwen2.5-32b");
    }

    #[test]
    fn bare_model_resolves_against_single_known_provider() {
        let (provider, model) = parse_model("qwen2.5-32b", &["lmstudio"]).unwrap();
        assert_eq!(provider, "lmstudio");
        assert_eq!(model, "qwen2.5-32b");
    }

    #[test]
    fn bare_model_is_ambiguous_across_multiple_providers() {
        let result = parse_model("qwen2.5-32b", &["lmstudio", "ollama"]);
        assert!(result.is_err());
    }

    #[test]
    fn empty_segments_are_rejected() {
        assert!(parse_model("/model", &[]).is_err());
        assert!(parse_model("provider/", &[]).is_err());
    }

    #[test]
    fn unknown_model_capabilities_fall_back_to_default() {
        let registry = CapabilityRegistry::new();
        let caps = registry.get("mystery-model");
        assert!(caps.supports_tools);
    }
}
