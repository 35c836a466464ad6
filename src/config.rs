//! Runtime configuration: loop/retry/concurrency tunables plus
//! provider-endpoint helpers, built in the same validate-required-fields
//! builder style as the rest of the crate.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::error::{Error, Result};

/// Supported local/remote OpenAI-compatible providers, with default
/// endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    LMStudio,
    Ollama,
    LlamaCpp,
    VLLM,
}

impl Provider {
    fn default_base_url(self) -> &'static str {
        match self {
            Provider::LMStudio => "http://localhost:1234/v1",
            Provider::Ollama => "http://localhost:11434/v1",
            Provider::LlamaCpp => "http://localhost:8080/v1",
            Provider::VLLM => "http://localhost:8000/v1",
        }
    }

    fn env_var(self) -> &'static str {
        match self {
            Provider::LMStudio => "LMSTUDIO_BASE_URL",
            Provider::Ollama => "OLLAMA_BASE_URL",
            Provider::LlamaCpp => "LLAMACPP_BASE_URL",
            Provider::VLLM => "VLLM_BASE_URL",
        }
    }
}

/// Base URL for `provider`: environment variable override, else the
/// provider default, else `fallback` if given.
pub fn get_base_url(provider: Provider, fallback: Option<&str>) -> String {
    env::var(provider.env_var())
        .ok()
        .or_else(|| fallback.map(str::to_string))
        .unwrap_or_else(|| provider.default_base_url().to_string())
}

/// Model name: `MODEL` environment variable override (if `prefer_env`),
/// else `fallback`.
pub fn get_model(fallback: &str, prefer_env: bool) -> String {
    if prefer_env {
        if let Ok(value) = env::var("MODEL") {
            return value;
        }
    }
    fallback.to_string()
}

/// Every loop/retry/concurrency/provider tunable the runtime exposes,
/// with sensible defaults.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub max_iterations: u32,
    pub max_error_retries: u32,
    pub retry_delay_ms: u64,
    pub retry_backoff_factor: f64,
    pub max_retry_delay_ms: u64,
    pub doom_loop_threshold: u32,
    pub agent_id: String,
    pub max_concurrent_streams: usize,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub system_prompt: String,
    pub tool_timeouts: HashMap<String, Duration>,
    pub tool_concurrency: HashMap<String, usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_iterations: 100,
            max_error_retries: 3,
            retry_delay_ms: 1000,
            retry_backoff_factor: 2.0,
            max_retry_delay_ms: 30_000,
            doom_loop_threshold: 5,
            agent_id: "system".to_string(),
            max_concurrent_streams: 10,
            model: String::new(),
            base_url: String::new(),
            api_key: None,
            system_prompt: String::new(),
            tool_timeouts: HashMap::new(),
            tool_concurrency: HashMap::new(),
        }
    }
}

/// Builder for [`RuntimeConfig`], validating that `model` and `base_url`
/// are both set before handing back a usable config.
#[derive(Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    pub fn new() -> Self {
        RuntimeConfigBuilder::default()
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.api_key = Some(api_key.into());
        self
    }

    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.config.agent_id = agent_id.into();
        self
    }

    pub fn max_iterations(mut self, value: u32) -> Self {
        self.config.max_iterations = value;
        self
    }

    pub fn max_error_retries(mut self, value: u32) -> Self {
        self.config.max_error_retries = value;
        self
    }

    pub fn doom_loop_threshold(mut self, value: u32) -> Self {
        self.config.doom_loop_threshold = value;
        self
    }

    pub fn max_concurrent_streams(mut self, value: usize) -> Self {
        self.config.max_concurrent_streams = value;
        self
    }

    pub fn build(self) -> Result<RuntimeConfig> {
        if self.config.model.is_empty() {
            return Err(Error::config("model is required"));
        }
        if self.config.base_url.is_empty() {
            return Err(Error::config("base_url is required"));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_iterations, 100);
        assert_eq!(config.max_error_retries, 3);
        assert_eq!(config.retry_delay_ms, 1000);
        assert_eq!(config.retry_backoff_factor, 2.0);
        assert_eq!(config.max_retry_delay_ms, 30_000);
        assert_eq!(config.doom_loop_threshold, 5);
        assert_eq!(config.agent_id, "system");
        assert_eq!(config.max_concurrent_streams, 10);
    }

    #[test]
    fn builder_requires_model_and_base_url() {
        let result = RuntimeConfigBuilder::new().build();
        assert!(result.is_err());

        let result = RuntimeConfigBuilder::new().model("m").build();
        assert!(result.is_err());

        let result = RuntimeConfigBuilder::new().model("m").base_url("http://x").build();
        assert!(result.is_ok());
    }

    #[test]
    fn get_base_url_falls_back_to_provider_default() {
        // SAFETY: test-only env mutation scoped to this single-threaded check.
        unsafe {
            env::remove_var(Provider::LMStudio.env_var());
        }
        assert_eq!(get_base_url(Provider::LMStudio, None), "http://localhost:1234/v1");
    }
}
