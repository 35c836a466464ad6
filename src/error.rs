//! # Error Types for the Agent Execution Core
//!
//! One crate-wide error type covering transport, serialization, configuration,
//! and the agent-loop/dispatcher failure taxonomy (abort, input validation,
//! transient transport, auth, tool execution, loop detection). Variants
//! convert to the user-visible "Error: ..." strings the Agent Loop returns
//! from `handle_query` on non-fatal exhaustion.

use thiserror::Error;

/// Type alias for `Result<T, Error>` used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type covering all failure modes in the core.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed due to network issues, connection problems, or HTTP errors.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration provided when building `AgentOptions`/`RuntimeConfig`.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Error response received from the model provider's API.
    #[error("API error: {0}")]
    Api(String),

    /// Error occurred while processing the streaming response.
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Tool execution or registration failed.
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Invalid input provided by the caller (unknown tool, bad schema, unknown model).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A request or tool execution exceeded its configured timeout.
    #[error("Request timeout")]
    Timeout,

    /// The session or run was cancelled via an `AbortSignal`.
    #[error("Aborted")]
    Aborted,

    /// Authentication with the provider failed (401, invalid key). Never retried.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Loop detection tripped: the same tool call was attempted too many times.
    #[error("Doom loop detected: {0}")]
    LoopDetected(String),

    /// The per-tool or global concurrency admission window was exhausted.
    #[error("Concurrency slot exhausted: {0}")]
    SlotExhausted(String),

    /// Miscellaneous error that doesn't fit other categories.
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api(msg.into())
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Error::Auth(msg.into())
    }

    pub fn loop_detected(msg: impl Into<String>) -> Self {
        Error::LoopDetected(msg.into())
    }

    pub fn slot_exhausted(msg: impl Into<String>) -> Self {
        Error::SlotExhausted(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    pub fn timeout() -> Self {
        Error::Timeout
    }

    pub fn aborted() -> Self {
        Error::Aborted
    }

    /// True if this error should never be retried regardless of attempt count.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Aborted | Error::InvalidInput(_) | Error::Auth(_) | Error::LoopDetected(_)
        )
    }
}

/// Substring classifier: a message is retryable iff none of these
/// (case-insensitive) substrings occur.
const NON_RETRYABLE_SUBSTRINGS: &[&str] = &[
    "tool not found",
    "permission denied",
    "file not found",
    "invalid tool arguments",
    "doom loop detected",
    "invalid json",
    "parse error",
    "401",
    "invalid authentication",
    "unauthorized",
    "api key",
];

/// Classify an error message as transient/retryable or not.
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    !NON_RETRYABLE_SUBSTRINGS
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Classify an [`Error`] using both its variant and its rendered message.
pub fn is_retryable_error(err: &Error) -> bool {
    if err.is_fatal() {
        return false;
    }
    is_retryable_message(&err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_config() {
        let err = Error::config("Invalid model");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), "Invalid configuration: Invalid model");
    }

    #[test]
    fn test_error_api() {
        let err = Error::api("500 Internal Server Error");
        assert_eq!(err.to_string(), "API error: 500 Internal Server Error");
    }

    #[test]
    fn test_error_timeout() {
        let err = Error::timeout();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(err.to_string(), "Request timeout");
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_retryable_classifier_blocks_known_substrings() {
        assert!(!is_retryable_message("Tool not found: bash"));
        assert!(!is_retryable_message("Invalid JSON in arguments: {"));
        assert!(!is_retryable_message("401 Unauthorized"));
        assert!(!is_retryable_message("Doom loop detected: tool \"bash\""));
    }

    #[test]
    fn test_retryable_classifier_allows_transient() {
        assert!(is_retryable_message("connection reset by peer"));
        assert!(is_retryable_message("502 Bad Gateway"));
        assert!(is_retryable_message("rate limit exceeded"));
    }

    #[test]
    fn test_is_retryable_error_respects_fatal_variants() {
        assert!(!is_retryable_error(&Error::Aborted));
        assert!(!is_retryable_error(&Error::auth("bad key")));
        assert!(!is_retryable_error(&Error::loop_detected("bash")));
        assert!(is_retryable_error(&Error::stream("connection reset")));
    }
}
