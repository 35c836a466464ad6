//! Per-tool timeouts, with an optional per-action override and cooperative
//! abort propagation.
//!
//! Wraps the wrapped future in both a `tokio::time::timeout` and a race
//! against the session's `AbortSignal`, so either firing cancels the local
//! work and returns promptly instead of leaving the caller blocked.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::abort::AbortSignal;
use crate::error::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Default)]
pub struct TimeoutManager {
    default_timeout: RwLock<Duration>,
    per_tool: RwLock<HashMap<String, Duration>>,
}

impl TimeoutManager {
    pub fn new() -> Self {
        TimeoutManager {
            default_timeout: RwLock::new(DEFAULT_TIMEOUT),
            per_tool: RwLock::new(HashMap::new()),
        }
    }

    pub async fn set_default(&self, timeout: Duration) {
        *self.default_timeout.write().await = timeout;
    }

    pub async fn set_for_tool(&self, tool_name: &str, timeout: Duration) {
        self.per_tool.write().await.insert(tool_name.to_string(), timeout);
    }

    /// Resolve the effective timeout: action override > per-tool override >
    /// default.
    pub async fn get_timeout(&self, tool_name: &str, action_override: Option<Duration>) -> Duration {
        if let Some(timeout) = action_override {
            return timeout;
        }
        if let Some(timeout) = self.per_tool.read().await.get(tool_name) {
            return *timeout;
        }
        *self.default_timeout.read().await
    }

    /// Run `fut` under the resolved timeout, also observing `abort`.
    /// Returns `Error::Timeout` on timer fire, `Error::Aborted` if the
    /// session was cancelled first.
    pub async fn run<F, T>(
        &self,
        tool_name: &str,
        action_override: Option<Duration>,
        abort: &AbortSignal,
        fut: F,
    ) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let timeout = self.get_timeout(tool_name, action_override).await;
        tokio::select! {
            result = tokio::time::timeout(timeout, fut) => {
                match result {
                    Ok(inner) => inner,
                    Err(_) => Err(Error::timeout()),
                }
            }
            _ = abort.cancelled() => Err(Error::aborted()),
        }
    }
}
