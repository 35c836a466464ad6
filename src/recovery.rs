//! Error recovery policy around tool execution.
//!
//! `RecoveryManager` decides *what to do* with a failed execution
//! (retry / fall back to another tool / skip with a default / propagate);
//! actually carrying out a fallback execution is the dispatcher's job
//! (`environment::Environment`), since that's the thing with access to the
//! tool registry — there is no subclass to "defer to" in Rust, so the
//! manager hands back a tagged `RecoveryAction` instead.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::tools::Action;
use crate::types::ToolOutput;

/// Per-tool recovery policy.
#[derive(Debug, Clone)]
pub enum RecoveryStrategy {
    /// Retry the same action (the manager defers delay/backoff to the
    /// dispatcher's Retry Manager).
    Retry,
    /// Dispatch an alternate tool instead.
    Fallback { tool_name: String },
    /// Treat the failure as a success with a fixed default value.
    Skip { value: ToolOutput },
    /// Propagate the error as a failed `ToolResult`. This is the default.
    Error,
}

impl Default for RecoveryStrategy {
    fn default() -> Self {
        RecoveryStrategy::Error
    }
}

/// What the dispatcher should actually do, as decided by the manager.
#[derive(Debug, Clone)]
pub enum RecoveryAction {
    Retry { delay: Duration },
    Fallback { tool_name: String },
    Skip { value: ToolOutput },
    Propagate,
}

type CustomHandler = Arc<dyn Fn(&Error, &Action) -> Option<RecoveryAction> + Send + Sync>;

struct FailureHistory {
    entries: VecDeque<Instant>,
    capacity: usize,
}

impl FailureHistory {
    fn new(capacity: usize) -> Self {
        FailureHistory {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn record(&mut self, at: Instant) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(at);
    }

    fn count_since(&self, window: Duration) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|t| now.duration_since(**t) <= window)
            .count()
    }
}

/// Error Recovery Manager: per-tool strategy, optional custom handler, and
/// a bounded per-tool failure history (default 100 entries) so callers can
/// count recent failures in a time window.
pub struct RecoveryManager {
    default_strategy: RecoveryStrategy,
    strategies: RwLock<HashMap<String, RecoveryStrategy>>,
    history: RwLock<HashMap<String, FailureHistory>>,
    history_capacity: usize,
    custom_handler: RwLock<Option<CustomHandler>>,
}

impl RecoveryManager {
    pub fn new() -> Self {
        RecoveryManager {
            default_strategy: RecoveryStrategy::Error,
            strategies: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            history_capacity: 100,
            custom_handler: RwLock::new(None),
        }
    }

    pub fn set_strategy(&self, tool_name: &str, strategy: RecoveryStrategy) {
        self.strategies
            .write()
            .expect("recovery strategies poisoned")
            .insert(tool_name.to_string(), strategy);
    }

    pub fn set_custom_handler<F>(&self, handler: F)
    where
        F: Fn(&Error, &Action) -> Option<RecoveryAction> + Send + Sync + 'static,
    {
        *self.custom_handler.write().expect("recovery handler poisoned") = Some(Arc::new(handler));
    }

    /// Record a failure for `tool_name` and return how many failures that
    /// tool has recorded within `window`.
    pub fn record_failure(&self, tool_name: &str, window: Duration) -> usize {
        let mut history = self.history.write().expect("recovery history poisoned");
        let entry = history
            .entry(tool_name.to_string())
            .or_insert_with(|| FailureHistory::new(self.history_capacity));
        entry.record(Instant::now());
        entry.count_since(window)
    }

    /// Decide what the dispatcher should do about `error` for `action`.
    pub fn decide(&self, error: &Error, action: &Action) -> RecoveryAction {
        if let Some(handler) = self.custom_handler.read().expect("recovery handler poisoned").as_ref() {
            if let Some(custom) = handler(error, action) {
                return custom;
            }
        }

        let strategy = self
            .strategies
            .read()
            .expect("recovery strategies poisoned")
            .get(&action.tool_name)
            .cloned()
            .unwrap_or_else(|| self.default_strategy.clone());

        match strategy {
            RecoveryStrategy::Retry => RecoveryAction::Retry {
                delay: Duration::from_millis(0),
            },
            RecoveryStrategy::Fallback { tool_name } => RecoveryAction::Fallback { tool_name },
            RecoveryStrategy::Skip { value } => RecoveryAction::Skip { value },
            RecoveryStrategy::Error => RecoveryAction::Propagate,
        }
    }
}

impl Default for RecoveryManager {
    fn default() -> Self {
        RecoveryManager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action() -> Action {
        Action::new("bash", serde_json::json!({}))
    }

    #[test]
    fn default_strategy_propagates() {
        let mgr = RecoveryManager::new();
        let decision = mgr.decide(&Error::tool("boom"), &action());
        assert!(matches!(decision, RecoveryAction::Propagate));
    }

    #[test]
    fn configured_fallback_strategy_is_used() {
        let mgr = RecoveryManager::new();
        mgr.set_strategy(
            "bash",
            RecoveryStrategy::Fallback {
                tool_name: "bash_v2".into(),
            },
        );
        let decision = mgr.decide(&Error::tool("boom"), &action());
        match decision {
            RecoveryAction::Fallback { tool_name } => assert_eq!(tool_name, "bash_v2"),
            _ => panic!("expected fallback"),
        }
    }

    #[test]
    fn custom_handler_takes_priority() {
        let mgr = RecoveryManager::new();
        mgr.set_strategy("bash", RecoveryStrategy::Error);
        mgr.set_custom_handler(|_err, _action| {
            Some(RecoveryAction::Skip {
                value: ToolOutput::Text("default".into()),
            })
        });
        let decision = mgr.decide(&Error::tool("boom"), &action());
        assert!(matches!(decision, RecoveryAction::Skip { .. }));
    }

    #[test]
    fn failure_history_counts_within_window() {
        let mgr = RecoveryManager::new();
        assert_eq!(mgr.record_failure("bash", Duration::from_secs(60)), 1);
        assert_eq!(mgr.record_failure("bash", Duration::from_secs(60)), 2);
        assert_eq!(mgr.record_failure("other", Duration::from_secs(60)), 1);
    }
}
