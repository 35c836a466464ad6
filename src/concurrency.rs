//! Per-tool admission control.
//!
//! Each tool gets its own `tokio::sync::Semaphore` sized to its
//! concurrency limit (default 10). `tokio::sync::Semaphore` has no
//! built-in acquire timeout, so we race the acquire against
//! `tokio::time::sleep(wait_deadline)`; the semaphore's own FIFO wake order
//! gives FIFO wait-queue behavior for free, without extra bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};

use crate::error::{Error, Result};

const DEFAULT_LIMIT: usize = 10;
const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60);

/// A held concurrency slot; the slot is released when this is dropped.
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

#[derive(Clone)]
struct ToolLimit {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

/// Per-tool {active count (via the semaphore), wait queue, limit} manager.
pub struct ConcurrencyManager {
    default_limit: usize,
    max_wait: Duration,
    per_tool: RwLock<HashMap<String, ToolLimit>>,
    overrides: RwLock<HashMap<String, usize>>,
}

impl ConcurrencyManager {
    pub fn new() -> Self {
        ConcurrencyManager {
            default_limit: DEFAULT_LIMIT,
            max_wait: DEFAULT_MAX_WAIT,
            per_tool: RwLock::new(HashMap::new()),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Set a per-tool concurrency limit override, applied the next time
    /// that tool's semaphore is created (existing semaphores keep their
    /// size; re-register the tool to pick up a new limit).
    pub async fn set_limit(&self, tool_name: &str, limit: usize) {
        self.overrides.write().await.insert(tool_name.to_string(), limit);
    }

    async fn limit_for(&self, tool_name: &str) -> usize {
        self.overrides
            .read()
            .await
            .get(tool_name)
            .copied()
            .unwrap_or(self.default_limit)
    }

    async fn entry_for(&self, tool_name: &str) -> ToolLimit {
        if let Some(entry) = self.per_tool.read().await.get(tool_name) {
            return entry.clone();
        }
        let mut per_tool = self.per_tool.write().await;
        if let Some(entry) = per_tool.get(tool_name) {
            return entry.clone();
        }
        let limit = self.limit_for(tool_name).await;
        let entry = ToolLimit {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        };
        per_tool.insert(tool_name.to_string(), entry.clone());
        entry
    }

    /// Acquire a slot for `tool_name`, waiting FIFO behind any other
    /// pending acquire for the same tool, up to `max_wait`. Returns a
    /// slot-exhausted error if the deadline passes first.
    pub async fn acquire(&self, tool_name: &str) -> Result<Slot> {
        let entry = self.entry_for(tool_name).await;
        match tokio::time::timeout(self.max_wait, entry.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(Slot { _permit: permit }),
            Ok(Err(_)) => Err(Error::other("concurrency semaphore closed")),
            Err(_) => Err(Error::slot_exhausted(format!(
                "tool '{tool_name}' has no free slot among {} after {:?}",
                entry.limit, self.max_wait
            ))),
        }
    }
}

impl Default for ConcurrencyManager {
    fn default() -> Self {
        ConcurrencyManager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_succeeds_under_the_limit() {
        let mgr = ConcurrencyManager::new().with_default_limit(2);
        let a = mgr.acquire("bash").await.unwrap();
        let b = mgr.acquire("bash").await.unwrap();
        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn nplus1th_waiter_times_out_when_deadline_passes_first() {
        let mgr = ConcurrencyManager::new()
            .with_default_limit(1)
            .with_max_wait(Duration::from_millis(50));
        let _held = mgr.acquire("bash").await.unwrap();
        let result = mgr.acquire("bash").await;
        assert!(matches!(result, Err(Error::SlotExhausted(_))));
    }

    #[tokio::test]
    async fn releasing_a_slot_admits_the_next_waiter() {
        let mgr = Arc::new(
            ConcurrencyManager::new()
                .with_default_limit(1)
                .with_max_wait(Duration::from_secs(5)),
        );
        let held = mgr.acquire("bash").await.unwrap();
        let mgr2 = mgr.clone();
        let waiter = tokio::spawn(async move { mgr2.acquire("bash").await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be admitted promptly")
            .unwrap();
        assert!(result.is_ok());
    }
}
