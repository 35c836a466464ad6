//! Per-session cancellation.
//!
//! `AbortSignal` wraps [`tokio_util::sync::CancellationToken`], the standard
//! ecosystem type for cooperative cancellation: it is one-shot (fires once,
//! never resets) and cheaply cloneable so it can be threaded through every
//! downstream operation (LLM stream reads, tool executors, concurrency-slot
//! waits, retry backoff sleeps) without a global lock on the hot path.
//!
//! `AbortManager` is the process-wide registry mapping session id to its
//! cancellation source. It is owned by the `Environment` as an injected
//! service rather than kept as a global, even though its registry's
//! lifetime is the process lifetime.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio_util::sync::CancellationToken;

/// One-shot cancellation token scoped to a session.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    token: CancellationToken,
}

impl AbortSignal {
    fn new() -> Self {
        AbortSignal {
            token: CancellationToken::new(),
        }
    }

    /// True once this signal has fired. Monotonic: never un-fires.
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire the signal. Idempotent.
    pub fn abort(&self) {
        self.token.cancel();
    }

    /// Resolves the moment the signal fires; resolves immediately if it has
    /// already fired. Intended for `tokio::select!` alongside the real work.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// A child token that is cancelled whenever this one is, but can also be
    /// cancelled independently (useful for scoping a single tool call's
    /// timeout without aborting the whole session).
    pub fn child(&self) -> AbortSignal {
        AbortSignal {
            token: self.token.child_token(),
        }
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        AbortSignal::new()
    }
}

/// Process-wide registry mapping session id to its cancellation source.
#[derive(Default)]
pub struct AbortManager {
    signals: RwLock<HashMap<String, AbortSignal>>,
}

impl AbortManager {
    pub fn new() -> Self {
        AbortManager {
            signals: RwLock::new(HashMap::new()),
        }
    }

    /// Create a fresh signal for `session_id` if one doesn't already exist.
    /// Idempotent: an existing, unfired signal is kept as-is so a caller that
    /// races with an in-flight run doesn't clobber it.
    pub fn create(&self, session_id: &str) -> AbortSignal {
        let mut signals = self.signals.write().expect("abort registry poisoned");
        signals
            .entry(session_id.to_string())
            .or_insert_with(AbortSignal::new)
            .clone()
    }

    /// Replace any existing signal for `session_id` with a fresh one. Use
    /// this when starting a new run on a session whose previous run already
    /// aborted (fired signals never un-fire, so reuse would keep the new run
    /// permanently cancelled).
    pub fn renew(&self, session_id: &str) -> AbortSignal {
        let mut signals = self.signals.write().expect("abort registry poisoned");
        let signal = AbortSignal::new();
        signals.insert(session_id.to_string(), signal.clone());
        signal
    }

    pub fn get(&self, session_id: &str) -> Option<AbortSignal> {
        self.signals
            .read()
            .expect("abort registry poisoned")
            .get(session_id)
            .cloned()
    }

    /// Fire the signal for `session_id`, if one exists.
    pub fn abort(&self, session_id: &str) {
        if let Some(signal) = self.get(session_id) {
            signal.abort();
        }
    }

    pub fn remove(&self, session_id: &str) {
        self.signals
            .write()
            .expect("abort registry poisoned")
            .remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_is_idempotent() {
        let mgr = AbortManager::new();
        let a = mgr.create("s1");
        let b = mgr.create("s1");
        a.abort();
        assert!(b.is_aborted(), "create() should return the same signal");
    }

    #[test]
    fn renew_replaces_a_fired_signal() {
        let mgr = AbortManager::new();
        let a = mgr.create("s1");
        a.abort();
        let b = mgr.renew("s1");
        assert!(!b.is_aborted());
    }

    #[test]
    fn abort_is_monotonic() {
        let signal = AbortSignal::new();
        assert!(!signal.is_aborted());
        signal.abort();
        assert!(signal.is_aborted());
        signal.abort();
        assert!(signal.is_aborted());
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_abort() {
        let signal = AbortSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        signal.abort();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("abort should be observed promptly")
            .unwrap();
    }
}
