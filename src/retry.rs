//! Exponential backoff with jitter, used by the Agent Loop's error-retry
//! path and the dispatcher's Retry Manager.
//!
//! Made public so callers can reuse the same backoff math for their own
//! retry-shaped operations outside the core.

use std::time::Duration;

use rand::Rng;

/// Backoff policy: base delay, multiplier, and ceiling.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Add up to this fraction of the computed delay as random jitter.
    pub jitter_fraction: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter_fraction: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// Delay for attempt `k` (1-indexed), before jitter:
    /// `min(base * multiplier^(k-1), max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let bounded = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(bounded.round() as u64)
    }

    /// Same as [`Self::delay_for_attempt`] but with random jitter added,
    /// for use at call sites that actually sleep (as opposed to tests that
    /// assert the deterministic formula).
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if self.jitter_fraction <= 0.0 {
            return base;
        }
        let jitter_ms = (base.as_millis() as f64) * self.jitter_fraction;
        let extra = rand::thread_rng().gen_range(0.0..=jitter_ms.max(0.0));
        base + Duration::from_millis(extra as u64)
    }
}

/// Sleep for the backoff delay of `attempt`, observing `abort` so a
/// cancelled session doesn't block on a retry sleep.
pub async fn backoff_sleep(policy: &BackoffPolicy, attempt: u32, abort: &crate::abort::AbortSignal) {
    let delay = policy.delay_with_jitter(attempt);
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = abort.cancelled() => {}
    }
}
