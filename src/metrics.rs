//! Per-tool execution metrics.
//!
//! Simple atomic counters plus a bounded recent-duration ring, enough to
//! answer "how many calls, how many failures, how long" without pulling in
//! a full metrics-exporter stack. The Environment only needs internal
//! counters to drive admission decisions and diagnostics, not an external
//! metrics surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

const DURATION_WINDOW: usize = 64;

#[derive(Default)]
struct ToolCounters {
    calls_total: AtomicU64,
    failures_total: AtomicU64,
    timeouts_total: AtomicU64,
    slot_rejections_total: AtomicU64,
    recent_durations_ms: RwLock<Vec<u64>>,
}

/// Point-in-time snapshot of one tool's counters.
#[derive(Debug, Clone, Default)]
pub struct ToolMetricsSnapshot {
    pub calls_total: u64,
    pub failures_total: u64,
    pub timeouts_total: u64,
    pub slot_rejections_total: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
}

#[derive(Default)]
pub struct Metrics {
    per_tool: RwLock<HashMap<String, ToolCounters>>,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    fn with_counters<R>(&self, tool_name: &str, f: impl FnOnce(&ToolCounters) -> R) -> R {
        if let Some(counters) = self.per_tool.read().expect("metrics poisoned").get(tool_name) {
            return f(counters);
        }
        let mut per_tool = self.per_tool.write().expect("metrics poisoned");
        let counters = per_tool.entry(tool_name.to_string()).or_default();
        f(counters)
    }

    pub fn record_call(&self, tool_name: &str, success: bool, duration: Duration) {
        self.with_counters(tool_name, |c| {
            c.calls_total.fetch_add(1, Ordering::Relaxed);
            if !success {
                c.failures_total.fetch_add(1, Ordering::Relaxed);
            }
            let mut durations = c.recent_durations_ms.write().expect("metrics poisoned");
            durations.push(duration.as_millis() as u64);
            if durations.len() > DURATION_WINDOW {
                let excess = durations.len() - DURATION_WINDOW;
                durations.drain(0..excess);
            }
        });
    }

    pub fn record_timeout(&self, tool_name: &str) {
        self.with_counters(tool_name, |c| {
            c.timeouts_total.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn record_slot_rejection(&self, tool_name: &str) {
        self.with_counters(tool_name, |c| {
            c.slot_rejections_total.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn snapshot(&self, tool_name: &str) -> ToolMetricsSnapshot {
        self.with_counters(tool_name, |c| {
            let durations = c.recent_durations_ms.read().expect("metrics poisoned");
            let mut sorted = durations.clone();
            sorted.sort_unstable();
            ToolMetricsSnapshot {
                calls_total: c.calls_total.load(Ordering::Relaxed),
                failures_total: c.failures_total.load(Ordering::Relaxed),
                timeouts_total: c.timeouts_total.load(Ordering::Relaxed),
                slot_rejections_total: c.slot_rejections_total.load(Ordering::Relaxed),
                p50_ms: percentile(&sorted, 0.50),
                p95_ms: percentile(&sorted, 0.95),
            }
        })
    }
}

fn percentile(sorted: &[u64], p: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted.get(idx).copied()
}
