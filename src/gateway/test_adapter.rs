//! A scripted, network-free [`ProviderAdapter`] for deterministic tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;

use crate::abort::AbortSignal;
use crate::error::Result;

use super::{ChatRequest, Frame, FrameStream, ProviderAdapter};

/// Replays one scripted frame sequence per call to `stream`, advancing
/// through `scripts` in order. Panics if called more times than scripts
/// were provided, which surfaces test setup mistakes immediately.
pub struct ScriptedAdapter {
    scripts: Mutex<Vec<Vec<Frame>>>,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(scripts: Vec<Vec<Frame>>) -> Self {
        ScriptedAdapter {
            scripts: Mutex::new(scripts),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    async fn stream(&self, _request: &ChatRequest, _abort: &AbortSignal) -> Result<FrameStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock().expect("scripted adapter poisoned");
        let frames = if scripts.is_empty() {
            Vec::new()
        } else {
            scripts.remove(0)
        };
        let items: Vec<Result<Frame>> = frames.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(items)))
    }
}
