//! Stream events emitted from the core to external subscribers, and the
//! fan-out bus that delivers them.
//!
//! Subscribers are plain async callbacks (`StreamHandler`), not just
//! channel receivers, so a UI renderer or transport layer can react
//! directly without an extra polling loop. The core never retains emitted
//! events once dispatched.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

/// One frame emitted from the core during a run.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Start {
        session_id: String,
        model: String,
    },
    Text {
        session_id: String,
        content: String,
        delta: String,
    },
    Reasoning {
        session_id: String,
        content: String,
        delta: String,
    },
    ToolCall {
        session_id: String,
        tool_name: String,
        tool_args: Value,
        tool_call_id: String,
    },
    ToolResult {
        session_id: String,
        tool_name: String,
        tool_result: Value,
        tool_call_id: String,
        metadata: Option<Value>,
    },
    Completed {
        session_id: String,
        content: String,
        model: String,
    },
    Error {
        session_id: String,
        message: String,
        tool_name: Option<String>,
    },
    SessionCreated {
        session_id: String,
    },
    SessionUpdated {
        session_id: String,
    },
    SessionDeleted {
        session_id: String,
    },
}

impl StreamEvent {
    pub fn session_id(&self) -> &str {
        match self {
            StreamEvent::Start { session_id, .. }
            | StreamEvent::Text { session_id, .. }
            | StreamEvent::Reasoning { session_id, .. }
            | StreamEvent::ToolCall { session_id, .. }
            | StreamEvent::ToolResult { session_id, .. }
            | StreamEvent::Completed { session_id, .. }
            | StreamEvent::Error { session_id, .. }
            | StreamEvent::SessionCreated { session_id }
            | StreamEvent::SessionUpdated { session_id }
            | StreamEvent::SessionDeleted { session_id } => session_id,
        }
    }
}

impl fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            StreamEvent::Start { .. } => "start",
            StreamEvent::Text { .. } => "text",
            StreamEvent::Reasoning { .. } => "reasoning",
            StreamEvent::ToolCall { .. } => "tool_call",
            StreamEvent::ToolResult { .. } => "tool_result",
            StreamEvent::Completed { .. } => "completed",
            StreamEvent::Error { .. } => "error",
            StreamEvent::SessionCreated { .. } => "session.created",
            StreamEvent::SessionUpdated { .. } => "session.updated",
            StreamEvent::SessionDeleted { .. } => "session.deleted",
        };
        write!(f, "{kind}[{}]", self.session_id())
    }
}

/// Recipient of stream events.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn on_event(&self, event: &StreamEvent);
}

#[async_trait]
impl<F> StreamHandler for F
where
    F: Fn(&StreamEvent) + Send + Sync,
{
    async fn on_event(&self, event: &StreamEvent) {
        (self)(event)
    }
}

pub type SubscriptionToken = u64;

/// Fan-out shared by all subscribers. Emission order is preserved per run:
/// events are dispatched to subscribers sequentially in the order
/// `emit` is called, so a subscriber never sees events out of order
/// relative to how the Gateway produced them.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<(SubscriptionToken, Arc<dyn StreamHandler>)>>,
    next_token: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            handlers: RwLock::new(Vec::new()),
            next_token: AtomicU64::new(1),
        }
    }

    pub async fn subscribe(&self, handler: Arc<dyn StreamHandler>) -> SubscriptionToken {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.handlers.write().await.push((token, handler));
        token
    }

    pub async fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut handlers = self.handlers.write().await;
        let before = handlers.len();
        handlers.retain(|(t, _)| *t != token);
        before != handlers.len()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.handlers.read().await.len()
    }

    /// Deliver `event` to every current subscriber, in registration order.
    /// A handler that panics is not caught here (the handler contract is a
    /// plain async fn, not a `Result`-returning one); a handler that can
    /// fail internally should log-and-continue inside its own `on_event`.
    pub async fn emit(&self, event: StreamEvent) {
        let handlers: Vec<_> = self.handlers.read().await.iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler.on_event(&event).await;
        }
    }
}
