//! Session state: per-conversation message history, metadata, and CRUD.
//!
//! The default store is in-memory (`InMemorySessionStore`); a caller may
//! swap in a persistent store behind the same `SessionStore` trait without
//! the Agent Loop or Environment noticing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::stream::{EventBus, StreamEvent};
use crate::types::Message;

/// A single conversation's durable state.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub directory: Option<PathBuf>,
    pub metadata: HashMap<String, Value>,
    history: Vec<Message>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Session {
    pub fn new(id: impl Into<String>, title: impl Into<String>, directory: Option<PathBuf>) -> Self {
        let now = OffsetDateTime::now_utc();
        Session {
            id: id.into(),
            title: title.into(),
            directory,
            metadata: HashMap::new(),
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message, preserving emission order. History is
    /// append-only during a run; this is the only way to grow it.
    pub fn add_message(&mut self, message: Message) {
        self.history.push(message);
        self.touch();
    }

    /// Snapshot copy of the history, safe to hand to the Agent Loop without
    /// aliasing the session's internal buffer.
    pub fn to_history(&self) -> Vec<Message> {
        self.history.clone()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.touch();
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc();
    }
}

/// CRUD contract for session storage.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, title: &str, directory: Option<PathBuf>) -> Result<Session>;
    async fn get(&self, id: &str) -> Option<Session>;
    async fn list(&self) -> Vec<Session>;
    async fn update(&self, id: &str, f: Box<dyn FnOnce(&mut Session) + Send>) -> Result<Session>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// In-memory `SessionStore`, guarded by a single `RwLock` over a map. Good
/// enough as the default, process-lifetime registry; a persistent
/// implementation only needs to satisfy the same trait.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        InMemorySessionStore {
            sessions: RwLock::new(HashMap::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    fn generate_id(&self) -> String {
        let n = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("session-{n}")
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, title: &str, directory: Option<PathBuf>) -> Result<Session> {
        let id = self.generate_id();
        let session = Session::new(id.clone(), title, directory);
        self.sessions.write().await.insert(id, session.clone());
        Ok(session)
    }

    async fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().await.get(id).cloned()
    }

    async fn list(&self) -> Vec<Session> {
        self.sessions.read().await.values().cloned().collect()
    }

    async fn update(&self, id: &str, f: Box<dyn FnOnce(&mut Session) + Send>) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| Error::invalid_input(format!("Session not found: {id}")))?;
        f(session);
        Ok(session.clone())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(id).is_none() {
            return Err(Error::invalid_input(format!("Session not found: {id}")));
        }
        Ok(())
    }
}

/// Thin wrapper pairing a `SessionStore` with the `EventBus` hook so CRUD
/// mutations emit `session.created|updated|deleted` exactly on success,
/// and are silently ignored (no event) when the session is absent.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    events: Arc<EventBus>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, events: Arc<EventBus>) -> Self {
        SessionManager { store, events }
    }

    pub async fn create(&self, title: &str, directory: Option<PathBuf>) -> Result<Session> {
        let session = self.store.create(title, directory).await?;
        self.events
            .emit(StreamEvent::SessionCreated {
                session_id: session.id.clone(),
            })
            .await;
        Ok(session)
    }

    pub async fn get(&self, id: &str) -> Option<Session> {
        self.store.get(id).await
    }

    pub async fn list(&self) -> Vec<Session> {
        self.store.list().await
    }

    pub async fn update(&self, id: &str, f: Box<dyn FnOnce(&mut Session) + Send>) -> Result<Session> {
        let result = self.store.update(id, f).await;
        if result.is_ok() {
            self.events
                .emit(StreamEvent::SessionUpdated {
                    session_id: id.to_string(),
                })
                .await;
        }
        result
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = self.store.delete(id).await;
        if result.is_ok() {
            self.events
                .emit(StreamEvent::SessionDeleted {
                    session_id: id.to_string(),
                })
                .await;
        }
        result
    }
}
