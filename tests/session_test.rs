//! Integration coverage for session CRUD and its `session.*` event emission.

use std::sync::{Arc, Mutex};

use agent_core::{EventBus, InMemorySessionStore, Message, SessionManager, StreamEvent, StreamHandler};

struct Recorder(Arc<Mutex<Vec<String>>>);

#[async_trait::async_trait]
impl StreamHandler for Recorder {
    async fn on_event(&self, event: &StreamEvent) {
        self.0.lock().unwrap().push(event.to_string());
    }
}

#[tokio::test]
async fn full_lifecycle_emits_created_updated_deleted_in_order() {
    let events = Arc::new(EventBus::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    events.subscribe(Arc::new(Recorder(log.clone()))).await;

    let manager = SessionManager::new(Arc::new(InMemorySessionStore::new()), events);
    let session = manager.create("chat", None).await.unwrap();
    manager
        .update(
            &session.id,
            Box::new(|s| s.add_message(Message::user("hello"))),
        )
        .await
        .unwrap();
    manager.delete(&session.id).await.unwrap();

    let recorded = log.lock().unwrap().clone();
    assert_eq!(
        recorded,
        vec![
            format!("session.created[{}]", session.id),
            format!("session.updated[{}]", session.id),
            format!("session.deleted[{}]", session.id),
        ]
    );
}

#[tokio::test]
async fn history_survives_across_get_calls() {
    let events = Arc::new(EventBus::new());
    let manager = SessionManager::new(Arc::new(InMemorySessionStore::new()), events);
    let session = manager.create("chat", None).await.unwrap();
    manager
        .update(&session.id, Box::new(|s| s.add_message(Message::user("one"))))
        .await
        .unwrap();
    manager
        .update(&session.id, Box::new(|s| s.add_message(Message::user("two"))))
        .await
        .unwrap();

    let fetched = manager.get(&session.id).await.unwrap();
    let history = fetched.to_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content.to_display_string(), "two");
}
