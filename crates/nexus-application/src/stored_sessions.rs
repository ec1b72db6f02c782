//! Shared list of persisted conversations.
//!
//! Every live session reads and writes the same capped list. Each mutation
//! replaces the whole list in the store and is published on a broadcast
//! channel so the registry can fan it out to all views.

use nexus_core::error::Result;
use nexus_core::store::{KeyValueStore, keys, load_or, save_value};
use nexus_core::stored_session::{StoredSession, remove_stored, upsert_capped};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};

const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Capped, most-recent-first store of conversations.
pub struct StoredSessionService {
    store: Arc<dyn KeyValueStore>,
    cap: usize,
    /// Serializes read-modify-write cycles on the list.
    write_lock: Mutex<()>,
    changes: broadcast::Sender<Arc<Vec<StoredSession>>>,
}

impl StoredSessionService {
    pub fn new(store: Arc<dyn KeyValueStore>, cap: usize) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            store,
            cap,
            write_lock: Mutex::new(()),
            changes,
        }
    }

    /// Returns the stored list, most recent first.
    pub async fn list(&self) -> Result<Vec<StoredSession>> {
        load_or(self.store.as_ref(), keys::STORED_SESSIONS, Vec::new()).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<StoredSession>> {
        Ok(self.list().await?.into_iter().find(|s| s.id == id))
    }

    /// Saves `session` at the front, replacing an entry with the same id.
    ///
    /// # Returns
    ///
    /// The updated list.
    pub async fn save(&self, session: StoredSession) -> Result<Vec<StoredSession>> {
        let _guard = self.write_lock.lock().await;
        let mut sessions = self.list().await?;
        upsert_capped(&mut sessions, session, self.cap);
        self.commit(sessions).await
    }

    /// Deletes the entry with `id`. Deleting an unknown id is a no-op.
    pub async fn delete(&self, id: &str) -> Result<Vec<StoredSession>> {
        let _guard = self.write_lock.lock().await;
        let mut sessions = self.list().await?;
        if !remove_stored(&mut sessions, id) {
            return Ok(sessions);
        }
        tracing::info!("[StoredSessions] Deleted stored session {}", id);
        self.commit(sessions).await
    }

    /// Receives the full list after every change.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<StoredSession>>> {
        self.changes.subscribe()
    }

    async fn commit(&self, sessions: Vec<StoredSession>) -> Result<Vec<StoredSession>> {
        save_value(self.store.as_ref(), keys::STORED_SESSIONS, &sessions).await?;
        // No subscribers just means no registry is listening yet.
        let _ = self.changes.send(Arc::new(sessions.clone()));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core::message::Message;
    use nexus_core::stored_session::MAX_STORED_SESSIONS;
    use nexus_infrastructure::InMemoryStore;

    fn service() -> StoredSessionService {
        StoredSessionService::new(Arc::new(InMemoryStore::new()), MAX_STORED_SESSIONS)
    }

    fn session(id: &str, text: &str) -> StoredSession {
        StoredSession::from_messages(id, Some("claude-code".to_string()), vec![Message::user(text, vec![])])
    }

    #[tokio::test]
    async fn test_save_publishes_full_list() {
        let service = service();
        let mut changes = service.subscribe();

        service.save(session("a", "first")).await.unwrap();
        service.save(session("b", "second")).await.unwrap();

        let first = changes.recv().await.unwrap();
        assert_eq!(first.len(), 1);
        let second = changes.recv().await.unwrap();
        let ids: Vec<_> = second.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_cap_is_enforced() {
        let service = StoredSessionService::new(Arc::new(InMemoryStore::new()), 2);
        service.save(session("a", "1")).await.unwrap();
        service.save(session("b", "2")).await.unwrap();
        let list = service.save(session("c", "3")).await.unwrap();

        let ids: Vec<_> = list.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
        assert_eq!(service.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_and_get() {
        let service = service();
        service.save(session("a", "hello")).await.unwrap();
        assert_eq!(service.get("a").await.unwrap().unwrap().title, "hello");

        service.delete("a").await.unwrap();
        assert!(service.get("a").await.unwrap().is_none());

        let mut changes = service.subscribe();
        service.delete("missing").await.unwrap();
        assert!(changes.try_recv().is_err());
    }
}
