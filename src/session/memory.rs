//! In-memory session store, the test double for the persistence adapter.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Session, SessionStore, hash_refresh_token};
use crate::error::StoreError;
use crate::unix_now;

/// Sessions keyed by refresh-token hash. Suitable for tests and local
/// development only; a process restart drops every session.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<HashMap<Vec<u8>, Session>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live rows, for assertions in tests.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(
        &self,
        identity_id: Uuid,
        refresh_token: &str,
        address: &str,
        ttl_seconds: i64,
    ) -> Result<Session, StoreError> {
        let token_hash = hash_refresh_token(refresh_token);
        let mut inner = self.inner.lock().await;
        if inner.contains_key(&token_hash) {
            return Err(StoreError::Conflict);
        }
        let now = unix_now();
        let session = Session {
            id: Uuid::new_v4(),
            identity_id,
            address: address.to_string(),
            created_at: now,
            expires_at: now + ttl_seconds,
        };
        inner.insert(token_hash, session.clone());
        Ok(session)
    }

    async fn find_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<Session>, StoreError> {
        let token_hash = hash_refresh_token(refresh_token);
        Ok(self.inner.lock().await.get(&token_hash).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.values().find(|session| session.id == id).cloned())
    }

    async fn delete_by_refresh_token(&self, refresh_token: &str) -> Result<(), StoreError> {
        let token_hash = hash_refresh_token(refresh_token);
        self.inner.lock().await.remove(&token_hash);
        Ok(())
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.retain(|_, session| session.id != id);
        Ok(())
    }

    async fn list_by_identity(&self, identity_id: Uuid) -> Result<Vec<Session>, StoreError> {
        let inner = self.inner.lock().await;
        let mut sessions: Vec<Session> = inner
            .values()
            .filter(|session| session.identity_id == identity_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|session| session.created_at);
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_find_then_delete() {
        let store = MemorySessionStore::new();
        let identity_id = Uuid::new_v4();

        let session = store
            .create(identity_id, "refresh-1", "203.0.113.7", 3_600)
            .await
            .unwrap();
        assert_eq!(session.identity_id, identity_id);
        assert_eq!(store.len().await, 1);

        let found = store.find_by_refresh_token("refresh-1").await.unwrap();
        assert_eq!(found, Some(session.clone()));
        assert_eq!(store.find_by_id(session.id).await.unwrap(), Some(session));

        store.delete_by_refresh_token("refresh-1").await.unwrap();
        assert!(store.is_empty().await);
        assert!(store.find_by_refresh_token("refresh-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_refresh_token_is_a_conflict() {
        let store = MemorySessionStore::new();
        store
            .create(Uuid::new_v4(), "dup", "203.0.113.7", 3_600)
            .await
            .unwrap();
        let err = store
            .create(Uuid::new_v4(), "dup", "203.0.113.8", 3_600)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemorySessionStore::new();
        store.delete_by_refresh_token("never-existed").await.unwrap();
        store.delete_by_id(Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn lists_only_the_identitys_sessions() {
        let store = MemorySessionStore::new();
        let mine = Uuid::new_v4();
        let theirs = Uuid::new_v4();
        store.create(mine, "a", "203.0.113.7", 3_600).await.unwrap();
        store.create(mine, "b", "203.0.113.7", 3_600).await.unwrap();
        store.create(theirs, "c", "203.0.113.9", 3_600).await.unwrap();

        let sessions = store.list_by_identity(mine).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().all(|session| session.identity_id == mine));
    }

    #[tokio::test]
    async fn negative_ttl_creates_an_already_expired_session() {
        let store = MemorySessionStore::new();
        let session = store
            .create(Uuid::new_v4(), "stale", "203.0.113.7", -10)
            .await
            .unwrap();
        assert!(session.expired_at(unix_now()));
        // Still present until the caller lazily deletes it.
        assert!(store.find_by_refresh_token("stale").await.unwrap().is_some());
    }
}
