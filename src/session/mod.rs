//! Persisted sessions binding a refresh token to an identity and origin.
//!
//! A refresh token is only honored while its session row exists, which is
//! what makes refresh tokens revocable despite being bearer tokens. Stores
//! never persist the raw token value; only its SHA-256 hash is kept and
//! looked up.

pub mod memory;
pub mod postgres;

pub use memory::MemorySessionStore;
pub use postgres::PgSessionStore;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::StoreError;

/// One authenticated device/browser.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub identity_id: Uuid,
    /// Origin network address recorded at creation.
    pub address: String,
    pub created_at: i64,
    pub expires_at: i64,
}

impl Session {
    /// A session past its expiry is logically dead even before deletion.
    #[must_use]
    pub const fn expired_at(&self, now_unix_seconds: i64) -> bool {
        self.expires_at <= now_unix_seconds
    }
}

/// Hash a refresh token for storage and lookup. Raw values never touch a
/// store.
#[must_use]
pub fn hash_refresh_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Adapter over the external session store.
///
/// All operations are plain persistence calls; the only cross-row invariant
/// is uniqueness of the refresh-token value. Expiry is enforced by the
/// caller, not filtered here.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session for an identity. Fails with `StoreError::Conflict`
    /// if the refresh token already identifies a live session.
    async fn create(
        &self,
        identity_id: Uuid,
        refresh_token: &str,
        address: &str,
        ttl_seconds: i64,
    ) -> Result<Session, StoreError>;

    async fn find_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<Session>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, StoreError>;

    /// Deleting an absent session is not an error.
    async fn delete_by_refresh_token(&self, refresh_token: &str) -> Result<(), StoreError>;

    /// Deleting an absent session is not an error.
    async fn delete_by_id(&self, id: Uuid) -> Result<(), StoreError>;

    async fn list_by_identity(&self, identity_id: Uuid) -> Result<Vec<Session>, StoreError>;
}
