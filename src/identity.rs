//! The slice of the platform's user record visible to the auth core.
//!
//! Identities are owned by the external persistence layer; this module only
//! reads and writes the fields relevant to authentication and second-factor
//! enrollment, behind the [`IdentityStore`] trait.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::StoreError;

/// Platform role carried in token claims.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Administrator,
    Staff,
    Teacher,
    Guardian,
    Student,
    User,
    Guest,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Administrator => "administrator",
            Self::Staff => "staff",
            Self::Teacher => "teacher",
            Self::Guardian => "guardian",
            Self::Student => "student",
            Self::User => "user",
            Self::Guest => "guest",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "administrator" => Some(Self::Administrator),
            "staff" => Some(Self::Staff),
            "teacher" => Some(Self::Teacher),
            "guardian" => Some(Self::Guardian),
            "student" => Some(Self::Student),
            "user" => Some(Self::User),
            "guest" => Some(Self::Guest),
            _ => None,
        }
    }
}

/// Second-factor enrollment state.
///
/// Transitions: `Disabled` → `Pending` (secret generated) → `Enabled` (one
/// correct code). Disabling from either non-disabled state discards the
/// secret entirely.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SecondFactor {
    Disabled,
    Pending { secret: String },
    Enabled { secret: String },
}

impl SecondFactor {
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }

    /// Reconstruct the state from the external store's two columns.
    #[must_use]
    pub fn from_columns(enabled: bool, secret: Option<String>) -> Self {
        match (enabled, secret) {
            (true, Some(secret)) => Self::Enabled { secret },
            (false, Some(secret)) => Self::Pending { secret },
            // An enabled flag without a secret is unusable; treat as disabled.
            (_, None) => Self::Disabled,
        }
    }
}

/// Authentication-relevant fields of one identity.
#[derive(Clone, Debug)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub second_factor: SecondFactor,
}

/// Fields safe to return to callers. Never carries the password hash or the
/// second-factor secret.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PublicIdentity {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
}

impl From<&Identity> for PublicIdentity {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            username: identity.username.clone(),
            email: identity.email.clone(),
            role: identity.role,
        }
    }
}

/// Adapter over the external user store.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Look up by username or email. The login value is already normalized.
    async fn find_by_login(&self, login: &str) -> Result<Option<Identity>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError>;

    /// Store a fresh secret and mark enrollment pending.
    async fn set_second_factor_pending(&self, id: Uuid, secret: &str) -> Result<(), StoreError>;

    /// Confirm the pending secret. No-op if no secret is stored.
    async fn enable_second_factor(&self, id: Uuid) -> Result<(), StoreError>;

    /// Clear the secret and disable the second factor.
    async fn disable_second_factor(&self, id: Uuid) -> Result<(), StoreError>;
}

/// In-memory identity store for tests and local development.
#[derive(Default)]
pub struct MemoryIdentityStore {
    inner: Mutex<HashMap<Uuid, Identity>>,
}

impl MemoryIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, identity: Identity) {
        self.inner.lock().await.insert(identity.id, identity);
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_by_login(&self, login: &str) -> Result<Option<Identity>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .values()
            .find(|identity| {
                identity.username.eq_ignore_ascii_case(login)
                    || identity.email.eq_ignore_ascii_case(login)
            })
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        Ok(self.inner.lock().await.get(&id).cloned())
    }

    async fn set_second_factor_pending(&self, id: Uuid, secret: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(identity) = inner.get_mut(&id) {
            identity.second_factor = SecondFactor::Pending {
                secret: secret.to_string(),
            };
        }
        Ok(())
    }

    async fn enable_second_factor(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(identity) = inner.get_mut(&id) {
            if let SecondFactor::Pending { secret } = &identity.second_factor {
                identity.second_factor = SecondFactor::Enabled {
                    secret: secret.clone(),
                };
            }
        }
        Ok(())
    }

    async fn disable_second_factor(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(identity) = inner.get_mut(&id) {
            identity.second_factor = SecondFactor::Disabled;
        }
        Ok(())
    }
}

/// PostgreSQL-backed identity store.
#[derive(Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn identity_from_row(row: &sqlx::postgres::PgRow) -> Result<Identity, StoreError> {
        let role_text: String = row.get("role");
        let role = Role::from_str(&role_text)
            .with_context(|| format!("unknown role in user record: {role_text}"))?;
        Ok(Identity {
            id: row.get("id"),
            username: row.get("username"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            role,
            second_factor: SecondFactor::from_columns(
                row.get("two_factor_enabled"),
                row.get("two_factor_secret"),
            ),
        })
    }
}

const IDENTITY_COLUMNS: &str =
    "id, username, email, password_hash, role::text AS role, two_factor_enabled, two_factor_secret";

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_by_login(&self, login: &str) -> Result<Option<Identity>, StoreError> {
        let query = format!(
            "SELECT {IDENTITY_COLUMNS} FROM users WHERE lower(username) = $1 OR lower(email) = $1"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(login)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup identity by login")?;
        row.as_ref().map(Self::identity_from_row).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        let query = format!("SELECT {IDENTITY_COLUMNS} FROM users WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup identity by id")?;
        row.as_ref().map(Self::identity_from_row).transpose()
    }

    async fn set_second_factor_pending(&self, id: Uuid, secret: &str) -> Result<(), StoreError> {
        let query = r"
            UPDATE users
            SET two_factor_secret = $2, two_factor_enabled = FALSE
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(secret)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to store pending second factor")?;
        Ok(())
    }

    async fn enable_second_factor(&self, id: Uuid) -> Result<(), StoreError> {
        // The secret guard keeps an enabled flag from appearing without one.
        let query = r"
            UPDATE users
            SET two_factor_enabled = TRUE
            WHERE id = $1 AND two_factor_secret IS NOT NULL
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to enable second factor")?;
        Ok(())
    }

    async fn disable_second_factor(&self, id: Uuid) -> Result<(), StoreError> {
        let query = r"
            UPDATE users
            SET two_factor_enabled = FALSE, two_factor_secret = NULL
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to disable second factor")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(second_factor: SecondFactor) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            username: "ada".to_string(),
            email: "ada@example.com".to_string(),
            password_hash: "hash".to_string(),
            role: Role::Teacher,
            second_factor,
        }
    }

    #[test]
    fn role_round_trips_through_text() {
        for role in [
            Role::Administrator,
            Role::Staff,
            Role::Teacher,
            Role::Guardian,
            Role::Student,
            Role::User,
            Role::Guest,
        ] {
            assert_eq!(Role::from_str(role.as_str()), Some(role));
        }
        assert_eq!(Role::from_str("principal"), None);
    }

    #[test]
    fn second_factor_from_columns() {
        assert_eq!(
            SecondFactor::from_columns(true, Some("s".to_string())),
            SecondFactor::Enabled {
                secret: "s".to_string()
            }
        );
        assert_eq!(
            SecondFactor::from_columns(false, Some("s".to_string())),
            SecondFactor::Pending {
                secret: "s".to_string()
            }
        );
        assert_eq!(SecondFactor::from_columns(true, None), SecondFactor::Disabled);
        assert_eq!(SecondFactor::from_columns(false, None), SecondFactor::Disabled);
    }

    #[test]
    fn public_identity_omits_secrets() {
        let identity = identity(SecondFactor::Enabled {
            secret: "top".to_string(),
        });
        let public = PublicIdentity::from(&identity);
        let json = serde_json::to_string(&public).unwrap();
        assert!(!json.contains("hash"));
        assert!(!json.contains("top"));
        assert!(json.contains("ada@example.com"));
    }

    #[tokio::test]
    async fn memory_store_finds_by_username_or_email() {
        let store = MemoryIdentityStore::new();
        let id = {
            let identity = identity(SecondFactor::Disabled);
            let id = identity.id;
            store.insert(identity).await;
            id
        };

        let by_username = store.find_by_login("ada").await.unwrap().unwrap();
        assert_eq!(by_username.id, id);
        let by_email = store.find_by_login("ada@example.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, id);
        assert!(store.find_by_login("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_second_factor_transitions() {
        let store = MemoryIdentityStore::new();
        let identity = identity(SecondFactor::Disabled);
        let id = identity.id;
        store.insert(identity).await;

        store.set_second_factor_pending(id, "secret").await.unwrap();
        let pending = store.find_by_id(id).await.unwrap().unwrap();
        assert!(matches!(pending.second_factor, SecondFactor::Pending { .. }));

        store.enable_second_factor(id).await.unwrap();
        let enabled = store.find_by_id(id).await.unwrap().unwrap();
        assert!(enabled.second_factor.is_enabled());

        store.disable_second_factor(id).await.unwrap();
        let disabled = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(disabled.second_factor, SecondFactor::Disabled);
    }

    #[tokio::test]
    async fn enable_without_pending_secret_is_noop() {
        let store = MemoryIdentityStore::new();
        let identity = identity(SecondFactor::Disabled);
        let id = identity.id;
        store.insert(identity).await;

        store.enable_second_factor(id).await.unwrap();
        let unchanged = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(unchanged.second_factor, SecondFactor::Disabled);
    }
}
