//! PostgreSQL-backed session store.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::Instrument;
use uuid::Uuid;

use super::{Session, SessionStore, hash_refresh_token};
use crate::error::StoreError;
use crate::unix_now;

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn session_from_row(row: &PgRow) -> Session {
        Session {
            id: row.get("id"),
            identity_id: row.get("identity_id"),
            address: row.get("address"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

const SESSION_COLUMNS: &str = "id, identity_id, address, \
     extract(epoch FROM created_at)::bigint AS created_at, \
     extract(epoch FROM expires_at)::bigint AS expires_at";

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(
        &self,
        identity_id: Uuid,
        refresh_token: &str,
        address: &str,
        ttl_seconds: i64,
    ) -> Result<Session, StoreError> {
        let now = unix_now();
        let query = r"
            INSERT INTO sessions (id, identity_id, refresh_token_hash, address, created_at, expires_at)
            VALUES ($1, $2, $3, $4, to_timestamp($5), to_timestamp($6))
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let session = Session {
            id: Uuid::new_v4(),
            identity_id,
            address: address.to_string(),
            created_at: now,
            expires_at: now + ttl_seconds,
        };
        let result = sqlx::query(query)
            .bind(session.id)
            .bind(identity_id)
            .bind(hash_refresh_token(refresh_token))
            .bind(address)
            .bind(session.created_at)
            .bind(session.expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await;
        match result {
            Ok(_) => Ok(session),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict),
            Err(err) => Err(StoreError::Unavailable(
                anyhow::Error::new(err).context("failed to insert session"),
            )),
        }
    }

    async fn find_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<Session>, StoreError> {
        let query =
            format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE refresh_token_hash = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(hash_refresh_token(refresh_token))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session by refresh token")?;
        Ok(row.as_ref().map(Self::session_from_row))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1");
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
            .context("failed to lookup session by id")?;
        Ok(row.as_ref().map(Self::session_from_row))
    }

    async fn delete_by_refresh_token(&self, refresh_token: &str) -> Result<(), StoreError> {
        let query = "DELETE FROM sessions WHERE refresh_token_hash = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(hash_refresh_token(refresh_token))
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete session by refresh token")?;
        Ok(())
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<(), StoreError> {
        let query = "DELETE FROM sessions WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete session by id")?;
        Ok(())
    }

    async fn list_by_identity(&self, identity_id: Uuid) -> Result<Vec<Session>, StoreError> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE identity_id = $1 ORDER BY created_at"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let rows = sqlx::query(&query)
            .bind(identity_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list sessions by identity")?;
        Ok(rows.iter().map(Self::session_from_row).collect())
    }
}
