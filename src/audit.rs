//! Append-only record of security-relevant events.
//!
//! Sinks are best-effort: the orchestrator logs and swallows write failures,
//! which must never abort the operation that triggered them. Records are
//! immutable; nothing in this crate updates or deletes one.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::StoreError;

/// Who triggered an event. Background work is attributed explicitly instead
/// of falling back to a session user.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Actor {
    Identity(Uuid),
    System,
}

impl Actor {
    #[must_use]
    pub const fn identity_id(self) -> Option<Uuid> {
        match self {
            Self::Identity(id) => Some(id),
            Self::System => None,
        }
    }

    #[must_use]
    pub const fn kind(self) -> &'static str {
        match self {
            Self::Identity(_) => "identity",
            Self::System => "system",
        }
    }
}

/// One immutable audit record.
#[derive(Clone, Debug, PartialEq)]
pub struct AuditEvent {
    /// Action tag, e.g. "LOGIN", "LOGOUT".
    pub action: &'static str,
    /// Resource type the action concerns.
    pub resource: &'static str,
    pub resource_id: Option<String>,
    pub actor: Actor,
    pub meta: Option<Value>,
    pub ip: Option<String>,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<(), StoreError>;
}

/// Collects events in memory, for tests.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn recorded(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }

    pub async fn count_action(&self, action: &str) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|event| event.action == action)
            .count()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), StoreError> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

/// PostgreSQL-backed audit sink.
#[derive(Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO audit_log (actor_kind, identity_id, action, resource, resource_id, meta, ip_address)
            VALUES ($1, $2, $3, $4, $5, $6::jsonb, $7::inet)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(event.actor.kind())
            .bind(event.actor.identity_id())
            .bind(event.action)
            .bind(event.resource)
            .bind(event.resource_id)
            .bind(event.meta.map(|meta| meta.to_string()))
            .bind(event.ip)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| {
                StoreError::Unavailable(
                    anyhow::Error::new(err).context("failed to write audit record"),
                )
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_attribution() {
        let id = Uuid::new_v4();
        assert_eq!(Actor::Identity(id).identity_id(), Some(id));
        assert_eq!(Actor::Identity(id).kind(), "identity");
        assert_eq!(Actor::System.identity_id(), None);
        assert_eq!(Actor::System.kind(), "system");
    }

    #[tokio::test]
    async fn memory_sink_is_append_only() {
        let sink = MemoryAuditSink::new();
        sink.record(AuditEvent {
            action: "LOGIN",
            resource: "session",
            resource_id: None,
            actor: Actor::System,
            meta: None,
            ip: Some("203.0.113.7".to_string()),
        })
        .await
        .unwrap();
        sink.record(AuditEvent {
            action: "LOGOUT",
            resource: "session",
            resource_id: None,
            actor: Actor::System,
            meta: None,
            ip: None,
        })
        .await
        .unwrap();

        assert_eq!(sink.count_action("LOGIN").await, 1);
        assert_eq!(sink.count_action("LOGOUT").await, 1);
        assert_eq!(sink.recorded().await.len(), 2);
    }
}
