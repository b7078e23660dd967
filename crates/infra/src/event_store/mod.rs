//! Append-only audit trail of every published event.
//!
//! The audit row is written before the broker append, so an event that
//! reached any consumer always has a trail entry. Rows are never updated
//! except for the processing marker, and never deleted.

mod in_memory;
mod postgres;

pub use in_memory::InMemoryEventAudit;
pub use postgres::PostgresEventAudit;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use covercrm_core::{EventId, UserId};
use covercrm_events::{AggregateType, Event, EventKind};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit serialization failed: {0}")]
    Serialization(String),

    #[error("audit store error: {0}")]
    Backend(String),
}

/// One audit row, as stored.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub event_id: EventId,
    pub event_type: EventKind,
    pub aggregate_type: AggregateType,
    pub aggregate_id: String,
    pub user_id: Option<UserId>,
    /// The full serialized event, for replay and inspection.
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    /// Whether the consumer group finished all handlers for this event.
    pub is_processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

/// The audit trail store.
#[async_trait]
pub trait EventAudit: Send + Sync {
    /// Record an event. Idempotent on `event_id`: recording the same fact
    /// twice leaves a single row.
    async fn record(&self, event: &Event) -> Result<(), AuditError>;

    /// Mark an event fully processed by the consumer group. Unknown ids are
    /// a no-op (the row may predate this deployment's retention).
    async fn mark_processed(&self, event_id: EventId) -> Result<(), AuditError>;

    async fn find(&self, event_id: EventId) -> Result<Option<AuditRecord>, AuditError>;

    /// Events recorded but not yet marked processed, oldest first.
    async fn unprocessed(&self, limit: usize) -> Result<Vec<AuditRecord>, AuditError>;
}
