//! Postgres-backed audit trail.
//!
//! Schema: see `sql/schema.sql` (`event_store` table). `event_id` is the
//! primary key; `ON CONFLICT DO NOTHING` makes [`EventAudit::record`]
//! idempotent so a retried publish never duplicates a row.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use covercrm_core::{EventId, UserId};
use covercrm_events::{wire, Event};

use super::{AuditError, AuditRecord, EventAudit};

#[derive(Debug, Clone)]
pub struct PostgresEventAudit {
    pool: Arc<PgPool>,
}

impl PostgresEventAudit {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn backend_err(op: &str, e: sqlx::Error) -> AuditError {
    AuditError::Backend(format!("{op}: {e}"))
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<AuditRecord, AuditError> {
    let event_type: String = row.get("event_type");
    let aggregate_type: String = row.get("aggregate_type");
    Ok(AuditRecord {
        event_id: EventId::from_uuid(row.get("event_id")),
        event_type: event_type
            .parse()
            .map_err(|e| AuditError::Backend(format!("corrupt event_type column: {e}")))?,
        aggregate_type: serde_json::from_value(serde_json::Value::String(aggregate_type))
            .map_err(|e| AuditError::Backend(format!("corrupt aggregate_type column: {e}")))?,
        aggregate_id: row.get("aggregate_id"),
        user_id: row.get::<Option<i64>, _>("user_id").map(UserId::new),
        payload: row.get("payload"),
        occurred_at: row.get("occurred_at"),
        is_processed: row.get("is_processed"),
        processed_at: row.get("processed_at"),
    })
}

#[async_trait]
impl EventAudit for PostgresEventAudit {
    #[instrument(skip(self, event), fields(event_id = %event.event_id(), event_type = %event.kind()), err)]
    async fn record(&self, event: &Event) -> Result<(), AuditError> {
        let payload: serde_json::Value = serde_json::from_str(
            &wire::encode(event).map_err(|e| AuditError::Serialization(e.to_string()))?,
        )
        .map_err(|e| AuditError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO event_store
                (event_id, event_type, aggregate_type, aggregate_id,
                 user_id, payload, occurred_at, is_processed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event.event_id().as_uuid())
        .bind(event.kind().as_str())
        .bind(event.aggregate_type().as_str())
        .bind(event.aggregate_id())
        .bind(event.metadata().user_id().map(i64::from))
        .bind(&payload)
        .bind(event.metadata().occurred_at())
        .execute(&*self.pool)
        .await
        .map_err(|e| backend_err("record", e))?;
        Ok(())
    }

    async fn mark_processed(&self, event_id: EventId) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            UPDATE event_store
            SET is_processed = TRUE, processed_at = NOW()
            WHERE event_id = $1 AND is_processed = FALSE
            "#,
        )
        .bind(event_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| backend_err("mark_processed", e))?;
        Ok(())
    }

    async fn find(&self, event_id: EventId) -> Result<Option<AuditRecord>, AuditError> {
        let row = sqlx::query(
            r#"
            SELECT event_id, event_type, aggregate_type, aggregate_id,
                   user_id, payload, occurred_at, is_processed, processed_at
            FROM event_store
            WHERE event_id = $1
            "#,
        )
        .bind(event_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| backend_err("find", e))?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn unprocessed(&self, limit: usize) -> Result<Vec<AuditRecord>, AuditError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, event_type, aggregate_type, aggregate_id,
                   user_id, payload, occurred_at, is_processed, processed_at
            FROM event_store
            WHERE is_processed = FALSE
            ORDER BY occurred_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| backend_err("unprocessed", e))?;
        rows.iter().map(row_to_record).collect()
    }
}
