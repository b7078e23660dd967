//! In-memory audit trail for tests and single-process runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use covercrm_core::EventId;
use covercrm_events::{wire, Event};

use super::{AuditError, AuditRecord, EventAudit};

#[derive(Default)]
pub struct InMemoryEventAudit {
    records: Mutex<HashMap<EventId, AuditRecord>>,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl InMemoryEventAudit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail, as a lost database connection would.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventAudit for InMemoryEventAudit {
    async fn record(&self, event: &Event) -> Result<(), AuditError> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(AuditError::Backend("write failed".to_string()));
        }
        let payload: serde_json::Value = serde_json::from_str(
            &wire::encode(event).map_err(|e| AuditError::Serialization(e.to_string()))?,
        )
        .map_err(|e| AuditError::Serialization(e.to_string()))?;

        let mut records = self.records.lock().unwrap();
        records.entry(event.event_id()).or_insert(AuditRecord {
            event_id: event.event_id(),
            event_type: event.kind(),
            aggregate_type: event.aggregate_type(),
            aggregate_id: event.aggregate_id().to_string(),
            user_id: event.metadata().user_id(),
            payload,
            occurred_at: event.metadata().occurred_at(),
            is_processed: false,
            processed_at: None,
        });
        Ok(())
    }

    async fn mark_processed(&self, event_id: EventId) -> Result<(), AuditError> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(AuditError::Backend("write failed".to_string()));
        }
        if let Some(record) = self.records.lock().unwrap().get_mut(&event_id) {
            if !record.is_processed {
                record.is_processed = true;
                record.processed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn find(&self, event_id: EventId) -> Result<Option<AuditRecord>, AuditError> {
        Ok(self.records.lock().unwrap().get(&event_id).cloned())
    }

    async fn unprocessed(&self, limit: usize) -> Result<Vec<AuditRecord>, AuditError> {
        let records = self.records.lock().unwrap();
        let mut pending: Vec<AuditRecord> = records
            .values()
            .filter(|r| !r.is_processed)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.occurred_at);
        pending.truncate(limit);
        Ok(pending)
    }
}
