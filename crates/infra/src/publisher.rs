//! The production publisher: audit trail first, then broker append.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{instrument, warn};

use covercrm_events::{
    wire, DeliveryId, Event, EventPublisher, EventTransport, PublishError, StreamName,
};

use crate::event_store::EventAudit;

/// Publishes events through a transport, recording each one in the audit
/// trail before the broker sees it.
///
/// Ordering of failures:
/// - audit write fails: logged and publishing continues; a delivered event
///   without a trail row beats a trail row for an event nobody saw, and the
///   broker entry itself still witnesses the fact.
/// - broker append fails: returned to the caller immediately. No local
///   buffering, no retry.
pub struct Publisher<T> {
    transport: T,
    audit: Arc<dyn EventAudit>,
}

impl<T: EventTransport> Publisher<T> {
    pub fn new(transport: T, audit: Arc<dyn EventAudit>) -> Self {
        Self { transport, audit }
    }

    async fn publish_inner(
        &self,
        event: &Event,
        stream: StreamName,
    ) -> Result<DeliveryId, PublishError> {
        let payload = wire::encode(event).map_err(|e| PublishError::Serialization(e.to_string()))?;

        if let Err(e) = self.audit.record(event).await {
            warn!(
                event_id = %event.event_id(),
                error = %e,
                "audit write failed, publishing anyway"
            );
        }

        let id = self.transport.append(stream, &payload).await?;
        Ok(id)
    }
}

#[async_trait]
impl<T: EventTransport> EventPublisher for Publisher<T> {
    #[instrument(skip(self, event), fields(event_id = %event.event_id(), event_type = %event.kind()), err)]
    async fn publish(&self, event: &Event) -> Result<DeliveryId, PublishError> {
        self.publish_inner(event, event.stream()).await
    }

    #[instrument(skip(self, event), fields(event_id = %event.event_id(), stream = %stream), err)]
    async fn publish_to(
        &self,
        event: &Event,
        stream: StreamName,
    ) -> Result<DeliveryId, PublishError> {
        self.publish_inner(event, stream).await
    }

    async fn publish_batch(&self, events: &[Event]) -> Result<Vec<DeliveryId>, PublishError> {
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            ids.push(self.publish_inner(event, event.stream()).await?);
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventAudit;
    use crate::transport::InMemoryTransport;
    use covercrm_core::{ProspectId, QuoteId};
    use covercrm_events::{EventPayload, QuoteAcceptedPayload};

    fn quote_accepted() -> Event {
        Event::new(EventPayload::QuoteAccepted(QuoteAcceptedPayload {
            quote_id: QuoteId::new(7),
            prospect_id: ProspectId::new(3),
            provider: "X".into(),
            insurance_type: "health".into(),
            annual_premium: 120_000,
            accepted_by: None,
        }))
    }

    #[tokio::test]
    async fn publish_routes_by_kind_and_records_an_audit_row() {
        let transport = InMemoryTransport::new(100);
        let audit = Arc::new(InMemoryEventAudit::new());
        let publisher = Publisher::new(transport.clone(), audit.clone());

        let event = quote_accepted();
        publisher.publish(&event).await.unwrap();

        assert_eq!(transport.stream_len(StreamName::Quote), 1);
        let record = audit.find(event.event_id()).await.unwrap().unwrap();
        assert!(!record.is_processed);
        assert_eq!(record.aggregate_id, "7");
    }

    #[tokio::test]
    async fn broker_failure_is_returned_but_the_audit_row_remains() {
        let transport = InMemoryTransport::new(100);
        let audit = Arc::new(InMemoryEventAudit::new());
        let publisher = Publisher::new(transport.clone(), audit.clone());
        transport.set_down(true);

        let event = quote_accepted();
        let err = publisher.publish(&event).await.unwrap_err();
        assert!(matches!(err, PublishError::Transport(_)));
        assert!(audit.find(event.event_id()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn audit_failure_does_not_block_publishing() {
        let transport = InMemoryTransport::new(100);
        let audit = Arc::new(InMemoryEventAudit::new());
        let publisher = Publisher::new(transport.clone(), audit.clone());
        audit.set_fail_writes(true);

        publisher.publish(&quote_accepted()).await.unwrap();
        assert_eq!(transport.stream_len(StreamName::Quote), 1);
        assert!(audit.is_empty());
    }

    #[tokio::test]
    async fn batch_publishes_in_order_and_stops_at_the_first_failure() {
        let transport = InMemoryTransport::new(100);
        let audit = Arc::new(InMemoryEventAudit::new());
        let publisher = Publisher::new(transport.clone(), audit.clone());

        let events = [quote_accepted(), quote_accepted()];
        let ids = publisher.publish_batch(&events).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(transport.stream_len(StreamName::Quote), 2);
    }
}
