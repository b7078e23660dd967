//! Publishing seam.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::event::Event;
use crate::stream::StreamName;
use crate::transport::{DeliveryId, TransportError};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("event serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Publishes domain events to their streams.
///
/// Failure mode is fail-fast: if the broker is unreachable the caller gets
/// the error immediately and decides whether it is fatal to the triggering
/// operation or merely logged. There is no local retry queue.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish to the stream resolved from the event kind.
    async fn publish(&self, event: &Event) -> Result<DeliveryId, PublishError>;

    /// Publish to an explicitly chosen stream, overriding routing.
    async fn publish_to(
        &self,
        event: &Event,
        stream: StreamName,
    ) -> Result<DeliveryId, PublishError>;

    /// Publish a sequence of events produced by one unit of business logic.
    ///
    /// Not atomic: a mid-batch failure leaves earlier events already visible
    /// to consumers. Delivery ids are returned in publish order.
    async fn publish_batch(&self, events: &[Event]) -> Result<Vec<DeliveryId>, PublishError>;
}

#[async_trait]
impl<P> EventPublisher for Arc<P>
where
    P: EventPublisher + ?Sized,
{
    async fn publish(&self, event: &Event) -> Result<DeliveryId, PublishError> {
        (**self).publish(event).await
    }

    async fn publish_to(
        &self,
        event: &Event,
        stream: StreamName,
    ) -> Result<DeliveryId, PublishError> {
        (**self).publish_to(event, stream).await
    }

    async fn publish_batch(&self, events: &[Event]) -> Result<Vec<DeliveryId>, PublishError> {
        (**self).publish_batch(events).await
    }
}
