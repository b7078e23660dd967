//! Transport abstraction: an append-only, partitioned log with
//! consumer-group semantics.
//!
//! The contract mirrors Redis Streams (`XADD`/`XREADGROUP`/`XACK`, pending
//! entries list, visibility-timeout reclaim) so the production transport is
//! bit-compatible with an existing broker deployment, while tests run
//! against an in-memory implementation with the same semantics.
//!
//! Delivery guarantee is **at-least-once**: an entry claimed by a consumer
//! that never acknowledges it becomes eligible for reclaim by another group
//! member once its idle time exceeds the visibility timeout. Effectively-once
//! side effects come from handler idempotency, not from the transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::stream::StreamName;

/// Broker-assigned identifier of one stream entry (delivery tracing).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryId(String);

impl DeliveryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One claimed entry: the envelope payload plus delivery diagnostics.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: DeliveryId,
    /// The serialized event (the `event` envelope field).
    pub payload: String,
    /// How many times this entry has been delivered (1 on first delivery).
    /// Used only for logging; there is no dead-letter cutoff.
    pub delivery_count: u32,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker command error: {0}")]
    Command(String),
}

/// Append-only partitioned log with consumer groups.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Append an envelope payload to a stream, trimming oldest-first past
    /// the configured cap (approximately; the broker may trim lazily).
    /// Fails fast when the broker is unreachable; no local buffering.
    async fn append(&self, stream: StreamName, payload: &str)
        -> Result<DeliveryId, TransportError>;

    /// Create the consumer group if it does not exist (idempotent).
    async fn ensure_group(&self, stream: StreamName, group: &str) -> Result<(), TransportError>;

    /// Blocking read of up to `count` new entries for this group member,
    /// waiting at most `block`. An empty result means the wait timed out.
    async fn read_group(
        &self,
        stream: StreamName,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, TransportError>;

    /// Claim entries pending in this group whose idle time exceeds
    /// `min_idle` (the visibility timeout), transferring ownership to
    /// `consumer`. This is the redelivery path after a crash-before-ack.
    async fn claim_stale(
        &self,
        stream: StreamName,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, TransportError>;

    /// Acknowledge processed entries, removing them from the group's
    /// pending-entries list.
    async fn ack(
        &self,
        stream: StreamName,
        group: &str,
        ids: &[DeliveryId],
    ) -> Result<(), TransportError>;
}

#[async_trait]
impl<T> EventTransport for Arc<T>
where
    T: EventTransport + ?Sized,
{
    async fn append(
        &self,
        stream: StreamName,
        payload: &str,
    ) -> Result<DeliveryId, TransportError> {
        (**self).append(stream, payload).await
    }

    async fn ensure_group(&self, stream: StreamName, group: &str) -> Result<(), TransportError> {
        (**self).ensure_group(stream, group).await
    }

    async fn read_group(
        &self,
        stream: StreamName,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, TransportError> {
        (**self).read_group(stream, group, consumer, count, block).await
    }

    async fn claim_stale(
        &self,
        stream: StreamName,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, TransportError> {
        (**self)
            .claim_stale(stream, group, consumer, min_idle, count)
            .await
    }

    async fn ack(
        &self,
        stream: StreamName,
        group: &str,
        ids: &[DeliveryId],
    ) -> Result<(), TransportError> {
        (**self).ack(stream, group, ids).await
    }
}
