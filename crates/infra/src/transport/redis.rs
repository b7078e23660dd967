//! Redis Streams transport.
//!
//! One stream per entity class (`events:prospect`, `events:quote`, ...),
//! each entry a single-field envelope (`event` → serialized JSON). Consumer
//! groups give at-least-once delivery: entries stay on the group's pending
//! list until XACK'd, and entries idle past the visibility timeout are
//! XCLAIM'd by whichever member looks first.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{
    StreamClaimReply, StreamMaxlen, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use tracing::{debug, instrument};

use covercrm_events::{
    wire, DeliveryId, EventTransport, StreamEntry, StreamName, TransportError,
};

#[derive(Clone)]
pub struct RedisTransport {
    client: Arc<redis::Client>,
    maxlen: usize,
}

impl RedisTransport {
    /// `maxlen` is the approximate per-stream entry cap; XADD trims
    /// oldest-first past it.
    pub fn new(client: redis::Client, maxlen: usize) -> Self {
        Self {
            client: Arc::new(client),
            maxlen,
        }
    }

    pub fn connect(redis_url: &str, maxlen: usize) -> Result<Self, TransportError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self::new(client, maxlen))
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, TransportError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }
}

fn command_err(op: &str, e: redis::RedisError) -> TransportError {
    if e.is_connection_refusal() || e.is_io_error() || e.is_connection_dropped() {
        TransportError::Connection(format!("{op}: {e}"))
    } else {
        TransportError::Command(format!("{op}: {e}"))
    }
}

#[async_trait]
impl EventTransport for RedisTransport {
    #[instrument(skip(self, payload), fields(stream = %stream), err)]
    async fn append(
        &self,
        stream: StreamName,
        payload: &str,
    ) -> Result<DeliveryId, TransportError> {
        let mut conn = self.conn().await?;
        let id: String = conn
            .xadd_maxlen(
                stream.key(),
                StreamMaxlen::Approx(self.maxlen),
                "*",
                &[(wire::ENVELOPE_FIELD, payload)],
            )
            .await
            .map_err(|e| command_err("XADD", e))?;
        debug!(stream = %stream, delivery_id = %id, "appended stream entry");
        Ok(DeliveryId::new(id))
    }

    async fn ensure_group(&self, stream: StreamName, group: &str) -> Result<(), TransportError> {
        let mut conn = self.conn().await?;
        // XGROUP CREATE from "0" with MKSTREAM: the group sees the full
        // backlog, and creating the stream lazily is fine. BUSYGROUP means
        // the group already exists.
        let created: Result<String, redis::RedisError> = conn
            .xgroup_create_mkstream(stream.key(), group, "0")
            .await;
        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(command_err("XGROUP CREATE", e)),
        }
    }

    async fn read_group(
        &self,
        stream: StreamName,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, TransportError> {
        let mut conn = self.conn().await?;
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis() as usize);

        // Nil on blocking timeout; Option absorbs it.
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[stream.key()], &[">"], &opts)
            .await
            .map_err(|e| command_err("XREADGROUP", e))?;

        let mut entries = Vec::new();
        if let Some(reply) = reply {
            for key in reply.keys {
                for id in key.ids {
                    entries.push(StreamEntry {
                        id: DeliveryId::new(id.id.clone()),
                        // A missing envelope field decodes as malformed
                        // downstream and is acknowledged there.
                        payload: id.get::<String>(wire::ENVELOPE_FIELD).unwrap_or_default(),
                        delivery_count: 1,
                    });
                }
            }
        }
        Ok(entries)
    }

    async fn claim_stale(
        &self,
        stream: StreamName,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, TransportError> {
        let mut conn = self.conn().await?;

        // XPENDING across all group members, then XCLAIM with the idle
        // cutoff; Redis only transfers entries actually idle long enough.
        let pending: StreamPendingCountReply = conn
            .xpending_count(stream.key(), group, "-", "+", count)
            .await
            .map_err(|e| command_err("XPENDING", e))?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = pending.ids.iter().map(|p| p.id.clone()).collect();
        let delivered: std::collections::HashMap<String, u32> = pending
            .ids
            .iter()
            .map(|p| (p.id.clone(), p.times_delivered as u32))
            .collect();

        let claimed: StreamClaimReply = conn
            .xclaim(
                stream.key(),
                group,
                consumer,
                min_idle.as_millis() as usize,
                &ids,
            )
            .await
            .map_err(|e| command_err("XCLAIM", e))?;

        let entries = claimed
            .ids
            .into_iter()
            .map(|id| StreamEntry {
                // XCLAIM itself counts as a delivery.
                delivery_count: delivered.get(&id.id).copied().unwrap_or(0) + 1,
                payload: id.get::<String>(wire::ENVELOPE_FIELD).unwrap_or_default(),
                id: DeliveryId::new(id.id),
            })
            .collect();
        Ok(entries)
    }

    async fn ack(
        &self,
        stream: StreamName,
        group: &str,
        ids: &[DeliveryId],
    ) -> Result<(), TransportError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let raw: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        let _: u64 = conn
            .xack(stream.key(), group, &raw)
            .await
            .map_err(|e| command_err("XACK", e))?;
        Ok(())
    }
}
