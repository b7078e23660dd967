//! The consumer loop: reads a stream as a group member and drives handlers.
//!
//! Per iteration the consumer first reclaims entries another member left
//! idle past the visibility timeout, then blocks for new entries. Entries
//! are processed strictly in stream order; the handlers bound to one entry
//! run concurrently, bounded by a semaphore and a per-invocation timeout.
//!
//! Acknowledgement discipline:
//! - every handler succeeded → XACK + audit processing marker
//! - any handler failed or timed out → no ack; the entry is redelivered
//!   after the visibility timeout, indefinitely (idempotent handlers make
//!   the repeats harmless, and a poison entry surfaces in the logs via its
//!   climbing delivery count)
//! - malformed payload or unknown event type → ack immediately; replaying
//!   cannot succeed and would wedge the stream

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use covercrm_events::{
    wire, EventTransport, HandlerRegistry, StreamEntry, StreamName, WireError,
};

use crate::config::WorkerConfig;
use crate::event_store::EventAudit;

/// Handle to stop a running consumer and wait for it to drain.
pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    join: tokio::task::JoinHandle<()>,
}

impl ConsumerHandle {
    /// Request shutdown and wait for the in-flight batch to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

pub struct StreamConsumer<T> {
    transport: T,
    registry: Arc<HandlerRegistry>,
    audit: Arc<dyn EventAudit>,
    limiter: Arc<Semaphore>,
    config: WorkerConfig,
    stream: StreamName,
}

impl<T: EventTransport + Clone + Send + Sync + 'static> StreamConsumer<T> {
    pub fn new(
        transport: T,
        registry: Arc<HandlerRegistry>,
        audit: Arc<dyn EventAudit>,
        config: WorkerConfig,
        stream: StreamName,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            transport,
            registry,
            audit,
            limiter,
            config,
            stream,
        }
    }

    /// Spawn the consumer loop on the current runtime.
    pub fn spawn(self) -> ConsumerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move { self.run(shutdown_rx).await });
        ConsumerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            stream = %self.stream,
            group = %self.config.consumer_group,
            consumer = %self.config.consumer_name,
            "consumer starting"
        );

        if let Err(e) = self
            .transport
            .ensure_group(self.stream, &self.config.consumer_group)
            .await
        {
            error!(stream = %self.stream, error = %e, "failed to create consumer group");
            return;
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            let batch = tokio::select! {
                _ = shutdown.changed() => continue,
                batch = self.next_batch() => batch,
            };

            let batch = match batch {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(stream = %self.stream, error = %e, "transport read failed, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            // In stream order; a failed entry is skipped over and retried
            // on a later redelivery, never reordered ahead of its retry by
            // this pass.
            for entry in batch {
                if self.process_entry(&entry).await {
                    if let Err(e) = self
                        .transport
                        .ack(
                            self.stream,
                            &self.config.consumer_group,
                            std::slice::from_ref(&entry.id),
                        )
                        .await
                    {
                        // The work is done and idempotent; the redelivery
                        // this causes will no-op its way to a fresh ack.
                        warn!(delivery_id = %entry.id, error = %e, "ack failed");
                    }
                }
            }
        }

        info!(stream = %self.stream, consumer = %self.config.consumer_name, "consumer stopped");
    }

    /// Stale reclaims first, then a blocking read for new entries.
    async fn next_batch(&self) -> Result<Vec<StreamEntry>, covercrm_events::TransportError> {
        let claimed = self
            .transport
            .claim_stale(
                self.stream,
                &self.config.consumer_group,
                &self.config.consumer_name,
                self.config.visibility_timeout,
                self.config.read_batch_size,
            )
            .await?;
        if !claimed.is_empty() {
            info!(
                stream = %self.stream,
                count = claimed.len(),
                "reclaimed stale entries from the group"
            );
            return Ok(claimed);
        }

        self.transport
            .read_group(
                self.stream,
                &self.config.consumer_group,
                &self.config.consumer_name,
                self.config.read_batch_size,
                self.config.block_timeout,
            )
            .await
    }

    /// Process one entry; returns whether it should be acknowledged.
    #[instrument(skip(self, entry), fields(stream = %self.stream, delivery_id = %entry.id))]
    async fn process_entry(&self, entry: &StreamEntry) -> bool {
        let event = match wire::decode(&entry.payload) {
            Ok(event) => event,
            Err(WireError::Malformed(reason)) => {
                error!(reason = %reason, "malformed stream entry, acknowledging without retry");
                return true;
            }
            Err(WireError::UnknownEventType(kind)) => {
                warn!(event_type = %kind, "no variant for event type, acknowledging");
                return true;
            }
        };

        let handlers = self.registry.handlers_for(event.kind());
        if handlers.is_empty() {
            warn!(event_type = %event.kind(), "no handlers registered, acknowledging");
            return true;
        }

        if entry.delivery_count > 1 {
            info!(
                event_id = %event.event_id(),
                delivery_count = entry.delivery_count,
                "redelivered entry"
            );
        }

        let mut tasks = JoinSet::new();
        for handler in handlers {
            let handler = Arc::clone(handler);
            let event = event.clone();
            let limiter = Arc::clone(&self.limiter);
            let budget = self.config.handler_timeout;
            tasks.spawn(async move {
                let name = handler.name();
                // The semaphore is never closed while the consumer runs.
                let _permit = match limiter.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return (name, Err("concurrency limiter closed".to_string())),
                };
                match tokio::time::timeout(budget, handler.handle(&event)).await {
                    Ok(Ok(())) => (name, Ok(())),
                    Ok(Err(e)) => (name, Err(e.to_string())),
                    Err(_) => (name, Err(format!("timed out after {budget:?}"))),
                }
            });
        }

        let mut all_ok = true;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((name, Err(reason))) => {
                    all_ok = false;
                    warn!(
                        event_id = %event.event_id(),
                        handler = name,
                        reason = %reason,
                        "handler failed, entry will be redelivered"
                    );
                }
                Err(e) => {
                    all_ok = false;
                    error!(event_id = %event.event_id(), error = %e, "handler task panicked");
                }
            }
        }

        if all_ok {
            if let Err(e) = self.audit.mark_processed(event.event_id()).await {
                // Advisory marker only; never worth re-running handlers.
                warn!(event_id = %event.event_id(), error = %e, "audit processing marker failed");
            }
        }
        all_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventAudit;
    use crate::transport::InMemoryTransport;
    use async_trait::async_trait;
    use covercrm_core::{ProspectId, QuoteId};
    use covercrm_events::{
        Event, EventHandler, EventKind, EventPayload, HandlerError, QuoteAcceptedPayload,
    };
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct CountingHandler {
        calls: AtomicU32,
        fail_first: AtomicBool,
    }

    impl CountingHandler {
        fn new(fail_first: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail_first: AtomicBool::new(fail_first),
            })
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn handle(&self, _event: &Event) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first.swap(false, Ordering::SeqCst) {
                return Err(HandlerError::SideEffect("transient".into()));
            }
            Ok(())
        }
    }

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            block_timeout: Duration::from_millis(10),
            visibility_timeout: Duration::from_millis(0),
            handler_timeout: Duration::from_secs(5),
            ..WorkerConfig::default()
        }
    }

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

    fn consumer_for(
        transport: Arc<InMemoryTransport>,
        registry: HandlerRegistry,
        audit: Arc<InMemoryEventAudit>,
    ) -> StreamConsumer<Arc<InMemoryTransport>> {
        StreamConsumer::new(
            transport,
            Arc::new(registry),
            audit,
            test_config(),
            StreamName::Quote,
        )
    }

    #[tokio::test]
    async fn successful_entries_are_acked_and_marked_processed() {
        let transport = InMemoryTransport::new(100);
        let audit = Arc::new(InMemoryEventAudit::new());
        let handler = CountingHandler::new(false);
        let mut registry = HandlerRegistry::new();
        registry.register(EventKind::QuoteAccepted, handler.clone());

        let event = quote_accepted();
        audit.record(&event).await.unwrap();
        transport
            .append(StreamName::Quote, &wire::encode(&event).unwrap())
            .await
            .unwrap();

        let consumer = consumer_for(transport.clone(), registry, audit.clone());
        let handle = consumer.spawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.pending_len(StreamName::Quote, "crm-workers"), 0);
        let record = audit.find(event.event_id()).await.unwrap().unwrap();
        assert!(record.is_processed);
    }

    #[tokio::test]
    async fn failed_entries_are_redelivered_until_they_succeed() {
        let transport = InMemoryTransport::new(100);
        let audit = Arc::new(InMemoryEventAudit::new());
        let handler = CountingHandler::new(true);
        let mut registry = HandlerRegistry::new();
        registry.register(EventKind::QuoteAccepted, handler.clone());

        transport
            .append(StreamName::Quote, &wire::encode(&quote_accepted()).unwrap())
            .await
            .unwrap();

        let consumer = consumer_for(transport.clone(), registry, audit);
        let handle = consumer.spawn();
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.shutdown().await;

        // First delivery fails, reclaim redelivers, second succeeds.
        assert!(handler.calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(transport.pending_len(StreamName::Quote, "crm-workers"), 0);
    }

    #[tokio::test]
    async fn one_failing_handler_does_not_stop_the_others_or_ack_the_entry() {
        let transport = InMemoryTransport::new(100);
        let audit = Arc::new(InMemoryEventAudit::new());
        let failing = CountingHandler::new(true);
        let succeeding = CountingHandler::new(false);
        let mut registry = HandlerRegistry::new();
        registry
            .register(EventKind::QuoteAccepted, failing.clone())
            .register(EventKind::QuoteAccepted, succeeding.clone());

        transport
            .append(StreamName::Quote, &wire::encode(&quote_accepted()).unwrap())
            .await
            .unwrap();

        // Visibility timeout far beyond the test window: the failed entry
        // must stay pending, not get reclaimed and retried.
        let config = WorkerConfig {
            visibility_timeout: Duration::from_secs(60),
            ..test_config()
        };
        let consumer = StreamConsumer::new(
            transport.clone(),
            Arc::new(registry),
            audit,
            config,
            StreamName::Quote,
        );
        let handle = consumer.spawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;

        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(succeeding.calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.pending_len(StreamName::Quote, "crm-workers"), 1);
    }

    #[tokio::test]
    async fn malformed_and_unknown_entries_are_acked_without_handlers() {
        let transport = InMemoryTransport::new(100);
        let audit = Arc::new(InMemoryEventAudit::new());
        let handler = CountingHandler::new(false);
        let mut registry = HandlerRegistry::new();
        registry.register(EventKind::QuoteAccepted, handler.clone());

        transport
            .append(StreamName::Quote, "not json at all")
            .await
            .unwrap();
        transport
            .append(
                StreamName::Quote,
                r#"{"event_id":"0190b5a1-0000-7000-8000-000000000000","event_type":"QuoteRejected","payload":{},"aggregate_type":"quote","aggregate_id":"1","metadata":{"user_id":null,"occurred_at":"2026-01-01T00:00:00Z"}}"#,
            )
            .await
            .unwrap();

        let consumer = consumer_for(transport.clone(), registry, audit);
        let handle = consumer.spawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(transport.pending_len(StreamName::Quote, "crm-workers"), 0);
    }
}
