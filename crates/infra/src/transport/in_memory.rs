//! In-memory transport with Redis Streams semantics.
//!
//! Same contract as [`super::RedisTransport`]: per-group cursor, pending
//! entries with idle-based reclaim, approximate oldest-first trimming and a
//! blocking read. Backs the integration tests and single-process dev runs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use covercrm_events::{DeliveryId, EventTransport, StreamEntry, StreamName, TransportError};

struct LogEntry {
    seq: u64,
    payload: String,
}

struct Pending {
    payload: String,
    claimed_at: Instant,
    delivery_count: u32,
}

#[derive(Default)]
struct GroupState {
    /// Next sequence number this group has not yet delivered.
    cursor: u64,
    pending: HashMap<u64, Pending>,
}

#[derive(Default)]
struct StreamState {
    next_seq: u64,
    log: VecDeque<LogEntry>,
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct Inner {
    streams: HashMap<StreamName, StreamState>,
}

pub struct InMemoryTransport {
    inner: Mutex<Inner>,
    notify: Notify,
    maxlen: usize,
    down: AtomicBool,
}

impl InMemoryTransport {
    pub fn new(maxlen: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            maxlen,
            down: AtomicBool::new(false),
        })
    }

    /// Simulate an unreachable broker: every operation fails fast.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn stream_len(&self, stream: StreamName) -> usize {
        self.inner
            .lock()
            .unwrap()
            .streams
            .get(&stream)
            .map_or(0, |s| s.log.len())
    }

    pub fn pending_len(&self, stream: StreamName, group: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .streams
            .get(&stream)
            .and_then(|s| s.groups.get(group))
            .map_or(0, |g| g.pending.len())
    }

    fn check_up(&self) -> Result<(), TransportError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(TransportError::Connection("broker unreachable".to_string()));
        }
        Ok(())
    }

    fn try_read(&self, stream: StreamName, group: &str, count: usize) -> Vec<StreamEntry> {
        let mut inner = self.inner.lock().unwrap();
        let Some(state) = inner.streams.get_mut(&stream) else {
            return Vec::new();
        };
        let Some(group_state) = state.groups.get_mut(group) else {
            return Vec::new();
        };

        let mut entries = Vec::new();
        for entry in state.log.iter() {
            if entries.len() >= count {
                break;
            }
            if entry.seq < group_state.cursor {
                continue;
            }
            group_state.cursor = entry.seq + 1;
            group_state.pending.insert(
                entry.seq,
                Pending {
                    payload: entry.payload.clone(),
                    claimed_at: Instant::now(),
                    delivery_count: 1,
                },
            );
            entries.push(StreamEntry {
                id: DeliveryId::new(format!("{}-0", entry.seq)),
                payload: entry.payload.clone(),
                delivery_count: 1,
            });
        }
        entries
    }
}

fn parse_seq(id: &DeliveryId) -> Option<u64> {
    id.as_str().split('-').next()?.parse().ok()
}

#[async_trait]
impl EventTransport for InMemoryTransport {
    async fn append(
        &self,
        stream: StreamName,
        payload: &str,
    ) -> Result<DeliveryId, TransportError> {
        self.check_up()?;
        let seq = {
            let mut inner = self.inner.lock().unwrap();
            let state = inner.streams.entry(stream).or_default();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.log.push_back(LogEntry {
                seq,
                payload: payload.to_string(),
            });
            while state.log.len() > self.maxlen {
                state.log.pop_front();
            }
            seq
        };
        self.notify.notify_waiters();
        Ok(DeliveryId::new(format!("{seq}-0")))
    }

    async fn ensure_group(&self, stream: StreamName, group: &str) -> Result<(), TransportError> {
        self.check_up()?;
        let mut inner = self.inner.lock().unwrap();
        let state = inner.streams.entry(stream).or_default();
        // Starting cursor 0: a new group sees the full retained backlog.
        state.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        stream: StreamName,
        group: &str,
        _consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, TransportError> {
        self.check_up()?;
        let deadline = tokio::time::Instant::now() + block;
        loop {
            let notified = self.notify.notified();
            let entries = self.try_read(stream, group, count);
            if !entries.is_empty() {
                return Ok(entries);
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
            }
        }
    }

    async fn claim_stale(
        &self,
        stream: StreamName,
        group: &str,
        _consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, TransportError> {
        self.check_up()?;
        let mut inner = self.inner.lock().unwrap();
        let Some(state) = inner.streams.get_mut(&stream) else {
            return Ok(Vec::new());
        };
        let Some(group_state) = state.groups.get_mut(group) else {
            return Ok(Vec::new());
        };

        let now = Instant::now();
        let mut stale: Vec<u64> = group_state
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.claimed_at) >= min_idle)
            .map(|(seq, _)| *seq)
            .collect();
        stale.sort_unstable();
        stale.truncate(count);

        let mut entries = Vec::new();
        for seq in stale {
            let pending = group_state.pending.get_mut(&seq).unwrap();
            pending.claimed_at = now;
            pending.delivery_count += 1;
            entries.push(StreamEntry {
                id: DeliveryId::new(format!("{seq}-0")),
                payload: pending.payload.clone(),
                delivery_count: pending.delivery_count,
            });
        }
        Ok(entries)
    }

    async fn ack(
        &self,
        stream: StreamName,
        group: &str,
        ids: &[DeliveryId],
    ) -> Result<(), TransportError> {
        self.check_up()?;
        let mut inner = self.inner.lock().unwrap();
        if let Some(state) = inner.streams.get_mut(&stream) {
            if let Some(group_state) = state.groups.get_mut(group) {
                for id in ids {
                    if let Some(seq) = parse_seq(id) {
                        group_state.pending.remove(&seq);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP: &str = "crm-workers";

    #[tokio::test]
    async fn entries_are_delivered_once_per_group_until_reclaimed() {
        let transport = InMemoryTransport::new(100);
        transport
            .ensure_group(StreamName::Quote, GROUP)
            .await
            .unwrap();
        transport.append(StreamName::Quote, "a").await.unwrap();
        transport.append(StreamName::Quote, "b").await.unwrap();

        let first = transport
            .read_group(StreamName::Quote, GROUP, "w1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].payload, "a");
        assert_eq!(first[1].payload, "b");

        // Already delivered; nothing new for the group.
        let again = transport
            .read_group(StreamName::Quote, GROUP, "w2", 10, Duration::ZERO)
            .await
            .unwrap();
        assert!(again.is_empty());

        // Unacked entries become claimable once idle.
        let claimed = transport
            .claim_stale(StreamName::Quote, GROUP, "w2", Duration::ZERO, 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].delivery_count, 2);

        transport
            .ack(
                StreamName::Quote,
                GROUP,
                &[claimed[0].id.clone(), claimed[1].id.clone()],
            )
            .await
            .unwrap();
        assert_eq!(transport.pending_len(StreamName::Quote, GROUP), 0);
    }

    #[tokio::test]
    async fn acked_entries_are_not_reclaimed() {
        let transport = InMemoryTransport::new(100);
        transport
            .ensure_group(StreamName::Quote, GROUP)
            .await
            .unwrap();
        transport.append(StreamName::Quote, "a").await.unwrap();

        let batch = transport
            .read_group(StreamName::Quote, GROUP, "w1", 10, Duration::ZERO)
            .await
            .unwrap();
        transport
            .ack(StreamName::Quote, GROUP, &[batch[0].id.clone()])
            .await
            .unwrap();

        let claimed = transport
            .claim_stale(StreamName::Quote, GROUP, "w2", Duration::ZERO, 10)
            .await
            .unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn recently_delivered_entries_are_not_stale() {
        let transport = InMemoryTransport::new(100);
        transport
            .ensure_group(StreamName::Quote, GROUP)
            .await
            .unwrap();
        transport.append(StreamName::Quote, "a").await.unwrap();
        transport
            .read_group(StreamName::Quote, GROUP, "w1", 10, Duration::ZERO)
            .await
            .unwrap();

        let claimed = transport
            .claim_stale(StreamName::Quote, GROUP, "w2", Duration::from_secs(60), 10)
            .await
            .unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn oldest_entries_are_trimmed_past_the_cap() {
        let transport = InMemoryTransport::new(3);
        for i in 0..5 {
            transport
                .append(StreamName::Quote, &format!("e{i}"))
                .await
                .unwrap();
        }
        assert_eq!(transport.stream_len(StreamName::Quote), 3);

        transport
            .ensure_group(StreamName::Quote, GROUP)
            .await
            .unwrap();
        let batch = transport
            .read_group(StreamName::Quote, GROUP, "w1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].payload, "e2");
    }

    #[tokio::test]
    async fn blocking_read_wakes_on_append() {
        let transport = InMemoryTransport::new(100);
        transport
            .ensure_group(StreamName::Quote, GROUP)
            .await
            .unwrap();

        let reader = {
            let transport = transport.clone();
            tokio::spawn(async move {
                transport
                    .read_group(StreamName::Quote, GROUP, "w1", 10, Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };
        tokio::task::yield_now().await;
        transport.append(StreamName::Quote, "a").await.unwrap();

        let batch = reader.await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, "a");
    }

    #[tokio::test]
    async fn unreachable_broker_fails_fast() {
        let transport = InMemoryTransport::new(100);
        transport.set_down(true);
        let err = transport.append(StreamName::Quote, "a").await.unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }
}
