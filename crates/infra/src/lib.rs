//! Infrastructure adapters: the concrete edges of the event backbone.
//!
//! Everything here implements a trait defined in `covercrm-events` or
//! `covercrm-sales`: the Redis Streams transport, the Postgres audit store
//! and entity stores, the filesystem contract renderer, and the consumer
//! loop that drives handlers. Domain crates never import this one.

pub mod collab;
pub mod config;
pub mod consumer;
pub mod event_store;
pub mod publisher;
pub mod stores;
pub mod transport;


pub use collab::{FilesystemContractRenderer, LogMailer};
pub use config::WorkerConfig;
pub use consumer::{ConsumerHandle, StreamConsumer};
pub use event_store::{AuditError, AuditRecord, EventAudit, InMemoryEventAudit, PostgresEventAudit};
pub use publisher::Publisher;
pub use stores::{PgCommissionStore, PgDirectory, PgPolicyStore, PgQuoteStore};
pub use transport::{InMemoryTransport, RedisTransport};
