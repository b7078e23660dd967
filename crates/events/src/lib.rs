//! Domain events and delivery mechanics (no I/O).
//!
//! This crate defines:
//! - the closed event taxonomy ([`EventKind`], [`EventPayload`], [`Event`])
//! - the wire format events travel in ([`wire`])
//! - the closed event-type → stream routing ([`StreamName`])
//! - the seams the infrastructure plugs into ([`EventHandler`],
//!   [`EventPublisher`], [`EventTransport`])
//!
//! Implementations that touch Redis or Postgres live in `covercrm-infra`.

pub mod event;
pub mod handler;
pub mod publisher;
pub mod registry;
pub mod stream;
pub mod transport;
pub mod wire;

pub use event::{
    AggregateType, Event, EventKind, EventMetadata, EventPayload, PolicyCancelledPayload,
    PolicyCreatedPayload, ProspectCreatedPayload, QuoteAcceptedPayload,
};
pub use handler::{EventHandler, HandlerError};
pub use publisher::{EventPublisher, PublishError};
pub use registry::HandlerRegistry;
pub use stream::StreamName;
pub use transport::{DeliveryId, EventTransport, StreamEntry, TransportError};
pub use wire::WireError;
