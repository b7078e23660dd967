//! Event handler contract.

use async_trait::async_trait;
use thiserror::Error;

use crate::event::Event;
use crate::publisher::PublishError;

/// Error raised by a handler's effectful portion.
///
/// Handlers must propagate failures rather than swallow them so the
/// dispatcher can leave the entry unacknowledged for redelivery.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("store error: {0}")]
    Store(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("side effect failed: {0}")]
    SideEffect(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<PublishError> for HandlerError {
    fn from(e: PublishError) -> Self {
        Self::Publish(e.to_string())
    }
}

/// An idempotent, side-effect-producing unit of work bound to one event type.
///
/// Contract:
/// - **Idempotent**: the first action is an existence check against the
///   business store; if the effect is already applied the handler is a no-op.
///   The same stream entry can be delivered more than once.
/// - **All-or-nothing**: the effect either fully commits or not at all
///   (e.g. all commission rows of a policy in one transaction).
/// - **Isolated**: a failure here must not stop other handlers bound to the
///   same event; the dispatcher runs each independently.
/// - Handlers may publish further events after completing their effect,
///   forming chains.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable name for logs and delivery diagnostics.
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}
