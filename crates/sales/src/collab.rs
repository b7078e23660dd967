//! External-I/O collaborators: document rendering and mail delivery.
//!
//! Both are opaque seams; the backbone only cares that the calls are
//! effectful and can fail. Implementations live in infra (filesystem
//! renderer, log mailer) and in [`crate::memory`] for tests.

use async_trait::async_trait;
use thiserror::Error;

use crate::policy::Policy;

#[derive(Debug, Error)]
#[error("contract rendering failed: {0}")]
pub struct RenderError(pub String);

#[derive(Debug, Error)]
#[error("mail delivery failed: {0}")]
pub struct MailError(pub String);

impl From<RenderError> for covercrm_events::HandlerError {
    fn from(e: RenderError) -> Self {
        Self::SideEffect(e.to_string())
    }
}

impl From<MailError> for covercrm_events::HandlerError {
    fn from(e: MailError) -> Self {
        Self::SideEffect(e.to_string())
    }
}

/// Renders the contract document for a policy and stores it, returning the
/// storage path.
#[async_trait]
pub trait ContractRenderer: Send + Sync {
    async fn render_contract(&self, policy: &Policy) -> Result<String, RenderError>;
}

/// Outbound mail delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}
