//! Event handlers: the side-effect chain.
//!
//! `QuoteAccepted` → policy creation → `PolicyCreated` → contract
//! generation + commission calculation + notification, each independently
//! idempotent and independently retryable. A handler failure never blocks
//! the other handlers bound to the same event.

mod commission;
mod policy;
mod prospect;

pub use commission::CommissionCalculationHandler;
pub use policy::{ContractGenerationHandler, PolicyCreationHandler, PolicyNotificationHandler};
pub use prospect::{BrokerAssignmentHandler, WelcomeEmailHandler};

/// Format integer cents for human-facing text, e.g. `1200.00`.
pub(crate) fn fmt_amount(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, (cents % 100).abs())
}
