//! Sales domain: prospects, quotes, policies, commissions, and the event
//! handlers that drive the policy side-effect chain.
//!
//! The relational store is an external collaborator reached through the
//! traits in [`store`]; handlers perform a read-before-write idempotency
//! check against it, which is what turns the transport's at-least-once
//! delivery into effectively-once side effects.

pub mod collab;
pub mod commission;
pub mod handlers;
pub mod memory;
pub mod policy;
pub mod prospect;
pub mod quote;
pub mod store;
pub mod user;

pub use collab::{ContractRenderer, MailError, Mailer, RenderError};
pub use commission::{
    calculate_commissions, Commission, CommissionRole, CommissionStatus, CommissionTier,
    NewCommission, TierRates,
};
pub use policy::{NewPolicy, Policy, PolicyStatus};
pub use prospect::Prospect;
pub use quote::{Quote, QuoteStatus};
pub use store::{
    create_policy_for_quote, CommissionStore, PolicyOutcome, PolicyStore, ProspectStore,
    QuoteStore, StoreError, UserStore,
};
pub use user::User;
