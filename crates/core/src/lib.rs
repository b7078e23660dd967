//! Domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{CommissionId, EventId, PolicyId, ProspectId, QuoteId, UserId};
