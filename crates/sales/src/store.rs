//! Store traits: the seam between handlers and the shared relational store.
//!
//! The backbone's only mutation discipline is the read-before-write
//! idempotency check; races the check misses are caught by the store's own
//! uniqueness constraints, surfaced as [`StoreError::Duplicate`], which
//! handlers treat as success-equivalent.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use tracing::info;

use covercrm_core::{PolicyId, ProspectId, QuoteId, UserId};

use crate::commission::{Commission, NewCommission};
use crate::policy::{NewPolicy, Policy};
use crate::prospect::Prospect;
use crate::quote::Quote;
use crate::user::User;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write (e.g. second policy for a
    /// quote). The effect already exists; callers treat this as success.
    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for covercrm_events::HandlerError {
    fn from(e: StoreError) -> Self {
        Self::Store(e.to_string())
    }
}

#[async_trait]
pub trait ProspectStore: Send + Sync {
    async fn find(&self, id: ProspectId) -> Result<Option<Prospect>, StoreError>;

    /// The broker assigned to a prospect, if any.
    async fn assigned_broker(&self, id: ProspectId) -> Result<Option<User>, StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find(&self, id: UserId) -> Result<Option<User>, StoreError>;
}

#[async_trait]
pub trait QuoteStore: Send + Sync {
    async fn find(&self, id: QuoteId) -> Result<Option<Quote>, StoreError>;
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn find(&self, id: PolicyId) -> Result<Option<Policy>, StoreError>;

    /// Idempotency probe: does a policy already exist for this quote?
    async fn find_by_quote(&self, quote_id: QuoteId) -> Result<Option<Policy>, StoreError>;

    /// Insert a policy. A unique key on `quote_id` rejects a second insert
    /// with [`StoreError::Duplicate`].
    async fn insert(&self, policy: NewPolicy) -> Result<Policy, StoreError>;

    /// Record the rendered contract document path.
    async fn set_contract_path(&self, id: PolicyId, path: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CommissionStore: Send + Sync {
    /// Idempotency probe: does any commission reference this policy?
    async fn exists_for_policy(&self, policy_id: PolicyId) -> Result<bool, StoreError>;

    /// Insert the full commission set of a policy in one atomic unit:
    /// either every row commits or none does.
    async fn insert_all(
        &self,
        commissions: Vec<NewCommission>,
    ) -> Result<Vec<Commission>, StoreError>;
}

/// Outcome of [`create_policy_for_quote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyOutcome {
    /// A fresh policy row was inserted by this call.
    Created(Policy),
    /// The policy already existed (idempotent replay, or the uniqueness
    /// backstop caught a concurrent creation).
    AlreadyExists(Policy),
}

impl PolicyOutcome {
    pub fn policy(&self) -> &Policy {
        match self {
            Self::Created(p) | Self::AlreadyExists(p) => p,
        }
    }
}

/// The single idempotent policy-creation path.
///
/// Every code path that turns an accepted quote into a policy goes through
/// here, so the "at most one policy per quote" invariant lives in exactly
/// one place. Safe under concurrent redelivery: the existence check handles
/// replays, and a `Duplicate` from the store's unique `quote_id` key handles
/// the race two concurrent deliveries can still produce.
pub async fn create_policy_for_quote(
    policies: &dyn PolicyStore,
    quotes: &dyn QuoteStore,
    quote_id: QuoteId,
    today: NaiveDate,
) -> Result<PolicyOutcome, StoreError> {
    if let Some(existing) = policies.find_by_quote(quote_id).await? {
        info!(
            quote_id = %quote_id,
            policy_number = %existing.policy_number,
            "policy already exists for quote, skipping creation"
        );
        return Ok(PolicyOutcome::AlreadyExists(existing));
    }

    let quote = quotes
        .find(quote_id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("quote {quote_id}")))?;

    match policies.insert(NewPolicy::for_quote(quote.id, today)).await {
        Ok(policy) => Ok(PolicyOutcome::Created(policy)),
        Err(StoreError::Duplicate(_)) => {
            // Lost the race to a concurrent delivery; the winner's row is
            // the effect we wanted.
            let existing = policies.find_by_quote(quote_id).await?.ok_or_else(|| {
                StoreError::Backend(format!(
                    "duplicate policy for quote {quote_id} but no row found"
                ))
            })?;
            Ok(PolicyOutcome::AlreadyExists(existing))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryPolicyStore, InMemoryQuoteStore};
    use crate::quote::QuoteStatus;
    use chrono::Utc;

    fn seed_quote(quotes: &InMemoryQuoteStore, id: i64) -> QuoteId {
        let quote_id = QuoteId::new(id);
        quotes.put(Quote {
            id: quote_id,
            prospect_id: ProspectId::new(3),
            provider: "X".into(),
            insurance_type: "health".into(),
            monthly_premium: 10_000,
            annual_premium: 120_000,
            coverage_amount: 50_000_000,
            status: QuoteStatus::Accepted,
            valid_until: None,
            created_at: Utc::now(),
        });
        quote_id
    }

    fn today() -> NaiveDate {
        "2026-08-25".parse().unwrap()
    }

    #[tokio::test]
    async fn creates_exactly_one_policy_per_quote() {
        let policies = InMemoryPolicyStore::new();
        let quotes = InMemoryQuoteStore::new();
        let quote_id = seed_quote(&quotes, 7);

        let first = create_policy_for_quote(&policies, &quotes, quote_id, today())
            .await
            .unwrap();
        let PolicyOutcome::Created(policy) = first else {
            panic!("expected fresh creation");
        };

        let second = create_policy_for_quote(&policies, &quotes, quote_id, today())
            .await
            .unwrap();
        assert_eq!(second, PolicyOutcome::AlreadyExists(policy));
        assert_eq!(policies.count(), 1);
    }

    #[tokio::test]
    async fn unknown_quote_is_an_error() {
        let policies = InMemoryPolicyStore::new();
        let quotes = InMemoryQuoteStore::new();
        let err = create_policy_for_quote(&policies, &quotes, QuoteId::new(404), today())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_from_a_concurrent_writer_is_success_equivalent() {
        let policies = InMemoryPolicyStore::new();
        let quotes = InMemoryQuoteStore::new();
        let quote_id = seed_quote(&quotes, 7);

        // A concurrent group member inserts between our existence check and
        // our insert; the unique quote_id key turns our insert into a
        // Duplicate.
        policies.stage_race(NewPolicy::for_quote(quote_id, today()));

        let outcome = create_policy_for_quote(&policies, &quotes, quote_id, today())
            .await
            .unwrap();
        assert!(matches!(outcome, PolicyOutcome::AlreadyExists(_)));
        assert_eq!(policies.count(), 1);
    }
}
