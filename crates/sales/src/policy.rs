use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use covercrm_core::{PolicyId, QuoteId};

/// Policy lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyStatus {
    Active,
    Cancelled,
    Expired,
}

/// A signed insurance policy, created from an accepted quote.
///
/// `quote_id` carries a unique key in the store: at most one policy per
/// quote, the backstop for idempotency-guard races.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub quote_id: QuoteId,
    pub policy_number: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Renewal reminder date, 30 days before expiry.
    pub renewal_date: NaiveDate,
    pub status: PolicyStatus,
    /// Set once the contract document has been rendered; doubles as the
    /// idempotency marker for contract generation.
    pub contract_path: Option<String>,
    pub signed_at: DateTime<Utc>,
}

/// A policy ready to be inserted (no surrogate key yet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPolicy {
    pub quote_id: QuoteId,
    pub policy_number: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub renewal_date: NaiveDate,
}

impl NewPolicy {
    /// One-year term starting today, renewal reminder 30 days before expiry.
    pub fn for_quote(quote_id: QuoteId, today: NaiveDate) -> Self {
        Self {
            quote_id,
            policy_number: generate_policy_number(today),
            start_date: today,
            end_date: today + Days::new(365),
            renewal_date: today + Days::new(335),
        }
    }
}

/// Generate a unique policy number, e.g. `POL-2026-018F3A2C`.
pub fn generate_policy_number(today: NaiveDate) -> String {
    use chrono::Datelike;
    let suffix = Uuid::now_v7().simple().to_string()[24..32].to_uppercase();
    format!("POL-{}-{}", today.year(), suffix)
}
