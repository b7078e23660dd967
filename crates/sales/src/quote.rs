use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use covercrm_core::{ProspectId, QuoteId};

/// Quote lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteStatus {
    Draft,
    Sent,
    Accepted,
    Rejected,
    Expired,
}

/// An insurance quote for a prospect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub prospect_id: ProspectId,
    pub provider: String,
    pub insurance_type: String,
    /// Premiums in smallest currency unit (cents).
    pub monthly_premium: i64,
    pub annual_premium: i64,
    pub coverage_amount: i64,
    pub status: QuoteStatus,
    pub valid_until: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}
