use serde::{Deserialize, Serialize};

use covercrm_core::UserId;

/// A CRM user: broker, manager or affiliate.
///
/// Reporting lines are modeled by `supervisor_id`; a broker's supervisor is
/// the manager entitled to the override commission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub full_name: String,
    pub supervisor_id: Option<UserId>,
}
