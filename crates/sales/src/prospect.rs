use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use covercrm_core::{ProspectId, UserId};

/// A potential customer in the sales pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prospect {
    pub id: ProspectId,
    /// individual, family or business.
    pub prospect_type: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub assigned_broker_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Prospect {
    /// Display name for notifications.
    pub fn full_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            _ => "Prospect".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prospect(first: Option<&str>, last: Option<&str>) -> Prospect {
        Prospect {
            id: ProspectId::new(1),
            prospect_type: "individual".into(),
            first_name: first.map(Into::into),
            last_name: last.map(Into::into),
            email: None,
            assigned_broker_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn full_name_degrades_gracefully() {
        assert_eq!(prospect(Some("Ada"), Some("Byron")).full_name(), "Ada Byron");
        assert_eq!(prospect(Some("Ada"), None).full_name(), "Ada");
        assert_eq!(prospect(None, None).full_name(), "Prospect");
    }
}
