//! Stream naming.
//!
//! One append-only stream per business entity class, named `events:{entity}`.
//! The set is closed; `General` exists for kinds that belong to no entity
//! stream (none today, kept for wire compatibility with the broker layout).

use serde::{Deserialize, Serialize};

/// Named append-only stream on the broker.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Prospect,
    Quote,
    Policy,
    Commission,
    General,
}

impl StreamName {
    /// Broker key for this stream.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Prospect => "events:prospect",
            Self::Quote => "events:quote",
            Self::Policy => "events:policy",
            Self::Commission => "events:commission",
            Self::General => "events:general",
        }
    }

    /// Streams a worker deployment consumes.
    pub const CONSUMED: [StreamName; 3] = [Self::Prospect, Self::Quote, Self::Policy];
}

impl core::fmt::Display for StreamName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_the_entity_naming_scheme() {
        assert_eq!(StreamName::Prospect.key(), "events:prospect");
        assert_eq!(StreamName::Quote.key(), "events:quote");
        assert_eq!(StreamName::Policy.key(), "events:policy");
        assert_eq!(StreamName::Commission.key(), "events:commission");
        assert_eq!(StreamName::General.key(), "events:general");
    }
}
