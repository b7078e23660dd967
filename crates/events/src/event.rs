//! The domain event model.
//!
//! Events are **immutable facts** named in the past tense. Construction is
//! the only way to obtain a valid event; there are no setters. Constructors
//! never perform I/O and never fail (the closed payload structs make missing
//! required fields unrepresentable).

use chrono::{DateTime, NaiveDate, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use covercrm_core::{DomainError, EventId, PolicyId, ProspectId, QuoteId, UserId};

use crate::stream::StreamName;

/// Closed tag identifying the kind of fact. Determines routing and handler
/// binding; adding a variant forces every `match` in the backbone to be
/// revisited.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    ProspectCreated,
    QuoteAccepted,
    PolicyCreated,
    PolicyCancelled,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProspectCreated => "ProspectCreated",
            Self::QuoteAccepted => "QuoteAccepted",
            Self::PolicyCreated => "PolicyCreated",
            Self::PolicyCancelled => "PolicyCancelled",
        }
    }

    /// Destination stream for this kind.
    ///
    /// Explicit, closed mapping, never derived from substrings of the type
    /// name, so future kinds with colliding names cannot be misrouted.
    pub fn stream(&self) -> StreamName {
        match self {
            Self::ProspectCreated => StreamName::Prospect,
            Self::QuoteAccepted => StreamName::Quote,
            Self::PolicyCreated => StreamName::Policy,
            Self::PolicyCancelled => StreamName::Policy,
        }
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ProspectCreated" => Ok(Self::ProspectCreated),
            "QuoteAccepted" => Ok(Self::QuoteAccepted),
            "PolicyCreated" => Ok(Self::PolicyCreated),
            "PolicyCancelled" => Ok(Self::PolicyCancelled),
            other => Err(DomainError::validation(format!("unknown event type: {other}"))),
        }
    }
}

/// Business entity class an event is about (audit grouping, never routing).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateType {
    Prospect,
    Quote,
    Policy,
}

impl AggregateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prospect => "prospect",
            Self::Quote => "quote",
            Self::Policy => "policy",
        }
    }
}

impl core::fmt::Display for AggregateType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload: a new prospect entered the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProspectCreatedPayload {
    pub prospect_id: ProspectId,
    /// individual, family or business.
    pub prospect_type: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub created_by: Option<UserId>,
}

/// Payload: a customer accepted a quote. Trigger of the policy chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteAcceptedPayload {
    pub quote_id: QuoteId,
    pub prospect_id: ProspectId,
    pub provider: String,
    pub insurance_type: String,
    /// Annual premium in smallest currency unit (cents).
    pub annual_premium: i64,
    pub accepted_by: Option<UserId>,
}

/// Payload: a policy row exists. Fans out to contract generation,
/// commission calculation and notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyCreatedPayload {
    pub policy_id: PolicyId,
    pub policy_number: String,
    pub quote_id: QuoteId,
    pub prospect_id: ProspectId,
    pub provider: String,
    pub insurance_type: String,
    /// Annual premium in smallest currency unit (cents).
    pub annual_premium: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub created_by: Option<UserId>,
}

/// Payload: a policy was cancelled by the customer or the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyCancelledPayload {
    pub policy_id: PolicyId,
    pub policy_number: String,
    pub prospect_id: ProspectId,
    pub cancellation_reason: String,
    pub cancelled_by: Option<UserId>,
}

/// Closed event payload taxonomy.
///
/// The wire format is a generic JSON map, but at the type level every event
/// kind has a fixed payload shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload")]
pub enum EventPayload {
    ProspectCreated(ProspectCreatedPayload),
    QuoteAccepted(QuoteAcceptedPayload),
    PolicyCreated(PolicyCreatedPayload),
    PolicyCancelled(PolicyCancelledPayload),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ProspectCreated(_) => EventKind::ProspectCreated,
            Self::QuoteAccepted(_) => EventKind::QuoteAccepted,
            Self::PolicyCreated(_) => EventKind::PolicyCreated,
            Self::PolicyCancelled(_) => EventKind::PolicyCancelled,
        }
    }

    /// The aggregate this payload is about (entity class + identifier).
    pub fn aggregate(&self) -> (AggregateType, String) {
        match self {
            Self::ProspectCreated(p) => (AggregateType::Prospect, p.prospect_id.to_string()),
            Self::QuoteAccepted(p) => (AggregateType::Quote, p.quote_id.to_string()),
            Self::PolicyCreated(p) => (AggregateType::Policy, p.policy_id.to_string()),
            Self::PolicyCancelled(p) => (AggregateType::Policy, p.policy_id.to_string()),
        }
    }

    /// The actor recorded inside the payload, if any.
    fn actor(&self) -> Option<UserId> {
        match self {
            Self::ProspectCreated(p) => p.created_by,
            Self::QuoteAccepted(p) => p.accepted_by,
            Self::PolicyCreated(p) => p.created_by,
            Self::PolicyCancelled(p) => p.cancelled_by,
        }
    }
}

/// Who/when for the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    user_id: Option<UserId>,
    occurred_at: DateTime<Utc>,
}

impl EventMetadata {
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

/// An immutable, typed fact about something that happened.
///
/// Fields are private; once constructed nothing can be mutated. Equality,
/// hashing and identity are defined by `event_id` alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    event_id: EventId,
    #[serde(flatten)]
    payload: EventPayload,
    aggregate_type: AggregateType,
    aggregate_id: String,
    metadata: EventMetadata,
}

impl Event {
    /// Construct a new event.
    ///
    /// The actor is taken from the payload (e.g. `accepted_by`); the
    /// creation timestamp is business time at construction. No I/O.
    pub fn new(payload: EventPayload) -> Self {
        let (aggregate_type, aggregate_id) = payload.aggregate();
        let user_id = payload.actor();
        Self {
            event_id: EventId::new(),
            payload,
            aggregate_type,
            aggregate_id,
            metadata: EventMetadata {
                user_id,
                occurred_at: Utc::now(),
            },
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn aggregate_type(&self) -> AggregateType {
        self.aggregate_type
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    /// Destination stream via the closed kind → stream mapping.
    pub fn stream(&self) -> StreamName {
        self.kind().stream()
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.event_id == other.event_id
    }
}

impl Eq for Event {}

impl core::hash::Hash for Event {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.event_id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote_accepted() -> Event {
        Event::new(EventPayload::QuoteAccepted(QuoteAcceptedPayload {
            quote_id: QuoteId::new(7),
            prospect_id: ProspectId::new(3),
            provider: "X".into(),
            insurance_type: "health".into(),
            annual_premium: 120_000,
            accepted_by: Some(UserId::new(1)),
        }))
    }

    #[test]
    fn identity_is_the_event_id() {
        let a = quote_accepted();
        let b = quote_accepted();
        assert_ne!(a, b, "distinct constructions are distinct facts");
        assert_eq!(a, a.clone());
    }

    #[test]
    fn aggregate_reference_is_derived_from_the_payload() {
        let e = quote_accepted();
        assert_eq!(e.aggregate_type(), AggregateType::Quote);
        assert_eq!(e.aggregate_id(), "7");
        assert_eq!(e.metadata().user_id(), Some(UserId::new(1)));
    }

    #[test]
    fn every_kind_has_a_fixed_stream() {
        assert_eq!(EventKind::ProspectCreated.stream(), StreamName::Prospect);
        assert_eq!(EventKind::QuoteAccepted.stream(), StreamName::Quote);
        assert_eq!(EventKind::PolicyCreated.stream(), StreamName::Policy);
        assert_eq!(EventKind::PolicyCancelled.stream(), StreamName::Policy);
    }

    #[test]
    fn kind_parses_from_its_display_form() {
        for kind in [
            EventKind::ProspectCreated,
            EventKind::QuoteAccepted,
            EventKind::PolicyCreated,
            EventKind::PolicyCancelled,
        ] {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("QuoteRejected".parse::<EventKind>().is_err());
    }
}
