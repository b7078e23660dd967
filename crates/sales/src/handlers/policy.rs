//! Policy chain handlers.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use covercrm_events::{
    Event, EventHandler, EventPayload, EventPublisher, HandlerError, PolicyCreatedPayload,
};

use crate::collab::{ContractRenderer, Mailer};
use crate::handlers::fmt_amount;
use crate::store::{
    create_policy_for_quote, PolicyOutcome, PolicyStore, ProspectStore, QuoteStore,
};

/// `QuoteAccepted` → create the policy row → publish `PolicyCreated`.
///
/// Delegates to [`create_policy_for_quote`], the single idempotent creation
/// path; on replay (or when the synchronous request path already created
/// the row) this is a no-op and the chain event is not re-published.
pub struct PolicyCreationHandler {
    policies: Arc<dyn PolicyStore>,
    quotes: Arc<dyn QuoteStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl PolicyCreationHandler {
    pub fn new(
        policies: Arc<dyn PolicyStore>,
        quotes: Arc<dyn QuoteStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            policies,
            quotes,
            publisher,
        }
    }
}

#[async_trait]
impl EventHandler for PolicyCreationHandler {
    fn name(&self) -> &'static str {
        "policy-creation"
    }

    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let EventPayload::QuoteAccepted(accepted) = event.payload() else {
            return Err(HandlerError::Other(anyhow!(
                "policy-creation bound to unexpected event type {}",
                event.kind()
            )));
        };

        let outcome = create_policy_for_quote(
            self.policies.as_ref(),
            self.quotes.as_ref(),
            accepted.quote_id,
            Utc::now().date_naive(),
        )
        .await?;

        let policy = match outcome {
            PolicyOutcome::Created(policy) => policy,
            PolicyOutcome::AlreadyExists(_) => return Ok(()),
        };

        info!(
            event_id = %event.event_id(),
            quote_id = %accepted.quote_id,
            policy_number = %policy.policy_number,
            "policy created from accepted quote"
        );

        let chained = Event::new(EventPayload::PolicyCreated(PolicyCreatedPayload {
            policy_id: policy.id,
            policy_number: policy.policy_number.clone(),
            quote_id: accepted.quote_id,
            prospect_id: accepted.prospect_id,
            provider: accepted.provider.clone(),
            insurance_type: accepted.insurance_type.clone(),
            annual_premium: accepted.annual_premium,
            start_date: policy.start_date,
            end_date: policy.end_date,
            created_by: accepted.accepted_by,
        }));
        self.publisher.publish(&chained).await?;

        Ok(())
    }
}

/// `PolicyCreated` → render the contract document once.
///
/// `contract_path` on the policy row is the idempotency marker: set means
/// the document exists and the handler is a no-op.
pub struct ContractGenerationHandler {
    policies: Arc<dyn PolicyStore>,
    renderer: Arc<dyn ContractRenderer>,
}

impl ContractGenerationHandler {
    pub fn new(policies: Arc<dyn PolicyStore>, renderer: Arc<dyn ContractRenderer>) -> Self {
        Self { policies, renderer }
    }
}

#[async_trait]
impl EventHandler for ContractGenerationHandler {
    fn name(&self) -> &'static str {
        "contract-generation"
    }

    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let EventPayload::PolicyCreated(created) = event.payload() else {
            return Err(HandlerError::Other(anyhow!(
                "contract-generation bound to unexpected event type {}",
                event.kind()
            )));
        };

        // Re-query rather than trust the payload: the policy row may not be
        // visible yet if this delivery raced its trigger. Failing here
        // leaves the entry unacknowledged for a later retry.
        let policy = self
            .policies
            .find(created.policy_id)
            .await?
            .ok_or_else(|| {
                HandlerError::Store(format!("policy {} not yet visible", created.policy_id))
            })?;

        if let Some(path) = &policy.contract_path {
            info!(
                policy_number = %policy.policy_number,
                path = %path,
                "contract already rendered, skipping"
            );
            return Ok(());
        }

        let path = self.renderer.render_contract(&policy).await?;
        self.policies.set_contract_path(policy.id, &path).await?;

        info!(
            event_id = %event.event_id(),
            policy_number = %policy.policy_number,
            path = %path,
            "contract rendered"
        );
        Ok(())
    }
}

/// `PolicyCreated` → confirmation mail to the prospect.
///
/// Mail delivery carries no durable marker; a redelivered entry can send a
/// duplicate confirmation, which the design accepts.
pub struct PolicyNotificationHandler {
    prospects: Arc<dyn ProspectStore>,
    mailer: Arc<dyn Mailer>,
}

impl PolicyNotificationHandler {
    pub fn new(prospects: Arc<dyn ProspectStore>, mailer: Arc<dyn Mailer>) -> Self {
        Self { prospects, mailer }
    }
}

#[async_trait]
impl EventHandler for PolicyNotificationHandler {
    fn name(&self) -> &'static str {
        "policy-notification"
    }

    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let EventPayload::PolicyCreated(created) = event.payload() else {
            return Err(HandlerError::Other(anyhow!(
                "policy-notification bound to unexpected event type {}",
                event.kind()
            )));
        };

        let Some(prospect) = self.prospects.find(created.prospect_id).await? else {
            warn!(
                prospect_id = %created.prospect_id,
                policy_number = %created.policy_number,
                "prospect not found, skipping confirmation mail"
            );
            return Ok(());
        };

        let Some(email) = prospect.email.clone() else {
            info!(
                prospect_id = %prospect.id,
                "prospect has no email address, skipping confirmation mail"
            );
            return Ok(());
        };

        let subject = format!("Your policy {} is confirmed", created.policy_number);
        let body = format!(
            "Hello {},\n\nyour {} policy with {} is active from {} to {}.\n\
             Annual premium: {} EUR.\n",
            prospect.full_name(),
            created.insurance_type,
            created.provider,
            created.start_date,
            created.end_date,
            fmt_amount(created.annual_premium),
        );
        self.mailer.send(&email, &subject, &body).await?;

        info!(
            event_id = %event.event_id(),
            policy_number = %created.policy_number,
            "confirmation mail sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{
        InMemoryDirectory, InMemoryPolicyStore, InMemoryQuoteStore, RecordingMailer,
        RecordingPublisher, RecordingRenderer,
    };
    use crate::quote::{Quote, QuoteStatus};
    use crate::store::PolicyOutcome;
    use covercrm_core::{ProspectId, QuoteId, UserId};
    use covercrm_events::{EventKind, QuoteAcceptedPayload};

    fn quote_accepted(quote_id: i64) -> Event {
        Event::new(EventPayload::QuoteAccepted(QuoteAcceptedPayload {
            quote_id: QuoteId::new(quote_id),
            prospect_id: ProspectId::new(3),
            provider: "X".into(),
            insurance_type: "health".into(),
            annual_premium: 120_000,
            accepted_by: Some(UserId::new(1)),
        }))
    }

    fn seed_quote(quotes: &InMemoryQuoteStore, id: i64) {
        quotes.put(Quote {
            id: QuoteId::new(id),
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
    }

    #[tokio::test]
    async fn creates_the_policy_and_publishes_the_chain_event_once() {
        let policies = Arc::new(InMemoryPolicyStore::new());
        let quotes = Arc::new(InMemoryQuoteStore::new());
        let publisher = Arc::new(RecordingPublisher::new());
        seed_quote(&quotes, 7);

        let handler =
            PolicyCreationHandler::new(policies.clone(), quotes.clone(), publisher.clone());
        let event = quote_accepted(7);

        handler.handle(&event).await.unwrap();
        assert_eq!(policies.count(), 1);

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].kind(), EventKind::PolicyCreated);

        // Redelivery of the same entry: no second policy, no second chain event.
        handler.handle(&event).await.unwrap();
        assert_eq!(policies.count(), 1);
        assert_eq!(publisher.published().len(), 1);
    }

    #[tokio::test]
    async fn publish_failure_propagates_so_the_entry_is_retried() {
        let policies = Arc::new(InMemoryPolicyStore::new());
        let quotes = Arc::new(InMemoryQuoteStore::new());
        let publisher = Arc::new(RecordingPublisher::new());
        seed_quote(&quotes, 7);
        publisher.set_broker_down(true);

        let handler =
            PolicyCreationHandler::new(policies.clone(), quotes.clone(), publisher.clone());
        let err = handler.handle(&quote_accepted(7)).await.unwrap_err();
        assert!(matches!(err, HandlerError::Publish(_)));
    }

    #[tokio::test]
    async fn contract_is_rendered_at_most_once() {
        let policies = Arc::new(InMemoryPolicyStore::new());
        let quotes = Arc::new(InMemoryQuoteStore::new());
        seed_quote(&quotes, 7);
        let today = Utc::now().date_naive();
        let outcome =
            create_policy_for_quote(policies.as_ref(), quotes.as_ref(), QuoteId::new(7), today)
                .await
                .unwrap();
        let PolicyOutcome::Created(policy) = outcome else {
            panic!("expected creation");
        };

        let renderer = Arc::new(RecordingRenderer::new());
        let handler = ContractGenerationHandler::new(policies.clone(), renderer.clone());
        let event = Event::new(EventPayload::PolicyCreated(PolicyCreatedPayload {
            policy_id: policy.id,
            policy_number: policy.policy_number.clone(),
            quote_id: policy.quote_id,
            prospect_id: ProspectId::new(3),
            provider: "X".into(),
            insurance_type: "health".into(),
            annual_premium: 120_000,
            start_date: policy.start_date,
            end_date: policy.end_date,
            created_by: None,
        }));

        handler.handle(&event).await.unwrap();
        handler.handle(&event).await.unwrap();

        assert_eq!(renderer.rendered().len(), 1);
        let stored = policies.find(policy.id).await.unwrap().unwrap();
        assert!(stored.contract_path.is_some());
    }

    #[tokio::test]
    async fn notification_goes_to_the_prospect_email() {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.put_prospect(crate::prospect::Prospect {
            id: ProspectId::new(3),
            prospect_type: "individual".into(),
            first_name: Some("Ada".into()),
            last_name: Some("Byron".into()),
            email: Some("ada@example.test".into()),
            assigned_broker_id: None,
            created_at: Utc::now(),
        });
        let mailer = Arc::new(RecordingMailer::new());
        let handler = PolicyNotificationHandler::new(directory.clone(), mailer.clone());

        let event = Event::new(EventPayload::PolicyCreated(PolicyCreatedPayload {
            policy_id: covercrm_core::PolicyId::new(1),
            policy_number: "POL-2026-ABCDEF01".into(),
            quote_id: QuoteId::new(7),
            prospect_id: ProspectId::new(3),
            provider: "X".into(),
            insurance_type: "health".into(),
            annual_premium: 120_000,
            start_date: "2026-08-25".parse().unwrap(),
            end_date: "2027-08-25".parse().unwrap(),
            created_by: None,
        }));
        handler.handle(&event).await.unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ada@example.test");
        assert!(sent[0].subject.contains("POL-2026-ABCDEF01"));
        assert!(sent[0].body.contains("1200.00"));
    }
}
