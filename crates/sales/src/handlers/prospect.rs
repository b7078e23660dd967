//! Prospect onboarding handlers.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tracing::{info, warn};

use covercrm_events::{Event, EventHandler, EventPayload, HandlerError};

use crate::collab::Mailer;
use crate::store::ProspectStore;

/// `ProspectCreated` → welcome mail to the prospect's address.
///
/// The payload carries the address, so no store lookup is needed; a
/// prospect without an email is simply skipped.
pub struct WelcomeEmailHandler {
    mailer: Arc<dyn Mailer>,
}

impl WelcomeEmailHandler {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl EventHandler for WelcomeEmailHandler {
    fn name(&self) -> &'static str {
        "welcome-email"
    }

    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let EventPayload::ProspectCreated(created) = event.payload() else {
            return Err(HandlerError::Other(anyhow!(
                "welcome-email bound to unexpected event type {}",
                event.kind()
            )));
        };

        let Some(email) = created.email.as_deref() else {
            info!(
                prospect_id = %created.prospect_id,
                "prospect has no email address, skipping welcome mail"
            );
            return Ok(());
        };

        let name = created.full_name.as_deref().unwrap_or("there");
        let body = format!(
            "Hello {name},\n\nwelcome! Your advisor will be in touch shortly \
             to discuss your {} insurance needs.\n",
            created.prospect_type
        );
        self.mailer.send(email, "Welcome to CoverCRM", &body).await?;

        info!(
            event_id = %event.event_id(),
            prospect_id = %created.prospect_id,
            "welcome mail sent"
        );
        Ok(())
    }
}

/// `ProspectCreated` → notify the assigned broker about the new lead.
pub struct BrokerAssignmentHandler {
    prospects: Arc<dyn ProspectStore>,
    mailer: Arc<dyn Mailer>,
}

impl BrokerAssignmentHandler {
    pub fn new(prospects: Arc<dyn ProspectStore>, mailer: Arc<dyn Mailer>) -> Self {
        Self { prospects, mailer }
    }
}

#[async_trait]
impl EventHandler for BrokerAssignmentHandler {
    fn name(&self) -> &'static str {
        "broker-assignment"
    }

    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let EventPayload::ProspectCreated(created) = event.payload() else {
            return Err(HandlerError::Other(anyhow!(
                "broker-assignment bound to unexpected event type {}",
                event.kind()
            )));
        };

        let Some(broker) = self.prospects.assigned_broker(created.prospect_id).await? else {
            warn!(
                prospect_id = %created.prospect_id,
                "prospect has no assigned broker, nothing to notify"
            );
            return Ok(());
        };

        let name = created.full_name.as_deref().unwrap_or("a new prospect");
        let body = format!(
            "Hi {},\n\n{name} ({}) has been assigned to you.\n",
            broker.full_name, created.prospect_type
        );
        self.mailer
            .send(&broker.email, "New prospect assigned", &body)
            .await?;

        info!(
            event_id = %event.event_id(),
            prospect_id = %created.prospect_id,
            broker_id = %broker.id,
            "broker notified of new prospect"
        );
        Ok(())
    }
}
