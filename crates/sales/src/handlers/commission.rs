//! Commission calculation for freshly created policies.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tracing::{info, warn};

use covercrm_events::{Event, EventHandler, EventPayload, HandlerError};

use crate::commission::{calculate_commissions, CommissionTier};
use crate::store::{CommissionStore, ProspectStore, StoreError, UserStore};

/// `PolicyCreated` → one commission row per entitled party.
///
/// Idempotency probe first: any existing commission for the policy means a
/// replay, and the whole handler is a no-op. The atomic `insert_all` keeps a
/// crash between rows from leaving a partial set behind.
pub struct CommissionCalculationHandler {
    commissions: Arc<dyn CommissionStore>,
    prospects: Arc<dyn ProspectStore>,
    users: Arc<dyn UserStore>,
}

impl CommissionCalculationHandler {
    pub fn new(
        commissions: Arc<dyn CommissionStore>,
        prospects: Arc<dyn ProspectStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            commissions,
            prospects,
            users,
        }
    }
}

#[async_trait]
impl EventHandler for CommissionCalculationHandler {
    fn name(&self) -> &'static str {
        "commission-calculation"
    }

    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let EventPayload::PolicyCreated(created) = event.payload() else {
            return Err(HandlerError::Other(anyhow!(
                "commission-calculation bound to unexpected event type {}",
                event.kind()
            )));
        };

        if self.commissions.exists_for_policy(created.policy_id).await? {
            info!(
                policy_id = %created.policy_id,
                "commissions already calculated, skipping"
            );
            return Ok(());
        }

        let Some(broker) = self.prospects.assigned_broker(created.prospect_id).await? else {
            warn!(
                prospect_id = %created.prospect_id,
                policy_number = %created.policy_number,
                "no broker assigned to prospect, no commissions to calculate"
            );
            return Ok(());
        };

        let manager = match broker.supervisor_id {
            Some(id) => self.users.find(id).await?,
            None => None,
        };

        let set = calculate_commissions(
            CommissionTier::Initial,
            created.policy_id,
            created.prospect_id,
            created.annual_premium,
            &broker,
            manager.as_ref(),
            None,
        );

        match self.commissions.insert_all(set).await {
            Ok(rows) => {
                info!(
                    event_id = %event.event_id(),
                    policy_number = %created.policy_number,
                    rows = rows.len(),
                    "commissions calculated"
                );
                Ok(())
            }
            // A concurrent delivery won the insert; its rows are the ones
            // we wanted.
            Err(StoreError::Duplicate(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commission::CommissionRole;
    use crate::memory::{InMemoryCommissionStore, InMemoryDirectory};
    use crate::prospect::Prospect;
    use crate::user::User;
    use chrono::Utc;
    use covercrm_core::{PolicyId, ProspectId, QuoteId, UserId};
    use covercrm_events::PolicyCreatedPayload;

    fn policy_created(premium: i64) -> Event {
        Event::new(EventPayload::PolicyCreated(PolicyCreatedPayload {
            policy_id: PolicyId::new(1),
            policy_number: "POL-2026-ABCDEF01".into(),
            quote_id: QuoteId::new(7),
            prospect_id: ProspectId::new(3),
            provider: "X".into(),
            insurance_type: "health".into(),
            annual_premium: premium,
            start_date: "2026-08-25".parse().unwrap(),
            end_date: "2027-08-25".parse().unwrap(),
            created_by: None,
        }))
    }

    fn directory_with_broker(supervisor: Option<i64>) -> Arc<InMemoryDirectory> {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.put_prospect(Prospect {
            id: ProspectId::new(3),
            prospect_type: "individual".into(),
            first_name: Some("Ada".into()),
            last_name: Some("Byron".into()),
            email: None,
            assigned_broker_id: Some(UserId::new(5)),
            created_at: Utc::now(),
        });
        directory.put_user(User {
            id: UserId::new(5),
            email: "broker@covercrm.test".into(),
            full_name: "Broker".into(),
            supervisor_id: supervisor.map(UserId::new),
        });
        if let Some(id) = supervisor {
            directory.put_user(User {
                id: UserId::new(id),
                email: "manager@covercrm.test".into(),
                full_name: "Manager".into(),
                supervisor_id: None,
            });
        }
        directory
    }

    #[tokio::test]
    async fn broker_and_manager_rows_are_written_once() {
        let commissions = Arc::new(InMemoryCommissionStore::new());
        let directory = directory_with_broker(Some(2));
        let handler = CommissionCalculationHandler::new(
            commissions.clone(),
            directory.clone(),
            directory.clone(),
        );
        let event = policy_created(200_000);

        handler.handle(&event).await.unwrap();
        let rows = commissions.all();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].role, CommissionRole::Broker);
        assert_eq!(rows[0].amount, 30_000);
        assert_eq!(rows[1].role, CommissionRole::Manager);
        assert_eq!(rows[1].amount, 10_000);

        // Redelivery: the existence probe keeps the set from doubling.
        handler.handle(&event).await.unwrap();
        assert_eq!(commissions.all().len(), 2);
    }

    #[tokio::test]
    async fn lone_broker_gets_a_single_row() {
        let commissions = Arc::new(InMemoryCommissionStore::new());
        let directory = directory_with_broker(None);
        let handler = CommissionCalculationHandler::new(
            commissions.clone(),
            directory.clone(),
            directory.clone(),
        );

        handler.handle(&policy_created(100_000)).await.unwrap();
        let rows = commissions.all();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, 15_000);
    }

    /// Store wrapper whose every call suspends once, so two futures polled
    /// together interleave the way two workers hitting Postgres do.
    struct SuspendingStore(Arc<InMemoryCommissionStore>);

    #[async_trait]
    impl CommissionStore for SuspendingStore {
        async fn exists_for_policy(&self, policy_id: PolicyId) -> Result<bool, StoreError> {
            tokio::task::yield_now().await;
            self.0.exists_for_policy(policy_id).await
        }

        async fn insert_all(
            &self,
            commissions: Vec<crate::commission::NewCommission>,
        ) -> Result<Vec<crate::commission::Commission>, StoreError> {
            tokio::task::yield_now().await;
            self.0.insert_all(commissions).await
        }
    }

    #[tokio::test]
    async fn concurrent_redelivery_writes_a_single_commission_set() {
        let commissions = Arc::new(InMemoryCommissionStore::new());
        let directory = directory_with_broker(None);
        let handler = CommissionCalculationHandler::new(
            Arc::new(SuspendingStore(commissions.clone())),
            directory.clone(),
            directory.clone(),
        );
        let event = policy_created(100_000);

        // Both deliveries pass the existence probe before either inserts;
        // the unique key rejects the loser and the handler treats that as
        // success.
        let (a, b) = tokio::join!(handler.handle(&event), handler.handle(&event));
        a.unwrap();
        b.unwrap();

        let rows = commissions.all();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, 15_000);
    }

    #[tokio::test]
    async fn missing_broker_is_not_an_error() {
        let commissions = Arc::new(InMemoryCommissionStore::new());
        let directory = Arc::new(InMemoryDirectory::new());
        directory.put_prospect(Prospect {
            id: ProspectId::new(3),
            prospect_type: "individual".into(),
            first_name: None,
            last_name: None,
            email: None,
            assigned_broker_id: None,
            created_at: Utc::now(),
        });
        let handler = CommissionCalculationHandler::new(
            commissions.clone(),
            directory.clone(),
            directory.clone(),
        );

        handler.handle(&policy_created(100_000)).await.unwrap();
        assert!(commissions.all().is_empty());
    }
}
