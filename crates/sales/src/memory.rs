//! In-memory store and collaborator implementations.
//!
//! Test/dev doubles with the same contracts as the Postgres implementations
//! in infra, including the unique-key behavior the idempotency discipline
//! leans on. No I/O, no async runtime requirements beyond the traits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use covercrm_core::{CommissionId, PolicyId, ProspectId, QuoteId, UserId};
use covercrm_events::{DeliveryId, Event, EventPublisher, PublishError, StreamName, TransportError};

use crate::collab::{ContractRenderer, MailError, Mailer, RenderError};
use crate::commission::{Commission, CommissionStatus, NewCommission};
use crate::policy::{NewPolicy, Policy, PolicyStatus};
use crate::prospect::Prospect;
use crate::quote::Quote;
use crate::store::{
    CommissionStore, PolicyStore, ProspectStore, QuoteStore, StoreError, UserStore,
};
use crate::user::User;

/// Prospects and users in one lookup table.
#[derive(Default)]
pub struct InMemoryDirectory {
    prospects: Mutex<HashMap<ProspectId, Prospect>>,
    users: Mutex<HashMap<UserId, User>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_prospect(&self, prospect: Prospect) {
        self.prospects.lock().unwrap().insert(prospect.id, prospect);
    }

    pub fn put_user(&self, user: User) {
        self.users.lock().unwrap().insert(user.id, user);
    }
}

#[async_trait]
impl ProspectStore for InMemoryDirectory {
    async fn find(&self, id: ProspectId) -> Result<Option<Prospect>, StoreError> {
        Ok(self.prospects.lock().unwrap().get(&id).cloned())
    }

    async fn assigned_broker(&self, id: ProspectId) -> Result<Option<User>, StoreError> {
        let broker_id = self
            .prospects
            .lock()
            .unwrap()
            .get(&id)
            .and_then(|p| p.assigned_broker_id);
        Ok(broker_id.and_then(|id| self.users.lock().unwrap().get(&id).cloned()))
    }
}

#[async_trait]
impl UserStore for InMemoryDirectory {
    async fn find(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryQuoteStore {
    quotes: Mutex<HashMap<QuoteId, Quote>>,
}

impl InMemoryQuoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, quote: Quote) {
        self.quotes.lock().unwrap().insert(quote.id, quote);
    }
}

#[async_trait]
impl QuoteStore for InMemoryQuoteStore {
    async fn find(&self, id: QuoteId) -> Result<Option<Quote>, StoreError> {
        Ok(self.quotes.lock().unwrap().get(&id).cloned())
    }
}

#[derive(Default)]
struct PolicyTable {
    next_id: i64,
    rows: Vec<Policy>,
}

/// Policy store enforcing the unique `quote_id` key.
#[derive(Default)]
pub struct InMemoryPolicyStore {
    table: Mutex<PolicyTable>,
    /// When staged, inserted just before the next `insert` call to simulate
    /// a concurrent writer slipping between check and act.
    race: Mutex<Option<NewPolicy>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.table.lock().unwrap().rows.len()
    }

    /// Stage a competing insert for the race-backstop tests.
    pub fn stage_race(&self, policy: NewPolicy) {
        *self.race.lock().unwrap() = Some(policy);
    }

    fn insert_row(table: &mut PolicyTable, new: NewPolicy) -> Result<Policy, StoreError> {
        if table.rows.iter().any(|p| p.quote_id == new.quote_id) {
            return Err(StoreError::Duplicate(format!(
                "policy for quote {} already exists",
                new.quote_id
            )));
        }
        table.next_id += 1;
        let policy = Policy {
            id: PolicyId::new(table.next_id),
            quote_id: new.quote_id,
            policy_number: new.policy_number,
            start_date: new.start_date,
            end_date: new.end_date,
            renewal_date: new.renewal_date,
            status: PolicyStatus::Active,
            contract_path: None,
            signed_at: Utc::now(),
        };
        table.rows.push(policy.clone());
        Ok(policy)
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn find(&self, id: PolicyId) -> Result<Option<Policy>, StoreError> {
        Ok(self.table.lock().unwrap().rows.iter().find(|p| p.id == id).cloned())
    }

    async fn find_by_quote(&self, quote_id: QuoteId) -> Result<Option<Policy>, StoreError> {
        Ok(self
            .table
            .lock()
            .unwrap()
            .rows
            .iter()
            .find(|p| p.quote_id == quote_id)
            .cloned())
    }

    async fn insert(&self, policy: NewPolicy) -> Result<Policy, StoreError> {
        let mut table = self.table.lock().unwrap();
        if let Some(staged) = self.race.lock().unwrap().take() {
            let _ = Self::insert_row(&mut table, staged);
        }
        Self::insert_row(&mut table, policy)
    }

    async fn set_contract_path(&self, id: PolicyId, path: &str) -> Result<(), StoreError> {
        let mut table = self.table.lock().unwrap();
        let policy = table
            .rows
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("policy {id}")))?;
        policy.contract_path = Some(path.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct CommissionTable {
    next_id: i64,
    rows: Vec<Commission>,
}

#[derive(Default)]
pub struct InMemoryCommissionStore {
    table: Mutex<CommissionTable>,
}

impl InMemoryCommissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Commission> {
        self.table.lock().unwrap().rows.clone()
    }
}

#[async_trait]
impl CommissionStore for InMemoryCommissionStore {
    async fn exists_for_policy(&self, policy_id: PolicyId) -> Result<bool, StoreError> {
        Ok(self
            .table
            .lock()
            .unwrap()
            .rows
            .iter()
            .any(|c| c.policy_id == policy_id))
    }

    async fn insert_all(
        &self,
        commissions: Vec<NewCommission>,
    ) -> Result<Vec<Commission>, StoreError> {
        // Single lock: all rows land or none do.
        let mut table = self.table.lock().unwrap();
        // Unique (policy_id, role) key, as the Postgres schema enforces it.
        for new in &commissions {
            if table
                .rows
                .iter()
                .any(|c| c.policy_id == new.policy_id && c.role == new.role)
            {
                return Err(StoreError::Duplicate(format!(
                    "{:?} commission for policy {} already exists",
                    new.role, new.policy_id
                )));
            }
        }
        let now = Utc::now();
        let mut inserted = Vec::with_capacity(commissions.len());
        for new in commissions {
            table.next_id += 1;
            let row = Commission {
                id: CommissionId::new(table.next_id),
                policy_id: new.policy_id,
                prospect_id: new.prospect_id,
                beneficiary_id: new.beneficiary_id,
                broker_id: new.broker_id,
                role: new.role,
                tier: new.tier,
                rate_bps: new.rate_bps,
                base_amount: new.base_amount,
                amount: new.amount,
                status: CommissionStatus::Pending,
                created_at: now,
            };
            table.rows.push(row.clone());
            inserted.push(row);
        }
        Ok(inserted)
    }
}

/// Publisher double that records instead of talking to a broker.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(Event, StreamName)>>,
    seq: AtomicU64,
    broker_down: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail fast, as an unreachable broker would.
    pub fn set_broker_down(&self, down: bool) {
        self.broker_down.store(down, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<Event> {
        self.published.lock().unwrap().iter().map(|(e, _)| e.clone()).collect()
    }

    pub fn published_to(&self, stream: StreamName) -> Vec<Event> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| *s == stream)
            .map(|(e, _)| e.clone())
            .collect()
    }

    fn record(&self, event: &Event, stream: StreamName) -> Result<DeliveryId, PublishError> {
        if self.broker_down.load(Ordering::SeqCst) {
            return Err(PublishError::Transport(TransportError::Connection(
                "broker unreachable".to_string(),
            )));
        }
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        self.published.lock().unwrap().push((event.clone(), stream));
        Ok(DeliveryId::new(format!("mem-{n}")))
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &Event) -> Result<DeliveryId, PublishError> {
        self.record(event, event.stream())
    }

    async fn publish_to(
        &self,
        event: &Event,
        stream: StreamName,
    ) -> Result<DeliveryId, PublishError> {
        self.record(event, stream)
    }

    async fn publish_batch(&self, events: &[Event]) -> Result<Vec<DeliveryId>, PublishError> {
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            ids.push(self.record(event, event.stream())?);
        }
        Ok(ids)
    }
}

/// Renderer double: records which policies were rendered.
#[derive(Default)]
pub struct RecordingRenderer {
    rendered: Mutex<Vec<PolicyId>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rendered(&self) -> Vec<PolicyId> {
        self.rendered.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContractRenderer for RecordingRenderer {
    async fn render_contract(&self, policy: &Policy) -> Result<String, RenderError> {
        self.rendered.lock().unwrap().push(policy.id);
        Ok(format!("storage/contracts/{}.pdf", policy.policy_number))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Mailer double: records outbound mail.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
