//! Postgres entity stores.
//!
//! Thin row mappers over the shared CRM schema (`sql/schema.sql`). The one
//! piece of behavior that matters to the backbone lives here: a `23505`
//! unique violation surfaces as [`StoreError::Duplicate`], which handlers
//! treat as success-equivalent.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use covercrm_core::{CommissionId, PolicyId, ProspectId, QuoteId, UserId};
use covercrm_sales::{
    Commission, CommissionStore, NewCommission, NewPolicy, Policy, PolicyStore, Prospect,
    ProspectStore, Quote, QuoteStore, StoreError, User, UserStore,
};

const UNIQUE_VIOLATION: &str = "23505";

fn map_sqlx_error(op: &str, e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db) = e {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return StoreError::Duplicate(format!("{op}: {}", db.message()));
        }
    }
    StoreError::Backend(format!("{op}: {e}"))
}

/// Decode a text column holding a serde-renamed enum variant.
fn parse_enum<T: serde::de::DeserializeOwned>(column: &str, s: String) -> Result<T, StoreError> {
    serde_json::from_value(serde_json::Value::String(s))
        .map_err(|e| StoreError::Backend(format!("corrupt {column} column: {e}")))
}

/// Encode a serde-renamed enum variant as its text column value.
fn enum_str<T: serde::Serialize>(column: &str, value: &T) -> Result<String, StoreError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        Ok(other) => Err(StoreError::Backend(format!(
            "{column} did not serialize to a string: {other}"
        ))),
        Err(e) => Err(StoreError::Backend(format!("{column}: {e}"))),
    }
}

/// Prospects and users.
#[derive(Debug, Clone)]
pub struct PgDirectory {
    pool: Arc<PgPool>,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn row_to_prospect(row: &sqlx::postgres::PgRow) -> Prospect {
    Prospect {
        id: ProspectId::new(row.get("id")),
        prospect_type: row.get("prospect_type"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
        assigned_broker_id: row.get::<Option<i64>, _>("assigned_broker_id").map(UserId::new),
        created_at: row.get("created_at"),
    }
}

fn row_to_user(row: &sqlx::postgres::PgRow) -> User {
    User {
        id: UserId::new(row.get("id")),
        email: row.get("email"),
        full_name: row.get("full_name"),
        supervisor_id: row.get::<Option<i64>, _>("supervisor_id").map(UserId::new),
    }
}

#[async_trait]
impl ProspectStore for PgDirectory {
    async fn find(&self, id: ProspectId) -> Result<Option<Prospect>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, prospect_type, first_name, last_name, email,
                   assigned_broker_id, created_at
            FROM prospects WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("prospects.find", e))?;
        Ok(row.as_ref().map(row_to_prospect))
    }

    async fn assigned_broker(&self, id: ProspectId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT u.id, u.email, u.full_name, u.supervisor_id
            FROM prospects p
            JOIN users u ON u.id = p.assigned_broker_id
            WHERE p.id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("prospects.assigned_broker", e))?;
        Ok(row.as_ref().map(row_to_user))
    }
}

#[async_trait]
impl UserStore for PgDirectory {
    async fn find(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT id, email, full_name, supervisor_id FROM users WHERE id = $1")
            .bind(id.as_i64())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("users.find", e))?;
        Ok(row.as_ref().map(row_to_user))
    }
}

#[derive(Debug, Clone)]
pub struct PgQuoteStore {
    pool: Arc<PgPool>,
}

impl PgQuoteStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl QuoteStore for PgQuoteStore {
    async fn find(&self, id: QuoteId) -> Result<Option<Quote>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, prospect_id, provider, insurance_type, monthly_premium,
                   annual_premium, coverage_amount, status, valid_until, created_at
            FROM quotes WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("quotes.find", e))?;

        row.map(|row| {
            Ok(Quote {
                id: QuoteId::new(row.get("id")),
                prospect_id: ProspectId::new(row.get("prospect_id")),
                provider: row.get("provider"),
                insurance_type: row.get("insurance_type"),
                monthly_premium: row.get("monthly_premium"),
                annual_premium: row.get("annual_premium"),
                coverage_amount: row.get("coverage_amount"),
                status: parse_enum("status", row.get("status"))?,
                valid_until: row.get("valid_until"),
                created_at: row.get("created_at"),
            })
        })
        .transpose()
    }
}

#[derive(Debug, Clone)]
pub struct PgPolicyStore {
    pool: Arc<PgPool>,
}

impl PgPolicyStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn row_to_policy(row: &sqlx::postgres::PgRow) -> Result<Policy, StoreError> {
    Ok(Policy {
        id: PolicyId::new(row.get("id")),
        quote_id: QuoteId::new(row.get("quote_id")),
        policy_number: row.get("policy_number"),
        start_date: row.get("start_date"),
        end_date: row.get("end_date"),
        renewal_date: row.get("renewal_date"),
        status: parse_enum("status", row.get("status"))?,
        contract_path: row.get("contract_path"),
        signed_at: row.get("signed_at"),
    })
}

const POLICY_COLUMNS: &str = "id, quote_id, policy_number, start_date, end_date, \
                              renewal_date, status, contract_path, signed_at";

#[async_trait]
impl PolicyStore for PgPolicyStore {
    async fn find(&self, id: PolicyId) -> Result<Option<Policy>, StoreError> {
        let row = sqlx::query(&format!("SELECT {POLICY_COLUMNS} FROM policies WHERE id = $1"))
            .bind(id.as_i64())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("policies.find", e))?;
        row.as_ref().map(row_to_policy).transpose()
    }

    async fn find_by_quote(&self, quote_id: QuoteId) -> Result<Option<Policy>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {POLICY_COLUMNS} FROM policies WHERE quote_id = $1"
        ))
        .bind(quote_id.as_i64())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("policies.find_by_quote", e))?;
        row.as_ref().map(row_to_policy).transpose()
    }

    async fn insert(&self, policy: NewPolicy) -> Result<Policy, StoreError> {
        // The unique key on quote_id turns a concurrent double-insert into
        // a 23505, mapped to Duplicate for the caller to resolve.
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO policies
                (quote_id, policy_number, start_date, end_date, renewal_date,
                 status, signed_at)
            VALUES ($1, $2, $3, $4, $5, 'active', NOW())
            RETURNING {POLICY_COLUMNS}
            "#
        ))
        .bind(policy.quote_id.as_i64())
        .bind(&policy.policy_number)
        .bind(policy.start_date)
        .bind(policy.end_date)
        .bind(policy.renewal_date)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("policies.insert", e))?;
        row_to_policy(&row)
    }

    async fn set_contract_path(&self, id: PolicyId, path: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE policies SET contract_path = $2 WHERE id = $1")
            .bind(id.as_i64())
            .bind(path)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("policies.set_contract_path", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("policy {id}")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PgCommissionStore {
    pool: Arc<PgPool>,
}

impl PgCommissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl CommissionStore for PgCommissionStore {
    async fn exists_for_policy(&self, policy_id: PolicyId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM commissions WHERE policy_id = $1)")
            .bind(policy_id.as_i64())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("commissions.exists_for_policy", e))?;
        Ok(row.get::<bool, _>(0))
    }

    async fn insert_all(
        &self,
        commissions: Vec<NewCommission>,
    ) -> Result<Vec<Commission>, StoreError> {
        // One transaction: the commission set of a policy is all-or-nothing.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("commissions.begin", e))?;

        let mut inserted = Vec::with_capacity(commissions.len());
        for new in commissions {
            let row = sqlx::query(
                r#"
                INSERT INTO commissions
                    (policy_id, prospect_id, beneficiary_id, broker_id, role,
                     tier, rate_bps, base_amount, amount, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending')
                RETURNING id, created_at
                "#,
            )
            .bind(new.policy_id.as_i64())
            .bind(new.prospect_id.as_i64())
            .bind(new.beneficiary_id.as_i64())
            .bind(new.broker_id.as_i64())
            .bind(enum_str("role", &new.role)?)
            .bind(enum_str("tier", &new.tier)?)
            .bind(new.rate_bps as i32)
            .bind(new.base_amount)
            .bind(new.amount)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("commissions.insert", e))?;

            inserted.push(Commission {
                id: CommissionId::new(row.get("id")),
                policy_id: new.policy_id,
                prospect_id: new.prospect_id,
                beneficiary_id: new.beneficiary_id,
                broker_id: new.broker_id,
                role: new.role,
                tier: new.tier,
                rate_bps: new.rate_bps,
                base_amount: new.base_amount,
                amount: new.amount,
                status: covercrm_sales::CommissionStatus::Pending,
                created_at: row.get("created_at"),
            });
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commissions.commit", e))?;
        Ok(inserted)
    }
}
