//! Multi-tier commission schedule.
//!
//! Rates as a share of the annual premium, in basis points:
//!
//! | tier               | broker | manager | affiliate |
//! |--------------------|--------|---------|-----------|
//! | initial            | 15%    | 5%      | 3%        |
//! | first renewal      | 10%    | 3%      | 2%        |
//! | recurring renewal  | 5%     | 2%      | 1%        |
//!
//! Amounts are integer cents; fractions round toward zero. Commissions
//! start in `Pending` status awaiting manager approval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use covercrm_core::{CommissionId, PolicyId, ProspectId, UserId};

use crate::user::User;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionTier {
    Initial,
    RenewalYear1,
    RenewalRecurring,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommissionRole {
    Broker,
    Manager,
    Affiliate,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommissionStatus {
    Pending,
    Approved,
    Paid,
    Cancelled,
}

/// Rates for one tier, in basis points of the annual premium.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TierRates {
    pub broker_bps: u32,
    pub manager_bps: u32,
    pub affiliate_bps: u32,
}

impl CommissionTier {
    pub fn rates(&self) -> TierRates {
        match self {
            Self::Initial => TierRates {
                broker_bps: 1500,
                manager_bps: 500,
                affiliate_bps: 300,
            },
            Self::RenewalYear1 => TierRates {
                broker_bps: 1000,
                manager_bps: 300,
                affiliate_bps: 200,
            },
            Self::RenewalRecurring => TierRates {
                broker_bps: 500,
                manager_bps: 200,
                affiliate_bps: 100,
            },
        }
    }
}

/// A commission row ready to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCommission {
    pub policy_id: PolicyId,
    pub prospect_id: ProspectId,
    /// Who earns this commission.
    pub beneficiary_id: UserId,
    /// Which broker's sale generated it (equals `beneficiary_id` for the
    /// broker row).
    pub broker_id: UserId,
    pub role: CommissionRole,
    pub tier: CommissionTier,
    pub rate_bps: u32,
    /// Annual premium the rate applies to, in cents.
    pub base_amount: i64,
    /// Commission amount in cents.
    pub amount: i64,
}

/// A persisted commission row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commission {
    pub id: CommissionId,
    pub policy_id: PolicyId,
    pub prospect_id: ProspectId,
    pub beneficiary_id: UserId,
    pub broker_id: UserId,
    pub role: CommissionRole,
    pub tier: CommissionTier,
    pub rate_bps: u32,
    pub base_amount: i64,
    pub amount: i64,
    pub status: CommissionStatus,
    pub created_at: DateTime<Utc>,
}

fn share(base: i64, bps: u32) -> i64 {
    base * i64::from(bps) / 10_000
}

/// Calculate the commission set for one policy at one tier.
///
/// Pure: no I/O, no clock. The broker row is always present; manager and
/// affiliate rows only when those parties exist. The caller is responsible
/// for the existence check that keeps replays from double-counting.
pub fn calculate_commissions(
    tier: CommissionTier,
    policy_id: PolicyId,
    prospect_id: ProspectId,
    annual_premium: i64,
    broker: &User,
    manager: Option<&User>,
    affiliate: Option<&User>,
) -> Vec<NewCommission> {
    let rates = tier.rates();
    let mut commissions = Vec::with_capacity(3);

    commissions.push(NewCommission {
        policy_id,
        prospect_id,
        beneficiary_id: broker.id,
        broker_id: broker.id,
        role: CommissionRole::Broker,
        tier,
        rate_bps: rates.broker_bps,
        base_amount: annual_premium,
        amount: share(annual_premium, rates.broker_bps),
    });

    if let Some(manager) = manager {
        commissions.push(NewCommission {
            policy_id,
            prospect_id,
            beneficiary_id: manager.id,
            broker_id: broker.id,
            role: CommissionRole::Manager,
            tier,
            rate_bps: rates.manager_bps,
            base_amount: annual_premium,
            amount: share(annual_premium, rates.manager_bps),
        });
    }

    if let Some(affiliate) = affiliate {
        commissions.push(NewCommission {
            policy_id,
            prospect_id,
            beneficiary_id: affiliate.id,
            broker_id: broker.id,
            role: CommissionRole::Affiliate,
            tier,
            rate_bps: rates.affiliate_bps,
            base_amount: annual_premium,
            amount: share(annual_premium, rates.affiliate_bps),
        });
    }

    commissions
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn user(id: i64, supervisor: Option<i64>) -> User {
        User {
            id: UserId::new(id),
            email: format!("user{id}@covercrm.test"),
            full_name: format!("User {id}"),
            supervisor_id: supervisor.map(UserId::new),
        }
    }

    #[test]
    fn initial_rates_are_15_5_3_percent() {
        let rates = CommissionTier::Initial.rates();
        assert_eq!(rates.broker_bps, 1500);
        assert_eq!(rates.manager_bps, 500);
        assert_eq!(rates.affiliate_bps, 300);
    }

    #[test]
    fn renewal_rates_step_down() {
        let year1 = CommissionTier::RenewalYear1.rates();
        assert_eq!((year1.broker_bps, year1.manager_bps, year1.affiliate_bps), (1000, 300, 200));
        let recurring = CommissionTier::RenewalRecurring.rates();
        assert_eq!(
            (recurring.broker_bps, recurring.manager_bps, recurring.affiliate_bps),
            (500, 200, 100)
        );
    }

    #[test]
    fn broker_manager_and_affiliate_each_get_their_share() {
        // €2,000.00 premium: broker €300, manager €100, affiliate €60.
        let broker = user(5, Some(3));
        let manager = user(3, None);
        let affiliate = user(8, None);
        let set = calculate_commissions(
            CommissionTier::Initial,
            PolicyId::new(1),
            ProspectId::new(2),
            200_000,
            &broker,
            Some(&manager),
            Some(&affiliate),
        );

        assert_eq!(set.len(), 3);
        assert_eq!(set[0].amount, 30_000);
        assert_eq!(set[1].amount, 10_000);
        assert_eq!(set[2].amount, 6_000);
        assert!(set.iter().all(|c| c.broker_id == broker.id));
        assert!(set.iter().all(|c| c.base_amount == 200_000));
    }

    #[test]
    fn lone_broker_gets_a_single_row() {
        let broker = user(5, None);
        let set = calculate_commissions(
            CommissionTier::Initial,
            PolicyId::new(1),
            ProspectId::new(2),
            100_000,
            &broker,
            None,
            None,
        );
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].role, CommissionRole::Broker);
        assert_eq!(set[0].amount, 15_000);
    }

    proptest! {
        #[test]
        fn amounts_are_exact_shares_and_never_exceed_the_premium(premium in 0i64..1_000_000_000) {
            let broker = user(1, Some(2));
            let manager = user(2, None);
            let affiliate = user(3, None);
            let set = calculate_commissions(
                CommissionTier::Initial,
                PolicyId::new(1),
                ProspectId::new(1),
                premium,
                &broker,
                Some(&manager),
                Some(&affiliate),
            );

            for c in &set {
                prop_assert_eq!(c.amount, premium * i64::from(c.rate_bps) / 10_000);
                prop_assert!(c.amount >= 0);
            }
            // Initial tier pays out 23% in total.
            let total: i64 = set.iter().map(|c| c.amount).sum();
            prop_assert!(total <= premium * 2_300 / 10_000);
        }
    }
}
