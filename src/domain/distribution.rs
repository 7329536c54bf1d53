//! Distribution of a completed transaction across payout buckets.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::money::{Currency, Money};
use super::payout::{Payout, PayoutStatus};

/// Immutable split of one transaction's amount.
#[derive(Debug, Clone, Serialize)]
pub struct Distribution {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub currency: Currency,
    pub shares: BTreeMap<String, Money>,
    pub created_at: DateTime<Utc>,
}

impl Distribution {
    pub fn new(transaction_id: Uuid, currency: Currency, shares: BTreeMap<String, Money>) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            currency,
            shares,
            created_at: Utc::now(),
        }
    }

    /// Sum of all shares, or None when shares mix currencies or overflow.
    pub fn total(&self) -> Option<Money> {
        self.shares
            .values()
            .try_fold(Money::zero(self.currency.clone()), |acc, share| acc.checked_add(share))
    }

    pub fn share(&self, bucket: &str) -> Option<&Money> {
        self.shares.get(bucket)
    }

    pub fn buckets(&self) -> impl Iterator<Item = &str> {
        self.shares.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionStatus {
    /// No bucket has a payout yet, or some are still in flight with none completed.
    Pending,
    Partial,
    Settled,
    Failed,
}

impl DistributionStatus {
    /// Derives the settlement state from the latest payout of each bucket.
    pub fn derive(distribution: &Distribution, latest: &BTreeMap<String, Payout>) -> Self {
        let buckets = distribution.shares.len();
        let completed = latest
            .values()
            .filter(|p| p.status == PayoutStatus::Completed)
            .count();
        let failed = latest
            .values()
            .filter(|p| p.status == PayoutStatus::Failed)
            .count();

        if buckets > 0 && completed == buckets {
            DistributionStatus::Settled
        } else if completed > 0 {
            DistributionStatus::Partial
        } else if buckets > 0 && failed == buckets {
            DistributionStatus::Failed
        } else {
            DistributionStatus::Pending
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionStatus::Pending => "pending",
            DistributionStatus::Partial => "partial",
            DistributionStatus::Settled => "settled",
            DistributionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DistributionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistributionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DistributionStatus::Pending),
            "partial" => Ok(DistributionStatus::Partial),
            "settled" => Ok(DistributionStatus::Settled),
            "failed" => Ok(DistributionStatus::Failed),
            other => Err(format!("unknown distribution status: {}", other)),
        }
    }
}

/// Keeps only the highest attempt per bucket.
pub fn latest_payouts(payouts: &[Payout]) -> BTreeMap<String, Payout> {
    let mut latest: BTreeMap<String, Payout> = BTreeMap::new();
    for payout in payouts {
        match latest.get(&payout.bucket) {
            Some(existing) if existing.attempt >= payout.attempt => {}
            _ => {
                latest.insert(payout.bucket.clone(), payout.clone());
            }
        }
    }
    latest
}
