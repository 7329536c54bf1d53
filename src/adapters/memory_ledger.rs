//! In-memory implementation of LedgerStore.
//! All writes go through one write lock, which serializes them per
//! transaction id (and globally).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    latest_payouts, ChargeOutcome, Distribution, Money, Payout, PayoutRecord, PayoutStatus,
    Transaction, TransactionStatus,
};
use crate::ports::{verify_split, LedgerError, LedgerResult, LedgerStore};

#[derive(Default)]
struct LedgerState {
    transactions: HashMap<Uuid, Transaction>,
    distributions: HashMap<Uuid, Distribution>,
    distribution_by_tx: HashMap<Uuid, Uuid>,
    payouts: Vec<Payout>,
}

#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn ping(&self) -> LedgerResult<()> {
        Ok(())
    }

    async fn record_transaction(
        &self,
        amount: &Money,
        customer_ref: &str,
    ) -> LedgerResult<Transaction> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount(amount.to_string()));
        }
        let tx = Transaction::new(amount.clone(), customer_ref.to_string());
        let mut state = self.state.write().await;
        state.transactions.insert(tx.id, tx.clone());
        Ok(tx)
    }

    async fn finalize_transaction(
        &self,
        id: Uuid,
        outcome: &ChargeOutcome,
    ) -> LedgerResult<Transaction> {
        let mut state = self.state.write().await;
        let current = state
            .transactions
            .get(&id)
            .ok_or(LedgerError::UnknownTransaction(id))?;

        if current.status != TransactionStatus::Pending {
            return Err(LedgerError::AlreadyFinalized {
                id,
                status: current.status,
            });
        }

        let finalized = current.finalized(outcome, Utc::now());
        state.transactions.insert(id, finalized.clone());
        Ok(finalized)
    }

    async fn attach_distribution(
        &self,
        transaction_id: Uuid,
        shares: &BTreeMap<String, Money>,
    ) -> LedgerResult<Distribution> {
        let mut state = self.state.write().await;
        let tx = state
            .transactions
            .get(&transaction_id)
            .ok_or(LedgerError::UnknownTransaction(transaction_id))?;

        if tx.status != TransactionStatus::Completed {
            return Err(LedgerError::TransactionNotCompleted {
                id: transaction_id,
                status: tx.status,
            });
        }
        if state.distribution_by_tx.contains_key(&transaction_id) {
            return Err(LedgerError::DistributionExists(transaction_id));
        }
        verify_split(tx, shares)?;

        let distribution =
            Distribution::new(transaction_id, tx.amount.currency().clone(), shares.clone());
        state
            .distribution_by_tx
            .insert(transaction_id, distribution.id);
        state
            .distributions
            .insert(distribution.id, distribution.clone());
        Ok(distribution)
    }

    async fn record_payout(
        &self,
        distribution_id: Uuid,
        record: PayoutRecord,
    ) -> LedgerResult<Payout> {
        let mut state = self.state.write().await;
        let distribution = state
            .distributions
            .get(&distribution_id)
            .ok_or(LedgerError::UnknownDistribution(distribution_id))?;

        let amount = distribution
            .share(&record.bucket)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownBucket {
                distribution_id,
                bucket: record.bucket.clone(),
            })?;

        let previous: Vec<Payout> = state
            .payouts
            .iter()
            .filter(|p| p.distribution_id == distribution_id && p.bucket == record.bucket)
            .cloned()
            .collect();
        let latest = latest_payouts(&previous);
        if let Some(last) = latest.get(&record.bucket) {
            if last.status == PayoutStatus::Completed {
                return Err(LedgerError::BucketAlreadySettled {
                    distribution_id,
                    bucket: record.bucket,
                });
            }
        }

        let payout = Payout {
            id: Uuid::new_v4(),
            distribution_id,
            bucket: record.bucket,
            account_id: record.account_id,
            amount,
            status: record.status,
            reference: record.reference,
            failure_reason: record.failure_reason,
            attempt: previous.len() as u32 + 1,
            created_at: Utc::now(),
        };
        state.payouts.push(payout.clone());
        Ok(payout)
    }

    async fn query_transactions(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        status: Option<TransactionStatus>,
    ) -> LedgerResult<Vec<Transaction>> {
        let state = self.state.read().await;
        let mut rows: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|t| t.created_at >= since && t.created_at < until)
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn get_transaction(&self, id: Uuid) -> LedgerResult<Transaction> {
        let state = self.state.read().await;
        state
            .transactions
            .get(&id)
            .cloned()
            .ok_or(LedgerError::UnknownTransaction(id))
    }

    async fn get_distribution(&self, id: Uuid) -> LedgerResult<Distribution> {
        let state = self.state.read().await;
        state
            .distributions
            .get(&id)
            .cloned()
            .ok_or(LedgerError::UnknownDistribution(id))
    }

    async fn distribution_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> LedgerResult<Option<Distribution>> {
        let state = self.state.read().await;
        Ok(state
            .distribution_by_tx
            .get(&transaction_id)
            .and_then(|id| state.distributions.get(id))
            .cloned())
    }

    async fn distributions_for_transactions(
        &self,
        transaction_ids: &[Uuid],
    ) -> LedgerResult<Vec<Distribution>> {
        let state = self.state.read().await;
        Ok(transaction_ids
            .iter()
            .filter_map(|tx_id| state.distribution_by_tx.get(tx_id))
            .filter_map(|id| state.distributions.get(id))
            .cloned()
            .collect())
    }

    async fn list_distributions(&self, limit: i64, offset: i64) -> LedgerResult<Vec<Distribution>> {
        let state = self.state.read().await;
        let mut rows: Vec<Distribution> = state.distributions.values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn list_payouts(&self, distribution_id: Uuid) -> LedgerResult<Vec<Payout>> {
        let state = self.state.read().await;
        if !state.distributions.contains_key(&distribution_id) {
            return Err(LedgerError::UnknownDistribution(distribution_id));
        }
        Ok(state
            .payouts
            .iter()
            .filter(|p| p.distribution_id == distribution_id)
            .cloned()
            .collect())
    }
}
