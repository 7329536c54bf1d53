//! Ledger port.
//! The ledger is the single source of truth for transactions, distributions
//! and payouts. Adapters must serialize writes per transaction id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    ChargeOutcome, Distribution, Money, MoneyError, Payout, PayoutRecord, Transaction,
    TransactionStatus,
};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Unknown transaction {0}")]
    UnknownTransaction(Uuid),

    #[error("Transaction {id} already finalized as {status}")]
    AlreadyFinalized { id: Uuid, status: TransactionStatus },

    #[error("Transaction {id} is {status}, not completed")]
    TransactionNotCompleted { id: Uuid, status: TransactionStatus },

    #[error("Transaction {0} already has a distribution")]
    DistributionExists(Uuid),

    #[error("Split mismatch for transaction {transaction_id}: expected {expected}, got {actual}")]
    SplitMismatch {
        transaction_id: Uuid,
        expected: String,
        actual: String,
    },

    #[error("Unknown distribution {0}")]
    UnknownDistribution(Uuid),

    #[error("Distribution {distribution_id} has no bucket '{bucket}'")]
    UnknownBucket { distribution_id: Uuid, bucket: String },

    #[error("Bucket '{bucket}' of distribution {distribution_id} is already paid out")]
    BucketAlreadySettled { distribution_id: Uuid, bucket: String },

    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

impl From<MoneyError> for LedgerError {
    fn from(err: MoneyError) -> Self {
        LedgerError::InvalidAmount(err.to_string())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Checks a proposed split against the transaction it belongs to. Shared by
/// every adapter so the rule lives in one place.
pub fn verify_split(tx: &Transaction, shares: &BTreeMap<String, Money>) -> LedgerResult<()> {
    let mismatch = |actual: String| LedgerError::SplitMismatch {
        transaction_id: tx.id,
        expected: tx.amount.to_string(),
        actual,
    };

    if shares.is_empty() {
        return Err(mismatch("no buckets".to_string()));
    }

    let mut total = Money::zero(tx.amount.currency().clone());
    for (bucket, share) in shares {
        if share.minor() < 0 {
            return Err(mismatch(format!("negative share for '{}'", bucket)));
        }
        total = total
            .checked_add(share)
            .ok_or_else(|| mismatch(format!("share for '{}' in {}", bucket, share.currency())))?;
    }

    if total != tx.amount {
        return Err(mismatch(total.to_string()));
    }
    Ok(())
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn ping(&self) -> LedgerResult<()>;

    /// Creates a `pending` transaction.
    async fn record_transaction(&self, amount: &Money, customer_ref: &str)
        -> LedgerResult<Transaction>;

    /// Moves a `pending` transaction to its terminal status. Exactly once.
    async fn finalize_transaction(
        &self,
        id: Uuid,
        outcome: &ChargeOutcome,
    ) -> LedgerResult<Transaction>;

    async fn attach_distribution(
        &self,
        transaction_id: Uuid,
        shares: &BTreeMap<String, Money>,
    ) -> LedgerResult<Distribution>;

    /// Appends a payout attempt; the amount comes from the stored distribution.
    async fn record_payout(
        &self,
        distribution_id: Uuid,
        record: PayoutRecord,
    ) -> LedgerResult<Payout>;

    /// Transactions created in `[since, until)`, oldest first.
    async fn query_transactions(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        status: Option<TransactionStatus>,
    ) -> LedgerResult<Vec<Transaction>>;

    async fn get_transaction(&self, id: Uuid) -> LedgerResult<Transaction>;

    async fn get_distribution(&self, id: Uuid) -> LedgerResult<Distribution>;

    async fn distribution_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> LedgerResult<Option<Distribution>>;

    async fn distributions_for_transactions(
        &self,
        transaction_ids: &[Uuid],
    ) -> LedgerResult<Vec<Distribution>>;

    async fn list_distributions(&self, limit: i64, offset: i64) -> LedgerResult<Vec<Distribution>>;

    /// Every attempt for a distribution, in insertion order.
    async fn list_payouts(&self, distribution_id: Uuid) -> LedgerResult<Vec<Payout>>;
}
