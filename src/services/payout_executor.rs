use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    latest_payouts, Distribution, DistributionStatus, Payout, PayoutRecord, PayoutStatus,
};
use crate::gateway::{TransferRail, TransferRequest};
use crate::ports::{LedgerError, LedgerResult, LedgerStore};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountConfigError {
    #[error("malformed account entry '{0}', expected bucket=account")]
    MalformedEntry(String),
    #[error("bucket '{0}' has an empty account id")]
    EmptyAccount(String),
}

/// Destination account per bucket.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PayoutAccounts {
    accounts: BTreeMap<String, String>,
}

impl PayoutAccounts {
    pub fn new(accounts: BTreeMap<String, String>) -> Self {
        Self { accounts }
    }

    /// Parses `owner=6212345678901,reserve=6212345678903`.
    pub fn parse(input: &str) -> Result<Self, AccountConfigError> {
        let mut accounts = BTreeMap::new();
        for entry in input.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (bucket, account) = entry
                .split_once('=')
                .ok_or_else(|| AccountConfigError::MalformedEntry(entry.to_string()))?;
            let (bucket, account) = (bucket.trim(), account.trim());
            if account.is_empty() {
                return Err(AccountConfigError::EmptyAccount(bucket.to_string()));
            }
            accounts.insert(bucket.to_string(), account.to_string());
        }
        Ok(Self { accounts })
    }

    pub fn account_for(&self, bucket: &str) -> Option<&str> {
        self.accounts.get(bucket).map(String::as_str)
    }

    /// Buckets from `buckets` with no configured account.
    pub fn missing<'a>(&self, buckets: impl Iterator<Item = &'a str>) -> Vec<String> {
        buckets
            .filter(|b| !self.accounts.contains_key(*b))
            .map(str::to_string)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.accounts.iter().map(|(b, a)| (b.as_str(), a.as_str()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PayoutBatchResult {
    pub distribution_id: Uuid,
    pub status: DistributionStatus,
    /// Latest attempt per bucket.
    pub payouts: BTreeMap<String, Payout>,
}

/// Issues one transfer per bucket and records every attempt in the ledger.
/// Transfer failures end up as `failed` payouts, never as errors.
pub struct PayoutExecutor {
    ledger: Arc<dyn LedgerStore>,
    rail: Arc<dyn TransferRail>,
    accounts: PayoutAccounts,
    transfer_timeout: Duration,
}

impl PayoutExecutor {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        rail: Arc<dyn TransferRail>,
        accounts: PayoutAccounts,
        transfer_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            rail,
            accounts,
            transfer_timeout,
        }
    }

    pub fn accounts(&self) -> &PayoutAccounts {
        &self.accounts
    }

    /// Pays out every bucket that has no payout yet or whose latest attempt
    /// failed. A bucket left `pending` by the rail is resubmitted under the
    /// reference of that pending attempt so the rail can deduplicate it.
    pub async fn execute(&self, distribution: &Distribution) -> LedgerResult<PayoutBatchResult> {
        let history = self.ledger.list_payouts(distribution.id).await?;
        let latest = latest_payouts(&history);

        let due: Vec<(&str, u32)> = distribution
            .buckets()
            .filter_map(|bucket| match latest.get(bucket) {
                None => Some((bucket, 1)),
                Some(p) => match p.status {
                    PayoutStatus::Failed => Some((bucket, p.attempt + 1)),
                    PayoutStatus::Pending => Some((bucket, p.attempt)),
                    PayoutStatus::Completed => None,
                },
            })
            .collect();

        if due.is_empty() {
            tracing::debug!(distribution_id = %distribution.id, "Nothing to pay out");
        }

        let results = join_all(
            due.into_iter()
                .map(|(bucket, attempt)| self.pay_bucket(distribution, bucket, attempt)),
        )
        .await;

        for result in results {
            match result {
                Ok(_) => {}
                Err(LedgerError::BucketAlreadySettled { bucket, .. }) => {
                    tracing::warn!(
                        distribution_id = %distribution.id,
                        bucket = %bucket,
                        "Bucket settled concurrently, attempt discarded"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        self.summarize(distribution).await
    }

    /// Reloads the distribution and resubmits only its failed or pending buckets.
    pub async fn retry(&self, distribution_id: Uuid) -> LedgerResult<PayoutBatchResult> {
        let distribution = self.ledger.get_distribution(distribution_id).await?;
        tracing::info!(distribution_id = %distribution_id, "Retrying failed payouts");
        self.execute(&distribution).await
    }

    /// Current status of a distribution without issuing transfers.
    pub async fn summarize(&self, distribution: &Distribution) -> LedgerResult<PayoutBatchResult> {
        let history = self.ledger.list_payouts(distribution.id).await?;
        let latest = latest_payouts(&history);
        Ok(PayoutBatchResult {
            distribution_id: distribution.id,
            status: DistributionStatus::derive(distribution, &latest),
            payouts: latest,
        })
    }

    async fn pay_bucket(
        &self,
        distribution: &Distribution,
        bucket: &str,
        attempt: u32,
    ) -> LedgerResult<Payout> {
        let reference = format!("{}:{}:{}", distribution.id, bucket, attempt);
        let amount = distribution
            .share(bucket)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownBucket {
                distribution_id: distribution.id,
                bucket: bucket.to_string(),
            })?;

        let record = match self.accounts.account_for(bucket) {
            None => PayoutRecord {
                bucket: bucket.to_string(),
                account_id: String::new(),
                status: PayoutStatus::Failed,
                reference: None,
                failure_reason: Some(format!("no payout account configured for '{}'", bucket)),
            },
            Some(account_id) if amount.is_zero() => PayoutRecord {
                bucket: bucket.to_string(),
                account_id: account_id.to_string(),
                status: PayoutStatus::Completed,
                reference: None,
                failure_reason: None,
            },
            Some(account_id) => {
                let request = TransferRequest {
                    account_id: account_id.to_string(),
                    amount: amount.clone(),
                    reference: reference.clone(),
                };
                let (status, transfer_id, failure_reason) =
                    match tokio::time::timeout(self.transfer_timeout, self.rail.transfer(request))
                        .await
                    {
                        Ok(Ok(response)) => {
                            (response.status, response.transfer_id, response.failure_reason)
                        }
                        Ok(Err(e)) => (PayoutStatus::Failed, None, Some(e.to_string())),
                        Err(_) => (
                            PayoutStatus::Failed,
                            None,
                            Some(format!(
                                "transfer timed out after {}ms",
                                self.transfer_timeout.as_millis()
                            )),
                        ),
                    };
                PayoutRecord {
                    bucket: bucket.to_string(),
                    account_id: account_id.to_string(),
                    status,
                    reference: transfer_id,
                    failure_reason,
                }
            }
        };

        match record.status {
            PayoutStatus::Failed => tracing::warn!(
                distribution_id = %distribution.id,
                bucket = %bucket,
                attempt,
                reason = record.failure_reason.as_deref().unwrap_or(""),
                "Payout failed"
            ),
            status => tracing::info!(
                distribution_id = %distribution.id,
                bucket = %bucket,
                attempt,
                amount = %amount,
                status = %status,
                idempotency_ref = %reference,
                "Payout recorded"
            ),
        }

        self.ledger.record_payout(distribution.id, record).await
    }
}
