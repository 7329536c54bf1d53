//! End-to-end payment flow: charge, finalize, split, pay out.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    ChargeOutcome, Currency, Distribution, DistributionStatus, Money, MoneyError, Transaction,
    TransactionStatus,
};
use crate::gateway::{ChargeRequest, ChargeResponse, ChargeStatus, PaymentGateway};
use crate::ports::{LedgerError, LedgerStore};
use crate::services::distributor::{split, SplitPlan};
use crate::services::payout_executor::{PayoutBatchResult, PayoutExecutor};

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid customer reference: {0}")]
    InvalidCustomer(String),

    #[error("Invalid gateway callback: {0}")]
    InvalidCallback(String),

    #[error("Payment {transaction_id} failed: {reason}")]
    GatewayFailure { transaction_id: Uuid, reason: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<MoneyError> for PaymentError {
    fn from(err: MoneyError) -> Self {
        PaymentError::InvalidAmount(err.to_string())
    }
}

/// Returned for every successful charge.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentReceipt {
    pub transaction: Transaction,
    pub distribution: Distribution,
    pub settlement: PayoutBatchResult,
}

/// Asynchronous notification from the gateway about a charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayCallback {
    pub transaction_id: Uuid,
    pub status: ChargeStatus,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum CallbackDisposition {
    Applied { status: TransactionStatus },
    Discarded { current_status: TransactionStatus },
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchCharge {
    pub amount: BigDecimal,
    pub customer_ref: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub customer_ref: String,
    pub transaction_id: Option<Uuid>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub attempted: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_charged: Money,
    pub failures: Vec<BatchFailure>,
}

pub struct PaymentService {
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    executor: PayoutExecutor,
    plan: SplitPlan,
    currency: Currency,
    charge_timeout: Duration,
}

impl PaymentService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        executor: PayoutExecutor,
        plan: SplitPlan,
        currency: Currency,
        charge_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            gateway,
            executor,
            plan,
            currency,
            charge_timeout,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    pub fn executor(&self) -> &PayoutExecutor {
        &self.executor
    }

    pub fn plan(&self) -> &SplitPlan {
        &self.plan
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    /// Charges a customer and, on success, splits and pays out the amount.
    ///
    /// A declined, failed or timed-out charge is finalized as `failed` and
    /// reported as `GatewayFailure`. Partial payout failures are not errors:
    /// they show up in the receipt's settlement status.
    pub async fn process_payment(
        &self,
        amount: &BigDecimal,
        customer_ref: &str,
    ) -> Result<PaymentReceipt, PaymentError> {
        let customer_ref = customer_ref.trim();
        if customer_ref.is_empty() {
            return Err(PaymentError::InvalidCustomer(
                "customer_ref must not be empty".to_string(),
            ));
        }
        let amount = Money::from_decimal(amount, self.currency.clone())?;

        let tx = self.ledger.record_transaction(&amount, customer_ref).await?;
        tracing::info!(
            transaction_id = %tx.id,
            amount = %tx.amount,
            gateway = self.gateway.name(),
            "Charging customer"
        );

        let request = ChargeRequest {
            transaction_id: tx.id,
            amount: tx.amount.clone(),
            customer_ref: tx.customer_ref.clone(),
        };
        let charge = tokio::time::timeout(self.charge_timeout, self.gateway.charge(request));
        let outcome = match charge.await {
            Ok(Ok(response)) => response.into_outcome(),
            Ok(Err(e)) => ChargeOutcome::Failed {
                reason: e.to_string(),
                external_id: None,
            },
            Err(_) => ChargeOutcome::Failed {
                reason: format!(
                    "gateway did not answer within {}ms",
                    self.charge_timeout.as_millis()
                ),
                external_id: None,
            },
        };

        let tx = match self.ledger.finalize_transaction(tx.id, &outcome).await {
            Ok(tx) => tx,
            Err(LedgerError::AlreadyFinalized { id, status }) => {
                tracing::warn!(
                    transaction_id = %id,
                    status = %status,
                    "Transaction finalized elsewhere before the charge returned"
                );
                self.ledger.get_transaction(id).await?
            }
            Err(e) => return Err(e.into()),
        };

        if tx.status != TransactionStatus::Completed {
            let reason = tx
                .failure_reason
                .clone()
                .unwrap_or_else(|| "payment failed".to_string());
            tracing::warn!(transaction_id = %tx.id, reason = %reason, "Charge failed");
            return Err(PaymentError::GatewayFailure {
                transaction_id: tx.id,
                reason,
            });
        }

        let (distribution, settlement) = self.settle(&tx).await?;
        Ok(PaymentReceipt {
            transaction: tx,
            distribution,
            settlement,
        })
    }

    /// Splits a completed transaction and pays it out. Only the caller that
    /// attaches the distribution issues transfers.
    async fn settle(
        &self,
        tx: &Transaction,
    ) -> Result<(Distribution, PayoutBatchResult), PaymentError> {
        let shares = split(&tx.amount, &self.plan);
        match self.ledger.attach_distribution(tx.id, &shares).await {
            Ok(distribution) => {
                tracing::info!(
                    transaction_id = %tx.id,
                    distribution_id = %distribution.id,
                    "Distribution recorded"
                );
                let settlement = self.executor.execute(&distribution).await?;
                Ok((distribution, settlement))
            }
            Err(LedgerError::DistributionExists(id)) => {
                let distribution = self
                    .ledger
                    .distribution_for_transaction(id)
                    .await?
                    .ok_or(LedgerError::DistributionExists(id))?;
                let settlement = self.executor.summarize(&distribution).await?;
                Ok((distribution, settlement))
            }
            Err(e @ LedgerError::SplitMismatch { .. }) => {
                tracing::error!(transaction_id = %tx.id, error = %e, "Split does not balance");
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Splits and pays out a completed transaction that has no distribution
    /// yet. Returns the existing settlement when one is already attached.
    pub async fn settle_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<(Distribution, PayoutBatchResult), PaymentError> {
        let tx = self.ledger.get_transaction(transaction_id).await?;
        if tx.status != TransactionStatus::Completed {
            return Err(LedgerError::TransactionNotCompleted {
                id: tx.id,
                status: tx.status,
            }
            .into());
        }
        self.settle(&tx).await
    }

    /// Settles completed transactions older than `older_than` that were left
    /// without a distribution.
    pub async fn settle_orphaned(
        &self,
        older_than: Duration,
    ) -> Result<Vec<PayoutBatchResult>, PaymentError> {
        let cutoff = self.cutoff(older_than)?;
        let epoch = DateTime::<Utc>::from(std::time::UNIX_EPOCH);

        let completed = self
            .ledger
            .query_transactions(epoch, cutoff, Some(TransactionStatus::Completed))
            .await?;
        let ids: Vec<Uuid> = completed.iter().map(|tx| tx.id).collect();
        let attached: HashSet<Uuid> = self
            .ledger
            .distributions_for_transactions(&ids)
            .await?
            .into_iter()
            .map(|d| d.transaction_id)
            .collect();

        let mut settled = Vec::new();
        for tx in completed.iter().filter(|tx| !attached.contains(&tx.id)) {
            tracing::warn!(transaction_id = %tx.id, "Completed transaction has no distribution");
            let (_, settlement) = self.settle(tx).await?;
            settled.push(settlement);
        }
        Ok(settled)
    }

    /// Applies a gateway notification. A notification for a transaction that
    /// is already terminal is logged and discarded.
    pub async fn handle_gateway_callback(
        &self,
        callback: GatewayCallback,
    ) -> Result<CallbackDisposition, PaymentError> {
        let transaction_id = callback.transaction_id;
        let untraceable = callback
            .external_id
            .as_deref()
            .map_or(true, |id| id.trim().is_empty());
        if callback.status == ChargeStatus::Completed && untraceable {
            return Err(PaymentError::InvalidCallback(
                "completed callback without external_id".to_string(),
            ));
        }
        let outcome = ChargeResponse {
            status: callback.status,
            external_id: callback.external_id,
            failure_reason: callback.failure_reason,
        }
        .into_outcome();

        match self.ledger.finalize_transaction(transaction_id, &outcome).await {
            Ok(tx) => {
                tracing::info!(
                    transaction_id = %tx.id,
                    status = %tx.status,
                    "Gateway callback applied"
                );
                if tx.status == TransactionStatus::Completed {
                    self.settle(&tx).await?;
                }
                Ok(CallbackDisposition::Applied { status: tx.status })
            }
            Err(LedgerError::AlreadyFinalized { id, status }) => {
                tracing::warn!(
                    transaction_id = %id,
                    current_status = %status,
                    reported_status = %outcome.status(),
                    "Late gateway callback discarded"
                );
                if status == TransactionStatus::Completed
                    && self.ledger.distribution_for_transaction(id).await?.is_none()
                {
                    tracing::warn!(
                        transaction_id = %id,
                        "Settling completed transaction on redelivery"
                    );
                    self.settle_transaction(id).await?;
                }
                Ok(CallbackDisposition::Discarded {
                    current_status: status,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Charges many customers with at most `concurrency` charges in flight.
    pub async fn process_batch(
        &self,
        charges: Vec<BatchCharge>,
        concurrency: usize,
    ) -> BatchSummary {
        let attempted = charges.len();
        let results: Vec<(String, Result<PaymentReceipt, PaymentError>)> = stream::iter(charges)
            .map(|charge| async move {
                let result = self.process_payment(&charge.amount, &charge.customer_ref).await;
                (charge.customer_ref, result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut summary = BatchSummary {
            attempted,
            completed: 0,
            failed: 0,
            total_charged: Money::zero(self.currency.clone()),
            failures: Vec::new(),
        };

        for (customer_ref, result) in results {
            match result {
                Ok(receipt) => {
                    summary.completed += 1;
                    let amount = &receipt.transaction.amount;
                    match summary.total_charged.checked_add(amount) {
                        Some(total) => summary.total_charged = total,
                        None => tracing::warn!(
                            transaction_id = %receipt.transaction.id,
                            "Batch total overflowed, amount left out of the summary"
                        ),
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    let transaction_id = match &e {
                        PaymentError::GatewayFailure { transaction_id, .. } => {
                            Some(*transaction_id)
                        }
                        _ => None,
                    };
                    summary.failures.push(BatchFailure {
                        customer_ref,
                        transaction_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            attempted = summary.attempted,
            completed = summary.completed,
            failed = summary.failed,
            total = %summary.total_charged,
            "Batch charge finished"
        );
        summary
    }

    /// Charges still inside their gateway timeout are never touched: any
    /// age shorter than the charge timeout is raised to it.
    fn cutoff(&self, older_than: Duration) -> Result<DateTime<Utc>, PaymentError> {
        let age = chrono::Duration::from_std(older_than.max(self.charge_timeout))
            .map_err(|e| LedgerError::InvalidWindow(e.to_string()))?;
        Ok(Utc::now() - age)
    }

    /// Fails every `pending` transaction created more than `older_than` ago.
    pub async fn expire_stale_pending(
        &self,
        older_than: Duration,
    ) -> Result<Vec<Transaction>, PaymentError> {
        let cutoff = self.cutoff(older_than)?;
        let epoch = DateTime::<Utc>::from(std::time::UNIX_EPOCH);

        let stale = self
            .ledger
            .query_transactions(epoch, cutoff, Some(TransactionStatus::Pending))
            .await?;

        let outcome = ChargeOutcome::Failed {
            reason: format!(
                "expired: no gateway outcome within {}s",
                older_than.max(self.charge_timeout).as_secs()
            ),
            external_id: None,
        };

        let mut expired = Vec::new();
        for tx in stale {
            match self.ledger.finalize_transaction(tx.id, &outcome).await {
                Ok(tx) => {
                    tracing::info!(transaction_id = %tx.id, "Expired stale pending transaction");
                    expired.push(tx);
                }
                Err(LedgerError::AlreadyFinalized { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(expired)
    }

    /// Distributions with their derived payout status, newest first.
    pub async fn list_settlements(
        &self,
        status: Option<DistributionStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PayoutBatchResult>, PaymentError> {
        let distributions = self.ledger.list_distributions(limit, offset).await?;
        let mut results = Vec::with_capacity(distributions.len());
        for distribution in &distributions {
            let summary = self.executor.summarize(distribution).await?;
            if status.map_or(true, |s| s == summary.status) {
                results.push(summary);
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryLedger;
    use crate::gateway::{ChargeMode, FakeGateway};
    use crate::services::payout_executor::PayoutAccounts;
    use std::str::FromStr;

    fn service(
        gateway: &FakeGateway,
        ledger: &InMemoryLedger,
        charge_timeout_ms: u64,
    ) -> PaymentService {
        let ledger: Arc<dyn LedgerStore> = Arc::new(ledger.clone());
        let executor = PayoutExecutor::new(
            ledger.clone(),
            Arc::new(gateway.clone()),
            PayoutAccounts::parse("owner=1,ai_operations=2,reserve=3").unwrap(),
            Duration::from_secs(1),
        );
        PaymentService::new(
            ledger,
            Arc::new(gateway.clone()),
            executor,
            SplitPlan::parse("owner=0.60,ai_operations=0.20,reserve=0.20", "owner").unwrap(),
            Currency::zar(),
            Duration::from_millis(charge_timeout_ms),
        )
    }

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn test_successful_payment_is_split_and_settled() {
        let gateway = FakeGateway::new();
        let ledger = InMemoryLedger::new();
        let service = service(&gateway, &ledger, 1_000);

        let receipt = service.process_payment(&dec("2497.00"), "cust-1").await.unwrap();

        assert_eq!(receipt.transaction.status, TransactionStatus::Completed);
        assert!(receipt.transaction.gateway_reference.is_some());
        assert_eq!(receipt.distribution.shares["owner"].amount_string(), "1498.20");
        assert_eq!(receipt.distribution.shares["reserve"].amount_string(), "499.40");
        assert_eq!(receipt.settlement.status, DistributionStatus::Settled);
    }

    #[tokio::test]
    async fn test_declined_payment_has_no_distribution() {
        let gateway = FakeGateway::new();
        gateway.set_charge_mode(ChargeMode::Decline("insufficient funds".into()));
        let ledger = InMemoryLedger::new();
        let service = service(&gateway, &ledger, 1_000);

        let err = service.process_payment(&dec("10.00"), "cust-1").await.unwrap_err();
        let PaymentError::GatewayFailure { transaction_id, reason } = err else {
            panic!("expected gateway failure");
        };
        assert_eq!(reason, "insufficient funds");

        let tx = ledger.get_transaction(transaction_id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);
        assert!(ledger
            .distribution_for_transaction(transaction_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_gateway() {
        let gateway = FakeGateway::new();
        let ledger = InMemoryLedger::new();
        let service = service(&gateway, &ledger, 1_000);

        assert!(matches!(
            service.process_payment(&dec("0"), "cust").await,
            Err(PaymentError::InvalidAmount(_))
        ));
        assert!(matches!(
            service.process_payment(&dec("1.001"), "cust").await,
            Err(PaymentError::InvalidAmount(_))
        ));
        assert!(matches!(
            service.process_payment(&dec("5.00"), "  ").await,
            Err(PaymentError::InvalidCustomer(_))
        ));
        assert!(gateway.charges().await.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_then_late_callback_is_discarded() {
        let gateway = FakeGateway::new();
        gateway.set_charge_mode(ChargeMode::Hang);
        let ledger = InMemoryLedger::new();
        let service = service(&gateway, &ledger, 20);

        let err = service.process_payment(&dec("50.00"), "cust").await.unwrap_err();
        let PaymentError::GatewayFailure { transaction_id, .. } = err else {
            panic!("expected gateway failure");
        };

        let disposition = service
            .handle_gateway_callback(GatewayCallback {
                transaction_id,
                status: ChargeStatus::Completed,
                external_id: Some("late".into()),
                failure_reason: None,
            })
            .await
            .unwrap();

        assert_eq!(
            disposition,
            CallbackDisposition::Discarded {
                current_status: TransactionStatus::Failed
            }
        );
        let tx = ledger.get_transaction(transaction_id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);
        assert!(ledger
            .distribution_for_transaction(transaction_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_callback_completes_pending_transaction() {
        let gateway = FakeGateway::new();
        let ledger = InMemoryLedger::new();
        let service = service(&gateway, &ledger, 1_000);
        let tx = ledger
            .record_transaction(&Money::from_minor(1_000, Currency::zar()), "cust")
            .await
            .unwrap();

        let disposition = service
            .handle_gateway_callback(GatewayCallback {
                transaction_id: tx.id,
                status: ChargeStatus::Completed,
                external_id: Some("EXT-7".into()),
                failure_reason: None,
            })
            .await
            .unwrap();

        assert_eq!(
            disposition,
            CallbackDisposition::Applied {
                status: TransactionStatus::Completed
            }
        );
        let distribution = ledger
            .distribution_for_transaction(tx.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(distribution.shares["owner"].minor(), 600);
        assert_eq!(gateway.transfers().await.len(), 3);
    }

    #[tokio::test]
    async fn test_batch_summary() {
        let gateway = FakeGateway::new();
        let ledger = InMemoryLedger::new();
        let service = service(&gateway, &ledger, 1_000);

        let charges = vec![
            BatchCharge { amount: dec("100.00"), customer_ref: "a".into() },
            BatchCharge { amount: dec("250.50"), customer_ref: "b".into() },
            BatchCharge { amount: dec("-1"), customer_ref: "c".into() },
        ];
        let summary = service.process_batch(charges, 2).await;

        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total_charged.amount_string(), "350.50");
        assert_eq!(summary.failures[0].customer_ref, "c");
    }

    #[tokio::test]
    async fn test_expire_stale_pending() {
        let gateway = FakeGateway::new();
        let ledger = InMemoryLedger::new();
        let service = service(&gateway, &ledger, 20);
        let tx = ledger
            .record_transaction(&Money::from_minor(500, Currency::zar()), "cust")
            .await
            .unwrap();

        let none = service.expire_stale_pending(Duration::from_secs(3600)).await.unwrap();
        assert!(none.is_empty());

        tokio::time::sleep(Duration::from_millis(40)).await;

        let expired = service.expire_stale_pending(Duration::ZERO).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, tx.id);
        assert_eq!(expired[0].status, TransactionStatus::Failed);

        let again = service.expire_stale_pending(Duration::ZERO).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_expire_never_touches_charge_in_flight() {
        let gateway = FakeGateway::new();
        let ledger = InMemoryLedger::new();
        let service = service(&gateway, &ledger, 1_000);
        let tx = ledger
            .record_transaction(&Money::from_minor(500, Currency::zar()), "cust")
            .await
            .unwrap();

        let expired = service.expire_stale_pending(Duration::ZERO).await.unwrap();
        assert!(expired.is_empty());
        let tx = ledger.get_transaction(tx.id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_completed_callback_without_external_id_is_rejected() {
        let gateway = FakeGateway::new();
        let ledger = InMemoryLedger::new();
        let service = service(&gateway, &ledger, 1_000);
        let tx = ledger
            .record_transaction(&Money::from_minor(1_000, Currency::zar()), "cust")
            .await
            .unwrap();

        for external_id in [None, Some("  ".to_string())] {
            let result = service
                .handle_gateway_callback(GatewayCallback {
                    transaction_id: tx.id,
                    status: ChargeStatus::Completed,
                    external_id,
                    failure_reason: None,
                })
                .await;
            assert!(matches!(result, Err(PaymentError::InvalidCallback(_))));
        }

        let tx = ledger.get_transaction(tx.id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
    }

    /// Delegates to an in-memory ledger but fails the next `attach_distribution`.
    #[derive(Clone)]
    struct FlakyAttachLedger {
        inner: InMemoryLedger,
        fail_next_attach: Arc<std::sync::atomic::AtomicBool>,
    }

    impl FlakyAttachLedger {
        fn new(inner: &InMemoryLedger) -> Self {
            Self {
                inner: inner.clone(),
                fail_next_attach: Arc::new(std::sync::atomic::AtomicBool::new(true)),
            }
        }
    }

    #[async_trait::async_trait]
    impl LedgerStore for FlakyAttachLedger {
        async fn ping(&self) -> crate::ports::LedgerResult<()> {
            self.inner.ping().await
        }

        async fn record_transaction(
            &self,
            amount: &Money,
            customer_ref: &str,
        ) -> crate::ports::LedgerResult<Transaction> {
            self.inner.record_transaction(amount, customer_ref).await
        }

        async fn finalize_transaction(
            &self,
            id: Uuid,
            outcome: &ChargeOutcome,
        ) -> crate::ports::LedgerResult<Transaction> {
            self.inner.finalize_transaction(id, outcome).await
        }

        async fn attach_distribution(
            &self,
            transaction_id: Uuid,
            shares: &std::collections::BTreeMap<String, Money>,
        ) -> crate::ports::LedgerResult<Distribution> {
            if self
                .fail_next_attach
                .swap(false, std::sync::atomic::Ordering::SeqCst)
            {
                return Err(LedgerError::Storage("connection reset".to_string()));
            }
            self.inner.attach_distribution(transaction_id, shares).await
        }

        async fn record_payout(
            &self,
            distribution_id: Uuid,
            record: crate::domain::PayoutRecord,
        ) -> crate::ports::LedgerResult<crate::domain::Payout> {
            self.inner.record_payout(distribution_id, record).await
        }

        async fn query_transactions(
            &self,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
            status: Option<TransactionStatus>,
        ) -> crate::ports::LedgerResult<Vec<Transaction>> {
            self.inner.query_transactions(since, until, status).await
        }

        async fn get_transaction(&self, id: Uuid) -> crate::ports::LedgerResult<Transaction> {
            self.inner.get_transaction(id).await
        }

        async fn get_distribution(&self, id: Uuid) -> crate::ports::LedgerResult<Distribution> {
            self.inner.get_distribution(id).await
        }

        async fn distribution_for_transaction(
            &self,
            transaction_id: Uuid,
        ) -> crate::ports::LedgerResult<Option<Distribution>> {
            self.inner.distribution_for_transaction(transaction_id).await
        }

        async fn distributions_for_transactions(
            &self,
            transaction_ids: &[Uuid],
        ) -> crate::ports::LedgerResult<Vec<Distribution>> {
            self.inner.distributions_for_transactions(transaction_ids).await
        }

        async fn list_distributions(
            &self,
            limit: i64,
            offset: i64,
        ) -> crate::ports::LedgerResult<Vec<Distribution>> {
            self.inner.list_distributions(limit, offset).await
        }

        async fn list_payouts(
            &self,
            distribution_id: Uuid,
        ) -> crate::ports::LedgerResult<Vec<crate::domain::Payout>> {
            self.inner.list_payouts(distribution_id).await
        }
    }

    fn flaky_service(
        gateway: &FakeGateway,
        ledger: &FlakyAttachLedger,
        charge_timeout_ms: u64,
    ) -> PaymentService {
        let store: Arc<dyn LedgerStore> = Arc::new(ledger.clone());
        let executor = PayoutExecutor::new(
            store.clone(),
            Arc::new(gateway.clone()),
            PayoutAccounts::parse("owner=1,ai_operations=2,reserve=3").unwrap(),
            Duration::from_secs(1),
        );
        PaymentService::new(
            store,
            Arc::new(gateway.clone()),
            executor,
            SplitPlan::parse("owner=0.60,ai_operations=0.20,reserve=0.20", "owner").unwrap(),
            Currency::zar(),
            Duration::from_millis(charge_timeout_ms),
        )
    }

    /// Charges one customer against a ledger whose first attach fails and
    /// returns the id of the completed transaction left without a split.
    async fn orphaned_charge(service: &PaymentService, ledger: &InMemoryLedger) -> Uuid {
        let err = service.process_payment(&dec("100.00"), "cust").await.unwrap_err();
        assert!(matches!(err, PaymentError::Ledger(LedgerError::Storage(_))));

        let completed = ledger
            .query_transactions(
                DateTime::<Utc>::from(std::time::UNIX_EPOCH),
                Utc::now() + chrono::Duration::seconds(1),
                Some(TransactionStatus::Completed),
            )
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        let id = completed[0].id;
        assert!(ledger.distribution_for_transaction(id).await.unwrap().is_none());
        id
    }

    #[tokio::test]
    async fn test_settle_transaction_recovers_failed_attach() {
        let gateway = FakeGateway::new();
        let ledger = InMemoryLedger::new();
        let flaky = FlakyAttachLedger::new(&ledger);
        let service = flaky_service(&gateway, &flaky, 1_000);
        let id = orphaned_charge(&service, &ledger).await;

        let (distribution, settlement) = service.settle_transaction(id).await.unwrap();
        assert_eq!(distribution.transaction_id, id);
        assert_eq!(settlement.status, DistributionStatus::Settled);
        assert_eq!(gateway.transfers().await.len(), 3);

        // A second call reports the same settlement without paying again.
        let (again, _) = service.settle_transaction(id).await.unwrap();
        assert_eq!(again.id, distribution.id);
        assert_eq!(gateway.transfers().await.len(), 3);
        assert_eq!(gateway.charges().await.len(), 1);
    }

    #[tokio::test]
    async fn test_settle_transaction_requires_completed() {
        let gateway = FakeGateway::new();
        let ledger = InMemoryLedger::new();
        let service = service(&gateway, &ledger, 1_000);
        let tx = ledger
            .record_transaction(&Money::from_minor(500, Currency::zar()), "cust")
            .await
            .unwrap();

        assert!(matches!(
            service.settle_transaction(tx.id).await,
            Err(PaymentError::Ledger(LedgerError::TransactionNotCompleted { .. }))
        ));
    }

    #[tokio::test]
    async fn test_redelivered_callback_settles_orphaned_transaction() {
        let gateway = FakeGateway::new();
        let ledger = InMemoryLedger::new();
        let flaky = FlakyAttachLedger::new(&ledger);
        let service = flaky_service(&gateway, &flaky, 1_000);
        let id = orphaned_charge(&service, &ledger).await;

        let disposition = service
            .handle_gateway_callback(GatewayCallback {
                transaction_id: id,
                status: ChargeStatus::Completed,
                external_id: Some("CH-000001".into()),
                failure_reason: None,
            })
            .await
            .unwrap();

        assert_eq!(
            disposition,
            CallbackDisposition::Discarded {
                current_status: TransactionStatus::Completed
            }
        );
        assert!(ledger.distribution_for_transaction(id).await.unwrap().is_some());
        assert_eq!(gateway.transfers().await.len(), 3);
    }

    #[tokio::test]
    async fn test_settle_orphaned_finds_completed_without_distribution() {
        let gateway = FakeGateway::new();
        let ledger = InMemoryLedger::new();
        let flaky = FlakyAttachLedger::new(&ledger);
        let service = flaky_service(&gateway, &flaky, 20);
        let id = orphaned_charge(&service, &ledger).await;
        service.process_payment(&dec("10.00"), "other").await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let settled = service.settle_orphaned(Duration::ZERO).await.unwrap();

        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].status, DistributionStatus::Settled);
        let distribution = ledger.distribution_for_transaction(id).await.unwrap().unwrap();
        assert_eq!(distribution.id, settled[0].distribution_id);

        let again = service.settle_orphaned(Duration::ZERO).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_list_settlements_filters_by_status() {
        let gateway = FakeGateway::new();
        gateway.fail_account("3", "closed");
        let ledger = InMemoryLedger::new();
        let service = service(&gateway, &ledger, 1_000);

        service.process_payment(&dec("10.00"), "a").await.unwrap();
        let partial = service
            .list_settlements(Some(DistributionStatus::Partial), 50, 0)
            .await
            .unwrap();
        assert_eq!(partial.len(), 1);
        let settled = service
            .list_settlements(Some(DistributionStatus::Settled), 50, 0)
            .await
            .unwrap();
        assert!(settled.is_empty());
    }
}
