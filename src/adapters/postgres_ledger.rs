//! Postgres implementation of LedgerStore.
//! Every write runs inside a database transaction that locks the row it
//! depends on with `SELECT ... FOR UPDATE`.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::{
    ChargeOutcome, Currency, Distribution, Money, Payout, PayoutRecord, PayoutStatus,
    Transaction, TransactionStatus,
};
use crate::ports::{verify_split, LedgerError, LedgerResult, LedgerStore};

/// Postgres-backed ledger.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    async fn ping(&self) -> LedgerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
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

        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            INSERT INTO ledger_transactions (
                id, amount, currency, customer_ref, status,
                gateway_reference, failure_reason, created_at, completed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(tx.id)
        .bind(tx.amount.to_decimal())
        .bind(tx.amount.currency().code())
        .bind(&tx.customer_ref)
        .bind(tx.status.as_str())
        .bind(&tx.gateway_reference)
        .bind(&tx.failure_reason)
        .bind(tx.created_at)
        .bind(tx.completed_at)
        .fetch_one(&self.pool)
        .await?;

        row.into_domain()
    }

    async fn finalize_transaction(
        &self,
        id: Uuid,
        outcome: &ChargeOutcome,
    ) -> LedgerResult<Transaction> {
        let mut db_tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM ledger_transactions WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *db_tx)
        .await?
        .ok_or(LedgerError::UnknownTransaction(id))?
        .into_domain()?;

        if current.status != TransactionStatus::Pending {
            return Err(LedgerError::AlreadyFinalized {
                id,
                status: current.status,
            });
        }

        let finalized = current.finalized(outcome, Utc::now());
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            UPDATE ledger_transactions
            SET status = $2, gateway_reference = $3, failure_reason = $4, completed_at = $5
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(finalized.status.as_str())
        .bind(&finalized.gateway_reference)
        .bind(&finalized.failure_reason)
        .bind(finalized.completed_at)
        .fetch_one(&mut *db_tx)
        .await?;

        db_tx.commit().await?;
        row.into_domain()
    }

    async fn attach_distribution(
        &self,
        transaction_id: Uuid,
        shares: &BTreeMap<String, Money>,
    ) -> LedgerResult<Distribution> {
        let mut db_tx = self.pool.begin().await?;

        let tx = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM ledger_transactions WHERE id = $1 FOR UPDATE",
        )
        .bind(transaction_id)
        .fetch_optional(&mut *db_tx)
        .await?
        .ok_or(LedgerError::UnknownTransaction(transaction_id))?
        .into_domain()?;

        if tx.status != TransactionStatus::Completed {
            return Err(LedgerError::TransactionNotCompleted {
                id: transaction_id,
                status: tx.status,
            });
        }

        let existing: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM distributions WHERE transaction_id = $1")
                .bind(transaction_id)
                .fetch_optional(&mut *db_tx)
                .await?;
        if existing.is_some() {
            return Err(LedgerError::DistributionExists(transaction_id));
        }

        verify_split(&tx, shares)?;

        let distribution =
            Distribution::new(transaction_id, tx.amount.currency().clone(), shares.clone());
        let stored_shares: BTreeMap<String, String> = distribution
            .shares
            .iter()
            .map(|(bucket, amount)| (bucket.clone(), amount.amount_string()))
            .collect();

        let row = sqlx::query_as::<_, DistributionRow>(
            r#"
            INSERT INTO distributions (id, transaction_id, currency, shares, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(distribution.id)
        .bind(distribution.transaction_id)
        .bind(distribution.currency.code())
        .bind(Json(stored_shares))
        .bind(distribution.created_at)
        .fetch_one(&mut *db_tx)
        .await?;

        db_tx.commit().await?;
        row.into_domain()
    }

    async fn record_payout(
        &self,
        distribution_id: Uuid,
        record: PayoutRecord,
    ) -> LedgerResult<Payout> {
        let mut db_tx = self.pool.begin().await?;

        let distribution = sqlx::query_as::<_, DistributionRow>(
            "SELECT * FROM distributions WHERE id = $1 FOR UPDATE",
        )
        .bind(distribution_id)
        .fetch_optional(&mut *db_tx)
        .await?
        .ok_or(LedgerError::UnknownDistribution(distribution_id))?
        .into_domain()?;

        let amount = distribution
            .share(&record.bucket)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownBucket {
                distribution_id,
                bucket: record.bucket.clone(),
            })?;

        let last = sqlx::query_as::<_, PayoutRow>(
            r#"
            SELECT * FROM payouts
            WHERE distribution_id = $1 AND bucket = $2
            ORDER BY attempt DESC
            LIMIT 1
            "#,
        )
        .bind(distribution_id)
        .bind(&record.bucket)
        .fetch_optional(&mut *db_tx)
        .await?;

        let attempt = match last {
            Some(ref row) if row.status == PayoutStatus::Completed.as_str() => {
                return Err(LedgerError::BucketAlreadySettled {
                    distribution_id,
                    bucket: record.bucket,
                });
            }
            Some(row) => row.attempt + 1,
            None => 1,
        };

        let row = sqlx::query_as::<_, PayoutRow>(
            r#"
            INSERT INTO payouts (
                id, distribution_id, bucket, account_id, amount, currency,
                status, reference, failure_reason, attempt, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(distribution_id)
        .bind(&record.bucket)
        .bind(&record.account_id)
        .bind(amount.to_decimal())
        .bind(amount.currency().code())
        .bind(record.status.as_str())
        .bind(&record.reference)
        .bind(&record.failure_reason)
        .bind(attempt)
        .bind(Utc::now())
        .fetch_one(&mut *db_tx)
        .await?;

        db_tx.commit().await?;
        row.into_domain()
    }

    async fn query_transactions(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        status: Option<TransactionStatus>,
    ) -> LedgerResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT * FROM ledger_transactions
            WHERE created_at >= $1 AND created_at < $2
            AND ($3::VARCHAR IS NULL OR status = $3)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(since)
        .bind(until)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn get_transaction(&self, id: Uuid) -> LedgerResult<Transaction> {
        sqlx::query_as::<_, TransactionRow>("SELECT * FROM ledger_transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::UnknownTransaction(id))?
            .into_domain()
    }

    async fn get_distribution(&self, id: Uuid) -> LedgerResult<Distribution> {
        sqlx::query_as::<_, DistributionRow>("SELECT * FROM distributions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::UnknownDistribution(id))?
            .into_domain()
    }

    async fn distribution_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> LedgerResult<Option<Distribution>> {
        sqlx::query_as::<_, DistributionRow>(
            "SELECT * FROM distributions WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?
        .map(DistributionRow::into_domain)
        .transpose()
    }

    async fn distributions_for_transactions(
        &self,
        transaction_ids: &[Uuid],
    ) -> LedgerResult<Vec<Distribution>> {
        let rows = sqlx::query_as::<_, DistributionRow>(
            "SELECT * FROM distributions WHERE transaction_id = ANY($1)",
        )
        .bind(transaction_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DistributionRow::into_domain).collect()
    }

    async fn list_distributions(&self, limit: i64, offset: i64) -> LedgerResult<Vec<Distribution>> {
        let rows = sqlx::query_as::<_, DistributionRow>(
            "SELECT * FROM distributions ORDER BY created_at DESC, id ASC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DistributionRow::into_domain).collect()
    }

    async fn list_payouts(&self, distribution_id: Uuid) -> LedgerResult<Vec<Payout>> {
        // Distinguish "no payouts yet" from "no such distribution".
        self.get_distribution(distribution_id).await?;

        let rows = sqlx::query_as::<_, PayoutRow>(
            "SELECT * FROM payouts WHERE distribution_id = $1 ORDER BY created_at ASC, attempt ASC",
        )
        .bind(distribution_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PayoutRow::into_domain).collect()
    }
}

fn currency(code: &str) -> LedgerResult<Currency> {
    Currency::from_code(code).map_err(|e| LedgerError::Storage(e.to_string()))
}

fn stored_money(amount: &BigDecimal, code: &str) -> LedgerResult<Money> {
    Money::from_stored_decimal(amount, currency(code)?)
        .map_err(|e| LedgerError::Storage(e.to_string()))
}

fn parse_status<T: FromStr<Err = String>>(value: &str) -> LedgerResult<T> {
    value.parse::<T>().map_err(LedgerError::Storage)
}

/// Internal row types for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    amount: BigDecimal,
    currency: String,
    customer_ref: String,
    status: String,
    gateway_reference: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TransactionRow {
    fn into_domain(self) -> LedgerResult<Transaction> {
        Ok(Transaction {
            id: self.id,
            amount: stored_money(&self.amount, &self.currency)?,
            customer_ref: self.customer_ref,
            status: parse_status(&self.status)?,
            gateway_reference: self.gateway_reference,
            failure_reason: self.failure_reason,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DistributionRow {
    id: Uuid,
    transaction_id: Uuid,
    currency: String,
    shares: Json<BTreeMap<String, String>>,
    created_at: DateTime<Utc>,
}

impl DistributionRow {
    fn into_domain(self) -> LedgerResult<Distribution> {
        let currency = currency(&self.currency)?;
        let shares = self
            .shares
            .0
            .into_iter()
            .map(|(bucket, raw)| {
                let amount = BigDecimal::from_str(&raw)
                    .map_err(|e| LedgerError::Storage(format!("share '{}': {}", bucket, e)))?;
                let money = Money::from_stored_decimal(&amount, currency.clone())
                    .map_err(|e| LedgerError::Storage(e.to_string()))?;
                Ok((bucket, money))
            })
            .collect::<LedgerResult<BTreeMap<String, Money>>>()?;

        Ok(Distribution {
            id: self.id,
            transaction_id: self.transaction_id,
            currency,
            shares,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PayoutRow {
    id: Uuid,
    distribution_id: Uuid,
    bucket: String,
    account_id: String,
    amount: BigDecimal,
    currency: String,
    status: String,
    reference: Option<String>,
    failure_reason: Option<String>,
    attempt: i32,
    created_at: DateTime<Utc>,
}

impl PayoutRow {
    fn into_domain(self) -> LedgerResult<Payout> {
        Ok(Payout {
            id: self.id,
            distribution_id: self.distribution_id,
            amount: stored_money(&self.amount, &self.currency)?,
            bucket: self.bucket,
            account_id: self.account_id,
            status: parse_status::<PayoutStatus>(&self.status)?,
            reference: self.reference,
            failure_reason: self.failure_reason,
            attempt: self.attempt.max(0) as u32,
            created_at: self.created_at,
        })
    }
}
