//! Revenue aggregation. Everything here is a read-only projection of the ledger.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{Currency, Money, ReportPeriod, RevenueWindow, TransactionStatus};
use crate::ports::{LedgerError, LedgerResult, LedgerStore};

/// `(current - previous) / previous`, truncated to 4 decimal places.
/// Zero when there was no previous revenue.
pub fn growth_rate(current: i64, previous: i64) -> BigDecimal {
    if previous == 0 {
        return BigDecimal::from(0).with_scale(4);
    }
    let delta = BigDecimal::from(current) - BigDecimal::from(previous);
    (delta / BigDecimal::from(previous)).with_scale(4)
}

pub struct RevenueAggregator {
    ledger: Arc<dyn LedgerStore>,
    currency: Currency,
}

struct Totals {
    total: i64,
    count: u64,
    ids: Vec<Uuid>,
}

impl RevenueAggregator {
    pub fn new(ledger: Arc<dyn LedgerStore>, currency: Currency) -> Self {
        Self { ledger, currency }
    }

    /// Revenue in `[since, until)` compared with the window of the same
    /// length immediately before it.
    pub async fn aggregate(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> LedgerResult<RevenueWindow> {
        if since >= until {
            return Err(LedgerError::InvalidWindow(format!(
                "since ({}) must be before until ({})",
                since, until
            )));
        }
        let length = until - since;
        let key = format!("{}..{}", since.to_rfc3339(), until.to_rfc3339());
        self.build(key, since, until, since - length, since).await
    }

    /// Revenue for the calendar period containing `at`.
    pub async fn report(
        &self,
        period: ReportPeriod,
        at: DateTime<Utc>,
    ) -> LedgerResult<RevenueWindow> {
        let window = period.window(at).ok_or_else(|| {
            LedgerError::InvalidWindow(format!("no {} period contains {}", period, at))
        })?;
        self.build(
            window.key,
            window.since,
            window.until,
            window.previous_since,
            window.previous_until,
        )
        .await
    }

    async fn build(
        &self,
        period_key: String,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        previous_since: DateTime<Utc>,
        previous_until: DateTime<Utc>,
    ) -> LedgerResult<RevenueWindow> {
        let current = self.totals(since, until).await?;
        let previous = self.totals(previous_since, previous_until).await?;

        let average = if current.count == 0 {
            0
        } else {
            current.total / current.count as i64
        };

        let mut bucket_totals: BTreeMap<String, Money> = BTreeMap::new();
        if !current.ids.is_empty() {
            for distribution in self.ledger.distributions_for_transactions(&current.ids).await? {
                for (bucket, share) in &distribution.shares {
                    add_bucket_share(&mut bucket_totals, &self.currency, bucket, share)?;
                }
            }
        }

        let window = RevenueWindow {
            period_key,
            since,
            until,
            currency: self.currency.clone(),
            total_revenue: Money::from_minor(current.total, self.currency.clone()),
            transaction_count: current.count,
            average_transaction_value: Money::from_minor(average, self.currency.clone()),
            bucket_totals,
            previous_total: Money::from_minor(previous.total, self.currency.clone()),
            growth_rate: growth_rate(current.total, previous.total),
        };

        tracing::debug!(
            period = %window.period_key,
            total = %window.total_revenue,
            count = window.transaction_count,
            "Revenue window computed"
        );
        Ok(window)
    }

    async fn totals(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> LedgerResult<Totals> {
        let transactions = self
            .ledger
            .query_transactions(since, until, Some(TransactionStatus::Completed))
            .await?;

        let mut totals = Totals {
            total: 0,
            count: 0,
            ids: Vec::with_capacity(transactions.len()),
        };
        for tx in transactions {
            if tx.amount.currency() != &self.currency {
                tracing::warn!(
                    transaction_id = %tx.id,
                    currency = %tx.amount.currency(),
                    "Skipping transaction in foreign currency"
                );
                continue;
            }
            totals.total = totals
                .total
                .checked_add(tx.amount.minor())
                .ok_or_else(|| LedgerError::Storage("revenue total overflow".to_string()))?;
            totals.count += 1;
            totals.ids.push(tx.id);
        }
        Ok(totals)
    }
}

/// Adds one share to its bucket total. Overflow fails the report like the
/// revenue total does.
fn add_bucket_share(
    totals: &mut BTreeMap<String, Money>,
    currency: &Currency,
    bucket: &str,
    share: &Money,
) -> LedgerResult<()> {
    let entry = totals
        .entry(bucket.to_string())
        .or_insert_with(|| Money::zero(currency.clone()));
    *entry = entry.checked_add(share).ok_or_else(|| {
        LedgerError::Storage(format!("bucket total overflow for '{}'", bucket))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryLedger;
    use crate::domain::ChargeOutcome;
    use chrono::Duration;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_bucket_total_overflow_is_an_error() {
        let zar = Currency::zar();
        let mut totals = BTreeMap::new();
        add_bucket_share(&mut totals, &zar, "owner", &Money::from_minor(i64::MAX, zar.clone()))
            .unwrap();

        let one = Money::from_minor(1, zar.clone());
        let result = add_bucket_share(&mut totals, &zar, "owner", &one);
        assert!(matches!(result, Err(LedgerError::Storage(_))));

        add_bucket_share(&mut totals, &zar, "reserve", &Money::from_minor(5, zar.clone())).unwrap();
        assert_eq!(totals["reserve"].minor(), 5);
    }

    async fn completed(ledger: &InMemoryLedger, minor: i64, shares: &[(&str, i64)]) {
        let tx = ledger
            .record_transaction(&Money::from_minor(minor, Currency::zar()), "cust")
            .await
            .unwrap();
        ledger
            .finalize_transaction(tx.id, &ChargeOutcome::Completed { external_id: "x".into() })
            .await
            .unwrap();
        if !shares.is_empty() {
            let shares = shares
                .iter()
                .map(|(b, m)| (b.to_string(), Money::from_minor(*m, Currency::zar())))
                .collect();
            ledger.attach_distribution(tx.id, &shares).await.unwrap();
        }
    }

    #[test]
    fn test_growth_rate() {
        assert_eq!(growth_rate(150, 100), dec("0.5"));
        assert_eq!(growth_rate(50, 100), dec("-0.5"));
        assert_eq!(growth_rate(100, 300), dec("-0.6666"));
        assert_eq!(growth_rate(400, 300), dec("0.3333"));
        assert_eq!(growth_rate(999, 0), dec("0"));
        assert_eq!(growth_rate(0, 0), dec("0"));
    }

    #[tokio::test]
    async fn test_aggregate_counts_completed_only() {
        let ledger = InMemoryLedger::new();
        completed(
            &ledger,
            249_700,
            &[("owner", 149_820), ("ai_operations", 49_940), ("reserve", 49_940)],
        )
        .await;
        completed(
            &ledger,
            1_000,
            &[("owner", 600), ("ai_operations", 200), ("reserve", 200)],
        )
        .await;
        let failed = ledger
            .record_transaction(&Money::from_minor(5_000, Currency::zar()), "cust")
            .await
            .unwrap();
        ledger
            .finalize_transaction(
                failed.id,
                &ChargeOutcome::Failed { reason: "declined".into(), external_id: None },
            )
            .await
            .unwrap();
        ledger
            .record_transaction(&Money::from_minor(7_000, Currency::zar()), "cust")
            .await
            .unwrap();

        let aggregator = RevenueAggregator::new(Arc::new(ledger), Currency::zar());
        let now = Utc::now();
        let window = aggregator
            .aggregate(now - Duration::hours(1), now + Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(window.total_revenue.amount_string(), "2507.00");
        assert_eq!(window.transaction_count, 2);
        assert_eq!(window.average_transaction_value.amount_string(), "1253.50");
        assert_eq!(window.bucket_totals["owner"].amount_string(), "1504.20");
        assert_eq!(window.bucket_totals["reserve"].amount_string(), "501.40");
        assert!(window.previous_total.is_zero());
        assert_eq!(window.growth_rate, dec("0"));
    }

    #[tokio::test]
    async fn test_empty_window() {
        let aggregator = RevenueAggregator::new(Arc::new(InMemoryLedger::new()), Currency::zar());
        let window = aggregator.report(ReportPeriod::Month, Utc::now()).await.unwrap();
        assert_eq!(window.transaction_count, 0);
        assert!(window.total_revenue.is_zero());
        assert!(window.average_transaction_value.is_zero());
        assert!(window.bucket_totals.is_empty());
    }

    #[tokio::test]
    async fn test_inverted_window_is_rejected() {
        let aggregator = RevenueAggregator::new(Arc::new(InMemoryLedger::new()), Currency::zar());
        let now = Utc::now();
        let result = aggregator.aggregate(now, now - Duration::hours(1)).await;
        assert!(matches!(result, Err(LedgerError::InvalidWindow(_))));
    }

    #[tokio::test]
    async fn test_aggregate_is_repeatable() {
        let ledger = InMemoryLedger::new();
        completed(&ledger, 1_000, &[]).await;
        let aggregator = RevenueAggregator::new(Arc::new(ledger), Currency::zar());
        let now = Utc::now();
        let (since, until) = (now - Duration::minutes(5), now + Duration::minutes(5));

        let first = aggregator.aggregate(since, until).await.unwrap();
        let second = aggregator.aggregate(since, until).await.unwrap();
        assert_eq!(first, second);
    }
}
