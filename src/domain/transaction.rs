//! Transaction domain entity.
//! One customer charge, finalized exactly once by the gateway's answer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// The gateway's verdict on a charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Completed { external_id: String },
    Failed {
        reason: String,
        external_id: Option<String>,
    },
}

impl ChargeOutcome {
    pub fn status(&self) -> TransactionStatus {
        match self {
            ChargeOutcome::Completed { .. } => TransactionStatus::Completed,
            ChargeOutcome::Failed { .. } => TransactionStatus::Failed,
        }
    }

    pub fn external_id(&self) -> Option<&str> {
        match self {
            ChargeOutcome::Completed { external_id } => Some(external_id),
            ChargeOutcome::Failed { external_id, .. } => external_id.as_deref(),
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            ChargeOutcome::Completed { .. } => None,
            ChargeOutcome::Failed { reason, .. } => Some(reason),
        }
    }
}

/// Domain entity representing a transaction.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    pub amount: Money,
    pub customer_ref: String,
    pub status: TransactionStatus,
    pub gateway_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn new(amount: Money, customer_ref: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            amount,
            customer_ref,
            status: TransactionStatus::Pending,
            gateway_reference: None,
            failure_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Returns the finalized copy. Callers check `status` first; the ledger
    /// is the only place that applies this.
    pub fn finalized(&self, outcome: &ChargeOutcome, at: DateTime<Utc>) -> Self {
        Self {
            status: outcome.status(),
            gateway_reference: outcome.external_id().map(str::to_string),
            failure_reason: outcome.failure_reason().map(str::to_string),
            completed_at: Some(at),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Currency;

    #[test]
    fn test_new_transaction_is_pending() {
        let tx = Transaction::new(Money::from_minor(1_000, Currency::zar()), "cust-1".into());
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(tx.completed_at.is_none());
    }

    #[test]
    fn test_finalized_failed_keeps_reason() {
        let tx = Transaction::new(Money::from_minor(1_000, Currency::zar()), "cust-1".into());
        let failed = tx.finalized(
            &ChargeOutcome::Failed {
                reason: "card declined".into(),
                external_id: None,
            },
            Utc::now(),
        );
        assert_eq!(failed.status, TransactionStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("card declined"));
        assert_eq!(failed.id, tx.id);
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Completed,
            TransactionStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TransactionStatus>().unwrap(), status);
        }
        assert!("refunded".parse::<TransactionStatus>().is_err());
    }
}
