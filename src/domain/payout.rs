use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Completed,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Completed => "completed",
            PayoutStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayoutStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PayoutStatus::Pending),
            "completed" => Ok(PayoutStatus::Completed),
            "failed" => Ok(PayoutStatus::Failed),
            other => Err(format!("unknown payout status: {}", other)),
        }
    }
}

/// One transfer attempt for one bucket. Rows are never updated; a retry
/// appends a new row with the next attempt number.
#[derive(Debug, Clone, Serialize)]
pub struct Payout {
    pub id: Uuid,
    pub distribution_id: Uuid,
    pub bucket: String,
    pub account_id: String,
    pub amount: Money,
    pub status: PayoutStatus,
    pub reference: Option<String>,
    pub failure_reason: Option<String>,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

/// What the payout executor hands to the ledger. The amount is not part of
/// it: the ledger copies it from the stored distribution.
#[derive(Debug, Clone)]
pub struct PayoutRecord {
    pub bucket: String,
    pub account_id: String,
    pub status: PayoutStatus,
    pub reference: Option<String>,
    pub failure_reason: Option<String>,
}
