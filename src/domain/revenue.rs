//! Revenue reporting windows.
//! A `RevenueWindow` is always recomputed from the ledger and never stored.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::money::{Currency, Money};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportPeriod {
    Day,
    Week,
    Month,
}

impl FromStr for ReportPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day" | "daily" => Ok(ReportPeriod::Day),
            "week" | "weekly" => Ok(ReportPeriod::Week),
            "month" | "monthly" => Ok(ReportPeriod::Month),
            other => Err(format!("unknown period '{}', use day, week or month", other)),
        }
    }
}

impl fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReportPeriod::Day => "day",
            ReportPeriod::Week => "week",
            ReportPeriod::Month => "month",
        };
        f.write_str(s)
    }
}

/// Calendar bounds of a reporting period and the one before it.
/// Ranges are half-open: `[since, until)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodWindow {
    pub key: String,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub previous_since: DateTime<Utc>,
    pub previous_until: DateTime<Utc>,
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn first_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

impl ReportPeriod {
    /// The UTC calendar period containing `at`. ISO weeks start on Monday.
    pub fn window(&self, at: DateTime<Utc>) -> Option<PeriodWindow> {
        let date = at.date_naive();
        match self {
            ReportPeriod::Day => {
                let since = midnight(date);
                Some(PeriodWindow {
                    key: date.format("%Y-%m-%d").to_string(),
                    since,
                    until: since + Duration::days(1),
                    previous_since: since - Duration::days(1),
                    previous_until: since,
                })
            }
            ReportPeriod::Week => {
                let monday =
                    date - Duration::days(date.weekday().num_days_from_monday() as i64);
                let since = midnight(monday);
                let iso = date.iso_week();
                Some(PeriodWindow {
                    key: format!("{}-W{:02}", iso.year(), iso.week()),
                    since,
                    until: since + Duration::weeks(1),
                    previous_since: since - Duration::weeks(1),
                    previous_until: since,
                })
            }
            ReportPeriod::Month => {
                let (year, month) = (date.year(), date.month());
                let (next_year, next) = next_month(year, month);
                let (prev_year, prev) = previous_month(year, month);
                let since = midnight(first_of_month(year, month)?);
                Some(PeriodWindow {
                    key: format!("{}-{:02}", year, month),
                    since,
                    until: midnight(first_of_month(next_year, next)?),
                    previous_since: midnight(first_of_month(prev_year, prev)?),
                    previous_until: since,
                })
            }
        }
    }
}

/// Aggregated revenue for one window, compared with the preceding one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevenueWindow {
    pub period_key: String,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub currency: Currency,
    pub total_revenue: Money,
    pub transaction_count: u64,
    pub average_transaction_value: Money,
    pub bucket_totals: BTreeMap<String, Money>,
    pub previous_total: Money,
    pub growth_rate: BigDecimal,
}
