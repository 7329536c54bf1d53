use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::Currency;
use crate::services::{PayoutAccounts, SplitPlan};

pub const DEFAULT_SPLIT_RATIOS: &str = "owner=0.60,ai_operations=0.20,reserve=0.20";
pub const DEFAULT_REMAINDER_BUCKET: &str = "owner";
pub const DEFAULT_PAYOUT_ACCOUNTS: &str =
    "owner=6212345678901,ai_operations=6212345678902,reserve=6212345678903";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    Postgres,
    Memory,
}

impl FromStr for LedgerBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(LedgerBackend::Postgres),
            "memory" => Ok(LedgerBackend::Memory),
            other => anyhow::bail!(
                "LEDGER_BACKEND must be 'postgres' or 'memory', got '{}'",
                other
            ),
        }
    }
}

impl fmt::Display for LedgerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerBackend::Postgres => write!(f, "postgres"),
            LedgerBackend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub ledger_backend: LedgerBackend,
    pub database_url: Option<String>,
    /// Bank API base URL. Without it the built-in fake gateway is used.
    pub gateway_url: Option<String>,
    pub gateway_api_key: Option<String>,
    pub gateway_webhook_secret: Option<String>,
    pub gateway_timeout: Duration,
    pub transfer_timeout: Duration,
    pub currency: Currency,
    pub split_plan: SplitPlan,
    pub payout_accounts: PayoutAccounts,
    pub operator_api_key: Option<String>,
    pub pending_expiry: Duration,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_vars<F>(var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            var(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let millis = |key: &str, default: u64| -> Result<Duration> {
            let value = match non_empty(key) {
                Some(v) => v.parse().with_context(|| format!("{} must be milliseconds", key))?,
                None => default,
            };
            Ok(Duration::from_millis(value))
        };

        let ledger_backend = match non_empty("LEDGER_BACKEND") {
            Some(v) => v.parse()?,
            None => LedgerBackend::Postgres,
        };
        let database_url = non_empty("DATABASE_URL");
        if ledger_backend == LedgerBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL is required when LEDGER_BACKEND=postgres");
        }

        let currency_code = non_empty("CURRENCY").unwrap_or_else(|| "ZAR".to_string());
        let currency = Currency::from_code(&currency_code)
            .context("CURRENCY is not a valid ISO 4217 code")?;

        let split_plan = SplitPlan::parse(
            &non_empty("SPLIT_RATIOS").unwrap_or_else(|| DEFAULT_SPLIT_RATIOS.to_string()),
            &non_empty("SPLIT_REMAINDER_BUCKET")
                .unwrap_or_else(|| DEFAULT_REMAINDER_BUCKET.to_string()),
        )
        .context("invalid SPLIT_RATIOS")?;

        let payout_accounts = PayoutAccounts::parse(
            &non_empty("PAYOUT_ACCOUNTS").unwrap_or_else(|| DEFAULT_PAYOUT_ACCOUNTS.to_string()),
        )
        .context("invalid PAYOUT_ACCOUNTS")?;

        let pending_expiry_secs: u64 = match non_empty("PENDING_EXPIRY_SECS") {
            Some(v) => v.parse().context("PENDING_EXPIRY_SECS must be seconds")?,
            None => 900,
        };

        let log_format = match non_empty("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Config {
            server_port: non_empty("SERVER_PORT")
                .unwrap_or_else(|| "3000".to_string())
                .parse()
                .context("SERVER_PORT must be a port number")?,
            ledger_backend,
            database_url,
            gateway_url: non_empty("GATEWAY_URL"),
            gateway_api_key: non_empty("GATEWAY_API_KEY"),
            gateway_webhook_secret: non_empty("GATEWAY_WEBHOOK_SECRET"),
            gateway_timeout: millis("GATEWAY_TIMEOUT_MS", 30_000)?,
            transfer_timeout: millis("TRANSFER_TIMEOUT_MS", 30_000)?,
            currency,
            split_plan,
            payout_accounts,
            operator_api_key: non_empty("OPERATOR_API_KEY"),
            pending_expiry: Duration::from_secs(pending_expiry_secs),
            log_format,
        })
    }

    /// Configuration for tests and local runs: in-memory ledger, fake gateway.
    pub fn in_memory() -> anyhow::Result<Self> {
        Self::from_vars(|key| (key == "LEDGER_BACKEND").then(|| "memory".to_string()))
    }
}
