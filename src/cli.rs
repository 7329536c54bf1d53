use bigdecimal::BigDecimal;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{DistributionStatus, ReportPeriod};
use crate::services::BatchCharge;
use crate::AppState;

#[derive(Parser)]
#[command(name = "costbyte-ledger")]
#[command(about = "CostByte payment distribution and revenue ledger", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Transaction management commands
    #[command(subcommand)]
    Tx(TxCommands),

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Payout management commands
    #[command(subcommand)]
    Payouts(PayoutCommands),

    /// Revenue reporting
    #[command(subcommand)]
    Revenue(RevenueCommands),

    /// Batch charging
    #[command(subcommand)]
    Charges(ChargeCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// Fail pending transactions older than the given age
    Expire {
        /// Age in seconds; defaults to PENDING_EXPIRY_SECS
        #[arg(long)]
        older_than_secs: Option<u64>,
    },

    /// Split and pay out a completed transaction left without a distribution
    Settle {
        /// Transaction UUID
        #[arg(value_name = "TRANSACTION_ID")]
        transaction_id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum PayoutCommands {
    /// Resubmit the failed buckets of a distribution
    Retry {
        /// Distribution UUID
        #[arg(value_name = "DISTRIBUTION_ID")]
        distribution_id: Uuid,
    },

    /// List distributions that are not fully settled
    Unsettled {
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
}

#[derive(Subcommand)]
pub enum RevenueCommands {
    /// Revenue for the current day, week or month
    Report {
        #[arg(short, long, default_value = "month")]
        period: String,
    },
}

#[derive(Subcommand)]
pub enum ChargeCommands {
    /// Charge every row of a CSV file with `amount,customer_ref` columns
    Import {
        #[arg(value_name = "CSV")]
        path: std::path::PathBuf,

        /// Charges in flight at once
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },
}

pub async fn handle_tx_expire(
    state: &AppState,
    older_than_secs: Option<u64>,
) -> anyhow::Result<()> {
    let older_than = older_than_secs
        .map(Duration::from_secs)
        .unwrap_or(state.config.pending_expiry);

    let expired = state.payments.expire_stale_pending(older_than).await?;
    for tx in &expired {
        println!("✓ Transaction {} ({}) marked as failed", tx.id, tx.amount);
    }
    println!("{} pending transaction(s) expired", expired.len());
    Ok(())
}

pub async fn handle_tx_settle(state: &AppState, transaction_id: Uuid) -> anyhow::Result<()> {
    let (distribution, settlement) = state.payments.settle_transaction(transaction_id).await?;
    println!(
        "Transaction {} -> distribution {} is {}",
        transaction_id, distribution.id, settlement.status
    );
    for (bucket, payout) in &settlement.payouts {
        println!("  {:<16} {:<10} {}", bucket, payout.status, payout.amount);
    }
    Ok(())
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set"))?;
    let pool = crate::db::create_pool(url).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;

    println!("✓ Database migrations completed");
    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Ledger Backend: {}", config.ledger_backend);
    if let Some(url) = &config.database_url {
        println!("  Database URL: {}", mask_password(url));
    }
    println!(
        "  Gateway URL: {}",
        config.gateway_url.as_deref().unwrap_or("(built-in fake gateway)")
    );
    println!("  Currency: {}", config.currency);
    println!("  Split:");
    for bucket in config.split_plan.buckets() {
        if let Some(ratio) = config.split_plan.ratio(bucket) {
            println!(
                "    {} = {} -> {}",
                bucket,
                ratio,
                config.payout_accounts.account_for(bucket).unwrap_or("(no account)")
            );
        }
    }
    println!("  Remainder bucket: {}", config.split_plan.remainder_bucket());

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

pub async fn handle_payouts_retry(state: &AppState, distribution_id: Uuid) -> anyhow::Result<()> {
    let result = state.payments.executor().retry(distribution_id).await?;
    println!("Distribution {} is {}", result.distribution_id, result.status);
    for (bucket, payout) in &result.payouts {
        println!(
            "  {:<16} attempt {:<3} {:<10} {}",
            bucket,
            payout.attempt,
            payout.status,
            payout.failure_reason.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

pub async fn handle_payouts_unsettled(state: &AppState, limit: i64) -> anyhow::Result<()> {
    let all = state.payments.list_settlements(None, limit, 0).await?;
    let unsettled: Vec<_> = all
        .into_iter()
        .filter(|r| r.status != DistributionStatus::Settled)
        .collect();

    if unsettled.is_empty() {
        println!("No unsettled distributions");
        return Ok(());
    }
    for result in &unsettled {
        println!("{}  {}", result.distribution_id, result.status);
    }
    Ok(())
}

pub async fn handle_revenue_report(state: &AppState, period: &str) -> anyhow::Result<()> {
    let period: ReportPeriod = period.parse().map_err(anyhow::Error::msg)?;
    let window = state.revenue.report(period, chrono::Utc::now()).await?;

    println!("Revenue {} ({} .. {})", window.period_key, window.since, window.until);
    println!("  Total:        {}", window.total_revenue);
    println!("  Transactions: {}", window.transaction_count);
    println!("  Average:      {}", window.average_transaction_value);
    println!("  Previous:     {}", window.previous_total);
    println!("  Growth:       {}", window.growth_rate);
    for (bucket, total) in &window.bucket_totals {
        println!("  {:<16} {}", bucket, total);
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ChargeRow {
    amount: String,
    customer_ref: String,
}

/// Reads `amount,customer_ref` rows. Amounts are parsed as exact decimals.
pub fn read_charges(path: &Path) -> anyhow::Result<Vec<BatchCharge>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
    let mut charges = Vec::new();
    for (line, row) in reader.deserialize::<ChargeRow>().enumerate() {
        let row = row.map_err(|e| anyhow::anyhow!("row {}: {}", line + 1, e))?;
        let amount = BigDecimal::from_str(&row.amount).map_err(|e| {
            anyhow::anyhow!("row {}: invalid amount '{}': {}", line + 1, row.amount, e)
        })?;
        charges.push(BatchCharge {
            amount,
            customer_ref: row.customer_ref,
        });
    }
    Ok(charges)
}

pub async fn handle_charges_import(
    state: &AppState,
    path: &Path,
    concurrency: usize,
) -> anyhow::Result<()> {
    let charges = read_charges(path)?;
    tracing::info!("Importing {} charges from {}", charges.len(), path.display());

    let summary = state.payments.process_batch(charges, concurrency).await;
    println!(
        "Charged {} of {} ({} failed), total {}",
        summary.completed, summary.attempted, summary.failed, summary.total_charged
    );
    for failure in &summary.failures {
        println!("  ❌ {}: {}", failure.customer_ref, failure.reason);
    }
    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user_start = slash_pos + 2;
                let user = &url[user_start..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
