use crate::adapters::{InMemoryLedger, PostgresLedger};
use crate::config::{Config, LedgerBackend};
use crate::gateway::{FakeGateway, HttpGateway, PaymentGateway, TransferRail};
use crate::ports::LedgerStore;
use crate::validation::validate_account_id;
use crate::{db, AppState};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

pub struct ValidationReport {
    pub environment: bool,
    pub ledger: bool,
    pub gateway: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.ledger && self.gateway
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Ledger Connectivity:   {}", status(self.ledger));
        println!("Gateway Connectivity:  {}", status(self.gateway));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

/// Opens the configured ledger. The Postgres ledger is migrated before use.
pub async fn build_ledger(config: &Config) -> Result<Arc<dyn LedgerStore>> {
    match config.ledger_backend {
        LedgerBackend::Memory => {
            tracing::warn!("Using the in-memory ledger; records are lost on restart");
            Ok(Arc::new(InMemoryLedger::new()))
        }
        LedgerBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres ledger")?;
            let pool = db::create_pool(url).await?;
            db::run_migrations(&pool).await?;
            Ok(Arc::new(PostgresLedger::new(pool)))
        }
    }
}

pub fn build_gateway(config: &Config) -> (Arc<dyn PaymentGateway>, Arc<dyn TransferRail>) {
    match &config.gateway_url {
        Some(url) => {
            let gateway = HttpGateway::new(url.clone(), config.gateway_api_key.clone());
            tracing::info!("Payment gateway client initialized with URL: {}", url);
            (Arc::new(gateway.clone()), Arc::new(gateway))
        }
        None => {
            tracing::warn!(
                "GATEWAY_URL not set, charges and transfers go to the built-in fake gateway"
            );
            let fake = FakeGateway::new();
            (Arc::new(fake.clone()), Arc::new(fake))
        }
    }
}

pub async fn build_state(config: Config) -> Result<AppState> {
    let ledger = build_ledger(&config).await?;
    let (gateway, rail) = build_gateway(&config);
    Ok(AppState::new(config, ledger, gateway, rail))
}

pub async fn validate_environment(
    config: &Config,
    ledger: &dyn LedgerStore,
) -> Result<ValidationReport> {
    let mut report = ValidationReport {
        environment: true,
        ledger: true,
        gateway: true,
        errors: Vec::new(),
    };

    // Validate environment variables
    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Err(e) = ledger.ping().await {
        report.ledger = false;
        report.errors.push(format!("Ledger: {}", e));
    }

    if let Some(url) = &config.gateway_url {
        if let Err(e) = validate_gateway(url).await {
            report.gateway = false;
            report.errors.push(format!("Gateway: {}", e));
        }
    }

    Ok(report)
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }

    if let Some(url) = &config.database_url {
        url::Url::parse(url).context("DATABASE_URL is not a valid URL")?;
    }

    if let Some(url) = &config.gateway_url {
        url::Url::parse(url).context("GATEWAY_URL is not a valid URL")?;
        if config.gateway_webhook_secret.is_none() {
            anyhow::bail!("GATEWAY_WEBHOOK_SECRET is required when GATEWAY_URL is set");
        }
    }

    let missing = config.payout_accounts.missing(config.split_plan.buckets());
    if !missing.is_empty() {
        anyhow::bail!("PAYOUT_ACCOUNTS has no account for: {}", missing.join(", "));
    }

    for (bucket, account) in config.payout_accounts.iter() {
        validate_account_id(account).with_context(|| format!("account for bucket '{}'", bucket))?;
    }

    if config.gateway_timeout.is_zero() || config.transfer_timeout.is_zero() {
        anyhow::bail!("GATEWAY_TIMEOUT_MS and TRANSFER_TIMEOUT_MS must be greater than 0");
    }

    // The sweeper must not fail a charge the gateway may still approve.
    if config.pending_expiry <= config.gateway_timeout {
        anyhow::bail!(
            "PENDING_EXPIRY_SECS ({}s) must be longer than GATEWAY_TIMEOUT_MS ({}ms)",
            config.pending_expiry.as_secs(),
            config.gateway_timeout.as_millis()
        );
    }

    Ok(())
}

/// Any HTTP answer counts as reachable; only transport errors fail.
async fn validate_gateway(gateway_url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    client
        .get(gateway_url)
        .send()
        .await
        .context("Failed to connect to payment gateway")?;

    Ok(())
}
