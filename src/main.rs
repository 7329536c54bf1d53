use clap::Parser;
use costbyte_ledger::cli::{
    ChargeCommands, Cli, Commands, DbCommands, PayoutCommands, RevenueCommands, TxCommands,
};
use costbyte_ledger::config::{Config, LogFormat};
use costbyte_ledger::services::PendingSweeper;
use costbyte_ledger::{cli, create_app, startup};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let config = Config::from_env()?;

    // Setup logging
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => {
            let state = startup::build_state(config).await?;
            let report = startup::validate_environment(&state.config, state.ledger.as_ref()).await?;
            report.print();
            if !report.is_valid() {
                anyhow::bail!("Configuration validation failed");
            }
            cli::handle_config_validate(&state.config)
        }
        Commands::Tx(TxCommands::Expire { older_than_secs }) => {
            let state = startup::build_state(config).await?;
            cli::handle_tx_expire(&state, older_than_secs).await
        }
        Commands::Tx(TxCommands::Settle { transaction_id }) => {
            let state = startup::build_state(config).await?;
            cli::handle_tx_settle(&state, transaction_id).await
        }
        Commands::Payouts(PayoutCommands::Retry { distribution_id }) => {
            let state = startup::build_state(config).await?;
            cli::handle_payouts_retry(&state, distribution_id).await
        }
        Commands::Payouts(PayoutCommands::Unsettled { limit }) => {
            let state = startup::build_state(config).await?;
            cli::handle_payouts_unsettled(&state, limit).await
        }
        Commands::Revenue(RevenueCommands::Report { period }) => {
            let state = startup::build_state(config).await?;
            cli::handle_revenue_report(&state, &period).await
        }
        Commands::Charges(ChargeCommands::Import { path, concurrency }) => {
            let state = startup::build_state(config).await?;
            cli::handle_charges_import(&state, &path, concurrency).await
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let state = startup::build_state(config).await?;

    let report = startup::validate_environment(&state.config, state.ledger.as_ref()).await?;
    if !report.is_valid() {
        report.print();
        anyhow::bail!("Startup validation failed");
    }

    // Sweep stale pending transactions at a fraction of their expiry age
    let sweep_every = (state.config.pending_expiry / 4).max(Duration::from_secs(5));
    PendingSweeper::new(state.payments.clone(), sweep_every, state.config.pending_expiry).start();
    tracing::info!(
        "Pending sweeper started (every {:?}, max age {:?})",
        sweep_every,
        state.config.pending_expiry
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.server_port));
    let app = create_app(state);
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
