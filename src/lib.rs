pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod ports;
pub mod services;
pub mod startup;
pub mod validation;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

use crate::config::Config;
use crate::gateway::{PaymentGateway, TransferRail};
use crate::ports::LedgerStore;
use crate::services::{PaymentService, PayoutExecutor, RevenueAggregator};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ledger: Arc<dyn LedgerStore>,
    pub payments: Arc<PaymentService>,
    pub revenue: Arc<RevenueAggregator>,
}

impl AppState {
    /// Wires the services around one ledger, one charge gateway and one transfer rail.
    pub fn new(
        config: Config,
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        rail: Arc<dyn TransferRail>,
    ) -> Self {
        let executor = PayoutExecutor::new(
            ledger.clone(),
            rail,
            config.payout_accounts.clone(),
            config.transfer_timeout,
        );
        let payments = PaymentService::new(
            ledger.clone(),
            gateway,
            executor,
            config.split_plan.clone(),
            config.currency.clone(),
            config.gateway_timeout,
        );
        let revenue = RevenueAggregator::new(ledger.clone(), config.currency.clone());

        Self {
            config: Arc::new(config),
            ledger,
            payments: Arc::new(payments),
            revenue: Arc::new(revenue),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let operator_routes = Router::new()
        .route("/distributions", get(handlers::distributions::list_distributions))
        .route("/distributions/:id", get(handlers::distributions::get_distribution))
        .route(
            "/distributions/:id/retry",
            post(handlers::distributions::retry_distribution),
        )
        .route("/transactions/expire", post(handlers::distributions::expire_pending))
        .route(
            "/transactions/:id/settle",
            post(handlers::distributions::settle_transaction),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::operator_auth,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/payments", post(handlers::payments::create_payment))
        .route("/transactions/:id", get(handlers::payments::get_transaction))
        .route("/callback", post(handlers::callback::callback))
        .route("/revenue", get(handlers::revenue::get_revenue_report))
        .route("/revenue/window", get(handlers::revenue::get_revenue_window))
        .merge(operator_routes)
        .with_state(state)
}
