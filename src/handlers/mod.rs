pub mod callback;
pub mod distributions;
pub mod payments;
pub mod revenue;

use crate::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub ledger: String,
    pub backend: String,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let ledger_status = match state.ledger.ping().await {
        Ok(_) => "connected",
        Err(e) => {
            tracing::warn!("Ledger health check failed: {}", e);
            "disconnected"
        }
    };
    let healthy = ledger_status == "connected";

    let health_response = HealthStatus {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ledger: ledger_status.to_string(),
        backend: state.config.ledger_backend.to_string(),
    };

    // Return 503 if the ledger is unreachable, 200 otherwise
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health_response))
}
