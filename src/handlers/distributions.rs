//! Operator endpoints. Mounted behind `middleware::auth::operator_auth`.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{Distribution, DistributionStatus, Transaction};
use crate::error::AppError;
use crate::services::PayoutBatchResult;
use crate::validation::{validate_enum, DISTRIBUTION_STATUSES};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DistributionDetail {
    pub distribution: Distribution,
    pub settlement: PayoutBatchResult,
}

#[derive(Debug, Deserialize)]
pub struct ExpireQuery {
    pub older_than_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ExpireResponse {
    pub expired: usize,
    pub transactions: Vec<Transaction>,
}

pub async fn list_distributions(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let status = match params.status.as_deref() {
        Some(raw) => {
            validate_enum("status", raw, DISTRIBUTION_STATUSES)?;
            Some(raw.parse::<DistributionStatus>().map_err(AppError::Validation)?)
        }
        None => None,
    };
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let offset = params.offset.unwrap_or(0).max(0);

    let results = state.payments.list_settlements(status, limit, offset).await?;
    Ok(Json(results))
}

pub async fn get_distribution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let distribution = state.ledger.get_distribution(id).await?;
    let settlement = state.payments.executor().summarize(&distribution).await?;

    Ok(Json(DistributionDetail {
        distribution,
        settlement,
    }))
}

pub async fn retry_distribution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let result = state.payments.executor().retry(id).await?;
    tracing::info!(distribution_id = %id, status = %result.status, "Operator retry finished");
    Ok(Json(result))
}

/// Splits and pays out a completed transaction that has no distribution.
pub async fn settle_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let (distribution, settlement) = state.payments.settle_transaction(id).await?;
    tracing::info!(
        transaction_id = %id,
        distribution_id = %distribution.id,
        status = %settlement.status,
        "Operator settle finished"
    );
    Ok(Json(DistributionDetail {
        distribution,
        settlement,
    }))
}

/// Ages below the gateway timeout are raised to it by the payment service.
pub async fn expire_pending(
    State(state): State<AppState>,
    Query(params): Query<ExpireQuery>,
) -> Result<impl IntoResponse, AppError> {
    let older_than = params
        .older_than_secs
        .map(Duration::from_secs)
        .unwrap_or(state.config.pending_expiry);

    let transactions = state.payments.expire_stale_pending(older_than).await?;
    Ok(Json(ExpireResponse {
        expired: transactions.len(),
        transactions,
    }))
}
