use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Distribution, Transaction};
use crate::error::AppError;
use crate::validation::{sanitize_string, validate_customer_ref, validate_positive_amount};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePaymentRequest {
    pub amount: BigDecimal,
    pub customer_ref: String,
}

#[derive(Debug, Serialize)]
pub struct TransactionDetail {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub distribution: Option<Distribution>,
}

pub async fn create_payment(
    State(state): State<AppState>,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_positive_amount(&payload.amount)?;
    validate_customer_ref(&payload.customer_ref)?;
    let customer_ref = sanitize_string(&payload.customer_ref);

    let receipt = state
        .payments
        .process_payment(&payload.amount, &customer_ref)
        .await?;

    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let transaction = state.ledger.get_transaction(id).await?;
    let distribution = state.ledger.distribution_for_transaction(id).await?;

    Ok(Json(TransactionDetail {
        transaction,
        distribution,
    }))
}
