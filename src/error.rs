use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::ports::LedgerError;
use crate::services::PaymentError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment {transaction_id} failed: {reason}")]
    PaymentFailed { transaction_id: Uuid, reason: String },

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PaymentFailed { .. } => StatusCode::PAYMENT_REQUIRED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidAmount(_) | LedgerError::InvalidWindow(_) => {
                AppError::Validation(err.to_string())
            }
            LedgerError::UnknownTransaction(_)
            | LedgerError::UnknownDistribution(_)
            | LedgerError::UnknownBucket { .. } => AppError::NotFound(err.to_string()),
            LedgerError::AlreadyFinalized { .. }
            | LedgerError::TransactionNotCompleted { .. }
            | LedgerError::DistributionExists(_)
            | LedgerError::BucketAlreadySettled { .. } => AppError::Conflict(err.to_string()),
            LedgerError::SplitMismatch { .. } | LedgerError::Storage(_) => {
                tracing::error!("Ledger failure: {}", err);
                AppError::Internal(err.to_string())
            }
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::InvalidAmount(msg)
            | PaymentError::InvalidCustomer(msg)
            | PaymentError::InvalidCallback(msg) => AppError::Validation(msg),
            PaymentError::GatewayFailure {
                transaction_id,
                reason,
            } => AppError::PaymentFailed {
                transaction_id,
                reason,
            },
            PaymentError::Ledger(e) => e.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            // The gateway's reason stays in the ledger; customers get a retry hint.
            AppError::PaymentFailed { transaction_id, .. } => json!({
                "error": "payment failed, try again",
                "transaction_id": transaction_id,
                "status": status.as_u16(),
            }),
            _ => json!({
                "error": self.to_string(),
                "status": status.as_u16(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionStatus;

    #[test]
    fn test_validation_error_status_code() {
        let error = AppError::Validation("Invalid input".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_error_status_code() {
        let error: AppError = LedgerError::UnknownTransaction(Uuid::new_v4()).into();
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_conflict_status_codes() {
        let id = Uuid::new_v4();
        let errors = [
            LedgerError::AlreadyFinalized {
                id,
                status: TransactionStatus::Failed,
            },
            LedgerError::TransactionNotCompleted {
                id,
                status: TransactionStatus::Pending,
            },
            LedgerError::DistributionExists(id),
            LedgerError::BucketAlreadySettled {
                distribution_id: id,
                bucket: "owner".to_string(),
            },
        ];
        for error in errors {
            assert_eq!(AppError::from(error).status_code(), StatusCode::CONFLICT);
        }
    }

    #[test]
    fn test_split_mismatch_is_internal() {
        let error: AppError = LedgerError::SplitMismatch {
            transaction_id: Uuid::new_v4(),
            expected: "ZAR 10.00".to_string(),
            actual: "ZAR 9.99".to_string(),
        }
        .into();
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_storage_error_status_code() {
        let error: AppError = LedgerError::from(sqlx::Error::RowNotFound).into();
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_invalid_payment_input_is_bad_request() {
        let error: AppError = PaymentError::InvalidAmount("0".to_string()).into();
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_unauthorized_error_status_code() {
        let error = AppError::Unauthorized("Unauthorized access".to_string());
        assert_eq!(error.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_gateway_failure_response() {
        let error: AppError = PaymentError::GatewayFailure {
            transaction_id: Uuid::new_v4(),
            reason: "card declined".to_string(),
        }
        .into();
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[tokio::test]
    async fn test_not_found_error_response() {
        let error = AppError::NotFound("Distribution not found".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
