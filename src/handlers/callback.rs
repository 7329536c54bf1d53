use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

use crate::error::AppError;
use crate::services::GatewayCallback;
use crate::validation::validate_external_id;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Gateway-Signature";

#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    NotConfigured,
    MissingSignature,
    InvalidSignatureFormat,
    InvalidSecret,
    SignatureMismatch,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::NotConfigured => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Gateway callbacks are not configured",
            ),
            AuthError::MissingSignature => {
                (StatusCode::UNAUTHORIZED, "Missing X-Gateway-Signature header")
            }
            AuthError::InvalidSignatureFormat => {
                (StatusCode::UNAUTHORIZED, "Signature must be hex encoded")
            }
            AuthError::InvalidSecret => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Invalid webhook secret")
            }
            AuthError::SignatureMismatch => (StatusCode::UNAUTHORIZED, "Invalid signature"),
        };

        (
            status,
            Json(json!({ "error": message, "status": status.as_u16() })),
        )
            .into_response()
    }
}

/// Hex HMAC-SHA256 of `body`, as the gateway sends it.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, AuthError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidSecret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify the signature using constant-time comparison
pub fn verify_signature(
    secret: &str,
    body: &[u8],
    signature_header: &str,
) -> Result<(), AuthError> {
    let expected_signature =
        hex::decode(signature_header.trim()).map_err(|_| AuthError::InvalidSignatureFormat)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidSecret)?;
    mac.update(body);

    mac.verify_slice(&expected_signature)
        .map_err(|_| AuthError::SignatureMismatch)
}

pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Response> {
    let secret = state
        .config
        .gateway_webhook_secret
        .as_deref()
        .ok_or_else(|| AuthError::NotConfigured.into_response())?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AuthError::MissingSignature.into_response())?;

    if let Err(e) = verify_signature(secret, &body, signature) {
        tracing::warn!("Rejected gateway callback: {:?}", e);
        return Err(e.into_response());
    }

    let payload: GatewayCallback = serde_json::from_slice(&body).map_err(|e| {
        AppError::BadRequest(format!("invalid callback payload: {}", e)).into_response()
    })?;
    if let Some(external_id) = &payload.external_id {
        validate_external_id(external_id).map_err(|e| AppError::from(e).into_response())?;
    }

    let disposition = state
        .payments
        .handle_gateway_callback(payload)
        .await
        .map_err(|e| AppError::from(e).into_response())?;

    Ok((StatusCode::OK, Json(disposition)).into_response())
}
