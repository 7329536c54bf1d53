//! External payment capabilities: the charge gateway and the transfer rail.
//! The core only sees these traits; implementations live in submodules.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{ChargeOutcome, Money, PayoutStatus};

pub mod fake;
pub mod http;

pub use fake::{ChargeMode, FakeGateway, TransferMode};
pub use http::HttpGateway;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Gateway answered with status {0}")]
    Upstream(u16),
    #[error("Invalid response from gateway: {0}")]
    InvalidResponse(String),
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub transaction_id: Uuid,
    pub amount: Money,
    pub customer_ref: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeResponse {
    pub status: ChargeStatus,
    pub external_id: Option<String>,
    pub failure_reason: Option<String>,
}

impl ChargeResponse {
    pub fn into_outcome(self) -> ChargeOutcome {
        match self.status {
            ChargeStatus::Completed => ChargeOutcome::Completed {
                external_id: self.external_id.unwrap_or_default(),
            },
            ChargeStatus::Failed => ChargeOutcome::Failed {
                reason: self
                    .failure_reason
                    .unwrap_or_else(|| "declined by gateway".to_string()),
                external_id: self.external_id,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub account_id: String,
    pub amount: Money,
    /// Idempotency reference: `<distribution_id>:<bucket>:<attempt>`.
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResponse {
    pub status: PayoutStatus,
    pub transfer_id: Option<String>,
    pub failure_reason: Option<String>,
}

#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn charge(&self, request: ChargeRequest) -> Result<ChargeResponse, GatewayError>;
}

#[async_trait::async_trait]
pub trait TransferRail: Send + Sync {
    async fn transfer(&self, request: TransferRequest) -> Result<TransferResponse, GatewayError>;
}
