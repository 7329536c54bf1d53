//! Deterministic gateway used by tests and local runs without a bank.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{
    ChargeRequest, ChargeResponse, ChargeStatus, GatewayError, PaymentGateway, TransferRail,
    TransferRequest, TransferResponse,
};
use crate::domain::PayoutStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeMode {
    Approve,
    Decline(String),
    /// Never answers; the caller's timeout decides.
    Hang,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferMode {
    Complete,
    Fail(String),
    /// Accepted by the rail but not yet booked.
    Pending,
    Hang,
}

#[derive(Clone)]
pub struct FakeGateway {
    charge_mode: Arc<ArcSwap<ChargeMode>>,
    account_modes: Arc<ArcSwap<HashMap<String, TransferMode>>>,
    charges: Arc<Mutex<Vec<ChargeRequest>>>,
    transfers: Arc<Mutex<Vec<TransferRequest>>>,
    sequence: Arc<AtomicU64>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            charge_mode: Arc::new(ArcSwap::from_pointee(ChargeMode::Approve)),
            account_modes: Arc::new(ArcSwap::from_pointee(HashMap::new())),
            charges: Arc::new(Mutex::new(Vec::new())),
            transfers: Arc::new(Mutex::new(Vec::new())),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_charge_mode(&self, mode: ChargeMode) {
        self.charge_mode.store(Arc::new(mode));
    }

    pub fn set_transfer_mode(&self, account_id: &str, mode: TransferMode) {
        let mut modes = HashMap::clone(&self.account_modes.load());
        if mode == TransferMode::Complete {
            modes.remove(account_id);
        } else {
            modes.insert(account_id.to_string(), mode);
        }
        self.account_modes.store(Arc::new(modes));
    }

    pub fn fail_account(&self, account_id: &str, reason: &str) {
        self.set_transfer_mode(account_id, TransferMode::Fail(reason.to_string()));
    }

    pub fn heal_account(&self, account_id: &str) {
        self.set_transfer_mode(account_id, TransferMode::Complete);
    }

    pub async fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().await.clone()
    }

    pub async fn transfers(&self) -> Vec<TransferRequest> {
        self.transfers.lock().await.clone()
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{:06}", prefix, n)
    }
}

#[async_trait::async_trait]
impl PaymentGateway for FakeGateway {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn charge(&self, request: ChargeRequest) -> Result<ChargeResponse, GatewayError> {
        self.charges.lock().await.push(request);

        let mode = self.charge_mode.load_full();
        match mode.as_ref() {
            ChargeMode::Approve => Ok(ChargeResponse {
                status: ChargeStatus::Completed,
                external_id: Some(self.next_id("CH")),
                failure_reason: None,
            }),
            ChargeMode::Decline(reason) => Ok(ChargeResponse {
                status: ChargeStatus::Failed,
                external_id: Some(self.next_id("CH")),
                failure_reason: Some(reason.clone()),
            }),
            ChargeMode::Hang => std::future::pending().await,
            ChargeMode::Error(message) => Err(GatewayError::Unavailable(message.clone())),
        }
    }
}

#[async_trait::async_trait]
impl TransferRail for FakeGateway {
    async fn transfer(&self, request: TransferRequest) -> Result<TransferResponse, GatewayError> {
        let mode = self
            .account_modes
            .load()
            .get(&request.account_id)
            .cloned()
            .unwrap_or(TransferMode::Complete);
        self.transfers.lock().await.push(request);

        match mode {
            TransferMode::Complete => Ok(TransferResponse {
                status: PayoutStatus::Completed,
                transfer_id: Some(self.next_id("TR")),
                failure_reason: None,
            }),
            TransferMode::Fail(reason) => Ok(TransferResponse {
                status: PayoutStatus::Failed,
                transfer_id: None,
                failure_reason: Some(reason),
            }),
            TransferMode::Pending => Ok(TransferResponse {
                status: PayoutStatus::Pending,
                transfer_id: Some(self.next_id("TR")),
                failure_reason: None,
            }),
            TransferMode::Hang => std::future::pending().await,
        }
    }
}
