use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info};

use super::payment_service::PaymentService;

/// Periodically fails `pending` transactions that never got a gateway outcome
/// and settles completed ones that were left without a distribution.
pub struct PendingSweeper {
    service: Arc<PaymentService>,
    interval: Duration,
    max_age: Duration,
}

impl PendingSweeper {
    pub fn new(service: Arc<PaymentService>, interval: Duration, max_age: Duration) -> Self {
        Self {
            service,
            interval,
            max_age,
        }
    }

    /// Start the sweeper background task
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval(self.interval);
            interval.tick().await; // Skip first immediate tick

            loop {
                interval.tick().await;
                self.sweep().await;
            }
        })
    }

    async fn sweep(&self) {
        match self.service.expire_stale_pending(self.max_age).await {
            Ok(expired) if expired.is_empty() => {}
            Ok(expired) => info!(count = expired.len(), "Expired stale pending transactions"),
            Err(e) => error!("Pending sweep failed: {}", e),
        }

        match self.service.settle_orphaned(self.max_age).await {
            Ok(settled) if settled.is_empty() => {}
            Ok(settled) => info!(count = settled.len(), "Settled orphaned transactions"),
            Err(e) => error!("Orphan settlement sweep failed: {}", e),
        }
    }
}
