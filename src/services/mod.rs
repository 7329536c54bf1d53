pub mod distributor;
pub mod payment_service;
pub mod payout_executor;
pub mod revenue;
pub mod sweeper;

pub use distributor::{split, Ratio, SplitConfigError, SplitPlan};
pub use payment_service::{
    BatchCharge, BatchSummary, CallbackDisposition, GatewayCallback, PaymentError, PaymentReceipt,
    PaymentService,
};
pub use payout_executor::{AccountConfigError, PayoutAccounts, PayoutBatchResult, PayoutExecutor};
pub use revenue::{growth_rate, RevenueAggregator};
pub use sweeper::PendingSweeper;
