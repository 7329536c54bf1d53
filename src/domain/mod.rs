//! Domain layer: framework-agnostic ledger entities.

pub mod distribution;
pub mod money;
pub mod payout;
pub mod revenue;
pub mod transaction;

pub use distribution::{latest_payouts, Distribution, DistributionStatus};
pub use money::{Currency, Money, MoneyError};
pub use payout::{Payout, PayoutRecord, PayoutStatus};
pub use revenue::{PeriodWindow, ReportPeriod, RevenueWindow};
pub use transaction::{ChargeOutcome, Transaction, TransactionStatus};
