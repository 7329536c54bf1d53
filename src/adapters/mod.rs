//! Ledger adapters.

pub mod memory_ledger;
pub mod postgres_ledger;

pub use memory_ledger::InMemoryLedger;
pub use postgres_ledger::PostgresLedger;
