//! Domain layer for rask-remote-sink.
//!
//! Contains the canonical types shared across all modules:
//! - `Transaction`: one telemetry record ready for transmission
//! - `TransactionList`: an owned FIFO run of transactions
//! - `SinkError`: Top-level error type

pub mod error;
pub mod transaction;

pub use error::SinkError;
pub use transaction::{Transaction, TransactionList, total_body_size};
