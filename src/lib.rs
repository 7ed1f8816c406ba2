#![deny(rust_2024_compatibility)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
// Noisy pedantic lints suppressed with justification:
#![allow(
    clippy::cast_lossless,            // Infallible casts are clear enough with `as`
    clippy::cast_possible_truncation, // Safe within realistic value bounds (durations, sizes)
    clippy::cast_precision_loss,      // Acceptable for statistics/display
    clippy::cast_sign_loss,           // Safe where values are known non-negative
    clippy::missing_errors_doc,       // Internal API
    clippy::missing_panics_doc,       // Internal API
    clippy::module_name_repetitions,  // e.g. BufferError in buffer module
    clippy::must_use_candidate,       // Annotated selectively on critical APIs
    clippy::doc_markdown              // Internal API
)]

pub mod app;
pub mod buffer;
pub mod clock;
pub mod domain;
pub mod sender;
pub mod sink;
pub mod stats;

// Re-export main types for easy access
pub use app::{RemoteSink, SinkConfig};
pub use buffer::{Batch, Batcher, BatcherConfig, BufferError};
pub use domain::{SinkError, Transaction, TransactionList};
pub use sink::{Server, ServerDatabase, ServerSelection};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
