pub mod batch;
pub mod batcher;
pub mod error;

pub use batch::{
    Batch, BatchList, create_batches_for_oversized, create_batches_for_undersized,
    organize_into_batches, organize_transactions_by_size,
};
pub use batcher::{Batcher, BatcherConfig, BatcherSnapshot};
pub use error::BufferError;
