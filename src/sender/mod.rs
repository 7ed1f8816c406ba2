pub mod feedback;

pub use feedback::{DeliveryStats, FeedbackReporter};

use async_trait::async_trait;
use std::sync::Arc;

use crate::buffer::Batch;
use crate::sink::Server;

/// A batch routed to a concrete server, ready for upload.
#[derive(Debug)]
pub struct OutgoingBatch {
    pub key: String,
    pub server: Arc<Server>,
    pub batch: Batch,
}

impl OutgoingBatch {
    pub fn upload_size(&self) -> usize {
        self.batch.total_size()
    }
}

/// Result of one upload attempt, as seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The server took the batch.
    Accepted { upload_time_usec: u64 },
    /// The server answered but refused the batch.
    Rejected {
        upload_time_usec: u64,
        message: String,
    },
    /// No usable answer: connection refused, reset, timed out.
    Dropped { message: String },
}

/// Uploads routed batches.
///
/// Implementations own connection handling and retries, and are expected to
/// report every outcome back through a [`FeedbackReporter`]. An `Err` from
/// `send_batches` is logged by the caller; the batches are gone either way.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_batches(&self, batches: Vec<OutgoingBatch>) -> anyhow::Result<()>;
}
