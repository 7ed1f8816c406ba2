use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BufferError {
    #[error(
        "Buffer budget exceeded: requested {requested} bytes with {queued} queued and {processing} in flight, limit {limit}"
    )]
    BudgetExceeded {
        requested: usize,
        queued: usize,
        processing: usize,
        limit: usize,
    },

    #[error("Batcher has shut down")]
    ShutDown,
}

impl BufferError {
    /// Overflow is the expected backpressure signal; the offered data is
    /// dropped and the caller moves on.
    pub fn is_overflow(&self) -> bool {
        matches!(self, BufferError::BudgetExceeded { .. })
    }
}
