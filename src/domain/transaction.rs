use bytes::Bytes;
use std::collections::VecDeque;

/// A finished telemetry record, owned by exactly one stage of the pipeline
/// at a time: the producer, the batcher queue, a batch, then the transport.
///
/// Deliberately not `Clone`; moving it is the only way to hand it on.
#[derive(Debug, PartialEq, Eq)]
pub struct Transaction {
    key: String,
    body: Bytes,
}

impl Transaction {
    pub fn new(key: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            body: body.into(),
        }
    }

    /// The request key that decides which group this transaction goes to.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn body_size(&self) -> usize {
        self.body.len()
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }
}

/// Ordered FIFO sequence of transactions.
pub type TransactionList = VecDeque<Transaction>;

pub fn total_body_size(transactions: &TransactionList) -> usize {
    transactions.iter().map(Transaction::body_size).sum()
}
