//! Grouping of transactions into upload-sized batches.
//!
//! The functions here are pure: they take ownership of a transaction list,
//! move every transaction into exactly one batch and append the batches to a
//! caller-provided list.

use uuid::Uuid;

use crate::domain::{Transaction, TransactionList};

/// Capacity hint for batch lists built per worker iteration.
pub const BATCH_LIST_CAPACITY_HINT: usize = 16;

pub type BatchList = Vec<Batch>;

#[derive(Debug)]
pub struct Batch {
    id: Uuid,
    transactions: TransactionList,
    total_size: usize,
}

impl Batch {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            transactions: TransactionList::new(),
            total_size: 0,
        }
    }

    fn single(transaction: Transaction) -> Self {
        let mut batch = Self::new();
        batch.push(transaction);
        batch
    }

    pub fn push(&mut self, transaction: Transaction) {
        self.total_size += transaction.body_size();
        self.transactions.push_back(transaction);
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Sum of the body sizes of all transactions in the batch.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn transactions(&self) -> &TransactionList {
        &self.transactions
    }

    pub fn into_transactions(self) -> TransactionList {
        self.transactions
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits `transactions` in one pass into those smaller than `strive_size`
/// and the rest, keeping relative order within each side.
pub fn organize_transactions_by_size(
    transactions: TransactionList,
    strive_size: usize,
) -> (TransactionList, TransactionList) {
    let mut undersized = TransactionList::with_capacity(transactions.len());
    let mut oversized = TransactionList::new();
    for transaction in transactions {
        if transaction.body_size() < strive_size {
            undersized.push_back(transaction);
        } else {
            oversized.push_back(transaction);
        }
    }
    (undersized, oversized)
}

/// Packs consecutive transactions into batches of at most `strive_size`
/// bytes. A batch is closed as soon as the next transaction would push it
/// over; an empty batch always takes the next transaction.
pub fn create_batches_for_undersized(
    undersized: TransactionList,
    strive_size: usize,
    batches: &mut BatchList,
) {
    let mut current = Batch::new();
    for transaction in undersized {
        if !current.is_empty() && current.total_size() + transaction.body_size() > strive_size {
            batches.push(std::mem::take(&mut current));
        }
        current.push(transaction);
    }
    if !current.is_empty() {
        batches.push(current);
    }
}

/// One batch per transaction. Large items are never split here.
pub fn create_batches_for_oversized(oversized: TransactionList, batches: &mut BatchList) {
    batches.extend(oversized.into_iter().map(Batch::single));
}

/// Runs the full algorithm: partition, pack the undersized side, then append
/// the oversized side.
pub fn organize_into_batches(
    transactions: TransactionList,
    strive_size: usize,
    batches: &mut BatchList,
) {
    if transactions.is_empty() {
        return;
    }
    let (undersized, oversized) = organize_transactions_by_size(transactions, strive_size);
    create_batches_for_undersized(undersized, strive_size, batches);
    create_batches_for_oversized(oversized, batches);
}
