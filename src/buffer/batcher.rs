//! Bounded staging queue between producers and the uploader.
//!
//! Producers call [`Batcher::add`], which only appends under the lock. One
//! worker task swaps the whole queue out, batches and routes it without
//! holding the lock, and hands the result to the [`Transport`]. The byte
//! budget covers both the queued and the in-flight stage, so an overloaded
//! uploader makes `add` reject instead of letting memory grow.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::batch::{BATCH_LIST_CAPACITY_HINT, BatchList, organize_into_batches};
use super::error::BufferError;
use crate::clock::{Clock, SystemClock, usec_to_datetime};
use crate::domain::TransactionList;
use crate::sender::{OutgoingBatch, Transport};
use crate::sink::{ServerDatabase, ServerSelection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatcherConfig {
    /// Byte budget for queued plus in-flight transaction bodies.
    pub limit: usize,
    pub strive_batch_size: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            limit: 64 * 1024 * 1024,
            strive_batch_size: 1024 * 1024,
        }
    }
}

#[derive(Debug, Default)]
struct BatcherState {
    queue: TransactionList,
    bytes_queued: usize,
    n_queued: usize,
    bytes_processing: usize,
    n_processing: usize,
    peak_size: usize,
    dropped_count: u64,
    dropped_size: u64,
    last_queue_add_time: u64,
    last_processing_begin_time: u64,
    last_processing_end_time: u64,
    quit: bool,
}

impl BatcherState {
    fn recommended_buffer_size(&self) -> String {
        format!("{} KB", self.peak_size * 2 / 1024)
    }
}

enum WorkerStep {
    Wait,
    Exit,
    Process(TransactionList),
}

pub struct Batcher {
    config: BatcherConfig,
    state: Mutex<BatcherState>,
    wake: Notify,
    database: Arc<ServerDatabase>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Batcher {
    pub fn new(
        config: BatcherConfig,
        database: Arc<ServerDatabase>,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        Self::with_clock(config, database, transport, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: BatcherConfig,
        database: Arc<ServerDatabase>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(BatcherState::default()),
            wake: Notify::new(),
            database,
            transport,
            clock,
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// Spawns the worker task. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        info!(
            limit = self.config.limit,
            strive_batch_size = self.config.strive_batch_size,
            "Starting batcher worker"
        );
        *worker = Some(tokio::spawn(self.clone().run()));
    }

    /// Queues `transactions` for batching.
    ///
    /// `total_body_size` and `count` must describe `transactions`. On
    /// rejection the transactions are dropped and no state changes.
    pub fn add(
        &self,
        transactions: TransactionList,
        total_body_size: usize,
        count: usize,
        now: u64,
    ) -> Result<(), BufferError> {
        let mut state = self.state.lock();

        if state.quit {
            return Err(BufferError::ShutDown);
        }

        let in_use = state.bytes_queued + state.bytes_processing;
        let fits = in_use
            .checked_add(total_body_size)
            .is_some_and(|total| total <= self.config.limit);
        if !fits {
            warn!(
                requested = total_body_size,
                queued = state.bytes_queued,
                processing = state.bytes_processing,
                limit = self.config.limit,
                recommended_size = %state.recommended_buffer_size(),
                "Unable to batch data quickly enough, dropping transactions. \
                 Increase the buffer size"
            );
            return Err(BufferError::BudgetExceeded {
                requested: total_body_size,
                queued: state.bytes_queued,
                processing: state.bytes_processing,
                limit: self.config.limit,
            });
        }

        let mut transactions = transactions;
        state.queue.append(&mut transactions);
        state.bytes_queued += total_body_size;
        state.n_queued += count;
        state.peak_size = state.peak_size.max(state.bytes_queued + state.bytes_processing);
        state.last_queue_add_time = now;
        drop(state);

        self.wake.notify_one();
        Ok(())
    }

    /// Convenience wrapper computing size and count from the list.
    pub fn add_transactions(&self, transactions: TransactionList) -> Result<(), BufferError> {
        let total_body_size = crate::domain::total_body_size(&transactions);
        let count = transactions.len();
        self.add(transactions, total_body_size, count, self.clock.now_usec())
    }

    /// Stops accepting new data, waits until everything already queued has
    /// been handed to the transport, then joins the worker. A batcher that
    /// was never started drains on the caller's task instead.
    pub async fn shutdown(&self) {
        self.state.lock().quit = true;
        self.wake.notify_one();

        let handle = self.worker.lock().take();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!("Batcher worker terminated abnormally: {}", e);
                }
            }
            None => self.work_until_quit().await,
        }

        let state = self.state.lock();
        assert!(
            state.queue.is_empty() && state.n_processing == 0,
            "batcher queue not empty after shutdown"
        );
        drop(state);
        info!("Batcher shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().quit
    }

    async fn run(self: Arc<Self>) {
        self.work_until_quit().await;
    }

    async fn work_until_quit(&self) {
        loop {
            let step = {
                let mut state = self.state.lock();
                if !state.queue.is_empty() {
                    assert!(
                        state.bytes_processing == 0 && state.n_processing == 0,
                        "processing counters must be clear when draining"
                    );
                    state.bytes_processing = std::mem::take(&mut state.bytes_queued);
                    state.n_processing = std::mem::take(&mut state.n_queued);
                    state.last_processing_begin_time = self.clock.now_usec();
                    WorkerStep::Process(std::mem::take(&mut state.queue))
                } else if state.quit {
                    WorkerStep::Exit
                } else {
                    WorkerStep::Wait
                }
            };

            match step {
                WorkerStep::Wait => self.wake.notified().await,
                WorkerStep::Exit => break,
                WorkerStep::Process(transactions) => self.process(transactions).await,
            }
        }
        debug!("Batcher worker exiting");
    }

    async fn process(&self, transactions: TransactionList) {
        let count = transactions.len();
        let (outgoing, dropped_count, dropped_size) = self.route(transactions);
        debug!(
            transactions = count,
            batches = outgoing.len(),
            dropped = dropped_count,
            "Processed batcher queue"
        );

        if !outgoing.is_empty()
            && let Err(e) = self.transport.send_batches(outgoing).await
        {
            error!("Transport failed to send batches: {}", e);
        }

        let mut state = self.state.lock();
        state.bytes_processing = 0;
        state.n_processing = 0;
        state.dropped_count += dropped_count;
        state.dropped_size += dropped_size;
        state.last_processing_end_time = self.clock.now_usec();
    }

    /// Groups by key in first-arrival order, batches each group and picks a
    /// server per batch. Batches with nowhere to go are dropped.
    fn route(&self, transactions: TransactionList) -> (Vec<OutgoingBatch>, u64, u64) {
        let mut order: Vec<(String, TransactionList)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for transaction in transactions {
            let slot = match index.get(transaction.key()) {
                Some(&slot) => slot,
                None => {
                    let key = transaction.key().to_string();
                    index.insert(key.clone(), order.len());
                    order.push((key, TransactionList::new()));
                    order.len() - 1
                }
            };
            order[slot].1.push_back(transaction);
        }

        let mut outgoing = Vec::with_capacity(BATCH_LIST_CAPACITY_HINT);
        let mut dropped_count = 0u64;
        let mut dropped_size = 0u64;

        for (key, list) in order {
            let mut batches = BatchList::with_capacity(BATCH_LIST_CAPACITY_HINT);
            organize_into_batches(list, self.config.strive_batch_size, &mut batches);

            for batch in batches {
                match self.database.get_next_server(&key) {
                    ServerSelection::Server(server) => outgoing.push(OutgoingBatch {
                        key: key.clone(),
                        server,
                        batch,
                    }),
                    selection => {
                        warn!(
                            key = %key,
                            transactions = batch.len(),
                            size = batch.total_size(),
                            reason = ?selection,
                            "No destination for batch, dropping"
                        );
                        dropped_count += batch.len() as u64;
                        dropped_size += batch.total_size() as u64;
                    }
                }
            }
        }

        (outgoing, dropped_count, dropped_size)
    }

    pub fn inspect_state(&self) -> BatcherSnapshot {
        let state = self.state.lock();
        BatcherSnapshot {
            total_size: state.bytes_queued + state.bytes_processing,
            queued_size: state.bytes_queued,
            processing_size: state.bytes_processing,
            peak_total_size: state.peak_size,
            total_count: state.n_queued + state.n_processing,
            queued_count: state.n_queued,
            processing_count: state.n_processing,
            total_size_limit: self.config.limit,
            strive_batch_size: self.config.strive_batch_size,
            recommended_buffer_size: state.recommended_buffer_size(),
            dropped_count: state.dropped_count,
            dropped_size: state.dropped_size,
            last_queue_add_time: usec_to_datetime(state.last_queue_add_time),
            last_processing_begin_time: usec_to_datetime(state.last_processing_begin_time),
            last_processing_end_time: usec_to_datetime(state.last_processing_end_time),
        }
    }
}

impl std::fmt::Debug for Batcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batcher")
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatcherSnapshot {
    pub total_size: usize,
    pub queued_size: usize,
    pub processing_size: usize,
    pub peak_total_size: usize,
    pub total_count: usize,
    pub queued_count: usize,
    pub processing_count: usize,
    pub total_size_limit: usize,
    pub strive_batch_size: usize,
    pub recommended_buffer_size: String,
    pub dropped_count: u64,
    pub dropped_size: u64,
    pub last_queue_add_time: Option<DateTime<Utc>>,
    pub last_processing_begin_time: Option<DateTime<Utc>>,
    pub last_processing_end_time: Option<DateTime<Utc>>,
}
