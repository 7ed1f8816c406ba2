use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::config::SinkConfig;
use crate::buffer::{Batcher, BatcherSnapshot};
use crate::clock::{Clock, SystemClock};
use crate::domain::{SinkError, TransactionList, total_body_size};
use crate::sender::{FeedbackReporter, Transport};
use crate::sink::{DatabaseSnapshot, GroupResolver, ResolutionLoop, ServerDatabase, ServerProber};

/// Result of a non-waiting submission.
#[derive(Debug)]
pub enum Submission {
    Queued,
    /// Some keys are not resolved yet; they have been queued for lookup and
    /// the transactions are handed back untouched.
    Unresolved(TransactionList),
}

/// Collaborators supplied by the embedding application.
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub resolver: Arc<dyn GroupResolver>,
    pub prober: Option<Arc<dyn ServerProber>>,
}

/// Running remote sink: server database, batcher worker and resolution
/// loop, wired from one [`SinkConfig`].
pub struct RemoteSink {
    config: SinkConfig,
    database: Arc<ServerDatabase>,
    batcher: Arc<Batcher>,
    feedback: FeedbackReporter,
    cancel: CancellationToken,
    resolution: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteSink {
    /// Validates `config`, builds the topology and spawns the background
    /// tasks. Must be called from within a Tokio runtime.
    pub fn start(config: SinkConfig, collaborators: Collaborators) -> Result<Self, SinkError> {
        Self::start_with_clock(config, collaborators, Arc::new(SystemClock))
    }

    pub fn start_with_clock(
        config: SinkConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SinkError> {
        config.validate()?;
        let groups = config.build_groups()?;

        let database = Arc::new(ServerDatabase::with_clock(
            groups,
            config.health_policy(),
            clock.clone(),
        ));
        let batcher = Batcher::with_clock(
            config.batcher_config(),
            database.clone(),
            collaborators.transport,
            clock,
        );
        batcher.start();

        let cancel = CancellationToken::new();
        let resolution = ResolutionLoop::new(
            database.clone(),
            collaborators.resolver,
            collaborators.prober,
            config.health.probe_interval,
            cancel.clone(),
        )
        .spawn();

        info!(
            version = crate::VERSION,
            groups = config.groups.len(),
            limit = config.buffer.limit_bytes,
            "Remote sink started"
        );

        let feedback = FeedbackReporter::new(database.clone());
        Ok(Self {
            config,
            database,
            batcher,
            feedback,
            cancel,
            resolution: Mutex::new(Some(resolution)),
        })
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    pub fn database(&self) -> &Arc<ServerDatabase> {
        &self.database
    }

    pub fn batcher(&self) -> &Arc<Batcher> {
        &self.batcher
    }

    /// Reporter for the transport to feed delivery outcomes back with.
    pub fn feedback(&self) -> FeedbackReporter {
        self.feedback.clone()
    }

    /// Queues `transactions` if every key in it is already resolved.
    pub fn try_submit(&self, transactions: TransactionList) -> Result<Submission, SinkError> {
        if transactions.is_empty() {
            return Ok(Submission::Queued);
        }
        let keys = distinct_keys(&transactions);
        if self.database.resolve_group_ids(&keys).is_none() {
            return Ok(Submission::Unresolved(transactions));
        }

        let size = total_body_size(&transactions);
        let count = transactions.len();
        self.batcher
            .add(transactions, size, count, self.database.now())?;
        Ok(Submission::Queued)
    }

    /// Like [`Self::try_submit`], but waits up to `timeout` for unknown keys
    /// to be resolved. On timeout the transactions are dropped.
    pub async fn submit(
        &self,
        transactions: TransactionList,
        timeout: Duration,
    ) -> Result<(), SinkError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut transactions = transactions;

        loop {
            let notified = self.database.resolution_notified();
            match self.try_submit(transactions)? {
                Submission::Queued => return Ok(()),
                Submission::Unresolved(returned) => transactions = returned,
            }

            debug!(count = transactions.len(), "Waiting for key resolution");
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let keys = distinct_keys(&transactions)
                    .into_iter()
                    .filter(|key| self.database.key_info(key).is_none())
                    .collect();
                return Err(SinkError::ResolutionTimeout {
                    keys,
                    waited_ms: timeout.as_millis() as u64,
                });
            }
        }
    }

    pub fn inspect_batcher(&self) -> BatcherSnapshot {
        self.batcher.inspect_state()
    }

    pub fn inspect_database(&self) -> DatabaseSnapshot {
        self.database.inspect_state()
    }

    /// Batcher, server database and delivery counters as one JSON document.
    pub fn inspect_state_as_json(&self) -> Result<serde_json::Value, SinkError> {
        let document = serde_json::json!({
            "batcher": serde_json::to_value(self.inspect_batcher())?,
            "server_database": serde_json::to_value(self.inspect_database())?,
            "delivery": serde_json::to_value(self.feedback.stats())?,
        });
        Ok(document)
    }

    /// Drains the batcher, then stops the resolution loop.
    pub async fn shutdown(&self) -> Result<(), SinkError> {
        info!("Shutting down remote sink");
        self.batcher.shutdown().await;

        self.cancel.cancel();
        let handle = self.resolution.lock().take();
        if let Some(handle) = handle {
            handle.await.map_err(|e| {
                error!("Resolution loop terminated abnormally: {}", e);
                SinkError::Shutdown(e.to_string())
            })?;
        }
        info!("Remote sink stopped");
        Ok(())
    }
}

fn distinct_keys(transactions: &TransactionList) -> Vec<String> {
    let mut seen = HashSet::new();
    transactions
        .iter()
        .filter(|t| seen.insert(t.key()))
        .map(|t| t.key().to_string())
        .collect()
}
