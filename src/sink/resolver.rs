//! Out-of-band resolution of request keys and server health probes.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::database::{ResolvedKey, ServerDatabase};
use super::server::Server;

/// Control-plane lookup of the destination group of each key.
///
/// Keys the control plane does not know may simply be left out of the
/// answer; they stay unresolved until asked for again.
#[async_trait]
pub trait GroupResolver: Send + Sync {
    async fn resolve(&self, keys: Vec<String>) -> anyhow::Result<Vec<ResolvedKey>>;
}

/// Liveness check against a server's ping URL.
#[async_trait]
pub trait ServerProber: Send + Sync {
    async fn ping(&self, server: &Server) -> anyhow::Result<()>;
}

/// Background task feeding the [`ServerDatabase`]: resolves pending keys
/// when woken, and on every probe tick re-validates stale keys and rechecks
/// degraded servers.
pub struct ResolutionLoop {
    database: Arc<ServerDatabase>,
    resolver: Arc<dyn GroupResolver>,
    prober: Option<Arc<dyn ServerProber>>,
    probe_interval: Duration,
    cancel: CancellationToken,
}

impl ResolutionLoop {
    pub fn new(
        database: Arc<ServerDatabase>,
        resolver: Arc<dyn GroupResolver>,
        prober: Option<Arc<dyn ServerProber>>,
        probe_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            database,
            resolver,
            prober,
            probe_interval,
            cancel,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        info!(
            probe_interval_ms = self.probe_interval.as_millis() as u64,
            "Resolution loop started"
        );
        let mut ticker = tokio::time::interval(self.probe_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // A hung control plane or ping must not hold up cancellation, so
        // every round of work is raced against the token as well.
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = self.database.wait_for_lookup_request() => {
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        _ = self.resolve_pending() => {}
                    }
                }
                _ = ticker.tick() => {
                    let refresh = async {
                        self.database.enqueue_keys_due_for_recheck();
                        self.probe_servers().await;
                        self.resolve_pending().await;
                    };
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = refresh => {}
                    }
                }
            }
        }
        info!("Resolution loop stopped");
    }

    /// Resolves everything currently pending. Returns the number of keys
    /// that were looked up.
    pub async fn resolve_pending(&self) -> usize {
        let keys = self.database.take_pending_lookups();
        if keys.is_empty() {
            return 0;
        }
        let count = keys.len();
        debug!(count, "Resolving pending keys");

        match self.resolver.resolve(keys.clone()).await {
            Ok(resolutions) => {
                self.database.mark_keys_checked(&keys);
                if resolutions.len() < count {
                    debug!(
                        requested = count,
                        resolved = resolutions.len(),
                        "Control plane left some keys unresolved"
                    );
                }
                self.database.merge_resolutions(resolutions);
            }
            Err(e) => {
                error!(count, error = %e, "Key resolution failed, will retry on next tick");
                self.database.requeue_lookups(keys);
            }
        }
        count
    }

    /// Rechecks every degraded server whose error timeout has elapsed. Without
    /// a prober, a quiet timeout is itself the passing recheck.
    pub async fn probe_servers(&self) -> usize {
        let due = self.database.servers_due_for_recheck();
        if due.is_empty() {
            return 0;
        }

        let Some(prober) = &self.prober else {
            for server in &due {
                self.database.report_check_result(server, Ok(()));
            }
            return due.len();
        };

        let results = join_all(due.iter().map(|server| prober.ping(server))).await;
        for (server, result) in due.iter().zip(results) {
            match result {
                Ok(()) => self.database.report_check_result(server, Ok(())),
                Err(e) => {
                    let message = e.to_string();
                    warn!(server = %server, error = %message, "Recheck failed");
                    self.database.report_check_result(server, Err(&message));
                }
            }
        }
        due.len()
    }
}
