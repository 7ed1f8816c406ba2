//! Turns transport outcomes into server database reports.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::DeliveryOutcome;
use crate::sink::{Server, ServerDatabase};

#[derive(Debug, Default)]
struct AtomicDeliveryStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    bytes_accepted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub accepted: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub bytes_accepted: u64,
}

#[derive(Debug, Clone)]
pub struct FeedbackReporter {
    database: Arc<ServerDatabase>,
    stats: Arc<AtomicDeliveryStats>,
}

impl FeedbackReporter {
    pub fn new(database: Arc<ServerDatabase>) -> Self {
        Self {
            database,
            stats: Arc::new(AtomicDeliveryStats::default()),
        }
    }

    pub fn report(&self, key: &str, server: &Server, upload_size: usize, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Accepted { upload_time_usec } => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .bytes_accepted
                    .fetch_add(upload_size as u64, Ordering::Relaxed);
                debug!(key, server = %server, upload_size, "Upload accepted");
                self.database
                    .report_request_accepted(server, upload_size, upload_time_usec);
            }
            DeliveryOutcome::Rejected {
                upload_time_usec,
                message,
            } => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                self.database.report_request_rejected(
                    key,
                    server,
                    upload_size,
                    upload_time_usec,
                    &message,
                );
            }
            DeliveryOutcome::Dropped { message } => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                self.database
                    .report_request_dropped(server, upload_size, &message);
            }
        }
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            accepted: self.stats.accepted.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            bytes_accepted: self.stats.bytes_accepted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{GroupDefinition, HealthPolicy};

    fn server(address: &str) -> Server {
        Server::new(address, 443, "gateway.example.com", None, None).unwrap()
    }

    fn reporter() -> FeedbackReporter {
        let database = Arc::new(ServerDatabase::new(
            vec![GroupDefinition {
                id: "g".to_string(),
                servers: vec![server("10.2.0.1"), server("10.2.0.2")],
            }],
            HealthPolicy::default(),
        ));
        FeedbackReporter::new(database)
    }

    #[test]
    fn test_outcomes_are_counted() {
        let reporter = reporter();
        let s = server("10.2.0.1");
        reporter.report("k", &s, 100, DeliveryOutcome::Accepted { upload_time_usec: 10 });
        reporter.report(
            "k",
            &s,
            100,
            DeliveryOutcome::Dropped {
                message: "timeout".to_string(),
            },
        );

        assert_eq!(
            reporter.stats(),
            DeliveryStats {
                accepted: 1,
                rejected: 0,
                dropped: 1,
                bytes_accepted: 100,
            }
        );
    }

    #[test]
    fn test_rejection_degrades_server() {
        let reporter = reporter();
        let s = server("10.2.0.2");
        reporter.report(
            "k",
            &s,
            50,
            DeliveryOutcome::Rejected {
                upload_time_usec: 5,
                message: "HTTP 503".to_string(),
            },
        );

        let balancing = reporter.database.balancing_list("g");
        assert_eq!(balancing.len(), 1);
        assert_eq!(balancing[0].sink_url(), "https://10.2.0.1:443/sink");
    }
}
