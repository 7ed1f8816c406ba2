use async_trait::async_trait;
use parking_lot::Mutex;
use rask_remote_sink::app::{Collaborators, RemoteSink, SinkConfig, Submission};
use rask_remote_sink::app::config::{GroupSettings, ServerSettings};
use rask_remote_sink::domain::{SinkError, Transaction, TransactionList};
use rask_remote_sink::sender::{DeliveryOutcome, FeedbackReporter, OutgoingBatch, Transport};
use rask_remote_sink::sink::{GroupResolver, ResolvedKey};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Rejects everything sent to one address, accepts the rest.
#[derive(Default)]
struct ScriptedTransport {
    reporter: OnceLock<FeedbackReporter>,
    failing_address: &'static str,
    delivered: Mutex<Vec<(String, usize)>>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send_batches(&self, batches: Vec<OutgoingBatch>) -> anyhow::Result<()> {
        let reporter = self
            .reporter
            .get()
            .ok_or_else(|| anyhow::anyhow!("reporter not wired"))?;
        for outgoing in batches {
            let size = outgoing.upload_size();
            let outcome = if outgoing.server.sink_url().contains(self.failing_address) {
                DeliveryOutcome::Rejected {
                    upload_time_usec: 1_000,
                    message: "HTTP 503".to_string(),
                }
            } else {
                self.delivered.lock().push((outgoing.key.clone(), outgoing.batch.len()));
                DeliveryOutcome::Accepted {
                    upload_time_usec: 1_000,
                }
            };
            reporter.report(&outgoing.key, &outgoing.server, size, outcome);
        }
        Ok(())
    }
}

/// Maps every key starting with "app-" to the "apps" group.
struct PrefixResolver;

#[async_trait]
impl GroupResolver for PrefixResolver {
    async fn resolve(&self, keys: Vec<String>) -> anyhow::Result<Vec<ResolvedKey>> {
        Ok(keys
            .into_iter()
            .filter(|key| key.starts_with("app-"))
            .map(|key| ResolvedKey {
                key,
                group_id: "apps".to_string(),
            })
            .collect())
    }
}

fn config() -> SinkConfig {
    let mut config = SinkConfig::default();
    config.buffer.limit_bytes = 1024 * 1024;
    config.buffer.strive_batch_size = 64 * 1024;
    config.health.probe_interval = Duration::from_millis(50);
    config.groups = vec![GroupSettings {
        id: "apps".to_string(),
        servers: ["198.51.100.1", "198.51.100.2"]
            .into_iter()
            .map(|address| ServerSettings {
                address: address.to_string(),
                port: 443,
                host_name: "sink.example.com".to_string(),
                certificate_path: None,
                proxy: None,
            })
            .collect(),
    }];
    config
}

fn start(transport: Arc<ScriptedTransport>) -> RemoteSink {
    let sink = RemoteSink::start(
        config(),
        Collaborators {
            transport: transport.clone(),
            resolver: Arc::new(PrefixResolver),
            prober: None,
        },
    )
    .unwrap();
    assert!(transport.reporter.set(sink.feedback()).is_ok());
    sink
}

fn transactions(key: &str, n: usize) -> TransactionList {
    (0..n)
        .map(|i| Transaction::new(key, format!("{{\"seq\":{i}}}")))
        .collect()
}

#[tokio::test]
async fn test_submit_resolves_then_delivers() {
    let transport = Arc::new(ScriptedTransport {
        failing_address: "none",
        ..Default::default()
    });
    let sink = start(transport.clone());

    match sink.try_submit(transactions("app-1", 3)).unwrap() {
        Submission::Unresolved(returned) => assert_eq!(returned.len(), 3),
        Submission::Queued => panic!("key cannot be known yet"),
    }

    sink.submit(transactions("app-1", 3), Duration::from_secs(5))
        .await
        .unwrap();
    tokio_test::assert_ok!(sink.shutdown().await);

    let state = sink.inspect_state_as_json().unwrap();
    assert_eq!(state["batcher"]["total_count"], 0);
    assert_eq!(state["delivery"]["accepted"], 1);
    assert_eq!(state["server_database"]["keys"].as_array().unwrap().len(), 1);

    let delivered = transport.delivered.lock().clone();
    assert_eq!(delivered, vec![("app-1".to_string(), 3)]);
    let snapshot = sink.inspect_database();
    assert_eq!(snapshot.keys.len(), 1);
    assert!(snapshot.pending_lookups.is_empty());
}

#[tokio::test]
async fn test_unknown_key_times_out() {
    let transport = Arc::new(ScriptedTransport {
        failing_address: "none",
        ..Default::default()
    });
    let sink = start(transport);

    let err = sink
        .submit(transactions("stranger", 1), Duration::from_millis(200))
        .await
        .unwrap_err();
    match err {
        SinkError::ResolutionTimeout { keys, .. } => assert_eq!(keys, vec!["stranger".to_string()]),
        other => panic!("unexpected error: {other}"),
    }
    sink.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rejecting_server_leaves_rotation() {
    let transport = Arc::new(ScriptedTransport {
        failing_address: "198.51.100.2",
        ..Default::default()
    });
    let sink = start(transport.clone());

    for _ in 0..6 {
        sink.submit(transactions("app-2", 1), Duration::from_secs(5))
            .await
            .unwrap();
        // One submission per worker pass
        while sink.inspect_batcher().total_count != 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
    sink.shutdown().await.unwrap();

    let balancing = sink.database().balancing_list("apps");
    assert_eq!(balancing.len(), 1);
    assert_eq!(balancing[0].sink_url(), "https://198.51.100.1:443/sink");
    assert_eq!(sink.feedback().stats().rejected, 1);
    assert_eq!(sink.feedback().stats().accepted, 5);
}

#[tokio::test]
async fn test_submit_after_shutdown_fails() {
    let transport = Arc::new(ScriptedTransport {
        failing_address: "none",
        ..Default::default()
    });
    let sink = start(transport);
    sink.submit(transactions("app-3", 1), Duration::from_secs(5))
        .await
        .unwrap();
    sink.shutdown().await.unwrap();

    let err = sink
        .submit(transactions("app-3", 1), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, SinkError::Buffer(_)));
}
