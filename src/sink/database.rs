//! Health-aware directory mapping request keys to destination groups.
//!
//! All mutable state lives behind one mutex and every critical section is a
//! table lookup or update. Resolving unknown keys never happens under the
//! lock: keys are parked in a pending set and the resolution path (see
//! [`crate::sink::resolver`]) is woken to look them up out of band.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tracing::{debug, info, warn};

use super::health::{HealthPolicy, ServerHealth, ServerHealthSnapshot};
use super::server::Server;
use crate::clock::{Clock, SystemClock, seconds_since, usec_to_datetime};

/// Static description of one destination group.
#[derive(Debug, Clone)]
pub struct GroupDefinition {
    pub id: String,
    pub servers: Vec<Server>,
}

/// Cached resolution of one request key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyInfo {
    pub group_id: String,
    pub last_check_time: u64,
    pub last_rejection_error_time: u64,
    pub recheck_timeout_when_all_healthy: u64,
    pub recheck_timeout_when_have_errors: u64,
    pub all_servers_healthy: bool,
}

impl KeyInfo {
    fn new(group_id: String, now: u64, all_servers_healthy: bool, policy: &HealthPolicy) -> Self {
        Self {
            group_id,
            last_check_time: now,
            last_rejection_error_time: 0,
            recheck_timeout_when_all_healthy: policy.recheck_timeout_when_all_healthy_usec,
            recheck_timeout_when_have_errors: policy.recheck_timeout_when_have_errors_usec,
            all_servers_healthy,
        }
    }

    fn recheck_timeout(&self) -> u64 {
        if self.all_servers_healthy {
            self.recheck_timeout_when_all_healthy
        } else {
            self.recheck_timeout_when_have_errors
        }
    }

    fn is_due_for_recheck(&self, now: u64) -> bool {
        now.saturating_sub(self.last_check_time) >= self.recheck_timeout()
    }
}

/// Outcome of [`ServerDatabase::get_next_server`].
#[derive(Debug, Clone, PartialEq)]
pub enum ServerSelection {
    Server(Arc<Server>),
    /// The key has not been resolved yet; it is queued for lookup.
    Unknown,
    /// The key resolved to a group that has no servers.
    NoServers,
}

impl ServerSelection {
    pub fn server(self) -> Option<Arc<Server>> {
        match self {
            ServerSelection::Server(server) => Some(server),
            ServerSelection::Unknown | ServerSelection::NoServers => None,
        }
    }
}

#[derive(Debug)]
struct Group {
    servers: Vec<Arc<Server>>,
    balancing_list: Vec<Arc<Server>>,
    all_healthy: bool,
    cursor: usize,
}

impl Group {
    fn new(servers: Vec<Arc<Server>>) -> Self {
        let cursor = if servers.is_empty() {
            0
        } else {
            rand::rng().random_range(0..servers.len())
        };
        Self {
            balancing_list: servers.clone(),
            servers,
            all_healthy: true,
            cursor,
        }
    }

    fn checkout(&mut self) -> Option<Arc<Server>> {
        if self.balancing_list.is_empty() {
            return None;
        }
        let server = self.balancing_list[self.cursor % self.balancing_list.len()].clone();
        self.cursor = self.cursor.wrapping_add(1);
        Some(server)
    }
}

#[derive(Debug)]
struct ServerEntry {
    server: Arc<Server>,
    health: ServerHealth,
    group_ids: Vec<String>,
}

#[derive(Debug, Default)]
struct DatabaseInner {
    keys: HashMap<String, KeyInfo>,
    /// Resolved keys per group id, so health changes touch only their group.
    group_keys: HashMap<String, HashSet<String>>,
    groups: HashMap<String, Group>,
    servers: HashMap<String, ServerEntry>,
    pending: BTreeSet<String>,
}

impl DatabaseInner {
    fn recreate_balancing_lists(&mut self, sink_url: &str) {
        let Some(entry) = self.servers.get(sink_url) else {
            return;
        };
        for group_id in entry.group_ids.clone() {
            self.recreate_balancing_list(&group_id);
        }
    }

    fn recreate_balancing_list(&mut self, group_id: &str) {
        let Some(group) = self.groups.get_mut(group_id) else {
            return;
        };
        let servers = &self.servers;
        let is_healthy = |server: &Arc<Server>| {
            servers
                .get(server.sink_url())
                .is_none_or(|entry| entry.health.is_healthy())
        };

        let healthy: Vec<Arc<Server>> = group
            .servers
            .iter()
            .filter(|s| is_healthy(*s))
            .cloned()
            .collect();
        group.all_healthy = healthy.len() == group.servers.len();
        group.balancing_list = if healthy.is_empty() {
            // Best-effort delivery beats refusing to deliver.
            group.servers.clone()
        } else {
            healthy
        };

        let all_healthy = group.all_healthy;
        if let Some(members) = self.group_keys.get(group_id) {
            for key in members {
                if let Some(info) = self.keys.get_mut(key) {
                    info.all_servers_healthy = all_healthy;
                }
            }
        }
        debug!(
            group = group_id,
            balancing = group.balancing_list.len(),
            members = group.servers.len(),
            all_healthy,
            "Recreated balancing list"
        );
    }

    fn index_key(&mut self, key: &str, from: Option<&str>, to: &str) {
        if let Some(from) = from
            && let Some(members) = self.group_keys.get_mut(from)
        {
            members.remove(key);
        }
        self.group_keys
            .entry(to.to_string())
            .or_default()
            .insert(key.to_string());
    }

    fn enqueue_lookup(&mut self, key: &str) -> bool {
        if self.pending.contains(key) {
            return false;
        }
        self.pending.insert(key.to_string())
    }
}

/// A key resolution produced by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKey {
    pub key: String,
    pub group_id: String,
}

pub struct ServerDatabase {
    inner: Mutex<DatabaseInner>,
    policy: HealthPolicy,
    clock: Arc<dyn Clock>,
    lookup_requested: Notify,
    resolution_completed: Notify,
}

impl ServerDatabase {
    pub fn new(groups: Vec<GroupDefinition>, policy: HealthPolicy) -> Self {
        Self::with_clock(groups, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        groups: Vec<GroupDefinition>,
        policy: HealthPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut inner = DatabaseInner::default();

        for definition in groups {
            let mut members = Vec::with_capacity(definition.servers.len());
            for server in definition.servers {
                let entry = inner
                    .servers
                    .entry(server.sink_url().to_string())
                    .or_insert_with(|| ServerEntry {
                        server: Arc::new(server),
                        health: ServerHealth::new(policy.decay),
                        group_ids: Vec::new(),
                    });
                if !entry.group_ids.contains(&definition.id) {
                    entry.group_ids.push(definition.id.clone());
                }
                if !members.contains(&entry.server) {
                    members.push(entry.server.clone());
                }
            }
            inner.groups.insert(definition.id, Group::new(members));
        }

        info!(
            groups = inner.groups.len(),
            servers = inner.servers.len(),
            "Server database initialized"
        );

        Self {
            inner: Mutex::new(inner),
            policy,
            clock,
            lookup_requested: Notify::new(),
            resolution_completed: Notify::new(),
        }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    pub fn now(&self) -> u64 {
        self.clock.now_usec()
    }

    /// Looks up the group of every key, in order. Either all keys are known
    /// and their group ids are returned, or `None` is returned and every
    /// unknown key is queued for out-of-band resolution.
    pub fn resolve_group_ids<K: AsRef<str>>(&self, keys: &[K]) -> Option<Vec<String>> {
        let mut inner = self.inner.lock();

        let mut group_ids = Vec::with_capacity(keys.len());
        for key in keys {
            match inner.keys.get(key.as_ref()) {
                Some(info) => group_ids.push(info.group_id.clone()),
                None => break,
            }
        }
        if group_ids.len() == keys.len() {
            return Some(group_ids);
        }

        let mut queued = 0;
        for key in keys {
            let key = key.as_ref();
            if !inner.keys.contains_key(key) && inner.enqueue_lookup(key) {
                queued += 1;
            }
        }
        drop(inner);

        debug!(queued, "Keys pending group resolution");
        self.lookup_requested.notify_one();
        None
    }

    /// Picks the next server for `key` from its group's balancing list.
    pub fn get_next_server(&self, key: &str) -> ServerSelection {
        let mut inner = self.inner.lock();

        let Some(group_id) = inner.keys.get(key).map(|info| info.group_id.clone()) else {
            inner.enqueue_lookup(key);
            drop(inner);
            self.lookup_requested.notify_one();
            return ServerSelection::Unknown;
        };

        match inner.groups.get_mut(&group_id).and_then(Group::checkout) {
            Some(server) => ServerSelection::Server(server),
            None => ServerSelection::NoServers,
        }
    }

    pub fn report_request_accepted(&self, server: &Server, upload_size: usize, upload_time: u64) {
        let now = self.now();
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.servers.get_mut(server.sink_url()) {
            entry.health.record_accepted(upload_size, upload_time, now);
        }
    }

    /// Records a rejection of an upload for `key` by `server`.
    pub fn report_request_rejected(
        &self,
        key: &str,
        server: &Server,
        upload_size: usize,
        upload_time: u64,
        error_message: &str,
    ) {
        let now = self.now();
        let mut inner = self.inner.lock();

        if let Some(info) = inner.keys.get_mut(key) {
            info.last_rejection_error_time = now;
        }

        let Some(entry) = inner.servers.get_mut(server.sink_url()) else {
            warn!(server = %server, "Rejection reported for unknown server");
            return;
        };
        let degraded =
            entry
                .health
                .record_rejected(upload_size, upload_time, error_message, now, &self.policy);
        if degraded {
            warn!(
                server = %server,
                key,
                error = error_message,
                "Server degraded after rejections, removing from balancing list"
            );
        }
        inner.recreate_balancing_lists(server.sink_url());
    }

    /// Records a hard (connection-level) failure against `server`.
    pub fn report_request_dropped(&self, server: &Server, upload_size: usize, error_message: &str) {
        let now = self.now();
        let mut inner = self.inner.lock();

        let Some(entry) = inner.servers.get_mut(server.sink_url()) else {
            warn!(server = %server, "Drop reported for unknown server");
            return;
        };
        let degraded = entry.health.record_dropped(error_message, now, &self.policy);
        if degraded {
            warn!(
                server = %server,
                upload_size,
                error = error_message,
                "Server degraded after dropped request, removing from balancing list"
            );
        }
        inner.recreate_balancing_lists(server.sink_url());
    }

    /// Degraded servers whose error timeout has passed and that should be
    /// probed again.
    pub fn servers_due_for_recheck(&self) -> Vec<Arc<Server>> {
        let now = self.now();
        let inner = self.inner.lock();
        inner
            .servers
            .values()
            .filter(|entry| entry.health.is_due_for_recheck(now, &self.policy))
            .map(|entry| entry.server.clone())
            .collect()
    }

    pub fn report_check_result(&self, server: &Server, result: Result<(), &str>) {
        let now = self.now();
        let mut inner = self.inner.lock();

        let Some(entry) = inner.servers.get_mut(server.sink_url()) else {
            return;
        };
        if entry.health.record_check_result(result, now, &self.policy) {
            info!(server = %server, "Server healthy again, re-admitting to balancing list");
            inner.recreate_balancing_lists(server.sink_url());
        }
    }

    /// Re-queues resolved keys whose mapping is older than their recheck
    /// timeout. They keep resolving from the cache while the refresh runs.
    pub fn enqueue_keys_due_for_recheck(&self) -> usize {
        let now = self.now();
        let mut inner = self.inner.lock();

        let due: Vec<String> = inner
            .keys
            .iter()
            .filter(|(_, info)| info.is_due_for_recheck(now))
            .map(|(key, _)| key.clone())
            .collect();
        let queued = due.iter().filter(|key| inner.enqueue_lookup(key)).count();
        drop(inner);

        if queued > 0 {
            debug!(queued, "Re-validating key mappings");
            self.lookup_requested.notify_one();
        }
        queued
    }

    /// Drains the pending lookup set. Used by the resolution path only.
    pub fn take_pending_lookups(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        std::mem::take(&mut inner.pending).into_iter().collect()
    }

    /// Puts keys back after a failed resolution attempt, without waking the
    /// resolution path again.
    pub fn requeue_lookups(&self, keys: Vec<String>) {
        let mut inner = self.inner.lock();
        for key in keys {
            if !inner.pending.contains(&key) {
                inner.pending.insert(key);
            }
        }
    }

    pub fn pending_lookup_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Merges control-plane answers and wakes everyone waiting on them.
    /// An empty answer wakes nobody.
    pub fn merge_resolutions(&self, resolutions: Vec<ResolvedKey>) {
        if resolutions.is_empty() {
            return;
        }
        let now = self.now();
        let mut inner = self.inner.lock();

        for ResolvedKey { key, group_id } in resolutions {
            let all_healthy = match inner.groups.get(&group_id) {
                Some(group) => group.all_healthy,
                None => {
                    warn!(key = %key, group = %group_id, "Key resolved to an unconfigured group");
                    true
                }
            };
            match inner.keys.get_mut(&key) {
                Some(info) => {
                    info.last_check_time = now;
                    info.all_servers_healthy = all_healthy;
                    if info.group_id != group_id {
                        info!(key = %key, from = %info.group_id, to = %group_id, "Key moved to another group");
                        let previous = std::mem::replace(&mut info.group_id, group_id.clone());
                        inner.index_key(&key, Some(&previous), &group_id);
                    }
                }
                None => {
                    inner.index_key(&key, None, &group_id);
                    let info = KeyInfo::new(group_id, now, all_healthy, &self.policy);
                    inner.keys.insert(key, info);
                }
            }
        }
        drop(inner);

        self.resolution_completed.notify_waiters();
    }

    /// Restarts the recheck timeout of every already-resolved key in `keys`.
    /// Keys the control plane left out of its answer keep their cached group
    /// and are not asked about again until the timeout elapses once more.
    pub fn mark_keys_checked(&self, keys: &[String]) -> usize {
        let now = self.now();
        let mut inner = self.inner.lock();
        let mut stamped = 0;
        for key in keys {
            if let Some(info) = inner.keys.get_mut(key) {
                info.last_check_time = now;
                stamped += 1;
            }
        }
        stamped
    }

    pub fn key_info(&self, key: &str) -> Option<KeyInfo> {
        self.inner.lock().keys.get(key).cloned()
    }

    /// Servers currently eligible for traffic in `group_id`.
    pub fn balancing_list(&self, group_id: &str) -> Vec<Arc<Server>> {
        self.inner
            .lock()
            .groups
            .get(group_id)
            .map(|group| group.balancing_list.clone())
            .unwrap_or_default()
    }

    pub fn group_all_healthy(&self, group_id: &str) -> Option<bool> {
        self.inner.lock().groups.get(group_id).map(|group| group.all_healthy)
    }

    /// Future that completes at the next [`Self::merge_resolutions`]. Create
    /// it before calling [`Self::resolve_group_ids`] so the wakeup cannot be
    /// missed.
    pub fn resolution_notified(&self) -> Notified<'_> {
        self.resolution_completed.notified()
    }

    pub async fn wait_for_resolution(&self) {
        self.resolution_completed.notified().await;
    }

    pub(crate) async fn wait_for_lookup_request(&self) {
        self.lookup_requested.notified().await;
    }

    pub fn inspect_state(&self) -> DatabaseSnapshot {
        let now = self.now();
        let inner = self.inner.lock();

        let mut groups: Vec<GroupSnapshot> = inner
            .groups
            .iter()
            .map(|(id, group)| GroupSnapshot {
                id: id.clone(),
                all_healthy: group.all_healthy,
                servers: group.servers.iter().map(|s| s.sink_url().to_string()).collect(),
                balancing_list: group
                    .balancing_list
                    .iter()
                    .map(|s| s.sink_url().to_string())
                    .collect(),
            })
            .collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));

        let mut servers: Vec<ServerSnapshot> = inner
            .servers
            .values()
            .map(|entry| ServerSnapshot {
                sink_url: entry.server.sink_url().to_string(),
                ping_url: entry.server.ping_url().to_string(),
                host_header: entry.server.host_header().to_string(),
                groups: entry.group_ids.clone(),
                health: entry.health.snapshot(now),
            })
            .collect();
        servers.sort_by(|a, b| a.sink_url.cmp(&b.sink_url));

        let mut keys: Vec<KeySnapshot> = inner
            .keys
            .iter()
            .map(|(key, info)| KeySnapshot {
                key: key.clone(),
                group_id: info.group_id.clone(),
                last_check_time: usec_to_datetime(info.last_check_time),
                seconds_since_last_check: seconds_since(info.last_check_time, now),
                last_rejection_error_time: usec_to_datetime(info.last_rejection_error_time),
                all_servers_healthy: info.all_servers_healthy,
            })
            .collect();
        keys.sort_by(|a, b| a.key.cmp(&b.key));

        DatabaseSnapshot {
            groups,
            servers,
            keys,
            pending_lookups: inner.pending.iter().cloned().collect(),
        }
    }
}

impl std::fmt::Debug for ServerDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerDatabase")
            .field("policy", &self.policy)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseSnapshot {
    pub groups: Vec<GroupSnapshot>,
    pub servers: Vec<ServerSnapshot>,
    pub keys: Vec<KeySnapshot>,
    pub pending_lookups: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSnapshot {
    pub id: String,
    pub all_healthy: bool,
    pub servers: Vec<String>,
    pub balancing_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerSnapshot {
    pub sink_url: String,
    pub ping_url: String,
    pub host_header: String,
    pub groups: Vec<String>,
    pub health: ServerHealthSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeySnapshot {
    pub key: String,
    pub group_id: String,
    pub last_check_time: Option<DateTime<Utc>>,
    pub seconds_since_last_check: Option<f64>,
    pub last_rejection_error_time: Option<DateTime<Utc>>,
    pub all_servers_healthy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, USEC_PER_SEC};

    const T0: u64 = 1_700_000_000 * USEC_PER_SEC;

    fn server(address: &str) -> Server {
        Server::new(address, 443, "gateway.example.com", None, None).unwrap()
    }

    fn database(clock: Arc<ManualClock>) -> ServerDatabase {
        ServerDatabase::with_clock(
            vec![
                GroupDefinition {
                    id: "eu".to_string(),
                    servers: vec![server("10.0.0.1"), server("10.0.0.2")],
                },
                GroupDefinition {
                    id: "empty".to_string(),
                    servers: Vec::new(),
                },
            ],
            HealthPolicy::default(),
            clock,
        )
    }

    fn resolved(key: &str, group_id: &str) -> ResolvedKey {
        ResolvedKey {
            key: key.to_string(),
            group_id: group_id.to_string(),
        }
    }

    #[test]
    fn test_unknown_key_is_queued_once() {
        let db = database(Arc::new(ManualClock::new(T0)));
        assert_eq!(db.get_next_server("k1"), ServerSelection::Unknown);
        assert_eq!(db.get_next_server("k1"), ServerSelection::Unknown);
        assert!(db.resolve_group_ids(&["k1"]).is_none());
        assert_eq!(db.pending_lookup_count(), 1);
        assert_eq!(db.take_pending_lookups(), vec!["k1".to_string()]);
        assert_eq!(db.pending_lookup_count(), 0);
    }

    #[test]
    fn test_resolution_creates_key_info() {
        let clock = Arc::new(ManualClock::new(T0));
        let db = database(clock.clone());
        db.merge_resolutions(vec![resolved("k1", "eu")]);

        let info = db.key_info("k1").unwrap();
        assert_eq!(info.group_id, "eu");
        assert_eq!(info.last_check_time, T0);
        assert!(info.all_servers_healthy);
        assert_eq!(db.resolve_group_ids(&["k1"]), Some(vec!["eu".to_string()]));
    }

    #[test]
    fn test_round_robin_covers_group() {
        let db = database(Arc::new(ManualClock::new(T0)));
        db.merge_resolutions(vec![resolved("k1", "eu")]);

        let first = db.get_next_server("k1").server().unwrap();
        let second = db.get_next_server("k1").server().unwrap();
        let third = db.get_next_server("k1").server().unwrap();
        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn test_empty_group_has_no_servers() {
        let db = database(Arc::new(ManualClock::new(T0)));
        db.merge_resolutions(vec![resolved("k1", "empty"), resolved("k2", "missing")]);
        assert_eq!(db.get_next_server("k1"), ServerSelection::NoServers);
        assert_eq!(db.get_next_server("k2"), ServerSelection::NoServers);
    }

    #[test]
    fn test_all_degraded_falls_back_to_full_list() {
        let db = database(Arc::new(ManualClock::new(T0)));
        db.report_request_dropped(&server("10.0.0.1"), 10, "reset");
        db.report_request_dropped(&server("10.0.0.2"), 10, "reset");

        assert_eq!(db.group_all_healthy("eu"), Some(false));
        assert_eq!(db.balancing_list("eu").len(), 2);
    }

    #[test]
    fn test_rejection_stamps_key() {
        let clock = Arc::new(ManualClock::new(T0));
        let db = database(clock.clone());
        db.merge_resolutions(vec![resolved("k1", "eu")]);

        clock.advance(std::time::Duration::from_secs(3));
        db.report_request_rejected("k1", &server("10.0.0.1"), 100, 1000, "HTTP 503");

        let info = db.key_info("k1").unwrap();
        assert_eq!(info.last_rejection_error_time, T0 + 3 * USEC_PER_SEC);
        assert!(!info.all_servers_healthy);
    }

    #[test]
    fn test_key_recheck_uses_shorter_timeout_with_errors() {
        let clock = Arc::new(ManualClock::new(T0));
        let db = database(clock.clone());
        db.merge_resolutions(vec![resolved("healthy", "eu")]);
        assert_eq!(db.enqueue_keys_due_for_recheck(), 0);

        clock.advance(std::time::Duration::from_secs(61));
        assert_eq!(db.enqueue_keys_due_for_recheck(), 0);

        db.report_request_dropped(&server("10.0.0.1"), 10, "reset");
        assert_eq!(db.enqueue_keys_due_for_recheck(), 1);
        // Still resolvable while the refresh is pending
        assert!(db.resolve_group_ids(&["healthy"]).is_some());
    }

    #[test]
    fn test_unanswered_recheck_restarts_timeout() {
        let clock = Arc::new(ManualClock::new(T0));
        let db = database(clock.clone());
        db.merge_resolutions(vec![resolved("k1", "eu")]);

        clock.advance(std::time::Duration::from_secs(301));
        assert_eq!(db.enqueue_keys_due_for_recheck(), 1);
        let asked = db.take_pending_lookups();
        assert_eq!(db.mark_keys_checked(&asked), 1);

        clock.advance(std::time::Duration::from_secs(1));
        assert_eq!(db.enqueue_keys_due_for_recheck(), 0);
        assert_eq!(db.key_info("k1").unwrap().last_check_time, T0 + 301 * USEC_PER_SEC);
        // Unknown keys are left alone
        assert_eq!(db.mark_keys_checked(&["stranger".to_string()]), 0);
    }

    #[test]
    fn test_moved_key_follows_its_new_group_health() {
        let clock = Arc::new(ManualClock::new(T0));
        let db = ServerDatabase::with_clock(
            vec![
                GroupDefinition {
                    id: "eu".to_string(),
                    servers: vec![server("10.0.0.1"), server("10.0.0.2")],
                },
                GroupDefinition {
                    id: "us".to_string(),
                    servers: vec![server("10.0.1.1"), server("10.0.1.2")],
                },
            ],
            HealthPolicy::default(),
            clock,
        );
        db.merge_resolutions(vec![resolved("k1", "eu"), resolved("k2", "us")]);
        db.merge_resolutions(vec![resolved("k1", "us")]);

        db.report_request_dropped(&server("10.0.0.1"), 10, "reset");
        assert!(db.key_info("k1").unwrap().all_servers_healthy);

        db.report_request_dropped(&server("10.0.1.1"), 10, "reset");
        assert!(!db.key_info("k1").unwrap().all_servers_healthy);
        assert!(!db.key_info("k2").unwrap().all_servers_healthy);
    }

    #[test]
    fn test_snapshot_is_serializable() {
        let db = database(Arc::new(ManualClock::new(T0)));
        db.merge_resolutions(vec![resolved("k1", "eu")]);
        db.get_next_server("unknown");

        let snapshot = db.inspect_state();
        assert_eq!(snapshot.groups.len(), 2);
        assert_eq!(snapshot.servers.len(), 2);
        assert_eq!(snapshot.keys.len(), 1);
        assert_eq!(snapshot.pending_lookups, vec!["unknown".to_string()]);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["groups"][0]["id"], "empty");
        assert_eq!(json["servers"][0]["health"]["state"], "healthy");
    }
}
