//! Per-server health tracking.
//!
//! Healthy -> Degraded when the decaying rejection rate reaches the degrade
//! threshold. Degraded -> Healthy only after `recheck_timeout_when_have_errors`
//! has passed without new errors and a recheck has succeeded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{USEC_PER_SEC, seconds_since, usec_to_datetime};
use crate::stats::{BasicCounter, CounterSnapshot, Counter, DecayParams, DiscExponentialAverage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthPolicy {
    /// Rejection rate (0..=1) at which a server is taken out of rotation.
    pub degrade_threshold: f64,
    pub recheck_timeout_when_all_healthy_usec: u64,
    pub recheck_timeout_when_have_errors_usec: u64,
    pub decay: DecayParams,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            degrade_threshold: 0.5,
            recheck_timeout_when_all_healthy_usec: 5 * 60 * USEC_PER_SEC,
            recheck_timeout_when_have_errors_usec: 60 * USEC_PER_SEC,
            decay: DecayParams::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerHealth {
    state: HealthState,
    rejection_rate: DiscExponentialAverage,
    upload_speed: DiscExponentialAverage,
    accepted: BasicCounter,
    errors: Counter,
    last_error_time: u64,
    last_error_message: Option<String>,
    last_check_time: u64,
}

impl ServerHealth {
    pub fn new(decay: DecayParams) -> Self {
        Self {
            state: HealthState::Healthy,
            rejection_rate: DiscExponentialAverage::new(decay),
            upload_speed: DiscExponentialAverage::new(decay),
            accepted: BasicCounter::new(),
            errors: Counter::new(),
            last_error_time: 0,
            last_error_message: None,
            last_check_time: 0,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn is_healthy(&self) -> bool {
        self.state == HealthState::Healthy
    }

    pub fn rejection_rate(&self) -> f64 {
        self.rejection_rate.average()
    }

    pub fn last_error_time(&self) -> u64 {
        self.last_error_time
    }

    pub fn record_accepted(&mut self, upload_size: usize, upload_time_usec: u64, now: u64) {
        self.rejection_rate.update(0.0, now);
        self.record_upload_speed(upload_size, upload_time_usec, now);
        self.accepted.increment(Some(now));
    }

    /// Returns true when this report moved the server out of rotation.
    pub fn record_rejected(
        &mut self,
        upload_size: usize,
        upload_time_usec: u64,
        error_message: &str,
        now: u64,
        policy: &HealthPolicy,
    ) -> bool {
        self.record_upload_speed(upload_size, upload_time_usec, now);
        self.record_error("rejected", error_message, now, policy)
    }

    /// Returns true when this report moved the server out of rotation.
    pub fn record_dropped(&mut self, error_message: &str, now: u64, policy: &HealthPolicy) -> bool {
        self.record_error("dropped", error_message, now, policy)
    }

    pub fn is_due_for_recheck(&self, now: u64, policy: &HealthPolicy) -> bool {
        self.state == HealthState::Degraded
            && now.saturating_sub(self.last_error_time) >= policy.recheck_timeout_when_have_errors_usec
    }

    /// Applies a probe result. Returns true when the server went back into
    /// rotation.
    pub fn record_check_result(
        &mut self,
        result: Result<(), &str>,
        now: u64,
        policy: &HealthPolicy,
    ) -> bool {
        self.last_check_time = now;
        match result {
            Ok(()) if self.is_due_for_recheck(now, policy) => {
                self.state = HealthState::Healthy;
                self.rejection_rate = DiscExponentialAverage::new(policy.decay);
                self.errors.update(0, "recheck_passed", Some(now));
                true
            }
            Ok(()) => false,
            Err(message) => {
                self.errors.increment("recheck_failed", Some(now));
                self.last_error_time = now;
                self.last_error_message = Some(message.to_string());
                false
            }
        }
    }

    pub fn snapshot(&self, now: u64) -> ServerHealthSnapshot {
        ServerHealthSnapshot {
            state: self.state,
            rejection_rate: self.rejection_rate.average(),
            rejection_rate_completeness: self.rejection_rate.completeness(now),
            upload_speed_bytes_per_sec: self
                .upload_speed
                .available()
                .then(|| self.upload_speed.average()),
            accepted: self.accepted.snapshot(now),
            consecutive_errors: self.errors.snapshot(now),
            last_error_time: usec_to_datetime(self.last_error_time),
            seconds_since_last_error: seconds_since(self.last_error_time, now),
            last_error_message: self.last_error_message.clone(),
            last_check_time: usec_to_datetime(self.last_check_time),
        }
    }

    fn record_error(
        &mut self,
        actor: &str,
        error_message: &str,
        now: u64,
        policy: &HealthPolicy,
    ) -> bool {
        self.rejection_rate.update(1.0, now);
        self.errors.increment(actor, Some(now));
        self.last_error_time = now;
        self.last_error_message = Some(error_message.to_string());

        if self.state == HealthState::Healthy
            && self.rejection_rate.average() >= policy.degrade_threshold
        {
            self.state = HealthState::Degraded;
            return true;
        }
        false
    }

    fn record_upload_speed(&mut self, upload_size: usize, upload_time_usec: u64, now: u64) {
        if upload_time_usec == 0 {
            return;
        }
        let bytes_per_sec = upload_size as f64 * USEC_PER_SEC as f64 / upload_time_usec as f64;
        self.upload_speed.update(bytes_per_sec, now);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerHealthSnapshot {
    pub state: HealthState,
    pub rejection_rate: f64,
    pub rejection_rate_completeness: f64,
    pub upload_speed_bytes_per_sec: Option<f64>,
    pub accepted: CounterSnapshot,
    pub consecutive_errors: CounterSnapshot,
    pub last_error_time: Option<DateTime<Utc>>,
    pub seconds_since_last_error: Option<f64>,
    pub last_error_message: Option<String>,
    pub last_check_time: Option<DateTime<Utc>>,
}
