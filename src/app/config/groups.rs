use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::sink::ProxyConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    /// Byte budget shared by queued and in-flight data.
    pub limit_bytes: usize,
    pub strive_batch_size: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            limit_bytes: 64 * 1024 * 1024,
            strive_batch_size: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    #[serde(
        rename = "recheck_timeout_when_all_healthy_secs",
        with = "super::serde_helpers::secs"
    )]
    pub recheck_timeout_when_all_healthy: Duration,
    #[serde(
        rename = "recheck_timeout_when_have_errors_secs",
        with = "super::serde_helpers::secs"
    )]
    pub recheck_timeout_when_have_errors: Duration,
    pub degrade_threshold: f64,
    #[serde(rename = "probe_interval_ms", with = "super::serde_helpers")]
    pub probe_interval: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            recheck_timeout_when_all_healthy: Duration::from_secs(5 * 60),
            recheck_timeout_when_have_errors: Duration::from_secs(60),
            degrade_threshold: 0.5,
            probe_interval: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecaySettings {
    /// Weight kept per time unit.
    pub alpha: f64,
    #[serde(rename = "max_age_secs", with = "super::serde_helpers::secs")]
    pub max_age: Duration,
    #[serde(rename = "time_unit_secs", with = "super::serde_helpers::secs")]
    pub time_unit: Duration,
}

impl Default for DecaySettings {
    fn default() -> Self {
        Self {
            alpha: 0.8,
            max_age: Duration::from_secs(60),
            time_unit: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub host_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
}

fn default_port() -> u16 {
    443
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSettings {
    pub id: String,
    #[serde(default)]
    pub servers: Vec<ServerSettings>,
}
