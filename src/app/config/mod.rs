pub mod groups;
pub mod serde_helpers;
mod validation;

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub use super::initialization::LogLevel;
pub use groups::{BufferSettings, DecaySettings, GroupSettings, HealthSettings, ServerSettings};
use serde_helpers::{load_env_millis, load_env_secs, load_env_var};

use crate::buffer::BatcherConfig;
use crate::clock::duration_to_usec;
use crate::sink::{GroupDefinition, HealthPolicy, Server, ServerError};
use crate::stats::DecayParams;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Environment error: {0}")]
    EnvError(String),
    #[error("Invalid server in group '{group}': {source}")]
    Server {
        group: String,
        #[source]
        source: ServerError,
    },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub log_level: LogLevel,
    pub buffer: BufferSettings,
    pub health: HealthSettings,
    pub decay: DecaySettings,
    pub groups: Vec<GroupSettings>,
}

impl SinkConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// File (if any), then `RASK_SINK_*` environment overrides, then
    /// validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(level) = std::env::var("RASK_SINK_LOG_LEVEL") {
            self.log_level = level
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid RASK_SINK_LOG_LEVEL: {e}")))?;
        }

        load_env_var("RASK_SINK_BUFFER_LIMIT", &mut self.buffer.limit_bytes)?;
        load_env_var(
            "RASK_SINK_STRIVE_BATCH_SIZE",
            &mut self.buffer.strive_batch_size,
        )?;

        load_env_var(
            "RASK_SINK_DEGRADE_THRESHOLD",
            &mut self.health.degrade_threshold,
        )?;
        load_env_secs(
            "RASK_SINK_RECHECK_TIMEOUT_ALL_HEALTHY_SECS",
            &mut self.health.recheck_timeout_when_all_healthy,
        )?;
        load_env_secs(
            "RASK_SINK_RECHECK_TIMEOUT_HAVE_ERRORS_SECS",
            &mut self.health.recheck_timeout_when_have_errors,
        )?;
        load_env_millis(
            "RASK_SINK_PROBE_INTERVAL_MS",
            &mut self.health.probe_interval,
        )?;

        load_env_var("RASK_SINK_DECAY_ALPHA", &mut self.decay.alpha)?;
        load_env_secs("RASK_SINK_DECAY_MAX_AGE_SECS", &mut self.decay.max_age)?;
        load_env_secs("RASK_SINK_DECAY_TIME_UNIT_SECS", &mut self.decay.time_unit)?;

        Ok(())
    }

    pub fn batcher_config(&self) -> BatcherConfig {
        BatcherConfig {
            limit: self.buffer.limit_bytes,
            strive_batch_size: self.buffer.strive_batch_size,
        }
    }

    pub fn decay_params(&self) -> DecayParams {
        DecayParams {
            alpha: self.decay.alpha,
            max_age_usec: duration_to_usec(self.decay.max_age),
            time_unit_usec: duration_to_usec(self.decay.time_unit),
        }
    }

    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            degrade_threshold: self.health.degrade_threshold,
            recheck_timeout_when_all_healthy_usec: duration_to_usec(
                self.health.recheck_timeout_when_all_healthy,
            ),
            recheck_timeout_when_have_errors_usec: duration_to_usec(
                self.health.recheck_timeout_when_have_errors,
            ),
            decay: self.decay_params(),
        }
    }

    /// Builds the static topology, constructing every [`Server`].
    pub fn build_groups(&self) -> Result<Vec<GroupDefinition>, ConfigError> {
        self.groups
            .iter()
            .map(|group| {
                let servers = group
                    .servers
                    .iter()
                    .map(|s| {
                        Server::new(
                            &s.address,
                            s.port,
                            &s.host_name,
                            s.certificate_path.as_deref(),
                            s.proxy.clone(),
                        )
                        .map_err(|source| ConfigError::Server {
                            group: group.id.clone(),
                            source,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(GroupDefinition {
                    id: group.id.clone(),
                    servers,
                })
            })
            .collect()
    }
}
