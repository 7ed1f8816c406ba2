use std::collections::HashSet;

use super::{ConfigError, SinkConfig};

impl SinkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer.limit_bytes == 0 {
            return Err(ConfigError::InvalidConfig(
                "Buffer limit must be greater than 0".to_string(),
            ));
        }

        if self.buffer.strive_batch_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "Strive batch size must be greater than 0".to_string(),
            ));
        }

        if self.buffer.limit_bytes < self.buffer.strive_batch_size {
            return Err(ConfigError::InvalidConfig(format!(
                "Buffer limit ({}) must be at least as large as strive batch size ({})",
                self.buffer.limit_bytes, self.buffer.strive_batch_size
            )));
        }

        let threshold = self.health.degrade_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::InvalidConfig(format!(
                "Degrade threshold must be in (0, 1], got {threshold}"
            )));
        }

        if self.health.probe_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "Probe interval must be greater than 0".to_string(),
            ));
        }

        let alpha = self.decay.alpha;
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(ConfigError::InvalidConfig(format!(
                "Decay alpha must be in (0, 1), got {alpha}"
            )));
        }

        if self.decay.time_unit.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "Decay time unit must be greater than 0".to_string(),
            ));
        }

        // A zero max age leaves the rejection-rate average permanently
        // unavailable, and no server could ever be degraded.
        if self.decay.max_age.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "Decay max age must be greater than 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for group in &self.groups {
            if !seen.insert(group.id.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "Duplicate group id '{}'",
                    group.id
                )));
            }
            if group.servers.is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "Group '{}' has no servers",
                    group.id
                )));
            }
        }

        Ok(())
    }
}
