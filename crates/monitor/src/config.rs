//! Monitor and dispatcher tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when validating a [`MonitorConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field has a value the monitor cannot run with.
    #[error("Invalid monitor setting '{field}': {reason}")]
    InvalidValue {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Settings for the [`crate::Monitor`], [`crate::Dispatcher`] and
/// [`crate::Scheduler`].
///
/// Deserialised from the `[monitor]` table of the configuration file; every
/// field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between the start of consecutive ticks.
    pub poll_interval_secs: u64,
    /// Repositories checked concurrently within one tick.
    pub max_concurrent_repositories: usize,
    /// Upper bound on a single source fetch.
    pub fetch_timeout_secs: u64,
    /// Upper bound on a single notification send.
    pub send_timeout_secs: u64,
    /// Pages fetched per repository and event type while catching up.
    pub max_pages: u32,
    /// Consecutive not-found or access-revoked checks before a repository is
    /// untracked.
    pub repository_failure_threshold: u32,
    /// Consecutive permanent send failures before a destination is pruned.
    pub destination_failure_threshold: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            max_concurrent_repositories: 4,
            fetch_timeout_secs: 30,
            send_timeout_secs: 30,
            max_pages: 3,
            repository_failure_threshold: 3,
            destination_failure_threshold: 3,
        }
    }
}

impl MonitorConfig {
    /// Rejects zero intervals, timeouts, limits and thresholds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, u64); 7] = [
            ("poll_interval_secs", self.poll_interval_secs),
            (
                "max_concurrent_repositories",
                self.max_concurrent_repositories as u64,
            ),
            ("fetch_timeout_secs", self.fetch_timeout_secs),
            ("send_timeout_secs", self.send_timeout_secs),
            ("max_pages", u64::from(self.max_pages)),
            (
                "repository_failure_threshold",
                u64::from(self.repository_failure_threshold),
            ),
            (
                "destination_failure_threshold",
                u64::from(self.destination_failure_threshold),
            ),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Time between ticks.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Timeout applied to each source fetch.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Timeout applied to each notification send.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_zero_values_are_rejected() {
        let config = MonitorConfig {
            max_concurrent_repositories: 0,
            ..MonitorConfig::default()
        };
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::InvalidValue {
                field: "max_concurrent_repositories",
                reason: "must be greater than zero".to_string(),
            }
        );

        let config = MonitorConfig {
            destination_failure_threshold: 0,
            ..MonitorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
