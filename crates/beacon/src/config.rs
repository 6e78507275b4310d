// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry configuration derived from the registry URL.

use std::time::Duration;

use crate::url::{
    ServiceUrl, MAX_CONNECT_RETRY_TIMES_OPTION, NAME_OPTION, TASK_RETRY_INTERVAL_OPTION,
};

/// Default interval between task retries.
pub const DEFAULT_TASK_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Interval between connect attempts. Fixed by design: the reconnect loop
/// must never schedule the next attempt sooner than this.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for one registry instance, read from its URL.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Logical registry name; defaults to the URL scheme. Also the key the
    /// backup store files snapshots under.
    pub name: String,

    /// Maximum connect retries: `<0` infinite, `0` none, `>0` bounded.
    pub max_connect_retry_times: i32,

    /// Interval between task retries.
    pub task_retry_interval: Duration,
}

impl RegistryConfig {
    /// Read configuration from a registry URL, applying defaults.
    pub fn from_url(url: &ServiceUrl) -> Self {
        Self {
            name: url.string_param(NAME_OPTION, url.scheme()),
            max_connect_retry_times: url.i32_param(MAX_CONNECT_RETRY_TIMES_OPTION, -1),
            task_retry_interval: Duration::from_millis(
                url.u64_param(
                    TASK_RETRY_INTERVAL_OPTION,
                    DEFAULT_TASK_RETRY_INTERVAL.as_millis() as u64,
                ),
            ),
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.name.is_empty() {
            return Err("registry name must not be empty");
        }
        if self.task_retry_interval.is_zero() {
            return Err("taskRetryInterval must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_bare_url() {
        let url: ServiceUrl = "memory://hub".parse().unwrap();
        let config = RegistryConfig::from_url(&url);
        assert_eq!(config.name, "memory");
        assert_eq!(config.max_connect_retry_times, -1);
        assert_eq!(config.task_retry_interval, DEFAULT_TASK_RETRY_INTERVAL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn options_override_defaults() {
        let url: ServiceUrl =
            "zk://10.0.0.1:2181?name=primary&maxConnectRetryTimes=3&taskRetryInterval=100"
                .parse()
                .unwrap();
        let config = RegistryConfig::from_url(&url);
        assert_eq!(config.name, "primary");
        assert_eq!(config.max_connect_retry_times, 3);
        assert_eq!(config.task_retry_interval, Duration::from_millis(100));
    }

    #[test]
    fn zero_retry_interval_fails_validation() {
        let url: ServiceUrl = "memory://hub?taskRetryInterval=0".parse().unwrap();
        assert!(RegistryConfig::from_url(&url).validate().is_err());
    }
}
