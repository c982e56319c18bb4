// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::protocol::{DEFAULT_MAX_PDU_SIZE, PDU_HEADER_SIZE};

/// Behaviour switches of a [`Connection`](super::Connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Reconnect with backoff after the connection is lost.
    #[serde(default = "default_true")]
    pub automatic_reconnect: bool,

    /// Re-send every cached subscription after a reconnect.
    #[serde(default = "default_true")]
    pub refresh_subscriptions_on_reconnection: bool,

    /// Keep resolved objects across a reconnect, marked stale.
    #[serde(default = "default_true")]
    pub retain_object_cache_after_disconnect: bool,

    /// Log every PDU in and out at trace level.
    #[serde(default)]
    pub enable_tracing: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            automatic_reconnect: true,
            refresh_subscriptions_on_reconnection: true,
            retain_object_cache_after_disconnect: true,
            enable_tracing: false,
        }
    }
}

/// Connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub options: ConnectionOptions,

    /// KeepAlive period in milliseconds (0 disables heartbeats)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Default command timeout in milliseconds
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,

    /// Transport connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// First reconnect delay in milliseconds, doubled after each failure
    #[serde(default = "default_reconnect_initial_delay")]
    pub reconnect_initial_delay_ms: u64,

    /// Upper bound of the reconnect delay in milliseconds
    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_ms: u64,

    /// Reconnect attempts before giving up (0 = unbounded)
    #[serde(default)]
    pub max_reconnect_attempts: u32,

    /// Largest inbound PDU accepted (bytes)
    #[serde(default = "default_max_pdu_size")]
    pub max_pdu_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_interval() -> u64 {
    1_000
}

fn default_response_timeout() -> u64 {
    5_000
}

fn default_connect_timeout() -> u64 {
    5_000
}

fn default_reconnect_initial_delay() -> u64 {
    250
}

fn default_reconnect_max_delay() -> u64 {
    10_000
}

fn default_max_pdu_size() -> usize {
    DEFAULT_MAX_PDU_SIZE
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            options: ConnectionOptions::default(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            response_timeout_ms: default_response_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            reconnect_initial_delay_ms: default_reconnect_initial_delay(),
            reconnect_max_delay_ms: default_reconnect_max_delay(),
            max_reconnect_attempts: 0,
            max_pdu_size: default_max_pdu_size(),
        }
    }
}

impl ConnectionConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_initial_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    /// Silence after which the peer is considered gone.
    pub fn stale_threshold(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| self.heartbeat_interval() * 3)
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        let delay = self.reconnect_initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.reconnect_max_delay_ms))
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.response_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "response_timeout_ms cannot be 0".into(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "connect_timeout_ms cannot be 0".into(),
            ));
        }
        if self.reconnect_initial_delay_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "reconnect_initial_delay_ms cannot be 0".into(),
            ));
        }
        if self.reconnect_initial_delay_ms > self.reconnect_max_delay_ms {
            return Err(ConfigError::InvalidValue(
                "reconnect_initial_delay_ms exceeds reconnect_max_delay_ms".into(),
            ));
        }
        if self.max_pdu_size < PDU_HEADER_SIZE {
            return Err(ConfigError::InvalidValue(format!(
                "max_pdu_size must be at least {PDU_HEADER_SIZE}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stale_threshold(), Some(Duration::from_secs(3)));
        assert!(config.options.automatic_reconnect);
    }

    #[test]
    fn test_reconnect_backoff_doubles_and_caps() {
        let config = ConnectionConfig {
            reconnect_initial_delay_ms: 100,
            reconnect_max_delay_ms: 500,
            ..Default::default()
        };
        assert_eq!(config.reconnect_delay(1), Duration::from_millis(100));
        assert_eq!(config.reconnect_delay(2), Duration::from_millis(200));
        assert_eq!(config.reconnect_delay(3), Duration::from_millis(400));
        assert_eq!(config.reconnect_delay(4), Duration::from_millis(500));
        assert_eq!(config.reconnect_delay(60), Duration::from_millis(500));
    }

    #[test]
    fn test_heartbeat_disabled() {
        let config = ConnectionConfig {
            heartbeat_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.stale_threshold(), None);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ConnectionConfig::from_toml_str(
            r#"
            heartbeat_interval_ms = 1500
            [options]
            automatic_reconnect = false
            "#,
        )
        .unwrap();
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(1500));
        assert!(!config.options.automatic_reconnect);
        assert!(config.options.refresh_subscriptions_on_reconnection);
        assert_eq!(config.response_timeout_ms, 5_000);
    }

    #[test]
    fn test_validation_rejects_inverted_backoff() {
        let err = ConnectionConfig::from_toml_str(
            "reconnect_initial_delay_ms = 900\nreconnect_max_delay_ms = 100\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "response_timeout_ms = 250").unwrap();
        let config = ConnectionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.response_timeout(), Duration::from_millis(250));

        assert!(matches!(
            ConnectionConfig::from_file(Path::new("/nonexistent/aes70.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
