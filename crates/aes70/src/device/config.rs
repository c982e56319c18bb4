// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::protocol::{DEFAULT_MAX_PDU_SIZE, PDU_HEADER_SIZE};

/// Device configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Concurrent controllers accepted (0 = unbounded)
    #[serde(default = "default_max_controllers")]
    pub max_controllers: usize,

    /// Datagram peers silent this long are evicted when they never
    /// announced a heartbeat (milliseconds)
    #[serde(default = "default_datagram_idle_timeout")]
    pub datagram_idle_timeout_ms: u64,

    /// Period of the datagram eviction sweep (milliseconds)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Notifications queued per controller before new ones are refused
    #[serde(default = "default_outbound_queue_depth")]
    pub outbound_queue_depth: usize,

    /// Largest inbound PDU accepted on stream transports (bytes)
    #[serde(default = "default_max_pdu_size")]
    pub max_pdu_size: usize,

    /// Longest subscriber context blob accepted by the subscription manager
    #[serde(default = "default_max_subscriber_context_length")]
    pub max_subscriber_context_length: u16,

    /// Log every PDU written at trace level
    #[serde(default)]
    pub enable_tracing: bool,
}

fn default_max_controllers() -> usize {
    64
}

fn default_datagram_idle_timeout() -> u64 {
    10_000
}

fn default_sweep_interval() -> u64 {
    1_000
}

fn default_outbound_queue_depth() -> usize {
    256
}

fn default_max_pdu_size() -> usize {
    DEFAULT_MAX_PDU_SIZE
}

fn default_max_subscriber_context_length() -> u16 {
    1024
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            max_controllers: default_max_controllers(),
            datagram_idle_timeout_ms: default_datagram_idle_timeout(),
            sweep_interval_ms: default_sweep_interval(),
            outbound_queue_depth: default_outbound_queue_depth(),
            max_pdu_size: default_max_pdu_size(),
            max_subscriber_context_length: default_max_subscriber_context_length(),
            enable_tracing: false,
        }
    }
}

impl DeviceConfig {
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

    pub fn datagram_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.datagram_idle_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "sweep_interval_ms cannot be 0".into(),
            ));
        }
        if self.datagram_idle_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "datagram_idle_timeout_ms cannot be 0".into(),
            ));
        }
        if self.outbound_queue_depth == 0 {
            return Err(ConfigError::InvalidValue(
                "outbound_queue_depth cannot be 0".into(),
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
