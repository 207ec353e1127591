// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dispatch coordinator configuration.

use crate::auth::{Role, UserRecord};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

/// Dispatch coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// HTTP/WebSocket port (default: 8000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds a `requested` ride stays open before auto-cancel
    #[serde(default = "default_offer_timeout")]
    pub offer_timeout_secs: u64,

    /// Seconds without inbound traffic before the connection is closed
    #[serde(default = "default_keepalive_window")]
    pub keepalive_window_secs: u64,

    /// Interval for the offer-timeout and idle-connection sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Outbound event buffer per connection (events dropped when full)
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Maximum concurrent push connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Users seeded into the auth directory at startup
    #[serde(default = "default_users")]
    pub users: Vec<UserRecord>,
}

fn default_bind_address() -> IpAddr {
    "0.0.0.0".parse().unwrap()
}

fn default_port() -> u16 {
    8000
}

fn default_offer_timeout() -> u64 {
    120
}

fn default_keepalive_window() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    5
}

fn default_channel_capacity() -> usize {
    64
}

fn default_max_connections() -> usize {
    1000
}

fn default_users() -> Vec<UserRecord> {
    // Demo accounts so the stock client works against a default-config server.
    vec![
        UserRecord {
            id: "passenger_1".into(),
            phone: "+10000000001".into(),
            password: "passenger".into(),
            role: Role::Passenger,
        },
        UserRecord {
            id: "driver_1".into(),
            phone: "+10000000002".into(),
            password: "driver".into(),
            role: Role::Driver,
        },
        UserRecord {
            id: "driver_2".into(),
            phone: "+10000000003".into(),
            password: "driver".into(),
            role: Role::Driver,
        },
    ]
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            offer_timeout_secs: default_offer_timeout(),
            keepalive_window_secs: default_keepalive_window(),
            sweep_interval_secs: default_sweep_interval(),
            channel_capacity: default_channel_capacity(),
            max_connections: default_max_connections(),
            users: default_users(),
        }
    }
}

impl DispatchConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Get offer timeout as Duration.
    pub fn offer_timeout(&self) -> Duration {
        Duration::from_secs(self.offer_timeout_secs)
    }

    /// Get keepalive window as Duration.
    pub fn keepalive_window(&self) -> Duration {
        Duration::from_secs(self.keepalive_window_secs)
    }

    /// Get sweep interval as Duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("port cannot be 0".into()));
        }
        if self.offer_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "offer_timeout_secs cannot be 0".into(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "sweep_interval_secs cannot be 0".into(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "channel_capacity cannot be 0".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "max_connections cannot be 0".into(),
            ));
        }
        let mut ids: Vec<&str> = self.users.iter().map(|u| u.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.users.len() {
            return Err(ConfigError::InvalidValue("duplicate user id".into()));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(s) => write!(f, "I/O error: {}", s),
            Self::ParseError(s) => write!(f, "Parse error: {}", s),
            Self::SerializeError(s) => write!(f, "Serialize error: {}", s),
            Self::InvalidValue(s) => write!(f, "Invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}
