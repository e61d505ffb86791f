// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed daemon configuration.
//!
//! The runtime consumes this record; it is loaded from a TOML file by the
//! binary. Every field has a default so a missing file yields a workable
//! local setup.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub orchestrator: OrchestratorConfig,
    pub db: DbConfig,
    pub udp: UdpConfig,
    #[serde(rename = "driver")]
    pub drivers: Vec<DriverSpec>,
    pub host: HostConfig,
    pub sweeper: SweeperConfig,
    pub log: LogConfig,
    /// Prefix for driver executables given as relative paths.
    pub driver_dir: PathBuf,
    /// Datastore location passed to legacy drivers.
    pub ds_location: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            db: DbConfig::default(),
            udp: UdpConfig::default(),
            drivers: Vec::new(),
            host: HostConfig::default(),
            sweeper: SweeperConfig::default(),
            log: LogConfig::default(),
            driver_dir: PathBuf::from("/usr/lib/one/mads"),
            ds_location: PathBuf::from("/var/lib/one/datastores"),
        }
    }
}

impl MonitorConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.udp.threads == 0 {
            return Err(ConfigError::Invalid("udp.threads must be at least 1".to_string()));
        }
        if self.sweeper.timer_period == 0 {
            return Err(ConfigError::Invalid("sweeper.timer_period must be non-zero".to_string()));
        }
        if self.host.monitoring_interval == 0 {
            return Err(ConfigError::Invalid(
                "host.monitoring_interval must be non-zero".to_string(),
            ));
        }
        for driver in &self.drivers {
            if driver.name.is_empty() {
                return Err(ConfigError::Invalid("driver with empty name".to_string()));
            }
            if driver.executable.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "driver {} has no executable",
                    driver.name
                )));
            }
        }
        Ok(())
    }
}

/// XML-RPC endpoint of the orchestrator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    pub endpoint: String,
    /// Response buffer cap in bytes.
    pub message_size: u64,
    /// Call timeout in seconds.
    pub timeout: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:2633/RPC2".to_string(),
            message_size: 1_073_741_824,
            timeout: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbBackend {
    Sqlite,
    Mysql,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbConfig {
    pub backend: DbBackend,
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub encoding: String,
    pub connections: u32,
    /// Database file for the sqlite backend.
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            backend: DbBackend::Sqlite,
            server: "localhost".to_string(),
            port: 0,
            user: "oneadmin".to_string(),
            password: "oneadmin".to_string(),
            name: "opennebula".to_string(),
            encoding: String::new(),
            connections: 50,
            path: PathBuf::from("monitor.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UdpConfig {
    pub address: String,
    pub port: u16,
    pub threads: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self { address: "0.0.0.0".to_string(), port: 4124, threads: 16 }
    }
}

/// One probe driver entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverSpec {
    pub name: String,
    pub executable: PathBuf,
    pub arguments: String,
    pub threads: usize,
    /// Emit unframed `MONITOR`/`STOPMONITOR` commands instead of frames.
    pub legacy: bool,
}

impl Default for DriverSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            executable: PathBuf::new(),
            arguments: String::new(),
            threads: 0,
            legacy: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    /// Monitoring row retention in seconds; 0 keeps rows forever, negative
    /// disables monitoring persistence entirely.
    pub monitor_expiration: i64,
    /// Per-host probe cadence in seconds.
    pub monitoring_interval: u64,
    /// Probe dispatch cap per sweeper tick.
    pub monitoring_threads: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self { monitor_expiration: 86_400, monitoring_interval: 60, monitoring_threads: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweeperConfig {
    /// Seconds between sweeper ticks.
    pub timer_period: u64,
    /// Seconds after which an unanswered probe counts as stuck.
    pub monitor_expire: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self { timer_period: 30, monitor_expire: 300 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Log file path; stderr when unset.
    pub file: Option<PathBuf>,
    /// Filter directive, e.g. `info` or `hm_daemon=debug`.
    pub level: Option<String>,
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
