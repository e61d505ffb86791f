// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Probe driver process management.
//!
//! Each configured driver is a child process speaking the framed protocol
//! on stdio (or the legacy text commands). The manager resolves and
//! verifies executables at load time, supervises the children with restart
//! backoff, serializes writes per driver, and fans driver output into the
//! shared frame handler.

mod driver;

pub use driver::Driver;
pub(crate) use driver::OutFrame;
#[cfg(test)]
pub(crate) use driver::WriteQueue;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use hm_core::{ErrorKind, HostRecord, MonitorConfig};
use hm_wire::{legacy, EncodeError, Message, MessageStatus, OrchestratorMessageType};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::stream::FrameHandler;
use hm_wire::DriverMessageType;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver {name}: executable {path} does not exist")]
    MissingExecutable { name: String, path: PathBuf },

    #[error("driver {0} configured twice")]
    Duplicate(String),

    #[error("no driver named {0}")]
    UnknownDriver(String),

    #[error("driver {name}: spawn failed: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("driver {name}: INIT handshake failed: {reason}")]
    Handshake { name: String, reason: String },

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl DriverError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DriverError::MissingExecutable { .. } | DriverError::Duplicate(_) => {
                ErrorKind::Configuration
            }
            DriverError::UnknownDriver(_) => ErrorKind::Configuration,
            DriverError::Spawn { .. } | DriverError::Handshake { .. } => ErrorKind::Transient,
            DriverError::Encode(_) => ErrorKind::Fatal,
        }
    }
}

#[derive(Debug)]
pub struct DriverManager {
    drivers: HashMap<String, Arc<Driver>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    ds_location: String,
}

impl DriverManager {
    /// Resolve and verify every configured driver.
    ///
    /// A relative executable is resolved against `driver_dir`. A missing
    /// executable is a configuration error and fatal at startup.
    pub fn load(config: &MonitorConfig) -> Result<Self, DriverError> {
        info!("loading drivers");

        let mut drivers = HashMap::new();

        for spec in &config.drivers {
            let path = if spec.executable.is_absolute() {
                spec.executable.clone()
            } else {
                config.driver_dir.join(&spec.executable)
            };

            if !path.is_file() {
                return Err(DriverError::MissingExecutable { name: spec.name.clone(), path });
            }

            let driver = Arc::new(Driver::new(spec.name.clone(), path, &spec.arguments, spec.legacy));

            if drivers.insert(spec.name.clone(), driver).is_some() {
                return Err(DriverError::Duplicate(spec.name.clone()));
            }

            info!(driver = %spec.name, "driver loaded");
        }

        Ok(Self {
            drivers,
            tasks: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            ds_location: config.ds_location.display().to_string(),
        })
    }

    /// Start every driver, wiring its stdout into `handler`.
    ///
    /// A driver that fails to come up is marked failed and retried with
    /// backoff; this is not fatal once the executables have been verified.
    pub fn start<H>(&self, handler: Arc<H>)
    where
        H: FrameHandler<DriverMessageType> + 'static,
    {
        let mut tasks = self.tasks.lock();
        for driver in self.drivers.values() {
            let task = tokio::spawn(Arc::clone(driver).run(
                Arc::clone(&handler),
                self.cancel.clone(),
            ));
            tasks.push(task);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Driver>> {
        self.drivers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }

    /// Ask a host's driver to begin probing it.
    pub fn start_monitor(&self, host: &HostRecord, update_remotes: bool) -> Result<(), DriverError> {
        let driver = self
            .get(&host.im_mad)
            .ok_or_else(|| DriverError::UnknownDriver(host.im_mad.clone()))?;

        let bytes = if driver.is_legacy() {
            legacy::monitor_command(host.oid, &host.name, &self.ds_location, update_remotes)
                .into_bytes()
        } else {
            let flag = if update_remotes { "1" } else { "0" };
            Message::new(OrchestratorMessageType::StartMonitor, host.oid, flag).encode()?
        };

        driver.enqueue(OutFrame { bytes, critical: true });
        Ok(())
    }

    /// Ask a driver to stop probing a host.
    pub fn stop_monitor(&self, oid: i32, name: &str, im_mad: &str) -> Result<(), DriverError> {
        let driver = self
            .get(im_mad)
            .ok_or_else(|| DriverError::UnknownDriver(im_mad.to_string()))?;

        let bytes = if driver.is_legacy() {
            legacy::stop_monitor_command(oid, name).into_bytes()
        } else {
            let mut payload = String::new();
            payload.push_str("<STOP_MONITOR>");
            hm_core::xml::write_tag(&mut payload, "NAME", name);
            hm_core::xml::write_tag(&mut payload, "IM_MAD", im_mad);
            payload.push_str("</STOP_MONITOR>");
            Message::new(OrchestratorMessageType::StopMonitor, oid, payload).encode()?
        };

        driver.enqueue(OutFrame { bytes, critical: true });
        Ok(())
    }

    /// Send a serialized host pool to every framed driver for bulk refresh.
    pub fn broadcast_host_list(&self, pool_xml: &str) {
        let frame = Message::new(OrchestratorMessageType::HostList, -1, pool_xml)
            .with_status(MessageStatus::Success);

        let bytes = match frame.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to encode HOST_LIST broadcast");
                return;
            }
        };

        for driver in self.drivers.values() {
            if driver.is_legacy() {
                continue;
            }
            driver.enqueue(OutFrame { bytes: bytes.clone(), critical: false });
        }
    }

    /// Stop every driver: FINALIZE, a grace period, then termination.
    pub async fn stop(&self) {
        info!("stopping drivers");
        self.cancel.cancel();

        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "driver task did not shut down cleanly");
            }
        }
    }
}

#[cfg(test)]
#[path = "drivers_tests.rs"]
mod tests;
