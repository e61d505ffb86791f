// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared context for protocol handlers and the sweeper.
//!
//! Bundles the host pool, monitoring store, driver manager, and the
//! upstream writer behind the actions the protocol needs. Handlers and the
//! sweeper call these methods instead of reaching into each other, which
//! keeps the dependency graph a tree.
//!
//! Lease discipline: every method mutates a record under an exclusive
//! lease, releases it, and only then touches the store or a driver pipe.

use std::sync::Arc;

use hm_core::{Clock, HostState, MonitoringDocument, TemplateParser};
use hm_wire::{DriverMessageType, Message, MessageStatus, OrchestratorMessageType};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::drivers::DriverManager;
use crate::pool::{HostPool, UpdateOutcome};
use crate::storage::MonitoringStore;

/// Serialized frame writer towards the orchestrator.
///
/// Frames from any task funnel through one channel so stdout writes never
/// interleave.
#[derive(Clone)]
pub struct OrchestratorWriter {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl OrchestratorWriter {
    /// Writer backed by a channel; the caller owns the draining end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Writer draining to the process stdout.
    pub fn stdout() -> Self {
        let (writer, mut rx) = Self::channel();
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let mut out = tokio::io::stdout();
            while let Some(bytes) = rx.recv().await {
                if out.write_all(&bytes).await.is_err() {
                    return;
                }
                let _ = out.flush().await;
            }
        });
        writer
    }

    pub fn send(&self, msg: &Message<OrchestratorMessageType>) {
        match msg.encode() {
            Ok(bytes) => {
                if self.tx.send(bytes).is_err() {
                    warn!("orchestrator writer closed, dropping frame");
                }
            }
            Err(e) => error!(error = %e, "failed to encode orchestrator frame"),
        }
    }

    /// `HOST_STATE` notification with the textual effective state.
    pub fn host_state(&self, oid: i32, state: HostState) {
        self.send(&Message::new(
            OrchestratorMessageType::HostState,
            oid,
            state.effective().as_str(),
        ));
    }

    pub fn init_success(&self) {
        self.send(
            &Message::new(OrchestratorMessageType::Init, -1, "")
                .with_status(MessageStatus::Success),
        );
    }

    pub fn finalize_success(&self) {
        self.send(
            &Message::new(OrchestratorMessageType::Finalize, -1, "")
                .with_status(MessageStatus::Success),
        );
    }
}

/// Everything a handler needs, by value of one `Arc`.
pub struct MonitorCtx<C: Clock> {
    pub pool: Arc<HostPool>,
    pub store: Arc<MonitoringStore>,
    pub drivers: Arc<DriverManager>,
    pub writer: OrchestratorWriter,
    pub clock: C,
    pub parser: Arc<dyn TemplateParser>,
}

impl<C: Clock> MonitorCtx<C> {
    /// Dispatch a probe request for a host.
    ///
    /// Offline hosts are never probed; a missing driver is logged and the
    /// record is left untouched so the sweeper keeps retrying.
    pub fn start_host_monitor(&self, oid: i32, update_remotes: bool) {
        let Some(mut host) = self.pool.get_exclusive(oid) else {
            warn!(oid, "start_monitor: unknown host");
            return;
        };

        if host.state == HostState::Offline {
            debug!(oid, "start_monitor: host is offline, not probing");
            return;
        }

        if self.drivers.get(&host.im_mad).is_none() {
            error!(oid, driver = %host.im_mad, "start_monitor: no such driver");
            return;
        }

        host.begin_monitor(self.clock.epoch_secs());
        debug!(oid, host = %host.name, "monitoring host");
        let snapshot = host.clone();
        drop(host);

        if let Err(e) = self.drivers.start_monitor(&snapshot, update_remotes) {
            error!(oid, error = %e, kind = %e.kind(), "failed to dispatch START_MONITOR");
        }
    }

    /// Cancel probing for a host, notifying its driver.
    ///
    /// Works from the payload identity too, so a STOP_MONITOR racing a
    /// DEL_HOST still reaches the driver.
    pub fn stop_host_monitor(&self, oid: i32, name: &str, im_mad: &str) {
        let identity = match self.pool.get_exclusive(oid) {
            Some(mut host) => {
                host.monitor_in_progress = false;
                (host.name.clone(), host.im_mad.clone())
            }
            None => (name.to_string(), im_mad.to_string()),
        };

        debug!(oid, host = %identity.0, "stopping monitoring");

        if let Err(e) = self.drivers.stop_monitor(oid, &identity.0, &identity.1) {
            error!(oid, error = %e, "failed to dispatch STOP_MONITOR");
        }
    }

    /// Upsert from an orchestrator host document.
    pub fn update_host(&self, xml: &str) {
        match self.pool.upsert_from_xml(xml) {
            Ok(UpdateOutcome::Inserted { oid }) => {
                info!(oid, "host added");
                self.start_host_monitor(oid, false);
            }
            Ok(UpdateOutcome::Updated { oid, old_state, new_state }) => {
                debug!(oid, from = %old_state, to = %new_state, "host updated");
                // Re-enable: a disabled host brought back starts a fresh
                // cycle with a remote refresh.
                if old_state == HostState::Disabled && new_state == HostState::Init {
                    self.start_host_monitor(oid, true);
                }
            }
            Err(e) => warn!(error = %e, kind = %e.kind(), "ignoring malformed host update"),
        }
    }

    /// Remove a host and tell its driver to stop probing it.
    pub fn delete_host(&self, oid: i32) {
        match self.pool.erase(oid) {
            Some(host) => {
                info!(oid, host = %host.name, "host deleted");
                if let Err(e) = self.drivers.stop_monitor(oid, &host.name, &host.im_mad) {
                    error!(oid, error = %e, "failed to dispatch STOP_MONITOR");
                }
            }
            None => debug!(oid, "delete for unknown host"),
        }
    }

    /// Handle a MONITOR_HOST probe result.
    pub fn monitor_result(&self, msg: &Message<DriverMessageType>) {
        let payload = msg.payload_str();

        let template = match self.parser.parse(&payload) {
            Ok(template) => template,
            Err(e) => {
                error!(oid = msg.oid, error = %e, "error parsing monitoring template");
                return;
            }
        };

        let oid = template.get_int::<i32>("OID").unwrap_or(msg.oid);
        if oid < 0 {
            error!("monitoring result carries no host id");
            return;
        }

        let timestamp =
            if msg.timestamp > 0 { msg.timestamp } else { self.clock.epoch_secs() };

        let failed =
            msg.status == MessageStatus::Failure || template.get("RESULT") == Some("FAILURE");

        let Some(mut host) = self.pool.get_exclusive(oid) else {
            // DEL_HOST may have raced this result; not an error
            debug!(oid, "monitoring for unknown host dropped");
            return;
        };

        if host.state == HostState::Offline {
            debug!(oid, "monitoring for offline host dropped");
            return;
        }

        let before = host.state.effective();

        if failed {
            let message = template
                .get("ERROR_MESSAGE")
                .map(str::to_string)
                .unwrap_or_else(|| "monitor probe failed".to_string());
            warn!(oid, error = %message, "host monitoring failed");

            host.probe_failure(message);
            let after = host.state.effective();
            drop(host);

            if before != after {
                self.writer.host_state(oid, after);
            }
            return;
        }

        let doc = match MonitoringDocument::from_template(oid, timestamp, &template) {
            Ok(doc) => doc,
            Err(e) => {
                error!(oid, error = %e, "error building monitoring document");
                return;
            }
        };

        host.probe_success(timestamp);
        host.share.free_cpu = doc.capacity.free_cpu;
        host.share.used_cpu = doc.capacity.used_cpu;
        host.share.free_mem = doc.capacity.free_memory;
        host.share.used_mem = doc.capacity.used_memory;
        let system = host.system_ds.clone();
        let after = host.state.effective();
        drop(host);

        let doc = doc.with_system(system);
        if let Err(e) = self.store.write(oid, doc.timestamp, &doc.to_xml()) {
            error!(oid, error = %e, kind = %e.kind(), "unable to write monitoring to DB");
            return;
        }

        info!(oid, "successfully monitored host");

        if before != after {
            self.writer.host_state(oid, after);
        }
    }

    /// Capture system datastore information for later monitoring rows.
    pub fn system_host(&self, msg: &Message<DriverMessageType>) {
        let payload = msg.payload_str();

        let template = match self.parser.parse(&payload) {
            Ok(template) => template,
            Err(e) => {
                error!(oid = msg.oid, error = %e, "error parsing system datastore template");
                return;
            }
        };

        let oid = template.get_int::<i32>("OID").unwrap_or(msg.oid);
        let Some(mut host) = self.pool.get_exclusive(oid) else {
            debug!(oid, "system datastore info for unknown host dropped");
            return;
        };

        host.system_ds = Some(template.to_xml("SYSTEM"));
        debug!(oid, "captured system datastore info");
    }

    /// Write the zero-capacity row an offline host gets on each sweep.
    pub fn write_offline_row(&self, oid: i32) {
        let now = self.clock.epoch_secs();

        let Some(mut host) = self.pool.get_exclusive(oid) else {
            return;
        };
        host.last_monitored = host.last_monitored.max(now);
        drop(host);

        let doc = MonitoringDocument::zero(oid, now);
        if let Err(e) = self.store.write(oid, now, &doc.to_xml()) {
            error!(oid, error = %e, "unable to write offline monitoring row");
        }
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
pub(crate) mod tests;
