// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound message dispatch.
//!
//! Two handler tables, one per channel: orchestrator frames arriving on
//! stdin, and driver frames arriving on child stdout or UDP. Handlers
//! never propagate errors to their reader; anything unusable is logged
//! and dropped.

use std::sync::Arc;

use async_trait::async_trait;
use hm_core::{Clock, XmlNode};
use hm_wire::{DriverMessageType, Message, MessageStatus, OrchestratorMessageType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::MonitorCtx;
use crate::rpc::OrchestratorClient;
use crate::stream::FrameHandler;

/// Handlers for the orchestrator stdio channel.
pub struct OrchestratorProtocol<C: Clock> {
    ctx: Arc<MonitorCtx<C>>,
    client: Arc<dyn OrchestratorClient>,
    /// Cancelled on FINALIZE; the supervisor watches it.
    shutdown: CancellationToken,
}

impl<C: Clock> OrchestratorProtocol<C> {
    pub fn new(
        ctx: Arc<MonitorCtx<C>>,
        client: Arc<dyn OrchestratorClient>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { ctx, client, shutdown }
    }

    /// Re-prime the host table and push the listing to every driver.
    pub async fn refresh_host_list(&self) {
        match self.ctx.pool.bootstrap(self.client.as_ref()).await {
            Ok(count) => {
                info!(hosts = count, "host pool refreshed");
                self.ctx.drivers.broadcast_host_list(&self.ctx.pool.to_pool_xml());
            }
            Err(e) => error!(error = %e, kind = %e.kind(), "host pool refresh failed"),
        }
    }

    fn start_monitor(&self, msg: &Message<OrchestratorMessageType>) {
        let update_remotes = match msg.payload_str().trim() {
            "1" => true,
            "0" | "" => false,
            other => {
                warn!(oid = msg.oid, payload = %other, "malformed START_MONITOR payload");
                return;
            }
        };
        self.ctx.start_host_monitor(msg.oid, update_remotes);
    }

    fn stop_monitor(&self, msg: &Message<OrchestratorMessageType>) {
        let payload = msg.payload_str();

        // Payload carries NAME and IM_MAD so the driver can be told even
        // when the record is already gone.
        let (name, im_mad) = match XmlNode::parse(&payload) {
            Ok(root) => (
                root.text_at("NAME").unwrap_or_default().to_string(),
                root.text_at("IM_MAD").unwrap_or_default().to_string(),
            ),
            Err(_) if payload.trim().is_empty() => (String::new(), String::new()),
            Err(e) => {
                warn!(oid = msg.oid, error = %e, "malformed STOP_MONITOR payload");
                return;
            }
        };

        self.ctx.stop_host_monitor(msg.oid, &name, &im_mad);
    }
}

#[async_trait]
impl<C: Clock> FrameHandler<OrchestratorMessageType> for OrchestratorProtocol<C> {
    async fn handle(&self, msg: Message<OrchestratorMessageType>) {
        match msg.msg_type {
            OrchestratorMessageType::Init => {
                info!("orchestrator connected");
                self.ctx.writer.init_success();
            }
            OrchestratorMessageType::Finalize => {
                info!("orchestrator requested shutdown");
                self.ctx.writer.finalize_success();
                self.shutdown.cancel();
            }
            OrchestratorMessageType::UpdateHost => {
                self.ctx.update_host(&msg.payload_str());
            }
            OrchestratorMessageType::DelHost => {
                self.ctx.delete_host(msg.oid);
            }
            OrchestratorMessageType::StartMonitor => self.start_monitor(&msg),
            OrchestratorMessageType::StopMonitor => self.stop_monitor(&msg),
            OrchestratorMessageType::HostList => {
                self.refresh_host_list().await;
            }
            OrchestratorMessageType::HostState | OrchestratorMessageType::Undefined => {
                warn!(oid = msg.oid, "unexpected message from orchestrator: {}", msg.payload_str());
            }
        }
    }
}

/// Handlers for driver frames (child stdout and UDP).
pub struct DriverProtocol<C: Clock> {
    ctx: Arc<MonitorCtx<C>>,
}

impl<C: Clock> DriverProtocol<C> {
    pub fn new(ctx: Arc<MonitorCtx<C>>) -> Self {
        Self { ctx }
    }

    /// Relay a driver LOG frame into the log sink, severity from STATUS.
    fn relay_log(msg: &Message<DriverMessageType>) {
        let line = msg.payload_str();
        let line = line.trim_end();
        match msg.status {
            MessageStatus::Failure => error!(oid = msg.oid, "[driver] {}", line),
            MessageStatus::Success => info!(oid = msg.oid, "[driver] {}", line),
            MessageStatus::None => debug!(oid = msg.oid, "[driver] {}", line),
        }
    }
}

#[async_trait]
impl<C: Clock> FrameHandler<DriverMessageType> for DriverProtocol<C> {
    async fn handle(&self, msg: Message<DriverMessageType>) {
        match msg.msg_type {
            DriverMessageType::MonitorHost => self.ctx.monitor_result(&msg),
            DriverMessageType::SystemHost => self.ctx.system_host(&msg),
            // VM-scoped telemetry passes through this daemon untouched
            DriverMessageType::MonitorVm | DriverMessageType::StateVm => {
                debug!(oid = msg.oid, msg_type = ?msg.msg_type, "ignoring VM-scoped message");
            }
            DriverMessageType::Log => Self::relay_log(&msg),
            DriverMessageType::Init | DriverMessageType::Finalize => {
                debug!(msg_type = ?msg.msg_type, "driver control frame outside handshake");
            }
            DriverMessageType::Undefined => {
                warn!(oid = msg.oid, "undefined driver message: {}", msg.payload_str());
            }
        }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
