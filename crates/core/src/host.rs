// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host record and its monitoring state machine.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::share::HostShare;
use crate::xml::{write_tag, XmlError, XmlNode};

#[derive(Debug, Error)]
pub enum HostParseError {
    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error("document root is <{0}>, expected <HOST>")]
    NotAHost(String),

    #[error("host document has no ID")]
    MissingId,
}

/// Host lifecycle states.
///
/// The four `Monitoring*` variants mean "a probe is pending from state X";
/// they collapse onto X for anything user-visible. Numeric codes match the
/// orchestrator's wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostState {
    #[default]
    Init,
    MonitoringMonitored,
    Monitored,
    Error,
    Disabled,
    MonitoringError,
    MonitoringInit,
    MonitoringDisabled,
    Offline,
}

impl HostState {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(HostState::Init),
            1 => Some(HostState::MonitoringMonitored),
            2 => Some(HostState::Monitored),
            3 => Some(HostState::Error),
            4 => Some(HostState::Disabled),
            5 => Some(HostState::MonitoringError),
            6 => Some(HostState::MonitoringInit),
            7 => Some(HostState::MonitoringDisabled),
            8 => Some(HostState::Offline),
            _ => None,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            HostState::Init => 0,
            HostState::MonitoringMonitored => 1,
            HostState::Monitored => 2,
            HostState::Error => 3,
            HostState::Disabled => 4,
            HostState::MonitoringError => 5,
            HostState::MonitoringInit => 6,
            HostState::MonitoringDisabled => 7,
            HostState::Offline => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HostState::Init => "INIT",
            HostState::MonitoringMonitored => "MONITORING_MONITORED",
            HostState::Monitored => "MONITORED",
            HostState::Error => "ERROR",
            HostState::Disabled => "DISABLED",
            HostState::MonitoringError => "MONITORING_ERROR",
            HostState::MonitoringInit => "MONITORING_INIT",
            HostState::MonitoringDisabled => "MONITORING_DISABLED",
            HostState::Offline => "OFFLINE",
        }
    }

    /// Collapse any `Monitoring*` variant onto its base state.
    pub fn effective(&self) -> HostState {
        match self {
            HostState::MonitoringInit => HostState::Init,
            HostState::MonitoringMonitored => HostState::Monitored,
            HostState::MonitoringError => HostState::Error,
            HostState::MonitoringDisabled => HostState::Disabled,
            other => *other,
        }
    }

    pub fn is_monitoring(&self) -> bool {
        *self != self.effective()
    }

    /// The pending-probe variant of this state's effective value.
    fn monitoring_variant(&self) -> HostState {
        match self.effective() {
            HostState::Init => HostState::MonitoringInit,
            HostState::Monitored => HostState::MonitoringMonitored,
            HostState::Error => HostState::MonitoringError,
            HostState::Disabled => HostState::MonitoringDisabled,
            // Offline hosts are never probed; keep the state unchanged.
            HostState::Offline => HostState::Offline,
            // effective() never returns a Monitoring* variant.
            HostState::MonitoringInit
            | HostState::MonitoringMonitored
            | HostState::MonitoringError
            | HostState::MonitoringDisabled => unreachable!(),
        }
    }
}

impl std::fmt::Display for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authoritative in-memory host entity.
///
/// `monitor_in_progress` and `last_monitored` are ephemeral markers owned by
/// the monitor; everything else comes from the orchestrator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostRecord {
    pub oid: i32,
    pub name: String,
    pub cluster_id: i32,
    pub cluster_name: String,
    pub im_mad: String,
    pub vm_mad: String,
    pub state: HostState,
    pub prev_state: HostState,
    pub monitor_in_progress: bool,
    pub last_monitored: u64,
    pub share: HostShare,
    pub vm_ids: BTreeSet<i32>,
    pub public_cloud: bool,
    pub error_message: Option<String>,
    /// Serialized `<SYSTEM>` section captured from the last SYSTEM_HOST
    /// frame; carried into subsequent monitoring rows.
    pub system_ds: Option<String>,
}

impl HostRecord {
    /// Parse a `<HOST>` document as sent by the orchestrator.
    pub fn from_xml(input: &str) -> Result<Self, HostParseError> {
        Self::from_xml_node(XmlNode::parse(input)?)
    }

    /// Build from an already-parsed `<HOST>` element (pool listings embed
    /// many of them).
    pub fn from_xml_node(root: XmlNode) -> Result<Self, HostParseError> {
        if root.name != "HOST" {
            return Err(HostParseError::NotAHost(root.name));
        }

        let oid = root.int_at("ID", -1);
        if oid < 0 {
            return Err(HostParseError::MissingId);
        }

        let state = HostState::from_code(root.int_at("STATE", 0)).unwrap_or_default();
        let prev_state = HostState::from_code(root.int_at("PREV_STATE", 0)).unwrap_or_default();

        let share = root.find("HOST_SHARE").map(HostShare::from_xml_node).unwrap_or_default();

        let vm_ids = root
            .find("VMS")
            .map(|vms| {
                vms.children_named("ID").filter_map(|n| n.text.trim().parse().ok()).collect()
            })
            .unwrap_or_default();

        let public_cloud = root
            .text_at("TEMPLATE/PUBLIC_CLOUD")
            .map(|v| matches!(v.trim().to_ascii_uppercase().as_str(), "YES" | "TRUE" | "1"))
            .unwrap_or(false);

        Ok(HostRecord {
            oid,
            name: root.text_at("NAME").unwrap_or_default().to_string(),
            cluster_id: root.int_at("CLUSTER_ID", -1),
            cluster_name: root.text_at("CLUSTER").unwrap_or_default().to_string(),
            im_mad: root.text_at("IM_MAD").unwrap_or_default().to_string(),
            vm_mad: root.text_at("VM_MAD").unwrap_or_default().to_string(),
            state,
            prev_state,
            monitor_in_progress: false,
            last_monitored: root.int_at("LAST_MON_TIME", 0u64),
            share,
            vm_ids,
            public_cloud,
            error_message: None,
            system_ds: None,
        })
    }

    /// Serialize for driver consumption (HOST_LIST refresh).
    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(512);

        out.push_str("<HOST>");
        write_tag(&mut out, "ID", self.oid);
        write_tag(&mut out, "NAME", &self.name);
        write_tag(&mut out, "STATE", self.state.code());
        write_tag(&mut out, "PREV_STATE", self.prev_state.code());
        write_tag(&mut out, "IM_MAD", &self.im_mad);
        write_tag(&mut out, "VM_MAD", &self.vm_mad);
        write_tag(&mut out, "LAST_MON_TIME", self.last_monitored);
        write_tag(&mut out, "CLUSTER_ID", self.cluster_id);
        write_tag(&mut out, "CLUSTER", &self.cluster_name);
        self.share.write_xml(&mut out);
        out.push_str("<VMS>");
        for id in &self.vm_ids {
            write_tag(&mut out, "ID", id);
        }
        out.push_str("</VMS>");
        out.push_str("<TEMPLATE>");
        write_tag(&mut out, "PUBLIC_CLOUD", if self.public_cloud { "YES" } else { "NO" });
        out.push_str("</TEMPLATE>");
        out.push_str("</HOST>");

        out
    }

    /// Change state, recording the prior value.
    pub fn set_state(&mut self, new_state: HostState) {
        if new_state != self.state {
            self.prev_state = self.state;
            self.state = new_state;
        }
    }

    /// Merge an orchestrator update into this record.
    ///
    /// The orchestrator is the source of truth for identity, membership and
    /// capacity; the monitor keeps its own ephemeral probe markers. A mad
    /// binding only changes when the update carries a non-empty value for
    /// that binding.
    pub fn apply_update(&mut self, incoming: HostRecord) {
        self.name = incoming.name;
        self.cluster_id = incoming.cluster_id;
        self.cluster_name = incoming.cluster_name;
        self.share = incoming.share;
        self.vm_ids = incoming.vm_ids;
        self.public_cloud = incoming.public_cloud;
        self.last_monitored = self.last_monitored.max(incoming.last_monitored);

        if !incoming.im_mad.is_empty() {
            self.im_mad = incoming.im_mad;
        }
        if !incoming.vm_mad.is_empty() {
            self.vm_mad = incoming.vm_mad;
        }

        // Only a logical state change is applied; an update restating the
        // current effective state must not cancel a pending probe marker.
        if incoming.state.effective() != self.state.effective() {
            self.set_state(incoming.state);
        }

        if self.state == HostState::Offline {
            self.go_offline();
        }
    }

    /// Mark a probe as dispatched from the current state.
    pub fn begin_monitor(&mut self, now: u64) {
        self.set_state(self.state.monitoring_variant());
        self.monitor_in_progress = true;
        self.last_monitored = self.last_monitored.max(now);
    }

    /// Successful probe result at `timestamp`.
    pub fn probe_success(&mut self, timestamp: u64) {
        self.set_state(HostState::Monitored);
        self.monitor_in_progress = false;
        self.last_monitored = self.last_monitored.max(timestamp);
        self.error_message = None;
    }

    /// Failed probe result.
    pub fn probe_failure(&mut self, message: impl Into<String>) {
        self.set_state(HostState::Error);
        self.monitor_in_progress = false;
        self.error_message = Some(message.into());
    }

    /// Take the host offline: no probes, zeroed capacity.
    pub fn go_offline(&mut self) {
        self.set_state(HostState::Offline);
        self.monitor_in_progress = false;
        self.share.zero();
    }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
