// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The in-memory host table.
//!
//! Keyed by orchestrator-assigned oid. Records are reached through scoped
//! leases: shared for readers, exclusive for mutation, released on drop.
//! Lock order is always map first, then record, so leases can be held
//! while other lookups proceed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hm_core::host::HostParseError;
use hm_core::xml::XmlError;
use hm_core::{ErrorKind, HostRecord, HostState, XmlNode};
use parking_lot::{lock_api, RawRwLock, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

use crate::rpc::{OrchestratorClient, RpcError};

/// Scoped shared access to one record.
pub type HostReadLease = lock_api::ArcRwLockReadGuard<RawRwLock, HostRecord>;

/// Scoped exclusive access to one record.
pub type HostWriteLease = lock_api::ArcRwLockWriteGuard<RawRwLock, HostRecord>;

/// Interval between bootstrap attempts.
const BOOTSTRAP_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Bootstrap attempts before giving up for good.
const BOOTSTRAP_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Host(#[from] HostParseError),

    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error("pool document root is <{0}>, expected <HOST_POOL>")]
    NotAPool(String),

    #[error("bootstrap failed after {attempts} attempts: {source}")]
    Bootstrap {
        attempts: u32,
        #[source]
        source: RpcError,
    },
}

impl PoolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::Host(_) | PoolError::Xml(_) | PoolError::NotAPool(_) => ErrorKind::Protocol,
            PoolError::Bootstrap { .. } => ErrorKind::Fatal,
        }
    }
}

/// Result of installing an orchestrator host document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// First sight of this oid.
    Inserted { oid: i32 },
    /// Existing record updated; effective states before and after.
    Updated { oid: i32, old_state: HostState, new_state: HostState },
}

impl UpdateOutcome {
    pub fn oid(&self) -> i32 {
        match self {
            UpdateOutcome::Inserted { oid } | UpdateOutcome::Updated { oid, .. } => *oid,
        }
    }
}

#[derive(Default)]
pub struct HostPool {
    hosts: RwLock<HashMap<i32, Arc<RwLock<HostRecord>>>>,
}

impl HostPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared lease; `None` when the oid is unknown.
    pub fn get_shared(&self, oid: i32) -> Option<HostReadLease> {
        let entry = self.hosts.read().get(&oid).cloned()?;
        Some(RwLock::read_arc(&entry))
    }

    /// Exclusive lease; `None` when the oid is unknown.
    pub fn get_exclusive(&self, oid: i32) -> Option<HostWriteLease> {
        let entry = self.hosts.read().get(&oid).cloned()?;
        Some(RwLock::write_arc(&entry))
    }

    pub fn contains(&self, oid: i32) -> bool {
        self.hosts.read().contains_key(&oid)
    }

    pub fn len(&self) -> usize {
        self.hosts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.read().is_empty()
    }

    /// All known oids, unordered.
    pub fn oids(&self) -> Vec<i32> {
        self.hosts.read().keys().copied().collect()
    }

    /// Install a host document. The orchestrator is the source of truth:
    /// an existing record is overwritten (the monitor's ephemeral probe
    /// markers survive).
    pub fn upsert_from_xml(&self, xml: &str) -> Result<UpdateOutcome, PoolError> {
        let incoming = HostRecord::from_xml(xml)?;
        Ok(self.upsert(incoming))
    }

    pub fn upsert(&self, incoming: HostRecord) -> UpdateOutcome {
        let oid = incoming.oid;

        let existing = self.hosts.read().get(&oid).cloned();
        match existing {
            Some(entry) => {
                let mut host = RwLock::write_arc(&entry);
                let old_state = host.state.effective();
                host.apply_update(incoming);
                let new_state = host.state.effective();
                debug!(oid, state = %host.state, "host updated");
                UpdateOutcome::Updated { oid, old_state, new_state }
            }
            None => {
                self.hosts.write().insert(oid, Arc::new(RwLock::new(incoming)));
                debug!(oid, "host added");
                UpdateOutcome::Inserted { oid }
            }
        }
    }

    /// Remove a record. Idempotent; returns the final record when one was
    /// present so callers can notify its driver.
    pub fn erase(&self, oid: i32) -> Option<HostRecord> {
        let entry = self.hosts.write().remove(&oid)?;
        let host = RwLock::read_arc(&entry);
        Some(host.clone())
    }

    /// Read leases over the whole table, acquired one at a time.
    pub fn snapshot(&self) -> Vec<(i32, HostReadLease)> {
        let entries: Vec<(i32, Arc<RwLock<HostRecord>>)> =
            self.hosts.read().iter().map(|(oid, e)| (*oid, Arc::clone(e))).collect();

        entries.into_iter().map(|(oid, e)| (oid, RwLock::read_arc(&e))).collect()
    }

    /// Serialize the whole table for a HOST_LIST refresh.
    pub fn to_pool_xml(&self) -> String {
        let mut out = String::from("<HOST_POOL>");
        for (_, host) in self.snapshot() {
            out.push_str(&host.to_xml());
        }
        out.push_str("</HOST_POOL>");
        out
    }

    /// Hosts whose `last_monitored` is at or before `target_time`, oldest
    /// first, capped to `limit`. Dispatch updates `last_monitored`, so
    /// repeated calls rotate through the fleet.
    pub fn discover(&self, target_time: u64, limit: usize) -> Vec<i32> {
        let mut due: Vec<(u64, i32)> = Vec::new();

        let entries: Vec<(i32, Arc<RwLock<HostRecord>>)> =
            self.hosts.read().iter().map(|(oid, e)| (*oid, Arc::clone(e))).collect();

        for (oid, entry) in entries {
            let host = RwLock::read_arc(&entry);
            if host.last_monitored <= target_time {
                due.push((host.last_monitored, oid));
            }
        }

        due.sort_unstable();
        due.into_iter().take(limit).map(|(_, oid)| oid).collect()
    }

    /// Prime the table from an orchestrator pool listing.
    pub fn prime_from_pool_xml(&self, xml: &str) -> Result<usize, PoolError> {
        let root = XmlNode::parse(xml)?;
        if root.name != "HOST_POOL" {
            return Err(PoolError::NotAPool(root.name));
        }

        let mut installed = 0;
        for child in root.children {
            if child.name != "HOST" {
                continue;
            }
            match HostRecord::from_xml_node(child) {
                Ok(record) => {
                    self.upsert(record);
                    installed += 1;
                }
                Err(e) => warn!(error = %e, "skipping unparseable host in pool listing"),
            }
        }

        Ok(installed)
    }

    /// RPC bootstrap: fetch the pool from the orchestrator, retrying up to
    /// five times at two-second intervals. Definitive failure is fatal.
    pub async fn bootstrap(&self, client: &dyn OrchestratorClient) -> Result<usize, PoolError> {
        let mut last_error = None;

        for attempt in 1..=BOOTSTRAP_ATTEMPTS {
            match client.host_pool_info().await {
                Ok(doc) => return self.prime_from_pool_xml(&doc),
                Err(e) => {
                    warn!(attempt, error = %e, "host pool bootstrap attempt failed");
                    last_error = Some(e);
                    if attempt < BOOTSTRAP_ATTEMPTS {
                        tokio::time::sleep(BOOTSTRAP_RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(PoolError::Bootstrap {
            attempts: BOOTSTRAP_ATTEMPTS,
            source: last_error.unwrap_or(RpcError::NoResponse),
        })
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
