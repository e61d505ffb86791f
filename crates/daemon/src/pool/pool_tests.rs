// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use async_trait::async_trait;
use hm_core::{HostRecord, HostState};
use parking_lot::Mutex;

use super::*;

fn record(oid: i32, name: &str, last_monitored: u64) -> HostRecord {
    HostRecord {
        oid,
        name: name.to_string(),
        im_mad: "kvm".to_string(),
        last_monitored,
        ..HostRecord::default()
    }
}

fn host_xml(oid: i32, name: &str, state: HostState) -> String {
    format!(
        "<HOST><ID>{oid}</ID><NAME>{name}</NAME><STATE>{}</STATE><IM_MAD>kvm</IM_MAD></HOST>",
        state.code()
    )
}

// ── upsert / erase ───────────────────────────────────────────────────────

#[test]
fn first_update_inserts() {
    let pool = HostPool::new();

    let outcome = pool.upsert_from_xml(&host_xml(7, "node7", HostState::Init)).unwrap();

    assert_eq!(outcome, UpdateOutcome::Inserted { oid: 7 });
    assert!(pool.contains(7));
    assert_eq!(pool.len(), 1);
}

#[test]
fn second_update_overwrites_and_reports_states() {
    let pool = HostPool::new();
    pool.upsert_from_xml(&host_xml(7, "node7", HostState::Init)).unwrap();

    let outcome = pool.upsert_from_xml(&host_xml(7, "renamed", HostState::Disabled)).unwrap();

    assert_eq!(
        outcome,
        UpdateOutcome::Updated { oid: 7, old_state: HostState::Init, new_state: HostState::Disabled }
    );
    let host = pool.get_shared(7).unwrap();
    assert_eq!(host.name, "renamed");
    assert_eq!(pool.len(), 1);
}

#[test]
fn erase_returns_final_record_and_is_idempotent() {
    let pool = HostPool::new();
    pool.upsert(record(7, "node7", 0));

    let gone = pool.erase(7).unwrap();
    assert_eq!(gone.name, "node7");
    assert!(!pool.contains(7));

    assert!(pool.erase(7).is_none());
}

#[test]
fn malformed_update_is_rejected() {
    let pool = HostPool::new();
    let err = pool.upsert_from_xml("<HOST><NAME>x</NAME></HOST>").unwrap_err();
    assert_eq!(err.kind(), hm_core::ErrorKind::Protocol);
    assert!(pool.is_empty());
}

// ── leases ───────────────────────────────────────────────────────────────

#[test]
fn exclusive_lease_mutations_are_visible_after_release() {
    let pool = HostPool::new();
    pool.upsert(record(3, "node3", 0));

    {
        let mut host = pool.get_exclusive(3).unwrap();
        host.begin_monitor(500);
    }

    let host = pool.get_shared(3).unwrap();
    assert!(host.monitor_in_progress);
    assert_eq!(host.last_monitored, 500);
}

#[test]
fn shared_leases_coexist() {
    let pool = HostPool::new();
    pool.upsert(record(3, "node3", 0));

    let a = pool.get_shared(3).unwrap();
    let b = pool.get_shared(3).unwrap();
    assert_eq!(a.oid, b.oid);
}

#[test]
fn unknown_oid_yields_no_lease() {
    let pool = HostPool::new();
    assert!(pool.get_shared(99).is_none());
    assert!(pool.get_exclusive(99).is_none());
}

// ── discover ─────────────────────────────────────────────────────────────

#[test]
fn discover_returns_due_hosts_oldest_first() {
    let pool = HostPool::new();
    pool.upsert(record(1, "a", 300));
    pool.upsert(record(2, "b", 100));
    pool.upsert(record(3, "c", 200));
    pool.upsert(record(4, "d", 900));

    assert_eq!(pool.discover(300, 10), vec![2, 3, 1]);
}

#[test]
fn discover_honors_the_limit() {
    let pool = HostPool::new();
    for oid in 0..5 {
        pool.upsert(record(oid, "h", oid as u64));
    }

    assert_eq!(pool.discover(100, 2), vec![0, 1]);
}

#[test]
fn discover_rotates_as_last_monitored_advances() {
    let pool = HostPool::new();
    pool.upsert(record(1, "a", 0));
    pool.upsert(record(2, "b", 0));

    let first = pool.discover(100, 1);
    assert_eq!(first.len(), 1);
    pool.get_exclusive(first[0]).unwrap().begin_monitor(200);

    // The other host is now the oldest
    let second = pool.discover(100, 1);
    assert_eq!(second.len(), 1);
    assert_ne!(first[0], second[0]);
}

// ── pool serialization / bootstrap ───────────────────────────────────────

#[test]
fn pool_xml_roundtrips_through_prime() {
    let pool = HostPool::new();
    pool.upsert_from_xml(&host_xml(1, "a", HostState::Init)).unwrap();
    pool.upsert_from_xml(&host_xml(2, "b", HostState::Monitored)).unwrap();

    let listing = pool.to_pool_xml();

    let restored = HostPool::new();
    let installed = restored.prime_from_pool_xml(&listing).unwrap();
    assert_eq!(installed, 2);
    assert_eq!(restored.get_shared(2).unwrap().name, "b");
}

#[test]
fn prime_rejects_non_pool_documents() {
    let pool = HostPool::new();
    let err = pool.prime_from_pool_xml("<HOST><ID>1</ID></HOST>").unwrap_err();
    assert!(matches!(err, PoolError::NotAPool(_)));
}

#[test]
fn prime_skips_broken_hosts_but_installs_the_rest() {
    let pool = HostPool::new();
    let listing = format!(
        "<HOST_POOL><HOST><NAME>no-id</NAME></HOST>{}</HOST_POOL>",
        host_xml(2, "ok", HostState::Init)
    );

    let installed = pool.prime_from_pool_xml(&listing).unwrap();
    assert_eq!(installed, 1);
    assert!(pool.contains(2));
}

/// Orchestrator fake that fails a configurable number of times.
struct FlakyClient {
    failures_left: Arc<Mutex<u32>>,
    listing: String,
    calls: Arc<Mutex<u32>>,
}

#[async_trait]
impl OrchestratorClient for FlakyClient {
    async fn host_pool_info(&self) -> Result<String, RpcError> {
        *self.calls.lock() += 1;
        let mut left = self.failures_left.lock();
        if *left > 0 {
            *left -= 1;
            return Err(RpcError::NoResponse);
        }
        Ok(self.listing.clone())
    }
}

#[tokio::test(start_paused = true)]
async fn bootstrap_retries_then_succeeds() {
    let pool = HostPool::new();
    let calls = Arc::new(Mutex::new(0));
    let client = FlakyClient {
        failures_left: Arc::new(Mutex::new(2)),
        listing: format!("<HOST_POOL>{}</HOST_POOL>", host_xml(5, "late", HostState::Init)),
        calls: Arc::clone(&calls),
    };

    let installed = pool.bootstrap(&client).await.unwrap();

    assert_eq!(installed, 1);
    assert_eq!(*calls.lock(), 3);
    assert!(pool.contains(5));
}

#[tokio::test(start_paused = true)]
async fn bootstrap_gives_up_after_five_attempts() {
    let pool = HostPool::new();
    let calls = Arc::new(Mutex::new(0));
    let client = FlakyClient {
        failures_left: Arc::new(Mutex::new(u32::MAX)),
        listing: String::new(),
        calls: Arc::clone(&calls),
    };

    let err = pool.bootstrap(&client).await.unwrap_err();

    assert!(matches!(err, PoolError::Bootstrap { attempts: 5, .. }));
    assert_eq!(err.kind(), hm_core::ErrorKind::Fatal);
    assert_eq!(*calls.lock(), 5);
}
