// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use hm_core::{FakeClock, HostConfig, HostState, SweeperConfig};
use hm_wire::OrchestratorMessageType;

use super::*;
use crate::context::tests::{driver_frames, host_xml, monitoring_rows, test_rig, TestRig};

fn sweeper_for(rig: &TestRig, monitoring_interval: u64, limit: usize) -> Sweeper<FakeClock> {
    let ctx = Arc::new(crate::context::MonitorCtx {
        pool: Arc::clone(&rig.ctx.pool),
        store: Arc::clone(&rig.ctx.store),
        drivers: Arc::clone(&rig.ctx.drivers),
        writer: rig.ctx.writer.clone(),
        clock: rig.ctx.clock.clone(),
        parser: Arc::clone(&rig.ctx.parser),
    });

    Sweeper::new(
        ctx,
        &SweeperConfig { timer_period: 30, monitor_expire: 300 },
        &HostConfig { monitor_expiration: 60, monitoring_interval, monitoring_threads: limit },
    )
}

#[test]
fn idle_tick_with_empty_pool_does_nothing() {
    let rig = test_rig(60);
    let mut sweeper = sweeper_for(&rig, 60, 10);

    sweeper.tick();

    assert!(monitoring_rows(&rig.db).is_empty());
    assert!(driver_frames(&rig).is_empty());
}

#[test]
fn fresh_hosts_are_not_reprobed() {
    let rig = test_rig(60);
    rig.ctx.update_host(&host_xml(1, "a", HostState::Init));
    driver_frames(&rig); // the insertion probe

    // last_monitored = 10_000 (dispatch); clock still 10_000
    let mut sweeper = sweeper_for(&rig, 60, 10);
    sweeper.tick();

    assert!(driver_frames(&rig).is_empty());
}

#[test]
fn stale_host_gets_a_probe() {
    let rig = test_rig(60);
    rig.ctx.update_host(&host_xml(1, "a", HostState::Init));
    // Complete the first probe so monitor_in_progress is clear
    {
        let mut host = rig.ctx.pool.get_exclusive(1).unwrap();
        host.probe_success(10_000);
    }
    driver_frames(&rig);

    rig.clock.advance(Duration::from_secs(120));
    let mut sweeper = sweeper_for(&rig, 60, 10);
    sweeper.tick();

    let frames = driver_frames(&rig);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].msg_type, OrchestratorMessageType::StartMonitor);
    assert_eq!(frames[0].oid, 1);
}

#[test]
fn pending_probe_is_not_reissued_before_expiry() {
    let rig = test_rig(60);
    rig.ctx.update_host(&host_xml(1, "a", HostState::Init));
    driver_frames(&rig); // probe pending, last_monitored = 10_000

    // 120s later: due by interval, but the probe has not expired yet
    rig.clock.advance(Duration::from_secs(120));
    let mut sweeper = sweeper_for(&rig, 60, 10);
    sweeper.tick();

    assert!(driver_frames(&rig).is_empty());
}

#[test]
fn stuck_probe_is_reissued_once_per_expire_window() {
    let rig = test_rig(60);
    rig.ctx.update_host(&host_xml(1, "a", HostState::Init));
    driver_frames(&rig); // probe pending since 10_000

    // Past monitor_expire (300s): re-dispatch
    rig.clock.advance(Duration::from_secs(300));
    let mut sweeper = sweeper_for(&rig, 60, 10);
    sweeper.tick();
    assert_eq!(driver_frames(&rig).len(), 1);

    // Next tick: the re-dispatch refreshed last_monitored, so nothing new
    rig.clock.advance(Duration::from_secs(30));
    sweeper.tick();
    assert!(driver_frames(&rig).is_empty());

    // Another full expire window later it fires again
    rig.clock.advance(Duration::from_secs(300));
    sweeper.tick();
    assert_eq!(driver_frames(&rig).len(), 1);
}

#[test]
fn offline_hosts_get_zero_rows_not_probes() {
    let rig = test_rig(60);
    rig.ctx.update_host(&host_xml(1, "a", HostState::Offline));
    driver_frames(&rig);

    rig.clock.advance(Duration::from_secs(120));
    let mut sweeper = sweeper_for(&rig, 60, 10);
    sweeper.tick();

    assert!(driver_frames(&rig).is_empty());
    let rows = monitoring_rows(&rig.db);
    assert_eq!(rows, vec![(1, 10_120)]);

    // Every tick writes another row once the host is due again
    rig.clock.advance(Duration::from_secs(120));
    sweeper.tick();
    assert_eq!(monitoring_rows(&rig.db).len(), 2);
}

#[test]
fn expiry_sweep_deletes_old_rows() {
    let rig = test_rig(60);
    rig.ctx.store.write(5, 100, "<MONITORING><ID>5</ID></MONITORING>").unwrap();
    rig.ctx.store.write(5, 200, "<MONITORING><ID>5</ID></MONITORING>").unwrap();
    rig.ctx.store.write(5, 340, "<MONITORING><ID>5</ID></MONITORING>").unwrap();

    rig.clock.set_epoch_secs(400);
    let mut sweeper = sweeper_for(&rig, 60, 10);
    sweeper.tick();

    let rows: Vec<u64> = monitoring_rows(&rig.db).into_iter().map(|(_, ts)| ts).collect();
    assert_eq!(rows, vec![340]);
}

#[test]
fn dispatch_cap_limits_probes_per_tick() {
    let rig = test_rig(60);
    for oid in 0..5 {
        rig.ctx.update_host(&host_xml(oid, "h", HostState::Init));
        rig.ctx.pool.get_exclusive(oid).unwrap().probe_success(10_000);
    }
    driver_frames(&rig);

    rig.clock.advance(Duration::from_secs(120));
    let mut sweeper = sweeper_for(&rig, 60, 2);
    sweeper.tick();

    assert_eq!(driver_frames(&rig).len(), 2);
}

#[test]
fn mark_line_accumulates_tick_time() {
    let rig = test_rig(60);
    let mut sweeper = sweeper_for(&rig, 60, 10);

    // 600 / 30 = 20 ticks per mark; just exercise the counter
    for _ in 0..25 {
        sweeper.tick();
    }
}
