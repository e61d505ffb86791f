// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic reconciliation.
//!
//! Every `timer_period` seconds: expire old monitoring rows, find hosts
//! whose measurements have gone stale, and dispatch probes. Offline hosts
//! get a zero-capacity row instead of a probe; a probe unanswered for
//! `monitor_expire` seconds is considered stuck and re-dispatched.

use std::sync::Arc;
use std::time::Duration;

use hm_core::{Clock, HostConfig, HostState, SweeperConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::context::MonitorCtx;

/// Accumulated tick time between `--Mark--` log lines.
const MARK_INTERVAL: u64 = 600;

pub struct Sweeper<C: Clock> {
    ctx: Arc<MonitorCtx<C>>,
    timer_period: u64,
    monitor_expire: u64,
    monitoring_interval: u64,
    host_limit: usize,
    mark: u64,
}

impl<C: Clock> Sweeper<C> {
    pub fn new(ctx: Arc<MonitorCtx<C>>, sweeper: &SweeperConfig, host: &HostConfig) -> Self {
        Self {
            ctx,
            timer_period: sweeper.timer_period,
            monitor_expire: sweeper.monitor_expire,
            monitoring_interval: host.monitoring_interval,
            host_limit: host.monitoring_threads,
            mark: 0,
        }
    }

    /// Run until cancelled, ticking every `timer_period` seconds.
    pub async fn run(mut self, cancel: CancellationToken) {
        let period = Duration::from_secs(self.timer_period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("sweeper stopping");
                    return;
                }
                _ = tokio::time::sleep(period) => self.tick(),
            }
        }
    }

    /// One reconciliation pass.
    pub fn tick(&mut self) {
        let now = self.ctx.clock.epoch_secs();

        self.mark += self.timer_period;
        if self.mark >= MARK_INTERVAL {
            info!("--Mark--");
            self.mark = 0;
        }

        if let Err(e) = self.ctx.store.clean_expired(now) {
            error!(error = %e, "failed to expire monitoring rows");
        }

        let target_time = now.saturating_sub(self.monitoring_interval);
        let candidates = self.ctx.pool.discover(target_time, self.host_limit);

        for oid in candidates {
            self.reconcile_host(oid, now);
        }
    }

    fn reconcile_host(&self, oid: i32, now: u64) {
        // Leases one host at a time; released before store or pipe I/O.
        let Some(host) = self.ctx.pool.get_shared(oid) else {
            return;
        };

        if host.state == HostState::Offline {
            drop(host);
            self.ctx.write_offline_row(oid);
            return;
        }

        if host.monitor_in_progress {
            let pending_for = now.saturating_sub(host.last_monitored);
            if pending_for < self.monitor_expire {
                // Probe still in flight
                return;
            }
            debug!(oid, pending_for, "probe considered stuck, re-dispatching");
        }

        drop(host);
        self.ctx.start_host_monitor(oid, false);
    }
}

#[cfg(test)]
#[path = "sweeper_tests.rs"]
mod tests;
