// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: wiring, the stdio loop, and orderly shutdown.
//!
//! The stdin read loop is the process lifetime: it ends on FINALIZE, on
//! stdin EOF, or on SIGTERM/SIGINT, and its end unwinds everything in
//! order (sweeper, UDP workers, drivers, database handle).

use std::sync::Arc;

use hm_core::{ConfigError, DbBackend, KvTemplateParser, MonitorConfig, SystemClock};
use thiserror::Error;
use tokio::io::{AsyncBufRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::context::{MonitorCtx, OrchestratorWriter};
use crate::drivers::{DriverError, DriverManager};
use crate::pool::{HostPool, PoolError};
use crate::protocol::{DriverProtocol, OrchestratorProtocol};
use crate::rpc::{OrchestratorClient, RpcError, XmlRpcClient};
use crate::storage::{Db, MonitoringStore, SqliteDb, StoreError};
use crate::stream::{read_frames, StreamError};
use crate::sweeper::Sweeper;
use crate::udp::UdpIngest;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("database backend '{0}' requires an injected handle")]
    Backend(String),

    #[error("failed to bind UDP listener: {0}")]
    Bind(#[source] std::io::Error),
}

/// Run the daemon against the process stdio and the configured
/// orchestrator endpoint. Returns when the orchestrator lets go.
pub async fn run(config: MonitorConfig) -> Result<(), LifecycleError> {
    let client: Arc<dyn OrchestratorClient> = Arc::new(XmlRpcClient::new(&config.orchestrator)?);
    let writer = OrchestratorWriter::stdout();
    let stdin = BufReader::new(tokio::io::stdin());
    run_with(config, client, writer, stdin).await
}

/// Supervisor body with the process edges injected, so tests can drive it
/// with in-memory pipes and a fake orchestrator.
pub async fn run_with<R>(
    config: MonitorConfig,
    client: Arc<dyn OrchestratorClient>,
    writer: OrchestratorWriter,
    stdin: R,
) -> Result<(), LifecycleError>
where
    R: AsyncBufRead + Unpin + Send,
{
    config.validate()?;

    // Storage
    let db: Arc<dyn Db> = match config.db.backend {
        DbBackend::Sqlite => Arc::new(SqliteDb::open(&config.db.path)?),
        DbBackend::Mysql => return Err(LifecycleError::Backend("mysql".to_string())),
    };
    let store = Arc::new(MonitoringStore::new(db, config.host.monitor_expiration)?);

    // Pool and drivers; a missing driver executable aborts startup here
    let pool = Arc::new(HostPool::new());
    let drivers = Arc::new(DriverManager::load(&config)?);

    let ctx = Arc::new(MonitorCtx {
        pool,
        store,
        drivers,
        writer,
        clock: SystemClock,
        parser: Arc::new(KvTemplateParser),
    });

    let shutdown = CancellationToken::new();
    let driver_protocol = Arc::new(DriverProtocol::new(Arc::clone(&ctx)));
    let orchestrator_protocol =
        OrchestratorProtocol::new(Arc::clone(&ctx), Arc::clone(&client), shutdown.clone());

    // UDP ingest
    let udp_cancel = CancellationToken::new();
    let udp = UdpIngest::bind(
        &config.udp.address,
        config.udp.port,
        config.udp.threads,
        Arc::clone(&driver_protocol),
        udp_cancel.clone(),
    )
    .await
    .map_err(LifecycleError::Bind)?;

    // Driver processes
    ctx.drivers.start(driver_protocol);

    // Prime the host table, start the first monitoring cycle, and give the
    // drivers the full listing
    let installed = ctx.pool.bootstrap(client.as_ref()).await?;
    info!(hosts = installed, "host pool bootstrapped");

    for oid in ctx.pool.oids() {
        ctx.start_host_monitor(oid, true);
    }
    ctx.drivers.broadcast_host_list(&ctx.pool.to_pool_xml());

    // Sweeper
    let sweeper_cancel = CancellationToken::new();
    let sweeper = Sweeper::new(Arc::clone(&ctx), &config.sweeper, &config.host);
    let sweeper_task = tokio::spawn(sweeper.run(sweeper_cancel.clone()));

    info!("monitor daemon ready");

    // The stdio loop is the process lifetime
    tokio::select! {
        result = read_frames(stdin, &orchestrator_protocol) => {
            match result {
                Ok(()) => info!("orchestrator closed stdin"),
                Err(StreamError::OversizedFrame) => {
                    error!("oversized frame on stdin, closing channel");
                }
                Err(e) => error!(error = %e, "stdin read failed"),
            }
        }
        _ = shutdown.cancelled() => {}
        _ = terminate_signal() => info!("termination signal received"),
    }

    // Orderly shutdown: sweeper, UDP workers, drivers, database handle
    info!("shutting down");

    sweeper_cancel.cancel();
    let _ = sweeper_task.await;

    udp_cancel.cancel();
    udp.join().await;

    ctx.drivers.stop().await;

    info!("monitor daemon stopped");
    Ok(())
}

/// Resolves on SIGTERM or SIGINT.
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut term), Ok(mut int)) => {
            tokio::select! {
                _ = term.recv() => {}
                _ = int.recv() => {}
            }
        }
        // No signal handling available; rely on stdin EOF
        _ => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
