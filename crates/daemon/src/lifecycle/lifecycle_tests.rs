// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hm_core::{DbConfig, HostState, MonitorConfig, UdpConfig};
use hm_wire::{Message, MessageStatus, OrchestratorMessageType};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::*;
use crate::rpc::RpcError;

struct StaticPool(String);

#[async_trait]
impl OrchestratorClient for StaticPool {
    async fn host_pool_info(&self) -> Result<String, RpcError> {
        Ok(self.0.clone())
    }
}

fn test_config(dir: &std::path::Path) -> MonitorConfig {
    MonitorConfig {
        db: DbConfig { path: dir.join("monitor.db"), ..DbConfig::default() },
        // Ephemeral port, tiny worker pool
        udp: UdpConfig { address: "127.0.0.1".to_string(), port: 0, threads: 2 },
        ..MonitorConfig::default()
    }
}

fn host_xml(oid: i32, name: &str) -> String {
    format!(
        "<HOST><ID>{oid}</ID><NAME>{name}</NAME><STATE>{}</STATE><IM_MAD>kvm</IM_MAD></HOST>",
        HostState::Init.code()
    )
}

async fn drain(outbound: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<Message<OrchestratorMessageType>> {
    let mut frames = Vec::new();
    while let Ok(Some(bytes)) =
        tokio::time::timeout(Duration::from_millis(200), outbound.recv()).await
    {
        frames.push(Message::decode(&bytes).unwrap());
    }
    frames
}

#[tokio::test]
async fn daemon_answers_init_and_stops_on_finalize() {
    let dir = tempfile::tempdir().unwrap();
    let (writer, mut outbound) = crate::context::OrchestratorWriter::channel();
    let (mut stdin_tx, stdin_rx) = tokio::io::duplex(4096);

    let daemon = tokio::spawn(run_with(
        test_config(dir.path()),
        Arc::new(StaticPool("<HOST_POOL></HOST_POOL>".to_string())),
        writer,
        BufReader::new(stdin_rx),
    ));

    let init = Message::new(OrchestratorMessageType::Init, -1, "").encode().unwrap();
    stdin_tx.write_all(&init).await.unwrap();
    let finalize = Message::new(OrchestratorMessageType::Finalize, -1, "").encode().unwrap();
    stdin_tx.write_all(&finalize).await.unwrap();

    tokio::time::timeout(Duration::from_secs(10), daemon).await.unwrap().unwrap().unwrap();

    let frames = drain(&mut outbound).await;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].msg_type, OrchestratorMessageType::Init);
    assert_eq!(frames[0].status, MessageStatus::Success);
    assert_eq!(frames[1].msg_type, OrchestratorMessageType::Finalize);
    assert_eq!(frames[1].status, MessageStatus::Success);
}

#[tokio::test]
async fn daemon_stops_on_stdin_eof() {
    let dir = tempfile::tempdir().unwrap();
    let (writer, _outbound) = crate::context::OrchestratorWriter::channel();
    let (stdin_tx, stdin_rx) = tokio::io::duplex(64);

    let daemon = tokio::spawn(run_with(
        test_config(dir.path()),
        Arc::new(StaticPool("<HOST_POOL></HOST_POOL>".to_string())),
        writer,
        BufReader::new(stdin_rx),
    ));

    drop(stdin_tx);

    tokio::time::timeout(Duration::from_secs(10), daemon).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn update_host_then_result_flows_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let (writer, mut outbound) = crate::context::OrchestratorWriter::channel();
    let (mut stdin_tx, stdin_rx) = tokio::io::duplex(8192);

    let daemon = tokio::spawn(run_with(
        test_config(dir.path()),
        Arc::new(StaticPool("<HOST_POOL></HOST_POOL>".to_string())),
        writer,
        BufReader::new(stdin_rx),
    ));

    // The orchestrator announces a host (driver "kvm" is not configured,
    // so the probe dispatch fails, but the record must exist)
    let update = Message::new(OrchestratorMessageType::UpdateHost, 7, host_xml(7, "node7"))
        .encode()
        .unwrap();
    stdin_tx.write_all(&update).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    let finalize = Message::new(OrchestratorMessageType::Finalize, -1, "").encode().unwrap();
    stdin_tx.write_all(&finalize).await.unwrap();

    tokio::time::timeout(Duration::from_secs(10), daemon).await.unwrap().unwrap().unwrap();

    // Monitoring rows survive the daemon: the table exists and is empty
    let db = SqliteDb::open(&dir.path().join("monitor.db")).unwrap();
    let rows = db.query("SELECT COUNT(*) FROM host_monitoring").unwrap();
    assert_eq!(rows[0][0], "0");

    let frames = drain(&mut outbound).await;
    assert_eq!(frames.last().unwrap().msg_type, OrchestratorMessageType::Finalize);
}

#[tokio::test]
async fn bootstrap_primes_the_pool_before_ready() {
    let dir = tempfile::tempdir().unwrap();
    let (writer, _outbound) = crate::context::OrchestratorWriter::channel();
    let (stdin_tx, stdin_rx) = tokio::io::duplex(64);

    let listing = format!("<HOST_POOL>{}</HOST_POOL>", host_xml(3, "boot"));
    let daemon = tokio::spawn(run_with(
        test_config(dir.path()),
        Arc::new(StaticPool(listing)),
        writer,
        BufReader::new(stdin_rx),
    ));

    // EOF immediately; bootstrap still ran before the loop exited
    drop(stdin_tx);
    tokio::time::timeout(Duration::from_secs(10), daemon).await.unwrap().unwrap().unwrap();
}

#[test]
fn mysql_backend_without_handle_is_a_startup_error() {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    runtime.block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.db.backend = hm_core::DbBackend::Mysql;

        let (writer, _outbound) = crate::context::OrchestratorWriter::channel();
        let (_stdin_tx, stdin_rx) = tokio::io::duplex(64);

        let err = run_with(
            config,
            Arc::new(StaticPool(String::new())),
            writer,
            BufReader::new(stdin_rx),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, LifecycleError::Backend(_)));
    });
}
