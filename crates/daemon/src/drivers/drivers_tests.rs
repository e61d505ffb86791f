// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hm_core::{DriverSpec, HostRecord, MonitorConfig};
use hm_wire::{DriverMessageType, Message, OrchestratorMessageType};
use parking_lot::Mutex;

use super::*;
use crate::drivers::driver::OutFrame;

#[derive(Default)]
struct Capture {
    frames: Arc<Mutex<Vec<Message<DriverMessageType>>>>,
}

#[async_trait]
impl FrameHandler<DriverMessageType> for Capture {
    async fn handle(&self, msg: Message<DriverMessageType>) {
        self.frames.lock().push(msg);
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn config_with_driver(name: &str, executable: &Path, legacy: bool) -> MonitorConfig {
    MonitorConfig {
        drivers: vec![DriverSpec {
            name: name.to_string(),
            executable: executable.to_path_buf(),
            legacy,
            ..DriverSpec::default()
        }],
        ..MonitorConfig::default()
    }
}

fn test_host(oid: i32, name: &str, im_mad: &str) -> HostRecord {
    HostRecord {
        oid,
        name: name.to_string(),
        im_mad: im_mad.to_string(),
        ..HostRecord::default()
    }
}

// ── load ─────────────────────────────────────────────────────────────────

#[test]
fn load_rejects_missing_executable() {
    let config = config_with_driver("kvm", Path::new("/nonexistent/probe"), false);
    let err = DriverManager::load(&config).unwrap_err();
    assert!(matches!(err, DriverError::MissingExecutable { .. }));
    assert_eq!(err.kind(), hm_core::ErrorKind::Configuration);
}

#[test]
fn load_resolves_relative_paths_against_driver_dir() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "probe", "#!/bin/sh\ntrue\n");

    let mut config = config_with_driver("kvm", Path::new("probe"), false);
    config.driver_dir = dir.path().to_path_buf();

    let manager = DriverManager::load(&config).unwrap();
    assert!(manager.get("kvm").is_some());
    assert!(manager.get("xen").is_none());
}

// ── write queue policy ───────────────────────────────────────────────────

#[test]
fn queue_drops_oldest_non_critical_when_full() {
    let queue = WriteQueue::default();

    queue.push(OutFrame { bytes: b"first-noncritical".to_vec(), critical: false });
    for i in 0..255 {
        queue.push(OutFrame { bytes: format!("filler-{i}").into_bytes(), critical: false });
    }
    assert_eq!(queue.len(), 256);

    queue.push(OutFrame { bytes: b"overflow".to_vec(), critical: false });

    let frames = queue.drain();
    assert_eq!(frames.len(), 256);
    // The oldest non-critical frame was evicted
    assert!(frames.iter().all(|f| f.bytes != b"first-noncritical"));
    assert_eq!(frames.last().unwrap().bytes, b"overflow");
}

#[test]
fn queue_never_drops_critical_frames() {
    let queue = WriteQueue::default();

    for i in 0..256 {
        queue.push(OutFrame { bytes: format!("critical-{i}").into_bytes(), critical: true });
    }
    // All slots critical: the new frame is still accepted
    queue.push(OutFrame { bytes: b"one-more".to_vec(), critical: true });

    let frames = queue.drain();
    assert_eq!(frames.len(), 257);
    assert_eq!(frames[0].bytes, b"critical-0");
}

// ── outbound command formats ─────────────────────────────────────────────

#[tokio::test]
async fn start_monitor_enqueues_framed_command() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "probe", "#!/bin/sh\ntrue\n");
    let manager = DriverManager::load(&config_with_driver("kvm", &script, false)).unwrap();

    manager.start_monitor(&test_host(7, "node7", "kvm"), true).unwrap();

    let frames = manager.get("kvm").unwrap().drain_queued();
    assert_eq!(frames.len(), 1);
    assert!(frames[0].critical);

    let msg: Message<OrchestratorMessageType> = Message::decode(&frames[0].bytes).unwrap();
    assert_eq!(msg.msg_type, OrchestratorMessageType::StartMonitor);
    assert_eq!(msg.oid, 7);
    assert_eq!(msg.payload_str(), "1");
}

#[tokio::test]
async fn start_monitor_formats_legacy_text_command() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "probe", "#!/bin/sh\ntrue\n");
    let mut config = config_with_driver("xen", &script, true);
    config.ds_location = "/var/lib/ds".into();
    let manager = DriverManager::load(&config).unwrap();

    manager.start_monitor(&test_host(3, "node3", "xen"), false).unwrap();

    let frames = manager.get("xen").unwrap().drain_queued();
    assert_eq!(frames[0].bytes, b"MONITOR 3 node3 /var/lib/ds 0\n");
}

#[tokio::test]
async fn stop_monitor_carries_name_and_im_mad() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "probe", "#!/bin/sh\ntrue\n");
    let manager = DriverManager::load(&config_with_driver("kvm", &script, false)).unwrap();

    manager.stop_monitor(7, "node7", "kvm").unwrap();

    let frames = manager.get("kvm").unwrap().drain_queued();
    let msg: Message<OrchestratorMessageType> = Message::decode(&frames[0].bytes).unwrap();
    assert_eq!(msg.msg_type, OrchestratorMessageType::StopMonitor);
    let payload = msg.payload_str();
    assert!(payload.contains("<NAME>node7</NAME>"), "payload: {}", payload);
    assert!(payload.contains("<IM_MAD>kvm</IM_MAD>"), "payload: {}", payload);
}

#[tokio::test]
async fn unknown_driver_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "probe", "#!/bin/sh\ntrue\n");
    let manager = DriverManager::load(&config_with_driver("kvm", &script, false)).unwrap();

    let err = manager.start_monitor(&test_host(7, "node7", "vmware"), false).unwrap_err();
    assert!(matches!(err, DriverError::UnknownDriver(_)));
}

#[tokio::test]
async fn broadcast_host_list_skips_legacy_drivers() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "probe", "#!/bin/sh\ntrue\n");
    let config = MonitorConfig {
        drivers: vec![
            DriverSpec {
                name: "kvm".to_string(),
                executable: script.clone(),
                ..DriverSpec::default()
            },
            DriverSpec {
                name: "xen".to_string(),
                executable: script,
                legacy: true,
                ..DriverSpec::default()
            },
        ],
        ..MonitorConfig::default()
    };
    let manager = DriverManager::load(&config).unwrap();

    manager.broadcast_host_list("<HOST_POOL></HOST_POOL>");

    assert_eq!(manager.get("kvm").unwrap().queued_len(), 1);
    assert_eq!(manager.get("xen").unwrap().queued_len(), 0);
}

// ── child process lifecycle ──────────────────────────────────────────────

/// Shell stub speaking the framed protocol: replies to INIT, exits on
/// FINALIZE, and emits one LOG frame after the handshake.
const STUB_DRIVER: &str = r#"#!/bin/sh
while read line; do
  set -- $line
  case "$1" in
    INIT)
      echo "INIT SUCCESS -1 0 -"
      echo "LOG SUCCESS -1 0 -"
      ;;
    FINALIZE)
      exit 0
      ;;
  esac
done
"#;

#[tokio::test]
async fn driver_handshake_and_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "stub", STUB_DRIVER);
    let manager = DriverManager::load(&config_with_driver("kvm", &script, false)).unwrap();

    let handler = Arc::new(Capture::default());
    let frames = Arc::clone(&handler.frames);
    manager.start(handler);

    // The stub emits a LOG frame right after INIT SUCCESS
    for _ in 0..200 {
        if !frames.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    {
        let seen = frames.lock();
        assert_eq!(seen.len(), 1, "expected the post-handshake LOG frame");
        assert_eq!(seen[0].msg_type, DriverMessageType::Log);
    }

    tokio::time::timeout(Duration::from_secs(10), manager.stop()).await.unwrap();
}

#[tokio::test]
async fn queued_frames_reach_the_child() {
    let dir = tempfile::tempdir().unwrap();
    // Echoes any START_MONITOR back as a LOG frame carrying the oid
    let script = write_script(
        dir.path(),
        "stub",
        r#"#!/bin/sh
while read line; do
  set -- $line
  case "$1" in
    INIT) echo "INIT SUCCESS -1 0 -" ;;
    START_MONITOR) echo "LOG SUCCESS $3 0 -" ;;
    FINALIZE) exit 0 ;;
  esac
done
"#,
    );
    let manager = DriverManager::load(&config_with_driver("kvm", &script, false)).unwrap();

    let handler = Arc::new(Capture::default());
    let frames = Arc::clone(&handler.frames);
    manager.start(handler);

    manager.start_monitor(&test_host(42, "node42", "kvm"), false).unwrap();

    for _ in 0..200 {
        if !frames.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    {
        let seen = frames.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].oid, 42);
    }

    tokio::time::timeout(Duration::from_secs(10), manager.stop()).await.unwrap();
}
