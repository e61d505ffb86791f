// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One supervised driver child process.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use hm_wire::{DriverMessageType, Message, MessageStatus};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::stream::{read_frames, read_line_capped, FrameHandler};

use super::DriverError;

/// INIT handshake deadline.
const INIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Grace period between FINALIZE and termination.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Restart backoff bounds.
const BACKOFF_START: Duration = Duration::from_secs(2);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Bound on frames queued towards one driver.
const QUEUE_CAP: usize = 256;

/// A frame waiting to be written to a driver's stdin.
#[derive(Debug, Clone)]
pub(crate) struct OutFrame {
    pub bytes: Vec<u8>,
    /// Critical frames (START_MONITOR / STOP_MONITOR) are never dropped.
    pub critical: bool,
}

/// Per-driver write queue with drop-oldest-non-critical back-pressure.
#[derive(Debug, Default)]
pub(crate) struct WriteQueue {
    inner: Mutex<VecDeque<OutFrame>>,
    notify: Notify,
}

impl WriteQueue {
    pub fn push(&self, frame: OutFrame) {
        {
            let mut queue = self.inner.lock();
            if queue.len() >= QUEUE_CAP {
                if let Some(pos) = queue.iter().position(|f| !f.critical) {
                    queue.remove(pos);
                    warn!("driver unavailable, dropped oldest non-critical frame");
                }
            }
            queue.push_back(frame);
        }
        self.notify.notify_one();
    }

    pub fn push_front(&self, frame: OutFrame) {
        self.inner.lock().push_front(frame);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> OutFrame {
        loop {
            if let Some(frame) = self.inner.lock().pop_front() {
                return frame;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[cfg(test)]
    pub fn drain(&self) -> Vec<OutFrame> {
        self.inner.lock().drain(..).collect()
    }
}

enum ChildEnd {
    /// Cooperative shutdown; do not restart.
    Shutdown,
    /// The child died or its stdout closed; restart with backoff.
    Exited,
}

#[derive(Debug)]
pub struct Driver {
    name: String,
    executable: PathBuf,
    arguments: Vec<String>,
    legacy: bool,
    queue: WriteQueue,
}

impl Driver {
    pub(crate) fn new(name: String, executable: PathBuf, arguments: &str, legacy: bool) -> Self {
        Self {
            name,
            executable,
            arguments: arguments.split_whitespace().map(str::to_string).collect(),
            legacy,
            queue: WriteQueue::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    pub(crate) fn enqueue(&self, frame: OutFrame) {
        self.queue.push(frame);
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub(crate) fn drain_queued(&self) -> Vec<OutFrame> {
        self.queue.drain()
    }

    /// Supervise the child process until shutdown, restarting on failure
    /// with exponential backoff.
    pub(crate) async fn run<H>(self: Arc<Self>, handler: Arc<H>, cancel: CancellationToken)
    where
        H: FrameHandler<DriverMessageType> + 'static,
    {
        let mut backoff = BACKOFF_START;

        loop {
            if cancel.is_cancelled() {
                return;
            }

            match self.run_child(&handler, &cancel).await {
                Ok(ChildEnd::Shutdown) => return,
                Ok(ChildEnd::Exited) => {
                    warn!(driver = %self.name, "driver stopped unexpectedly");
                }
                Err(e) => {
                    warn!(driver = %self.name, error = %e, "driver failed");
                }
            }

            debug!(driver = %self.name, backoff_secs = backoff.as_secs(), "restarting driver");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(BACKOFF_CAP);
        }
    }

    async fn run_child<H>(
        &self,
        handler: &Arc<H>,
        cancel: &CancellationToken,
    ) -> Result<ChildEnd, DriverError>
    where
        H: FrameHandler<DriverMessageType> + 'static,
    {
        let mut child = Command::new(&self.executable)
            .args(&self.arguments)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DriverError::Spawn { name: self.name.clone(), source })?;

        let mut stdin = child.stdin.take().ok_or_else(|| DriverError::Spawn {
            name: self.name.clone(),
            source: std::io::Error::other("child stdin not captured"),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| DriverError::Spawn {
            name: self.name.clone(),
            source: std::io::Error::other("child stdout not captured"),
        })?;

        if let Some(stderr) = child.stderr.take() {
            let name = self.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(driver = %name, "{}", line);
                }
            });
        }

        let mut reader = BufReader::new(stdout);

        if !self.legacy {
            self.handshake(&mut stdin, &mut reader, handler).await?;
        }

        info!(driver = %self.name, "driver started");

        // Reader runs on its own task so a slow handler never stalls writes.
        let mut reader_task = tokio::spawn({
            let handler = Arc::clone(handler);
            async move { read_frames(reader, handler.as_ref()).await }
        });

        let end = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.finalize_child(stdin, &mut child).await;
                    break ChildEnd::Shutdown;
                }
                frame = self.queue.pop() => {
                    if let Err(e) = stdin.write_all(&frame.bytes).await {
                        warn!(driver = %self.name, error = %e, "driver write failed");
                        if frame.critical {
                            self.queue.push_front(frame);
                        }
                        break ChildEnd::Exited;
                    }
                }
                _ = &mut reader_task => {
                    break ChildEnd::Exited;
                }
            }
        };

        reader_task.abort();
        if matches!(end, ChildEnd::Exited) {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }

        Ok(end)
    }

    /// Send INIT and wait for `INIT SUCCESS` within the deadline.
    async fn handshake<H>(
        &self,
        stdin: &mut ChildStdin,
        reader: &mut BufReader<tokio::process::ChildStdout>,
        handler: &Arc<H>,
    ) -> Result<(), DriverError>
    where
        H: FrameHandler<DriverMessageType> + 'static,
    {
        let init = Message::new(DriverMessageType::Init, -1, "")
            .encode()
            .map_err(DriverError::Encode)?;
        stdin.write_all(&init).await.map_err(|source| DriverError::Spawn {
            name: self.name.clone(),
            source,
        })?;

        let wait = async {
            loop {
                let line = match read_line_capped(reader).await {
                    Ok(Some(line)) => line,
                    Ok(None) => return Err("driver closed stdout before INIT".to_string()),
                    Err(e) => return Err(e.to_string()),
                };

                let msg = match Message::<DriverMessageType>::decode(&line) {
                    Ok(msg) => msg,
                    Err(e) => {
                        crate::stream::log_decode_error(&e, &line);
                        continue;
                    }
                };

                if msg.msg_type == DriverMessageType::Init {
                    if msg.status == MessageStatus::Success {
                        return Ok(());
                    }
                    return Err(format!("driver replied INIT {}", msg.status));
                }

                // Anything the driver says before INIT still gets handled
                handler.handle(msg).await;
            }
        };

        match tokio::time::timeout(INIT_TIMEOUT, wait).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(DriverError::Handshake { name: self.name.clone(), reason }),
            Err(_) => Err(DriverError::Handshake {
                name: self.name.clone(),
                reason: format!("no INIT reply within {}s", INIT_TIMEOUT.as_secs()),
            }),
        }
    }

    /// Cooperative stop: FINALIZE, grace period, then termination.
    async fn finalize_child(&self, mut stdin: ChildStdin, child: &mut Child) {
        if !self.legacy {
            if let Ok(bytes) = Message::new(DriverMessageType::Finalize, -1, "").encode() {
                let _ = stdin.write_all(&bytes).await;
            }
        }
        // Closing stdin lets line-loop drivers fall off their read
        drop(stdin);

        if tokio::time::timeout(STOP_GRACE, child.wait()).await.is_ok() {
            return;
        }

        warn!(driver = %self.name, "driver ignored FINALIZE, terminating");
        if let Some(pid) = child.id() {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid as i32),
                nix::sys::signal::Signal::SIGTERM,
            );
        }
        if tokio::time::timeout(STOP_GRACE, child.wait()).await.is_err() {
            let _ = child.kill().await;
        }
    }
}
