// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! UDP ingest for push-mode probe drivers.
//!
//! One datagram is one frame. A pool of workers shares the socket; each
//! worker does its own `recv_from`, so frames from different senders are
//! handled concurrently while the socket itself never blocks a handler.

use std::sync::Arc;

use hm_wire::{DriverMessageType, Message};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::stream::{log_decode_error, FrameHandler};

/// One datagram, at most. Larger datagrams are truncated by the kernel and
/// dropped here.
const DATAGRAM_SIZE: usize = 64 * 1024;

pub struct UdpIngest {
    workers: Vec<JoinHandle<()>>,
    local_addr: std::net::SocketAddr,
}

impl UdpIngest {
    /// Bind the socket and spawn the worker pool.
    pub async fn bind<H>(
        address: &str,
        port: u16,
        threads: usize,
        handler: Arc<H>,
        cancel: CancellationToken,
    ) -> Result<Self, std::io::Error>
    where
        H: FrameHandler<DriverMessageType> + 'static,
    {
        let socket = Arc::new(UdpSocket::bind((address, port)).await?);
        let local_addr = socket.local_addr()?;

        info!(%local_addr, threads, "UDP ingest listening");

        let workers = (0..threads)
            .map(|_| {
                let socket = Arc::clone(&socket);
                let handler = Arc::clone(&handler);
                let cancel = cancel.clone();
                tokio::spawn(worker_loop(socket, handler, cancel))
            })
            .collect();

        Ok(Self { workers, local_addr })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Wait for every worker to observe cancellation and stop.
    pub async fn join(self) {
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

async fn worker_loop<H>(socket: Arc<UdpSocket>, handler: Arc<H>, cancel: CancellationToken)
where
    H: FrameHandler<DriverMessageType> + 'static,
{
    let mut buf = vec![0u8; DATAGRAM_SIZE];

    loop {
        let (len, peer) = tokio::select! {
            _ = cancel.cancelled() => return,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "UDP receive failed");
                    continue;
                }
            },
        };

        // A datagram that fills the buffer was truncated by the kernel.
        if len == 0 || len >= DATAGRAM_SIZE {
            warn!(%peer, len, "dropping truncated or empty datagram");
            continue;
        }

        let line = &buf[..len];
        match Message::<DriverMessageType>::decode(line) {
            Ok(msg) => handler.handle(msg).await,
            Err(e) => log_decode_error(&e, line),
        }
    }
}

#[cfg(test)]
#[path = "udp_tests.rs"]
mod tests;
