// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line-framed stream reading.
//!
//! Turns a byte stream (orchestrator stdin, driver stdout) into decoded
//! frames and feeds them to a handler. Frames are handled strictly in
//! arrival order per source; undecodable lines are logged and dropped.

use async_trait::async_trait;
use hm_wire::{DecodeError, Message, MessageType};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::warn;

/// Longest accepted line. A source that exceeds it is closed.
pub const MAX_LINE: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("I/O error on stream: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame exceeds the {MAX_LINE} byte line cap")]
    OversizedFrame,
}

/// Receives every decoded frame from a source.
///
/// Handlers swallow their own errors; nothing they do can take down the
/// reader.
#[async_trait]
pub trait FrameHandler<T: MessageType>: Send + Sync {
    async fn handle(&self, msg: Message<T>);
}

/// Read one line (without the trailing `\n`), enforcing [`MAX_LINE`].
///
/// Returns `None` on clean end of stream.
pub async fn read_line_capped<R>(reader: &mut R) -> Result<Option<Vec<u8>>, StreamError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut line = Vec::new();

    loop {
        if line.len() > MAX_LINE {
            return Err(StreamError::OversizedFrame);
        }

        // Cap the read so a runaway line cannot grow unbounded.
        let mut taken = (&mut *reader).take((MAX_LINE + 1 - line.len()) as u64);
        let n = taken.read_until(b'\n', &mut line).await?;

        if n == 0 {
            // EOF: an unterminated trailing line is still delivered
            if line.is_empty() {
                return Ok(None);
            }
            return Ok(Some(line));
        }

        if line.last() == Some(&b'\n') {
            line.pop();
            return Ok(Some(line));
        }
    }
}

/// Pump a source until EOF, dispatching each decoded frame to `handler`.
///
/// Decode failures are protocol errors: logged, dropped, never fatal. An
/// oversized line closes the channel with an error.
pub async fn read_frames<R, T, H>(mut reader: R, handler: &H) -> Result<(), StreamError>
where
    R: AsyncBufRead + Unpin + Send,
    T: MessageType,
    H: FrameHandler<T> + ?Sized,
{
    while let Some(line) = read_line_capped(&mut reader).await? {
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }

        match Message::<T>::decode(&line) {
            Ok(msg) => handler.handle(msg).await,
            Err(e) => log_decode_error(&e, &line),
        }
    }

    Ok(())
}

pub(crate) fn log_decode_error(error: &DecodeError, line: &[u8]) {
    let preview: String = String::from_utf8_lossy(line).chars().take(80).collect();
    warn!(%error, line = %preview, "dropping undecodable frame");
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
