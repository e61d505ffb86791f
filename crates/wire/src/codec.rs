// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Payload transcoding: zlib compression wrapped in base64.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use thiserror::Error;

/// Field placeholder for an empty payload.
pub(crate) const EMPTY_FIELD: &str = "-";

/// Decompressed payloads are capped to keep a malicious or corrupt frame
/// from ballooning in memory.
const MAX_INFLATED: u64 = 64 * 1024 * 1024;

/// Errors producing an outbound frame.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("payload compression failed: {0}")]
    Compress(#[source] std::io::Error),
}

/// Errors parsing an inbound frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame header: {0}")]
    MalformedHeader(String),

    #[error("payload is not valid base64")]
    BadBase64(#[source] base64::DecodeError),

    #[error("payload is not valid zlib data")]
    BadCompression(#[source] std::io::Error),

    #[error("frame exceeds the {limit} byte line cap")]
    OversizedFrame { limit: usize },
}

/// Compress and base64-encode payload bytes into the wire field.
///
/// An empty payload becomes the `-` placeholder; it never fails.
pub fn pack_payload(payload: &[u8]) -> Result<String, EncodeError> {
    if payload.is_empty() {
        return Ok(EMPTY_FIELD.to_string());
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).map_err(EncodeError::Compress)?;
    let compressed = encoder.finish().map_err(EncodeError::Compress)?;

    Ok(BASE64.encode(compressed))
}

/// Decode the wire payload field back into payload bytes.
pub fn unpack_payload(field: &str) -> Result<Vec<u8>, DecodeError> {
    if field == EMPTY_FIELD || field.is_empty() {
        return Ok(Vec::new());
    }

    let compressed = BASE64.decode(field).map_err(DecodeError::BadBase64)?;

    let mut payload = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .take(MAX_INFLATED)
        .read_to_end(&mut payload)
        .map_err(DecodeError::BadCompression)?;

    Ok(payload)
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
