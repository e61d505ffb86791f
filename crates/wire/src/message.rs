// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame representation shared by all protocol channels.

use std::fmt;

use crate::codec::{pack_payload, unpack_payload, DecodeError, EncodeError, EMPTY_FIELD};

/// A channel's message type enumeration.
///
/// Implementations map whitespace-free ASCII tags to variants; any unknown
/// tag resolves to [`MessageType::UNDEFINED`] so that a newer driver never
/// breaks an older daemon.
pub trait MessageType: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    const UNDEFINED: Self;

    fn as_tag(&self) -> &'static str;

    /// Resolve a wire tag, falling back to `UNDEFINED` for unknown tags.
    fn from_tag(tag: &str) -> Self;
}

/// Result marker carried in the second frame field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageStatus {
    Success,
    Failure,
    /// Absent, written as `-`.
    #[default]
    None,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Success => "SUCCESS",
            MessageStatus::Failure => "FAILURE",
            MessageStatus::None => EMPTY_FIELD,
        }
    }

    fn parse(field: &str) -> Result<Self, DecodeError> {
        match field {
            "SUCCESS" => Ok(MessageStatus::Success),
            "FAILURE" => Ok(MessageStatus::Failure),
            EMPTY_FIELD => Ok(MessageStatus::None),
            other => Err(DecodeError::MalformedHeader(format!("unknown status '{other}'"))),
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One protocol frame.
///
/// `oid` is `-1` and `timestamp` is `0` when not applicable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<T: MessageType> {
    pub msg_type: T,
    pub status: MessageStatus,
    pub oid: i32,
    pub timestamp: u64,
    pub payload: Vec<u8>,
}

impl<T: MessageType> Message<T> {
    pub fn new(msg_type: T, oid: i32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            msg_type,
            status: MessageStatus::None,
            oid,
            timestamp: 0,
            payload: payload.into(),
        }
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Payload as text, replacing any invalid UTF-8.
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Encode this frame as a newline-terminated wire line.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let payload64 = pack_payload(&self.payload)?;

        let line = format!(
            "{} {} {} {} {}\n",
            self.msg_type.as_tag(),
            self.status,
            self.oid,
            self.timestamp,
            payload64
        );

        Ok(line.into_bytes())
    }

    /// Decode a wire line (with or without the trailing newline).
    ///
    /// Unknown type tags yield a frame with `msg_type = UNDEFINED`; callers
    /// treat those as a warning, not an error.
    pub fn decode(line: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(line)
            .map_err(|_| DecodeError::MalformedHeader("frame is not UTF-8".to_string()))?;

        // Trailing whitespace before the newline is tolerated.
        let mut fields = text.split_ascii_whitespace();

        let tag = fields
            .next()
            .ok_or_else(|| DecodeError::MalformedHeader("empty frame".to_string()))?;
        let status = fields
            .next()
            .ok_or_else(|| DecodeError::MalformedHeader("missing status field".to_string()))?;
        let oid = fields
            .next()
            .ok_or_else(|| DecodeError::MalformedHeader("missing oid field".to_string()))?;
        let timestamp = fields
            .next()
            .ok_or_else(|| DecodeError::MalformedHeader("missing timestamp field".to_string()))?;
        let payload64 = fields.next().unwrap_or(EMPTY_FIELD);

        if fields.next().is_some() {
            return Err(DecodeError::MalformedHeader("trailing fields after payload".to_string()));
        }

        let status = MessageStatus::parse(status)?;
        let oid: i32 = oid
            .parse()
            .map_err(|_| DecodeError::MalformedHeader(format!("bad oid '{oid}'")))?;
        let timestamp: u64 = timestamp
            .parse()
            .map_err(|_| DecodeError::MalformedHeader(format!("bad timestamp '{timestamp}'")))?;

        let payload = unpack_payload(payload64)?;

        Ok(Self { msg_type: T::from_tag(tag), status, oid, timestamp, payload })
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
