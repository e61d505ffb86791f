// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error classification shared across the daemon.

use std::fmt;

/// How an error is handled, independent of where it happened.
///
/// - `Transient`: retry with backoff (RPC bootstrap, driver restart, SQL).
/// - `Protocol`: malformed input on a channel; log and drop, never fatal.
/// - `Policy`: legal input rejected by current state (probe result for an
///   unknown or offline host); log and drop.
/// - `Configuration`: fatal at startup, non-fatal when detected later.
/// - `Fatal`: unrecoverable loss of a critical resource; triggers shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Protocol,
    Policy,
    Configuration,
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Policy => "policy",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Fatal => "fatal",
        };
        f.write_str(s)
    }
}
