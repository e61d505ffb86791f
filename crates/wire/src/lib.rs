// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Monitoring wire protocol.
//!
//! Every channel (orchestrator stdio, driver stdio, UDP ingest) carries
//! line-delimited frames:
//!
//! ```text
//! <TYPE> <STATUS> <OID> <TIMESTAMP> <PAYLOAD64>\n
//! ```
//!
//! `PAYLOAD64` is base64 over zlib-compressed payload bytes, or `-` when
//! the payload is empty.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod codec;
pub mod legacy;
mod message;
mod types;

pub use codec::{pack_payload, unpack_payload, DecodeError, EncodeError};
pub use message::{Message, MessageStatus, MessageType};
pub use types::{DriverMessageType, OrchestratorMessageType};
