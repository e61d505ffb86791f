// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hm-core: data model for the host-monitoring daemon.
//!
//! Host records and their state machine, the probe template grammar, the
//! persisted monitoring document, typed configuration, and the clock
//! abstraction. Everything here is I/O-free; the daemon crate owns the
//! runtime.

pub mod clock;
pub mod config;
pub mod error;
pub mod host;
pub mod monitoring;
pub mod share;
pub mod template;
pub mod xml;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{
    ConfigError, DbBackend, DbConfig, DriverSpec, HostConfig, LogConfig, MonitorConfig,
    OrchestratorConfig, SweeperConfig, UdpConfig,
};
pub use error::ErrorKind;
pub use host::{HostParseError, HostRecord, HostState};
pub use monitoring::{Capacity, MonitoringDocument, MonitoringError};
pub use share::{DatastoreShare, HostShare};
pub use template::{KvTemplateParser, Template, TemplateError, TemplateParser};
pub use xml::{XmlError, XmlNode};
