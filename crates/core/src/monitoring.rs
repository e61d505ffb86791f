// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The persisted measurement document.
//!
//! One `MONITORING` document per probe result, serialized into the
//! `host_monitoring` table body column.

use thiserror::Error;

use crate::share::DatastoreShare;
use crate::template::Template;
use crate::xml::write_tag;

#[derive(Debug, Error)]
pub enum MonitoringError {
    #[error("monitoring template carries no host id")]
    MissingOid,
}

/// Capacity section, using the probe attribute names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capacity {
    pub free_cpu: i64,
    pub used_cpu: i64,
    pub free_memory: i64,
    pub used_memory: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitoringDocument {
    pub oid: i32,
    pub timestamp: u64,
    pub capacity: Capacity,
    pub datastores: Vec<DatastoreShare>,
    /// Serialized `<SYSTEM>` fragment captured from SYSTEM_HOST frames.
    pub system: Option<String>,
}

impl MonitoringDocument {
    /// Build from a successful probe template.
    ///
    /// The template's `OID` wins over `oid_hint` (the frame header value);
    /// a document with neither is rejected.
    pub fn from_template(
        oid_hint: i32,
        timestamp: u64,
        template: &Template,
    ) -> Result<Self, MonitoringError> {
        let oid = template.get_int::<i32>("OID").unwrap_or(oid_hint);
        if oid < 0 {
            return Err(MonitoringError::MissingOid);
        }

        let capacity = Capacity {
            free_cpu: template.get_int("FREE_CPU").unwrap_or(0),
            used_cpu: template.get_int("USED_CPU").unwrap_or(0),
            free_memory: template.get_int("FREE_MEMORY").unwrap_or(0),
            used_memory: template.get_int("USED_MEMORY").unwrap_or(0),
        };

        let datastores = template
            .vectors("DS")
            .map(|entries| {
                let mut ds = DatastoreShare { id: -1, attributes: Vec::new() };
                for (key, value) in entries {
                    if key == "ID" {
                        ds.id = value.trim().parse().unwrap_or(-1);
                    } else {
                        ds.attributes.push((key.clone(), value.clone()));
                    }
                }
                ds
            })
            .collect();

        Ok(Self { oid, timestamp, capacity, datastores, system: None })
    }

    /// A zero-capacity document, written for offline hosts on each sweep.
    pub fn zero(oid: i32, timestamp: u64) -> Self {
        Self { oid, timestamp, ..Self::default() }
    }

    pub fn with_system(mut self, system: Option<String>) -> Self {
        self.system = system;
        self
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(256);

        out.push_str("<MONITORING>");
        write_tag(&mut out, "TIMESTAMP", self.timestamp);
        write_tag(&mut out, "ID", self.oid);

        out.push_str("<CAPACITY>");
        write_tag(&mut out, "FREE_CPU", self.capacity.free_cpu);
        write_tag(&mut out, "USED_CPU", self.capacity.used_cpu);
        write_tag(&mut out, "FREE_MEMORY", self.capacity.free_memory);
        write_tag(&mut out, "USED_MEMORY", self.capacity.used_memory);
        out.push_str("</CAPACITY>");

        out.push_str("<DATASTORES>");
        for ds in &self.datastores {
            ds.write_xml(&mut out);
        }
        out.push_str("</DATASTORES>");

        match &self.system {
            Some(fragment) => out.push_str(fragment),
            None => out.push_str("<SYSTEM></SYSTEM>"),
        }

        out.push_str("</MONITORING>");

        out
    }
}

#[cfg(test)]
#[path = "monitoring_tests.rs"]
mod tests;
