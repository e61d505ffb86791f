// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host capacity snapshot.

use crate::xml::{write_tag, XmlNode};

/// One attached datastore. Beyond `ID`, the attributes are opaque to the
/// monitor and carried through verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatastoreShare {
    pub id: i32,
    pub attributes: Vec<(String, String)>,
}

impl DatastoreShare {
    pub fn from_xml_node(node: &XmlNode) -> Self {
        let mut ds = DatastoreShare { id: -1, attributes: Vec::new() };
        for child in &node.children {
            if child.name == "ID" {
                ds.id = child.text.trim().parse().unwrap_or(-1);
            } else {
                ds.attributes.push((child.name.clone(), child.text.clone()));
            }
        }
        ds
    }

    pub fn write_xml(&self, out: &mut String) {
        out.push_str("<DS>");
        write_tag(out, "ID", self.id);
        for (key, value) in &self.attributes {
            write_tag(out, key, value);
        }
        out.push_str("</DS>");
    }
}

/// Free/total/used CPU and memory plus the reserved-capacity expressions.
///
/// The reserved fields are expression strings (`"10%"`, absolute values);
/// their grammar is the orchestrator's business.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostShare {
    pub total_cpu: i64,
    pub used_cpu: i64,
    pub free_cpu: i64,
    pub total_mem: i64,
    pub used_mem: i64,
    pub free_mem: i64,
    pub reserved_cpu: String,
    pub reserved_mem: String,
    pub datastores: Vec<DatastoreShare>,
}

impl HostShare {
    pub fn from_xml_node(node: &XmlNode) -> Self {
        let datastores = node
            .find("DATASTORES")
            .map(|ds| ds.children_named("DS").map(DatastoreShare::from_xml_node).collect())
            .unwrap_or_default();

        HostShare {
            total_cpu: node.int_at("TOTAL_CPU", 0),
            used_cpu: node.int_at("USED_CPU", 0),
            free_cpu: node.int_at("FREE_CPU", 0),
            total_mem: node.int_at("TOTAL_MEM", 0),
            used_mem: node.int_at("USED_MEM", 0),
            free_mem: node.int_at("FREE_MEM", 0),
            reserved_cpu: node.text_at("RESERVED_CPU").unwrap_or_default().to_string(),
            reserved_mem: node.text_at("RESERVED_MEM").unwrap_or_default().to_string(),
            datastores,
        }
    }

    pub fn write_xml(&self, out: &mut String) {
        out.push_str("<HOST_SHARE>");
        write_tag(out, "TOTAL_CPU", self.total_cpu);
        write_tag(out, "USED_CPU", self.used_cpu);
        write_tag(out, "FREE_CPU", self.free_cpu);
        write_tag(out, "TOTAL_MEM", self.total_mem);
        write_tag(out, "USED_MEM", self.used_mem);
        write_tag(out, "FREE_MEM", self.free_mem);
        write_tag(out, "RESERVED_CPU", &self.reserved_cpu);
        write_tag(out, "RESERVED_MEM", &self.reserved_mem);
        out.push_str("<DATASTORES>");
        for ds in &self.datastores {
            ds.write_xml(out);
        }
        out.push_str("</DATASTORES>");
        out.push_str("</HOST_SHARE>");
    }

    /// Zero the capacity snapshot. Applied when a host goes offline.
    pub fn zero(&mut self) {
        *self = HostShare {
            reserved_cpu: std::mem::take(&mut self.reserved_cpu),
            reserved_mem: std::mem::take(&mut self.reserved_mem),
            ..HostShare::default()
        };
    }
}
