// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minimal XML document tree.
//!
//! The documents this daemon handles (host records, pool listings, RPC
//! envelopes) are small element-and-text trees; attributes and namespaces
//! are never used. This walks `quick-xml` events into a plain tree that
//! the model types query by slash-separated paths.

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("invalid XML: {0}")]
    Parse(#[from] quick_xml::Error),

    #[error("unbalanced XML document")]
    Unbalanced,

    #[error("document has no root element")]
    NoRoot,
}

/// One element: its name, accumulated text, and child elements in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// Parse a document and return its root element.
    pub fn parse(input: &str) -> Result<Self, XmlError> {
        let mut reader = Reader::from_str(input);
        reader.trim_text(true);

        // Synthetic root collects the document's top-level element(s).
        let mut stack: Vec<XmlNode> = vec![XmlNode::default()];

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                    stack.push(XmlNode { name, ..XmlNode::default() });
                }
                Event::Empty(start) => {
                    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(XmlNode { name, ..XmlNode::default() });
                    }
                }
                Event::Text(text) => {
                    let text = text.unescape()?;
                    if let Some(node) = stack.last_mut() {
                        node.text.push_str(&text);
                    }
                }
                Event::CData(cdata) => {
                    let bytes = cdata.into_inner();
                    if let Some(node) = stack.last_mut() {
                        node.text.push_str(&String::from_utf8_lossy(&bytes));
                    }
                }
                Event::End(_) => {
                    let node = stack.pop().ok_or(XmlError::Unbalanced)?;
                    let parent = stack.last_mut().ok_or(XmlError::Unbalanced)?;
                    parent.children.push(node);
                }
                Event::Eof => break,
                // Declarations, comments, processing instructions
                _ => {}
            }
        }

        if stack.len() != 1 {
            return Err(XmlError::Unbalanced);
        }

        let mut synthetic = stack.remove(0);
        if synthetic.children.len() == 1 {
            Ok(synthetic.children.remove(0))
        } else if synthetic.children.is_empty() {
            Err(XmlError::NoRoot)
        } else {
            // Fragment with several top-level elements; keep them under the
            // synthetic root so callers can iterate.
            Ok(synthetic)
        }
    }

    /// First child with the given name.
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children with the given name, in document order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Descend a `A/B/C` path from this node.
    pub fn find(&self, path: &str) -> Option<&XmlNode> {
        let mut node = self;
        for part in path.split('/') {
            node = node.child(part)?;
        }
        Some(node)
    }

    /// Text at a path, if present and non-empty.
    pub fn text_at(&self, path: &str) -> Option<&str> {
        self.find(path).map(|n| n.text.as_str()).filter(|t| !t.is_empty())
    }

    /// Parsed integer at a path, or the default when absent or unparseable.
    pub fn int_at<T: std::str::FromStr>(&self, path: &str, default: T) -> T {
        self.text_at(path).and_then(|t| t.trim().parse().ok()).unwrap_or(default)
    }
}

/// Escape text for embedding in an XML document.
pub fn escape(text: &str) -> String {
    quick_xml::escape::escape(text).into_owned()
}

/// Append `<TAG>escaped text</TAG>` to an output buffer.
pub fn write_tag(out: &mut String, tag: &str, value: impl std::fmt::Display) {
    out.push('<');
    out.push_str(tag);
    out.push('>');
    out.push_str(&escape(&value.to_string()));
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

#[cfg(test)]
#[path = "xml_tests.rs"]
mod tests;
