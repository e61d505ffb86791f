// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Probe payload template grammar.
//!
//! Probe drivers report measurements as attribute templates:
//!
//! ```text
//! RESULT=SUCCESS
//! OID=7
//! FREE_CPU=350
//! DS=[ ID=100, FREE_MB=5000 ]
//! ```
//!
//! Single attributes are `KEY = VALUE` (value optionally double-quoted);
//! vector attributes are `KEY = [ A = 1, B = "x" ]` and may span lines.
//! `#` starts a comment. Keys are upper-cased on parse.

use thiserror::Error;

use crate::xml::write_tag;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("attribute without a key near '{0}'")]
    MissingKey(String),

    #[error("unterminated vector attribute '{0}'")]
    UnterminatedVector(String),

    #[error("malformed vector entry '{0}'")]
    BadVectorEntry(String),
}

/// Parsed attribute template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    singles: Vec<(String, String)>,
    vectors: Vec<(String, Vec<(String, String)>)>,
}

impl Template {
    /// First value of a single attribute.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.singles.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Parsed integer value of a single attribute.
    pub fn get_int<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// All vector attributes under `key`, in document order.
    pub fn vectors<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a [(String, String)]> + 'a {
        self.vectors.iter().filter(move |(k, _)| k == key).map(|(_, v)| v.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.singles.is_empty() && self.vectors.is_empty()
    }

    /// Serialize as an XML fragment under `root`.
    ///
    /// Vector attributes become nested elements; single attributes become
    /// leaf tags.
    pub fn to_xml(&self, root: &str) -> String {
        let mut out = String::new();
        out.push('<');
        out.push_str(root);
        out.push('>');
        for (key, value) in &self.singles {
            write_tag(&mut out, key, value);
        }
        for (key, entries) in &self.vectors {
            out.push('<');
            out.push_str(key);
            out.push('>');
            for (k, v) in entries {
                write_tag(&mut out, k, v);
            }
            out.push_str("</");
            out.push_str(key);
            out.push('>');
        }
        out.push_str("</");
        out.push_str(root);
        out.push('>');
        out
    }
}

/// Parser seam for probe payloads. The daemon takes this as an injected
/// dependency so tests can substitute canned templates.
pub trait TemplateParser: Send + Sync {
    fn parse(&self, text: &str) -> Result<Template, TemplateError>;
}

/// Production parser for the `KEY=VALUE` grammar above.
#[derive(Debug, Clone, Copy, Default)]
pub struct KvTemplateParser;

impl TemplateParser for KvTemplateParser {
    fn parse(&self, text: &str) -> Result<Template, TemplateError> {
        let mut template = Template::default();
        let mut rest = text;

        while let Some((line, remainder)) = next_statement(rest)? {
            rest = remainder;

            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| TemplateError::MissingKey(snippet(line)))?;
            let key = key.trim().to_ascii_uppercase();
            if key.is_empty() {
                return Err(TemplateError::MissingKey(snippet(line)));
            }
            let value = value.trim();

            if let Some(body) = value.strip_prefix('[') {
                let body = body
                    .strip_suffix(']')
                    .ok_or_else(|| TemplateError::UnterminatedVector(key.clone()))?;
                template.vectors.push((key, parse_vector_body(body)?));
            } else {
                template.singles.push((key, unquote(value).to_string()));
            }
        }

        Ok(template)
    }
}

/// Split off the next statement. A vector attribute whose `[` body has not
/// closed yet consumes following lines until the `]`.
fn next_statement(text: &str) -> Result<Option<(&str, &str)>, TemplateError> {
    if text.is_empty() {
        return Ok(None);
    }

    let mut in_vector = false;
    let mut in_quotes = false;

    for (idx, ch) in text.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '[' if !in_quotes => in_vector = true,
            ']' if !in_quotes => in_vector = false,
            '\n' if !in_vector && !in_quotes => {
                return Ok(Some((&text[..idx], &text[idx + 1..])));
            }
            _ => {}
        }
    }

    if in_vector {
        return Err(TemplateError::UnterminatedVector(snippet(text)));
    }

    Ok(Some((text, "")))
}

fn parse_vector_body(body: &str) -> Result<Vec<(String, String)>, TemplateError> {
    let mut entries = Vec::new();

    for entry in split_vector_entries(body) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| TemplateError::BadVectorEntry(snippet(entry)))?;
        let key = key.trim().to_ascii_uppercase();
        if key.is_empty() {
            return Err(TemplateError::BadVectorEntry(snippet(entry)));
        }

        entries.push((key, unquote(value.trim()).to_string()));
    }

    Ok(entries)
}

/// Split on commas that are outside double quotes.
fn split_vector_entries(body: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;

    for (idx, ch) in body.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                entries.push(&body[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    entries.push(&body[start..]);

    entries
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn snippet(text: &str) -> String {
    text.chars().take(40).collect()
}

#[cfg(test)]
#[path = "template_tests.rs"]
mod tests;
