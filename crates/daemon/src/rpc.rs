// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! XML-RPC client for the orchestrator.
//!
//! Only one method matters to the monitor: `one.hostpool.info`, used to
//! prime the host table. The trait seam lets tests substitute an in-memory
//! orchestrator.

use std::time::Duration;

use async_trait::async_trait;
use hm_core::{ErrorKind, OrchestratorConfig, XmlNode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed RPC envelope: {0}")]
    Envelope(String),

    #[error("orchestrator fault: {0}")]
    Fault(String),

    #[error("response exceeds the configured message size cap")]
    TooLarge,

    #[error("no response from orchestrator")]
    NoResponse,
}

impl RpcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::Http(_) | RpcError::NoResponse | RpcError::Fault(_) => ErrorKind::Transient,
            RpcError::Envelope(_) | RpcError::TooLarge => ErrorKind::Protocol,
        }
    }
}

/// Capability the host pool needs from the orchestrator.
#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    /// Fetch the serialized host pool (`<HOST_POOL>…</HOST_POOL>`).
    async fn host_pool_info(&self) -> Result<String, RpcError>;
}

pub struct XmlRpcClient {
    http: reqwest::Client,
    endpoint: String,
    message_size: u64,
}

impl XmlRpcClient {
    pub fn new(config: &OrchestratorConfig) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            message_size: config.message_size,
        })
    }

    async fn call(&self, method: &str, session: &str) -> Result<String, RpcError> {
        let request = build_request(method, session);

        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(request)
            .send()
            .await?
            .error_for_status()?;

        if let Some(len) = response.content_length() {
            if len > self.message_size {
                return Err(RpcError::TooLarge);
            }
        }

        let body = response.bytes().await?;
        if body.len() as u64 > self.message_size {
            return Err(RpcError::TooLarge);
        }

        parse_response(&String::from_utf8_lossy(&body))
    }
}

#[async_trait]
impl OrchestratorClient for XmlRpcClient {
    async fn host_pool_info(&self) -> Result<String, RpcError> {
        self.call("one.hostpool.info", "").await
    }
}

fn build_request(method: &str, session: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?>\
         <methodCall>\
         <methodName>{method}</methodName>\
         <params><param><value><string>{}</string></value></param></params>\
         </methodCall>",
        hm_core::xml::escape(session)
    )
}

/// Unwrap the orchestrator's `[success, body, errcode]` result array.
fn parse_response(body: &str) -> Result<String, RpcError> {
    let root =
        XmlNode::parse(body).map_err(|e| RpcError::Envelope(format!("invalid XML: {e}")))?;

    if root.name != "methodResponse" {
        return Err(RpcError::Envelope(format!("unexpected root <{}>", root.name)));
    }

    if let Some(fault) = root.find("fault") {
        let message = fault
            .find("value/struct")
            .and_then(|s| {
                s.children_named("member")
                    .find(|m| m.text_at("name") == Some("faultString"))
                    .and_then(|m| m.text_at("value/string").or_else(|| m.text_at("value")))
            })
            .unwrap_or("unspecified fault");
        return Err(RpcError::Fault(message.to_string()));
    }

    let data = root
        .find("params/param/value/array/data")
        .ok_or_else(|| RpcError::Envelope("missing result array".to_string()))?;

    let mut values = data.children_named("value");

    let success = values
        .next()
        .ok_or_else(|| RpcError::Envelope("empty result array".to_string()))?;
    let success = success
        .text_at("boolean")
        .or(Some(success.text.as_str()))
        .map(|v| v.trim() == "1")
        .unwrap_or(false);

    let payload = values
        .next()
        .map(|v| v.text_at("string").unwrap_or(v.text.as_str()).to_string())
        .unwrap_or_default();

    if !success {
        return Err(RpcError::Fault(payload));
    }

    Ok(payload)
}

#[cfg(test)]
#[path = "rpc_tests.rs"]
mod tests;
