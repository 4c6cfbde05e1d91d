//! Controller REST API client.
//!
//! The home-automation controller is an external collaborator reached over
//! HTTP; the gateway only needs one narrow call shape. A failed or hung
//! request logs an error and resolves to "no answer" — the dispatcher skips
//! the dependent action and the device retries on its own schedule, which is
//! protocol-conformant for this device family.

use crate::config::ControllerConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

/// HTTP verb subset used by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
}

/// The gateway-side view of the controller REST API.
#[async_trait]
pub trait Controller: Send + Sync {
    /// One round trip. `None` means "no answer": transport failure,
    /// non-success status, unparsable body or guard timeout.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Option<serde_json::Value>;
}

/// reqwest-backed controller client.
pub struct RestController {
    base_url: String,
    client: reqwest::Client,
}

impl RestController {
    /// A client without the guard timeout would hang dispatch on a stuck
    /// controller, so a builder failure is propagated rather than worked
    /// around.
    pub fn new(config: &ControllerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("building controller HTTP client")?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Controller for RestController {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Option<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = match method {
            Method::Get => self.client.get(&url),
            Method::Put => self.client.put(&url),
            Method::Post => self.client.post(&url),
        };
        if let Some(ref body) = body {
            req = req.json(body);
        }
        let res = match req.send().await {
            Ok(res) => res,
            Err(e) => {
                log::error!("controller request {} failed: {}", url, e);
                return None;
            }
        };
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            log::error!("controller request {} failed: {} {}", url, status, body);
            return None;
        }
        match res.json::<serde_json::Value>().await {
            Ok(v) => Some(v),
            Err(e) => {
                log::error!("controller request {}: unparsable answer: {}", url, e);
                None
            }
        }
    }
}
