//! Control plane API client for the proxy agent.
//!
//! Every call fetches the full desired state; there are no incremental reads.

use std::time::Duration;

use anyhow::{Context, Result};
use mk8s_api::{paths, DnsRecord, Endpoint, Service};
use mk8s_reconcile::SyncError;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::config::Config;

/// Control plane API client.
pub struct ControlPlaneClient {
    client: reqwest::Client,
    base_url: String,
}

impl ControlPlaneClient {
    /// Create a new control plane client.
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("mk8s-proxy-agent/0.1.0")
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.api_server_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch every service.
    pub async fn fetch_services(&self) -> Result<Vec<Service>, SyncError> {
        self.get_list("GET /services", paths::SERVICES).await
    }

    /// Fetch every endpoint.
    pub async fn fetch_endpoints(&self) -> Result<Vec<Endpoint>, SyncError> {
        self.get_list("GET /endpoints", paths::ENDPOINTS).await
    }

    /// Fetch every DNS record.
    pub async fn fetch_dns(&self) -> Result<Vec<DnsRecord>, SyncError> {
        self.get_list("GET /dns", paths::DNS).await
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        call: &str,
        path: &str,
    ) -> Result<Vec<T>, SyncError> {
        let url = format!("{}{}{}", self.base_url, paths::API_PREFIX, path);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SyncError::transport(call, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(call, status = %status, body = %body, "Control plane request failed");
            return Err(SyncError::status(call, status.as_u16(), body));
        }

        let items: Vec<T> = response
            .json()
            .await
            .map_err(|e| SyncError::transport(call, e))?;
        debug!(call, count = items.len(), "Fetched desired state");
        Ok(items)
    }
}
