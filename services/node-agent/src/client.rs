//! Control plane API client for the node agent.
//!
//! Provides methods for communicating with the control plane:
//! - Registering this node
//! - Fetching the full pod set for fault-tolerance recovery
//! - Polling this node's event feed
//! - Sending heartbeats

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use mk8s_api::{paths, EventBatch, Node, NodeStatus, Pod};
use mk8s_reconcile::SyncError;
use serde::de::DeserializeOwned;
use serde::Serialize;
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
            .user_agent("mk8s-node-agent/0.1.0")
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.api_server_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, paths::API_PREFIX, path)
    }

    /// Register a draft node. Returns the node as recorded by the control plane.
    ///
    /// A response without an identity is rejected even on a success status.
    pub async fn register_node(&self, draft: &Node) -> Result<Node, SyncError> {
        let call = "POST /nodes";
        let url = self.url(paths::NODES);
        debug!(url = %url, hostname = %draft.status.hostname, "Registering node");

        let response = self
            .client
            .post(&url)
            .json(draft)
            .send()
            .await
            .map_err(|e| SyncError::transport(call, e))?;

        let node: Node = decode(call, response).await?;
        node.validate_registered()
            .map_err(|e| SyncError::Validation(e.to_string()))?;

        Ok(node)
    }

    /// Fetch every pod known to the control plane, keyed by pod id.
    pub async fn fetch_all_pods(&self) -> Result<BTreeMap<String, Pod>, SyncError> {
        let call = "GET /pods";
        let url = self.url(paths::PODS);

        let response = self
            .client
            .get(&url)
            .query(&[("all", "true")])
            .send()
            .await
            .map_err(|e| SyncError::transport(call, e))?;

        let pods: BTreeMap<String, Pod> = decode(call, response).await?;
        debug!(pod_count = pods.len(), "Fetched cluster pod set");
        Ok(pods)
    }

    /// Fetch the next page of this node's event feed.
    pub async fn fetch_events(
        &self,
        node_key: &str,
        after_seq: i64,
        limit: i64,
    ) -> Result<EventBatch, SyncError> {
        let call = "GET /nodes/{key}/events";
        let url = self.url(&paths::node_events(node_key));

        let response = self
            .client
            .get(&url)
            .query(&[("afterSeq", after_seq), ("limit", limit)])
            .send()
            .await
            .map_err(|e| SyncError::transport(call, e))?;

        decode(call, response).await
    }

    /// Send heartbeat with current node status and locally owned pods.
    pub async fn send_heartbeat(
        &self,
        node_id: &str,
        request: &HeartbeatRequest,
    ) -> Result<(), SyncError> {
        let call = "POST /nodes/{id}/heartbeat";
        let url = self.url(&paths::node_heartbeat(node_id));

        let response = self
            .client
            .post(&url)
            .json(request)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| SyncError::transport(call, e))?;

        ensure_success(call, response).await?;
        Ok(())
    }
}

async fn ensure_success(
    call: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, SyncError> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!(call, status = %status, body = %body, "Control plane request failed");
        return Err(SyncError::status(call, status.as_u16(), body));
    }
    Ok(response)
}

async fn decode<T: DeserializeOwned>(call: &str, response: reqwest::Response) -> Result<T, SyncError> {
    let response = ensure_success(call, response).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| SyncError::transport(call, e))
}

/// Heartbeat request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    /// Node status as overlaid this firing.
    pub node_status: NodeStatus,

    /// Pods owned by this node with their latest observed status.
    pub pods: Vec<Pod>,
}
