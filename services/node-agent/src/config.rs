//! Configuration for the node agent.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use mk8s_api::parse_labels;

/// Node agent configuration.
///
/// Read once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct Config {
    /// Control plane API base URL.
    pub api_server_url: String,

    /// Hostname reported at registration.
    pub node_hostname: String,

    /// IP address reported at registration.
    pub node_ip: String,

    /// Labels attached to the node at registration.
    pub node_labels: BTreeMap<String, String>,

    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,

    /// Event feed poll interval when the feed is idle.
    pub event_poll_interval: Duration,

    /// Max events fetched per poll.
    pub event_batch_limit: i64,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let api_server_url = std::env::var("MK8S_API_SERVER_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());

        let node_hostname = std::env::var("MK8S_NODE_HOSTNAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "localhost".to_string());

        let node_ip = std::env::var("MK8S_NODE_IP").unwrap_or_else(|_| "127.0.0.1".to_string());

        let node_labels = parse_labels(&std::env::var("MK8S_NODE_LABELS").unwrap_or_default())
            .context("MK8S_NODE_LABELS must be a comma-separated key=value list.")?;

        let heartbeat_interval_secs: u64 = std::env::var("MK8S_HEARTBEAT_INTERVAL")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("MK8S_HEARTBEAT_INTERVAL must be an integer (seconds).")?
            .unwrap_or(10)
            .max(1);

        let poll_interval_ms: u64 = std::env::var("MK8S_EVENT_POLL_INTERVAL_MS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("MK8S_EVENT_POLL_INTERVAL_MS must be an integer (milliseconds).")?
            .unwrap_or(1000);
        let event_poll_interval = Duration::from_millis(poll_interval_ms.max(50));

        let event_batch_limit: i64 = std::env::var("MK8S_EVENT_BATCH_LIMIT")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("MK8S_EVENT_BATCH_LIMIT must be an integer.")?
            .unwrap_or(100)
            .clamp(1, 500);

        let log_level = std::env::var("MK8S_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            api_server_url,
            node_hostname,
            node_ip,
            node_labels,
            heartbeat_interval_secs,
            event_poll_interval,
            event_batch_limit,
            log_level,
        })
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}
