//! Node objects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::pod::Pod;

// =============================================================================
// Conditions
// =============================================================================

/// Node condition strings reported in `NodeStatus::condition`.
pub mod conditions {
    pub const READY: &str = "Ready";
    pub const NOT_READY: &str = "NotReady";
    pub const UNKNOWN: &str = "Unknown";
}

// =============================================================================
// Node
// =============================================================================

/// Identity of a worker node.
///
/// `id` and `name` are assigned by the control plane at registration and never
/// change afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Observed state of a worker node, refreshed every heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub condition: Vec<String>,
    #[serde(default)]
    pub num_pods: usize,
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub memory_usage: f64,
}

/// A worker node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    #[serde(default)]
    pub metadata: NodeMetadata,
    #[serde(default)]
    pub status: NodeStatus,
}

impl Node {
    /// Build the draft node sent at registration.
    ///
    /// The draft carries no identity; the control plane assigns one.
    pub fn draft(hostname: &str, ip: &str, labels: BTreeMap<String, String>) -> Self {
        Self {
            metadata: NodeMetadata {
                id: String::new(),
                name: String::new(),
                labels,
            },
            status: NodeStatus {
                hostname: hostname.to_string(),
                ip: ip.to_string(),
                condition: vec![conditions::READY.to_string()],
                ..NodeStatus::default()
            },
        }
    }

    /// The key the control plane addresses this node by.
    ///
    /// The assigned name when present, the id otherwise.
    pub fn identity(&self) -> &str {
        if self.metadata.name.is_empty() {
            &self.metadata.id
        } else {
            &self.metadata.name
        }
    }

    /// Check that a registration response actually carries an identity.
    pub fn validate_registered(&self) -> Result<(), ApiError> {
        if self.metadata.id.trim().is_empty() {
            return Err(ApiError::MissingIdentity);
        }
        Ok(())
    }

    /// Returns true if the pod is assigned to this node.
    pub fn owns(&self, pod: &Pod) -> bool {
        let assigned = pod.spec.node_name.as_str();
        if assigned.is_empty() {
            return false;
        }
        assigned == self.metadata.id
            || (!self.metadata.name.is_empty() && assigned == self.metadata.name)
    }
}

// =============================================================================
// Labels
// =============================================================================

/// Parse a comma-separated `key=value` list into labels.
///
/// Whitespace around entries is ignored, as are empty entries.
pub fn parse_labels(raw: &str) -> Result<BTreeMap<String, String>, ApiError> {
    let mut labels = BTreeMap::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((key, value)) = entry.split_once('=') else {
            return Err(ApiError::InvalidLabel {
                entry: entry.to_string(),
            });
        };

        let key = key.trim();
        if key.is_empty() {
            return Err(ApiError::EmptyLabelKey);
        }

        labels.insert(key.to_string(), value.trim().to_string());
    }

    Ok(labels)
}
