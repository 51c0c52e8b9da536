//! Pod objects.
//!
//! Pods are consumed, never owned, by the node agent: the control plane decides
//! which node runs a pod and the agent converges local containers toward it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// Spec
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Compute quantities: CPU in millicores, memory in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceList {
    #[serde(default)]
    pub cpu: i64,
    #[serde(default)]
    pub memory: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// Maximum amount of compute resources allowed.
    #[serde(default)]
    pub limits: ResourceList,
    /// Minimum amount of compute resources required.
    #[serde(default)]
    pub requests: ResourceList,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Transport protocol of a port.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    /// Lowercase name as understood by iptables (`-p tcp`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A network port in a single container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host_port: u16,
    pub container_port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default, rename = "hostIP")]
    pub host_ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: String,
    #[serde(default)]
    pub ports: Vec<ContainerPort>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    #[default]
    Always,
    OnFailure,
    Never,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// Node the scheduler bound this pod to. Empty while unscheduled.
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

// =============================================================================
// Status
// =============================================================================

/// Lifecycle phase of a pod.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    /// Accepted, but one or more containers have not started.
    #[default]
    Pending,
    /// Bound to a node and all containers started.
    Running,
    /// All containers exited with code 0 and will not restart.
    Succeeded,
    /// All containers terminated and at least one failed.
    Failed,
    /// State could not be obtained from the node.
    ///
    /// Reserved for communication failure; agents never set it locally.
    Unknown,
}

impl PodPhase {
    /// Returns true for phases a pod never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    Running,
    Terminated,
    #[default]
    Waiting,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    #[serde(default)]
    pub state: ContainerState,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub started: String,
    #[serde(default)]
    pub finished: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub phase: PodPhase,
    #[serde(default, rename = "podIP")]
    pub pod_ip: String,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub memory_usage: f64,
}

// =============================================================================
// Pod
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    #[serde(default)]
    pub metadata: PodMetadata,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

impl Pod {
    /// Stable key of this pod: the control-plane id, or `namespace/name` for
    /// pods that have not been assigned one.
    pub fn key(&self) -> String {
        if !self.metadata.id.is_empty() {
            return self.metadata.id.clone();
        }
        let namespace = if self.metadata.namespace.is_empty() {
            "default"
        } else {
            &self.metadata.namespace
        };
        format!("{}/{}", namespace, self.metadata.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_status_wire_names() {
        let status = PodStatus {
            phase: PodPhase::Running,
            pod_ip: "10.244.1.7".to_string(),
            ..PodStatus::default()
        };

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"phase\":\"Running\""));
        assert!(json.contains("\"podIP\":\"10.244.1.7\""));
        assert!(json.contains("\"containerStatuses\":[]"));
    }

    #[test]
    fn test_pod_deserialization() {
        let json = r#"{
            "metadata": {"id": "pod-1", "name": "web", "namespace": "prod"},
            "spec": {
                "nodeName": "n1",
                "containers": [{
                    "name": "nginx",
                    "image": "nginx:1.25",
                    "ports": [{"containerPort": 80, "protocol": "TCP"}],
                    "resources": {"limits": {"cpu": 500, "memory": 134217728}}
                }]
            },
            "status": {"phase": "Pending"}
        }"#;

        let pod: Pod = serde_json::from_str(json).unwrap();
        assert_eq!(pod.key(), "pod-1");
        assert_eq!(pod.spec.node_name, "n1");
        assert_eq!(pod.spec.containers[0].ports[0].container_port, 80);
        assert_eq!(pod.spec.containers[0].ports[0].protocol, Protocol::Tcp);
        assert_eq!(pod.spec.containers[0].resources.limits.cpu, 500);
        assert_eq!(pod.spec.restart_policy, RestartPolicy::Always);
        assert_eq!(pod.status.phase, PodPhase::Pending);
    }

    #[test]
    fn test_pod_key_without_id() {
        let pod = Pod {
            metadata: PodMetadata {
                name: "web".to_string(),
                ..PodMetadata::default()
            },
            ..Pod::default()
        };
        assert_eq!(pod.key(), "default/web");
    }

    #[test]
    fn test_terminal_phases() {
        assert!(PodPhase::Succeeded.is_terminal());
        assert!(PodPhase::Failed.is_terminal());
        assert!(!PodPhase::Running.is_terminal());
        assert!(!PodPhase::Unknown.is_terminal());
    }
}
