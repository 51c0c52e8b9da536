//! Container runtime interface and mock implementation.
//!
//! The runtime interface abstracts pod sandbox operations:
//! - Starting and stopping all containers of a pod
//! - Inspecting a pod that may have survived an agent restart
//!
//! A mock implementation is provided for testing and development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use mk8s_api::{ContainerState, ContainerStatus, Pod, PodPhase, PodStatus};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Container runtime interface.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start every container of the pod. Returns the observed status.
    async fn start_pod(&self, pod: &Pod) -> Result<PodStatus>;

    /// Stop every container of the pod.
    async fn stop_pod(&self, pod_key: &str) -> Result<()>;

    /// Look up a pod the runtime is already running.
    ///
    /// Returns `None` if the runtime does not know the pod.
    async fn inspect_pod(&self, pod_key: &str) -> Result<Option<PodStatus>>;
}

/// Mock runtime for testing and development.
pub struct MockRuntime {
    /// Counter for generating pod IPs.
    ip_counter: AtomicU64,

    /// Whether pods should "fail" to start.
    fail_starts: bool,

    /// Pods currently "running", by pod key.
    running: Mutex<HashMap<String, PodStatus>>,
}

impl MockRuntime {
    /// Create a new mock runtime.
    pub fn new() -> Self {
        Self {
            ip_counter: AtomicU64::new(0),
            fail_starts: false,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Create a mock runtime that fails all starts.
    pub fn failing() -> Self {
        Self {
            fail_starts: true,
            ..Self::new()
        }
    }

    /// Pretend a pod survived from a previous agent process.
    pub async fn adopt(&self, pod_key: &str, status: PodStatus) {
        self.running.lock().await.insert(pod_key.to_string(), status);
    }

    /// Number of pods the mock considers running.
    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }

    fn next_pod_ip(&self) -> String {
        let n = self.ip_counter.fetch_add(1, Ordering::SeqCst);
        format!("10.244.{}.{}", (n / 254) % 256, n % 254 + 1)
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn start_pod(&self, pod: &Pod) -> Result<PodStatus> {
        let pod_key = pod.key();
        if self.fail_starts {
            anyhow::bail!("Mock runtime configured to fail");
        }

        info!(
            pod_key = %pod_key,
            containers = pod.spec.containers.len(),
            "[MOCK] Starting pod"
        );

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let started = chrono::Utc::now().to_rfc3339();
        let status = PodStatus {
            phase: PodPhase::Running,
            pod_ip: self.next_pod_ip(),
            container_statuses: pod
                .spec
                .containers
                .iter()
                .map(|c| ContainerStatus {
                    name: c.name.clone(),
                    state: ContainerState::Running,
                    ready: true,
                    started: started.clone(),
                    finished: String::new(),
                })
                .collect(),
            ..PodStatus::default()
        };

        self.running.lock().await.insert(pod_key.clone(), status.clone());
        debug!(pod_key = %pod_key, pod_ip = %status.pod_ip, "[MOCK] Pod started");

        Ok(status)
    }

    async fn stop_pod(&self, pod_key: &str) -> Result<()> {
        info!(pod_key = %pod_key, "[MOCK] Stopping pod");

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        self.running.lock().await.remove(pod_key);

        debug!(pod_key = %pod_key, "[MOCK] Pod stopped");
        Ok(())
    }

    async fn inspect_pod(&self, pod_key: &str) -> Result<Option<PodStatus>> {
        debug!(pod_key = %pod_key, "[MOCK] Inspecting pod");
        Ok(self.running.lock().await.get(pod_key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mk8s_api::{Container, PodMetadata, PodSpec};

    fn test_pod() -> Pod {
        Pod {
            metadata: PodMetadata {
                id: "pod-1".to_string(),
                name: "web".to_string(),
                ..PodMetadata::default()
            },
            spec: PodSpec {
                node_name: "n1".to_string(),
                containers: vec![Container {
                    name: "nginx".to_string(),
                    image: "nginx:1.25".to_string(),
                    ..Container::default()
                }],
                ..PodSpec::default()
            },
            ..Pod::default()
        }
    }

    #[tokio::test]
    async fn test_mock_runtime_start() {
        let runtime = MockRuntime::new();

        let status = runtime.start_pod(&test_pod()).await.unwrap();
        assert_eq!(status.phase, PodPhase::Running);
        assert_eq!(status.pod_ip, "10.244.0.1");
        assert_eq!(status.container_statuses.len(), 1);
        assert!(status.container_statuses[0].ready);
    }

    #[tokio::test]
    async fn test_mock_runtime_stop() {
        let runtime = MockRuntime::new();

        runtime.start_pod(&test_pod()).await.unwrap();
        assert_eq!(runtime.running_count().await, 1);

        runtime.stop_pod("pod-1").await.unwrap();
        assert_eq!(runtime.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_mock_runtime_inspect() {
        let runtime = MockRuntime::new();
        assert!(runtime.inspect_pod("pod-1").await.unwrap().is_none());

        runtime.start_pod(&test_pod()).await.unwrap();
        let status = runtime.inspect_pod("pod-1").await.unwrap().unwrap();
        assert_eq!(status.phase, PodPhase::Running);
    }

    #[tokio::test]
    async fn test_mock_runtime_failing() {
        let runtime = MockRuntime::failing();

        let result = runtime.start_pod(&test_pod()).await;
        assert!(result.is_err());
        assert_eq!(runtime.running_count().await, 0);
    }
}
