//! Pod lifecycle manager.
//!
//! The pod manager:
//! - Runs one worker task per pod, fed by an ordered mailbox, so every task
//!   for the same pod executes in delivery order
//! - Restarts a pod only when its spec hash changes
//! - Reattaches to pods that survived an agent restart
//! - Tracks the latest observed status of every local pod

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mk8s_api::{Pod, PodPhase};
use mk8s_reconcile::{SpecHash, SyncError};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::runtime::ContainerRuntime;

/// Sender half used to report that a lifecycle call has finished.
pub type CompletionSender = mpsc::UnboundedSender<PodCompletion>;

/// Lifecycle operation a completion refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodOp {
    Add,
    Update,
    Remove,
}

/// Outcome of a lifecycle call that was given a completion sender.
#[derive(Debug, Clone, PartialEq)]
pub struct PodCompletion {
    pub pod_key: String,
    pub op: PodOp,
    pub outcome: Result<(), String>,
}

/// Pod lifecycle contract driven by the node agent.
///
/// Add, update and remove return once the work is queued. Work for the same
/// pod runs in the order it was queued.
#[async_trait]
pub trait PodLifecycle: Send + Sync {
    async fn add_pod(&self, pod: Pod, done: Option<CompletionSender>);

    async fn update_pod(&self, pod: Pod, done: Option<CompletionSender>);

    async fn remove_pod(&self, pod: Pod, done: Option<CompletionSender>);

    /// Post-removal bookkeeping for a completed `remove_pod`.
    async fn on_pod_removed(&self, completion: PodCompletion);

    /// Recover pods assigned to this node before the agent started.
    async fn fault_tolerance_start(&self, pods: Vec<Pod>) -> Result<(), SyncError>;

    /// Locally owned pods with their latest observed status.
    async fn fetch_local_pods(&self) -> Result<Vec<Pod>, SyncError>;

    async fn pod_count(&self) -> usize;
}

// =============================================================================
// Pod manager
// =============================================================================

enum PodTask {
    Start(Pod, Option<CompletionSender>, PodOp),
    Restart(Pod, Option<CompletionSender>),
    Recover(Pod),
    Stop(Option<CompletionSender>),
}

struct PodRecord {
    pod: Pod,
    spec_hash: SpecHash,
    mailbox: mpsc::UnboundedSender<PodTask>,
    removing: bool,
    pending_removals: u32,
}

type PodTable = RwLock<HashMap<String, PodRecord>>;

/// Pod manager backed by a container runtime.
pub struct PodManager {
    runtime: Arc<dyn ContainerRuntime>,
    pods: Arc<PodTable>,
}

impl PodManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            pods: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a record and spawn its worker. The caller holds the table lock.
    fn spawn_worker(
        &self,
        table: &mut HashMap<String, PodRecord>,
        key: &str,
        pod: &Pod,
    ) -> mpsc::UnboundedSender<PodTask> {
        let (tx, rx) = mpsc::unbounded_channel();
        table.insert(
            key.to_string(),
            PodRecord {
                pod: pod.clone(),
                spec_hash: spec_hash(pod),
                mailbox: tx.clone(),
                removing: false,
                pending_removals: 0,
            },
        );

        tokio::spawn(run_worker(
            key.to_string(),
            Arc::clone(&self.runtime),
            Arc::clone(&self.pods),
            rx,
        ));

        tx
    }

    /// Queue a start, or a restart if the pod is already known with another spec.
    async fn ensure_pod(&self, pod: Pod, done: Option<CompletionSender>, op: PodOp) {
        let key = pod.key();
        let new_hash = spec_hash(&pod);
        let mut table = self.pods.write().await;

        let Some(record) = table.get_mut(&key) else {
            if op == PodOp::Update {
                warn!(pod_key = %key, "Update for unknown pod, starting it");
            }
            info!(pod_key = %key, "Adding pod");
            let mailbox = self.spawn_worker(&mut table, &key, &pod);
            let _ = mailbox.send(PodTask::Start(pod, done, op));
            return;
        };

        // A queued stop will run first; the pod has to be started again after it.
        let stop_queued = record.removing || record.pending_removals > 0;
        record.removing = false;

        if stop_queued {
            info!(pod_key = %key, "Pod re-added while removal is pending, restarting after stop");
            record.pod.metadata = pod.metadata.clone();
            record.pod.spec = pod.spec.clone();
            record.spec_hash = new_hash;
            let _ = record.mailbox.send(PodTask::Start(pod, done, op));
            return;
        }

        if record.spec_hash == new_hash {
            debug!(pod_key = %key, spec_hash = %new_hash, "Pod spec unchanged");
            record.pod.metadata = pod.metadata;
            if let Some(done) = done {
                let _ = done.send(PodCompletion {
                    pod_key: key,
                    op,
                    outcome: Ok(()),
                });
            }
            return;
        }

        info!(
            pod_key = %key,
            old_hash = %record.spec_hash,
            new_hash = %new_hash,
            "Pod spec changed, restarting"
        );
        record.pod.metadata = pod.metadata.clone();
        record.pod.spec = pod.spec.clone();
        record.spec_hash = new_hash;
        let _ = record.mailbox.send(PodTask::Restart(pod, done));
    }
}

#[async_trait]
impl PodLifecycle for PodManager {
    async fn add_pod(&self, pod: Pod, done: Option<CompletionSender>) {
        self.ensure_pod(pod, done, PodOp::Add).await;
    }

    async fn update_pod(&self, pod: Pod, done: Option<CompletionSender>) {
        self.ensure_pod(pod, done, PodOp::Update).await;
    }

    async fn remove_pod(&self, pod: Pod, done: Option<CompletionSender>) {
        let key = pod.key();
        let mut table = self.pods.write().await;

        let Some(record) = table.get_mut(&key) else {
            debug!(pod_key = %key, "Remove for unknown pod");
            if let Some(done) = done {
                let _ = done.send(PodCompletion {
                    pod_key: key,
                    op: PodOp::Remove,
                    outcome: Ok(()),
                });
            }
            return;
        };

        info!(pod_key = %key, "Removing pod");
        record.removing = true;
        record.pending_removals += 1;
        let _ = record.mailbox.send(PodTask::Stop(done));
    }

    async fn on_pod_removed(&self, completion: PodCompletion) {
        finish_removal(&self.pods, &completion).await;
    }

    async fn fault_tolerance_start(&self, pods: Vec<Pod>) -> Result<(), SyncError> {
        info!(pod_count = pods.len(), "Recovering pods");

        let mut anonymous = 0usize;
        let mut table = self.pods.write().await;

        for pod in pods {
            if pod.metadata.id.is_empty() && pod.metadata.name.is_empty() {
                anonymous += 1;
                continue;
            }

            let key = pod.key();
            if table.contains_key(&key) {
                debug!(pod_key = %key, "Pod already tracked, skipping recovery");
                continue;
            }

            let mailbox = self.spawn_worker(&mut table, &key, &pod);
            let _ = mailbox.send(PodTask::Recover(pod));
        }

        if anonymous > 0 {
            return Err(SyncError::Validation(format!(
                "{anonymous} pods without id or name were not recovered"
            )));
        }
        Ok(())
    }

    async fn fetch_local_pods(&self) -> Result<Vec<Pod>, SyncError> {
        let table = self.pods.read().await;
        let mut pods: Vec<Pod> = table.values().map(|r| r.pod.clone()).collect();
        pods.sort_by_key(Pod::key);
        Ok(pods)
    }

    async fn pod_count(&self) -> usize {
        self.pods.read().await.len()
    }
}

// =============================================================================
// Worker
// =============================================================================

async fn run_worker(
    key: String,
    runtime: Arc<dyn ContainerRuntime>,
    pods: Arc<PodTable>,
    mut mailbox: mpsc::UnboundedReceiver<PodTask>,
) {
    debug!(pod_key = %key, "Pod worker started");

    while let Some(task) = mailbox.recv().await {
        match task {
            PodTask::Start(pod, done, op) => {
                let outcome = start(&key, runtime.as_ref(), &pods, &pod).await;
                complete(done, &key, op, outcome);
            }
            PodTask::Restart(pod, done) => {
                if let Err(e) = runtime.stop_pod(&key).await {
                    warn!(pod_key = %key, error = %e, "Error stopping pod before restart");
                }
                let outcome = start(&key, runtime.as_ref(), &pods, &pod).await;
                complete(done, &key, PodOp::Update, outcome);
            }
            PodTask::Recover(pod) => match runtime.inspect_pod(&key).await {
                Ok(Some(status)) => {
                    info!(pod_key = %key, phase = ?status.phase, "Reattached to running pod");
                    set_status(&pods, &key, |s| *s = status).await;
                }
                Ok(None) => {
                    info!(pod_key = %key, "Pod not found in runtime, starting");
                    let _ = start(&key, runtime.as_ref(), &pods, &pod).await;
                }
                Err(e) => {
                    error!(pod_key = %key, error = %e, "Failed to inspect pod during recovery");
                }
            },
            PodTask::Stop(done) => {
                let outcome = runtime.stop_pod(&key).await.map_err(|e| e.to_string());
                if let Err(e) = &outcome {
                    error!(pod_key = %key, error = %e, "Failed to stop pod");
                } else {
                    info!(pod_key = %key, "Pod stopped");
                }

                let completion = PodCompletion {
                    pod_key: key.clone(),
                    op: PodOp::Remove,
                    outcome,
                };
                match done {
                    Some(done) => {
                        let _ = done.send(completion);
                    }
                    None => finish_removal(&pods, &completion).await,
                }
            }
        }
    }

    debug!(pod_key = %key, "Pod worker exited");
}

async fn start(
    key: &str,
    runtime: &dyn ContainerRuntime,
    pods: &PodTable,
    pod: &Pod,
) -> Result<(), String> {
    match runtime.start_pod(pod).await {
        Ok(status) => {
            info!(pod_key = %key, pod_ip = %status.pod_ip, "Pod started");
            set_status(pods, key, |s| *s = status).await;
            Ok(())
        }
        Err(e) => {
            error!(pod_key = %key, error = %e, "Failed to start pod");
            set_status(pods, key, |s| s.phase = PodPhase::Failed).await;
            Err(e.to_string())
        }
    }
}

fn complete(done: Option<CompletionSender>, key: &str, op: PodOp, outcome: Result<(), String>) {
    if let Some(done) = done {
        let _ = done.send(PodCompletion {
            pod_key: key.to_string(),
            op,
            outcome,
        });
    }
}

async fn set_status(pods: &PodTable, key: &str, apply: impl FnOnce(&mut mk8s_api::PodStatus)) {
    if let Some(record) = pods.write().await.get_mut(key) {
        apply(&mut record.pod.status);
    }
}

/// Drop the record once its last queued removal has finished.
///
/// A failed stop keeps the pod tracked; a later remove retries it.
async fn finish_removal(pods: &PodTable, completion: &PodCompletion) {
    let mut table = pods.write().await;
    let Some(record) = table.get_mut(&completion.pod_key) else {
        return;
    };

    record.pending_removals = record.pending_removals.saturating_sub(1);

    if let Err(e) = &completion.outcome {
        warn!(pod_key = %completion.pod_key, error = %e, "Pod removal failed, keeping record");
        record.removing = false;
        return;
    }

    if record.removing && record.pending_removals == 0 {
        table.remove(&completion.pod_key);
        debug!(pod_key = %completion.pod_key, remaining = table.len(), "Pod record dropped");
    }
}

fn spec_hash(pod: &Pod) -> SpecHash {
    let spec = serde_json::to_value(&pod.spec).unwrap_or(serde_json::Value::Null);
    SpecHash::from_json(&spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use mk8s_api::{Container, PodMetadata, PodSpec};
    use std::time::Duration;

    fn pod(id: &str, image: &str) -> Pod {
        Pod {
            metadata: PodMetadata {
                id: id.to_string(),
                name: format!("{id}-name"),
                ..PodMetadata::default()
            },
            spec: PodSpec {
                node_name: "n1".to_string(),
                containers: vec![Container {
                    name: "app".to_string(),
                    image: image.to_string(),
                    ..Container::default()
                }],
                ..PodSpec::default()
            },
            ..Pod::default()
        }
    }

    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_add_pod_starts_and_reports_status() {
        let runtime = Arc::new(MockRuntime::new());
        let manager = PodManager::new(runtime.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        manager.add_pod(pod("p1", "nginx:1.25"), Some(tx)).await;
        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.op, PodOp::Add);
        assert!(completion.outcome.is_ok());

        let pods = manager.fetch_local_pods().await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].status.phase, PodPhase::Running);
        assert_eq!(manager.pod_count().await, 1);
    }

    #[tokio::test]
    async fn test_update_with_same_spec_does_not_restart() {
        let runtime = Arc::new(MockRuntime::new());
        let manager = PodManager::new(runtime.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        manager.add_pod(pod("p1", "nginx:1.25"), Some(tx.clone())).await;
        rx.recv().await.unwrap();
        let ip_before = manager.fetch_local_pods().await.unwrap()[0].status.pod_ip.clone();

        let mut relabeled = pod("p1", "nginx:1.25");
        relabeled.metadata.labels.insert("tier".to_string(), "web".to_string());
        manager.update_pod(relabeled, Some(tx)).await;
        rx.recv().await.unwrap();

        let pods = manager.fetch_local_pods().await.unwrap();
        assert_eq!(pods[0].status.pod_ip, ip_before);
        assert_eq!(pods[0].metadata.labels.get("tier").map(String::as_str), Some("web"));
    }

    #[tokio::test]
    async fn test_update_with_new_spec_restarts() {
        let runtime = Arc::new(MockRuntime::new());
        let manager = PodManager::new(runtime.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        manager.add_pod(pod("p1", "nginx:1.25"), Some(tx.clone())).await;
        rx.recv().await.unwrap();
        let ip_before = manager.fetch_local_pods().await.unwrap()[0].status.pod_ip.clone();

        manager.update_pod(pod("p1", "nginx:1.26"), Some(tx)).await;
        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.op, PodOp::Update);

        let pods = manager.fetch_local_pods().await.unwrap();
        assert_ne!(pods[0].status.pod_ip, ip_before);
        assert_eq!(pods[0].spec.containers[0].image, "nginx:1.26");
    }

    #[tokio::test]
    async fn test_remove_completion_drops_record() {
        let runtime = Arc::new(MockRuntime::new());
        let manager = PodManager::new(runtime.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        manager.add_pod(pod("p1", "nginx:1.25"), None).await;
        manager.remove_pod(pod("p1", "nginx:1.25"), Some(tx)).await;

        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.op, PodOp::Remove);
        assert_eq!(manager.pod_count().await, 1);

        manager.on_pod_removed(completion).await;
        assert_eq!(manager.pod_count().await, 0);
        assert_eq!(runtime.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_readd_during_pending_removal_restarts_pod() {
        let runtime = Arc::new(MockRuntime::new());
        let manager = PodManager::new(runtime.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        manager.add_pod(pod("p1", "nginx:1.25"), None).await;
        manager.remove_pod(pod("p1", "nginx:1.25"), Some(tx.clone())).await;
        manager.add_pod(pod("p1", "nginx:1.25"), Some(tx)).await;

        let removed = rx.recv().await.unwrap();
        assert_eq!(removed.op, PodOp::Remove);
        manager.on_pod_removed(removed).await;

        let added = rx.recv().await.unwrap();
        assert_eq!(added.op, PodOp::Add);
        assert!(added.outcome.is_ok());

        assert_eq!(manager.pod_count().await, 1);
        assert_eq!(runtime.running_count().await, 1);
        let pods = manager.fetch_local_pods().await.unwrap();
        assert_eq!(pods[0].status.phase, PodPhase::Running);
    }

    #[tokio::test]
    async fn test_remove_without_completion_cleans_up_itself() {
        let runtime = Arc::new(MockRuntime::new());
        let manager = PodManager::new(runtime.clone());

        manager.add_pod(pod("p1", "nginx:1.25"), None).await;
        manager.remove_pod(pod("p1", "nginx:1.25"), None).await;

        wait_for(|| async { manager.pod_count().await == 0 }).await;
    }

    #[tokio::test]
    async fn test_remove_unknown_pod_completes_immediately() {
        let manager = PodManager::new(Arc::new(MockRuntime::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        manager.remove_pod(pod("ghost", "busybox"), Some(tx)).await;
        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.pod_key, "ghost");
        assert!(completion.outcome.is_ok());
    }

    #[tokio::test]
    async fn test_failed_start_marks_pod_failed() {
        let manager = PodManager::new(Arc::new(MockRuntime::failing()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        manager.add_pod(pod("p1", "nginx:1.25"), Some(tx)).await;
        let completion = rx.recv().await.unwrap();
        assert!(completion.outcome.is_err());

        let pods = manager.fetch_local_pods().await.unwrap();
        assert_eq!(pods[0].status.phase, PodPhase::Failed);
    }

    #[tokio::test]
    async fn test_fault_tolerance_reattaches_and_starts() {
        let runtime = Arc::new(MockRuntime::new());
        let survivor = mk8s_api::PodStatus {
            phase: PodPhase::Running,
            pod_ip: "10.244.9.9".to_string(),
            ..mk8s_api::PodStatus::default()
        };
        runtime.adopt("p1", survivor).await;

        let manager = PodManager::new(runtime.clone());
        manager
            .fault_tolerance_start(vec![pod("p1", "nginx:1.25"), pod("p2", "redis:7")])
            .await
            .unwrap();

        wait_for(|| async {
            manager
                .fetch_local_pods()
                .await
                .unwrap()
                .iter()
                .all(|p| p.status.phase == PodPhase::Running)
        })
        .await;

        let pods = manager.fetch_local_pods().await.unwrap();
        assert_eq!(pods[0].metadata.id, "p1");
        assert_eq!(pods[0].status.pod_ip, "10.244.9.9");
        assert_eq!(runtime.running_count().await, 2);
    }

    #[tokio::test]
    async fn test_fault_tolerance_rejects_anonymous_pods() {
        let manager = PodManager::new(Arc::new(MockRuntime::new()));

        let err = manager
            .fault_tolerance_start(vec![pod("p1", "nginx:1.25"), Pod::default()])
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "validation");
        assert_eq!(manager.pod_count().await, 1);
    }
}
