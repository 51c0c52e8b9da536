//! Shared fakes for node agent integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mk8s_api::{Node, NodeStatus, Pod, PodMetadata, PodSpec, PodUpdateEvent};
use mk8s_node_agent::config::Config;
use mk8s_node_agent::{
    CompletionSender, ControlPlaneClient, EventDelivery, EventSubscriber, NodeStatusSource,
    PodCompletion, PodLifecycle, PodOp, Subscription,
};
use mk8s_reconcile::SyncError;
use tokio::sync::{mpsc, watch};

pub fn test_config(api_server_url: &str) -> Config {
    Config {
        api_server_url: api_server_url.to_string(),
        node_hostname: "worker-a".to_string(),
        node_ip: "10.0.0.5".to_string(),
        node_labels: BTreeMap::from([("zone".to_string(), "a".to_string())]),
        heartbeat_interval_secs: 3600,
        event_poll_interval: Duration::from_millis(20),
        event_batch_limit: 50,
        log_level: "debug".to_string(),
    }
}

pub fn test_client(api_server_url: &str) -> Arc<ControlPlaneClient> {
    Arc::new(ControlPlaneClient::new(&test_config(api_server_url)).unwrap())
}

pub fn pod(id: &str, node_name: &str) -> Pod {
    Pod {
        metadata: PodMetadata {
            id: id.to_string(),
            name: format!("{id}-name"),
            namespace: "default".to_string(),
            ..PodMetadata::default()
        },
        spec: PodSpec {
            node_name: node_name.to_string(),
            ..PodSpec::default()
        },
        ..Pod::default()
    }
}

pub fn registered(id: &str, name: &str) -> Node {
    let mut node = Node::draft("worker-a", "10.0.0.5", BTreeMap::new());
    node.metadata.id = id.to_string();
    node.metadata.name = name.to_string();
    node
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

// =============================================================================
// Recording pod lifecycle
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Add(String),
    Update(String),
    Remove(String),
    Removed(String),
    FaultToleranceStart(Vec<String>),
}

/// Pod lifecycle fake that records every call in order.
#[derive(Default)]
pub struct RecordingLifecycle {
    calls: Mutex<Vec<Call>>,
    recovery_delay: Duration,
    fail_recovery: bool,
}

impl RecordingLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recovery_delay(delay: Duration) -> Self {
        Self {
            recovery_delay: delay,
            ..Self::default()
        }
    }

    pub fn failing_recovery() -> Self {
        Self {
            fail_recovery: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PodLifecycle for RecordingLifecycle {
    async fn add_pod(&self, pod: Pod, done: Option<CompletionSender>) {
        assert!(done.is_none(), "add is fire-and-forget");
        self.record(Call::Add(pod.key()));
    }

    async fn update_pod(&self, pod: Pod, done: Option<CompletionSender>) {
        assert!(done.is_none(), "update is fire-and-forget");
        self.record(Call::Update(pod.key()));
    }

    async fn remove_pod(&self, pod: Pod, done: Option<CompletionSender>) {
        let key = pod.key();
        self.record(Call::Remove(key.clone()));
        if let Some(done) = done {
            let _ = done.send(PodCompletion {
                pod_key: key,
                op: PodOp::Remove,
                outcome: Ok(()),
            });
        }
    }

    async fn on_pod_removed(&self, completion: PodCompletion) {
        self.record(Call::Removed(completion.pod_key));
    }

    async fn fault_tolerance_start(&self, pods: Vec<Pod>) -> Result<(), SyncError> {
        tokio::time::sleep(self.recovery_delay).await;
        let mut keys: Vec<String> = pods.iter().map(Pod::key).collect();
        keys.sort();
        self.record(Call::FaultToleranceStart(keys));

        if self.fail_recovery {
            return Err(SyncError::Convergence("runtime unavailable".to_string()));
        }
        Ok(())
    }

    async fn fetch_local_pods(&self) -> Result<Vec<Pod>, SyncError> {
        Ok(Vec::new())
    }

    async fn pod_count(&self) -> usize {
        0
    }
}

// =============================================================================
// In-memory event subscription
// =============================================================================

struct IdleDelivery;

#[async_trait]
impl EventDelivery for IdleDelivery {
    async fn run(self: Box<Self>, mut shutdown: watch::Receiver<bool>) {
        mk8s_reconcile::wait_for_shutdown(&mut shutdown).await;
    }
}

/// Subscriber handing out a channel the test feeds directly.
pub struct ChannelSubscriber {
    receiver: Mutex<Option<mpsc::UnboundedReceiver<PodUpdateEvent>>>,
    keys: Mutex<Vec<String>>,
}

impl ChannelSubscriber {
    pub fn new() -> (Self, mpsc::UnboundedSender<PodUpdateEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = Self {
            receiver: Mutex::new(Some(rx)),
            keys: Mutex::new(Vec::new()),
        };
        (subscriber, tx)
    }

    /// Node keys passed to `subscribe`, in call order.
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

impl EventSubscriber for ChannelSubscriber {
    fn subscribe(&self, node_key: &str) -> Subscription {
        self.keys.lock().unwrap().push(node_key.to_string());
        let events = self
            .receiver
            .lock()
            .unwrap()
            .take()
            .expect("subscribed twice");

        Subscription {
            events,
            delivery: Box::new(IdleDelivery),
        }
    }
}

// =============================================================================
// Static node status
// =============================================================================

pub struct StaticStatus {
    pub fail: bool,
}

#[async_trait]
impl NodeStatusSource for StaticStatus {
    async fn collect(&self) -> Result<NodeStatus, SyncError> {
        if self.fail {
            return Err(SyncError::Convergence("procfs unavailable".to_string()));
        }
        Ok(NodeStatus {
            hostname: "worker-a".to_string(),
            ip: "10.0.0.5".to_string(),
            condition: vec!["Ready".to_string()],
            num_pods: 0,
            cpu_usage: 0.25,
            memory_usage: 0.5,
        })
    }
}
