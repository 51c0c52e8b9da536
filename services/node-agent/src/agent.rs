//! Node agent startup sequencing.
//!
//! ```text
//! Unregistered -> Registering -> Recovering -> Running
//! ```
//!
//! Registration strictly precedes the event subscription, which strictly
//! precedes fault-tolerance recovery, which strictly precedes the first event
//! dispatch. There is no transition back to `Unregistered`.

use std::sync::Arc;

use anyhow::{Context, Result};
use mk8s_api::{Node, NodeStatus, Pod};
use mk8s_reconcile::SyncError;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::client::ControlPlaneClient;
use crate::config::Config;
use crate::events::run_event_loop;
use crate::feed::EventSubscriber;
use crate::heartbeat::Heartbeat;
use crate::pods::PodLifecycle;
use crate::resources::NodeStatusSource;

/// Startup phase of a node agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    Unregistered,
    Registering,
    Recovering,
    Running,
}

// =============================================================================
// Node handle
// =============================================================================

/// The agent's `Node`, shared between startup and the heartbeat.
///
/// Only the heartbeat mutates the status after registration.
#[derive(Debug)]
pub struct NodeHandle {
    node: RwLock<Node>,
}

impl NodeHandle {
    pub fn new(node: Node) -> Self {
        Self {
            node: RwLock::new(node),
        }
    }

    pub async fn snapshot(&self) -> Node {
        self.node.read().await.clone()
    }

    pub async fn identity(&self) -> String {
        self.node.read().await.identity().to_string()
    }

    /// Replace the draft with the node returned by registration.
    pub async fn replace(&self, node: Node) {
        *self.node.write().await = node;
    }

    /// Overlay a freshly collected status and return a copy of the node.
    pub async fn overlay_status(&self, status: NodeStatus) -> Node {
        let mut node = self.node.write().await;
        node.status = status;
        node.clone()
    }
}

// =============================================================================
// Node agent
// =============================================================================

/// Tasks spawned once the agent is running.
pub struct RunningAgent {
    pub event_loop: JoinHandle<Result<(), SyncError>>,
    pub delivery: JoinHandle<()>,
    pub heartbeat: JoinHandle<()>,
}

pub struct NodeAgent {
    config: Config,
    client: Arc<ControlPlaneClient>,
    pods: Arc<dyn PodLifecycle>,
    status_source: Arc<dyn NodeStatusSource>,
    node: Arc<NodeHandle>,
    phase: watch::Sender<AgentPhase>,
}

impl NodeAgent {
    pub fn new(
        config: Config,
        client: Arc<ControlPlaneClient>,
        pods: Arc<dyn PodLifecycle>,
        status_source: Arc<dyn NodeStatusSource>,
    ) -> Self {
        let draft = Node::draft(
            &config.node_hostname,
            &config.node_ip,
            config.node_labels.clone(),
        );
        let (phase, _) = watch::channel(AgentPhase::Unregistered);

        Self {
            config,
            client,
            pods,
            status_source,
            node: Arc::new(NodeHandle::new(draft)),
            phase,
        }
    }

    pub fn node(&self) -> Arc<NodeHandle> {
        Arc::clone(&self.node)
    }

    pub fn phase(&self) -> watch::Receiver<AgentPhase> {
        self.phase.subscribe()
    }

    fn enter(&self, phase: AgentPhase) {
        info!(phase = ?phase, "Node agent phase transition");
        self.phase.send_replace(phase);
    }

    /// Register the draft node and adopt the control plane's record.
    pub async fn register(&self) -> Result<(), SyncError> {
        self.enter(AgentPhase::Registering);

        let draft = self.node.snapshot().await;
        let node = self.client.register_node(&draft).await?;

        info!(
            node_id = %node.metadata.id,
            node_name = %node.metadata.name,
            hostname = %node.status.hostname,
            "Node registered"
        );
        self.node.replace(node).await;
        Ok(())
    }

    /// Hand every pod assigned to this node to the lifecycle manager.
    ///
    /// Fetching the pod set is fatal on failure. A recovery error from the
    /// manager is logged only. Returns the number of pods handed over.
    pub async fn recover(&self) -> Result<usize, SyncError> {
        self.enter(AgentPhase::Recovering);

        let all = self.client.fetch_all_pods().await?;
        let total = all.len();

        let node = self.node.snapshot().await;
        let owned: Vec<Pod> = all.into_values().filter(|pod| node.owns(pod)).collect();
        let recovered = owned.len();

        info!(total, recovered, "Starting fault-tolerance recovery");
        if let Err(e) = self.pods.fault_tolerance_start(owned).await {
            error!(error = %e, "Fault-tolerance recovery reported an error");
        }

        Ok(recovered)
    }

    /// Run startup in order, then spawn the event loop, the feed delivery
    /// and the heartbeat.
    pub async fn start(
        &self,
        subscriber: &dyn EventSubscriber,
        shutdown: watch::Receiver<bool>,
    ) -> Result<RunningAgent> {
        self.register().await.context("Node registration failed")?;

        let node_key = self.node.identity().await;
        let subscription = subscriber.subscribe(&node_key);
        info!(node_key = %node_key, "Event subscription opened");

        self.recover()
            .await
            .context("Fault-tolerance recovery failed")?;

        let event_loop = tokio::spawn(run_event_loop(
            Arc::clone(&self.pods),
            subscription.events,
            shutdown.clone(),
        ));
        let delivery = tokio::spawn(subscription.delivery.run(shutdown.clone()));

        let heartbeat = Heartbeat::new(
            Arc::clone(&self.client),
            Arc::clone(&self.node),
            Arc::clone(&self.pods),
            Arc::clone(&self.status_source),
            self.config.heartbeat_interval(),
        );
        let heartbeat = tokio::spawn(heartbeat.run(shutdown));

        self.enter(AgentPhase::Running);

        Ok(RunningAgent {
            event_loop,
            delivery,
            heartbeat,
        })
    }
}
