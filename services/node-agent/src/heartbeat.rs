//! Heartbeat loop for reporting node status to the control plane.
//!
//! The node agent sends periodic heartbeats to the control plane to:
//! - Indicate the node is alive and healthy
//! - Report load and memory pressure
//! - Report locally owned pods and their observed status

use std::sync::Arc;
use std::time::Duration;

use mk8s_reconcile::{run_periodic, SyncError};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::agent::NodeHandle;
use crate::client::{ControlPlaneClient, HeartbeatRequest};
use crate::pods::PodLifecycle;
use crate::resources::NodeStatusSource;

/// Periodic heartbeat action.
pub struct Heartbeat {
    client: Arc<ControlPlaneClient>,
    node: Arc<NodeHandle>,
    pods: Arc<dyn PodLifecycle>,
    status_source: Arc<dyn NodeStatusSource>,
    interval: Duration,
}

impl Heartbeat {
    pub fn new(
        client: Arc<ControlPlaneClient>,
        node: Arc<NodeHandle>,
        pods: Arc<dyn PodLifecycle>,
        status_source: Arc<dyn NodeStatusSource>,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            node,
            pods,
            status_source,
            interval,
        }
    }

    /// One heartbeat firing.
    ///
    /// Any failure aborts the firing. The node lock is only held while the
    /// fresh status is overlaid and copied out.
    pub async fn beat_once(&self) -> Result<(), SyncError> {
        let mut status = self.status_source.collect().await?;
        status.num_pods = self.pods.pod_count().await;

        let node = self.node.overlay_status(status).await;
        let pods = self.pods.fetch_local_pods().await?;
        let pod_count = pods.len();

        let request = HeartbeatRequest {
            node_status: node.status,
            pods,
        };
        self.client
            .send_heartbeat(&node.metadata.id, &request)
            .await?;

        debug!(
            node_id = %node.metadata.id,
            num_pods = request.node_status.num_pods,
            reported_pods = pod_count,
            cpu_usage = request.node_status.cpu_usage,
            memory_usage = request.node_status.memory_usage,
            "Heartbeat acknowledged"
        );
        Ok(())
    }

    /// Run the heartbeat loop until shutdown. Fires immediately, then every interval.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        run_periodic("heartbeat", self.interval, true, shutdown, || self.beat_once()).await;
        info!("Heartbeat loop stopped");
    }
}
