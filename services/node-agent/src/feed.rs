//! Pod event feed subscription.
//!
//! A subscription pairs the receiving end of an unbounded event channel with
//! the delivery loop that fills it. The node agent drains the channel in its
//! event loop and runs the delivery loop as a separate task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mk8s_api::PodUpdateEvent;
use mk8s_reconcile::{wait_for_shutdown, Checkpoint, FailureStreak};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::client::ControlPlaneClient;

/// Channel-delivery loop feeding a subscription.
#[async_trait]
pub trait EventDelivery: Send {
    /// Deliver events until shutdown or until the receiver is dropped.
    async fn run(self: Box<Self>, shutdown: watch::Receiver<bool>);
}

/// An open event subscription for one node.
pub struct Subscription {
    pub events: mpsc::UnboundedReceiver<PodUpdateEvent>,
    pub delivery: Box<dyn EventDelivery>,
}

/// Opens event subscriptions keyed by node identity.
pub trait EventSubscriber: Send + Sync {
    fn subscribe(&self, node_key: &str) -> Subscription;
}

// =============================================================================
// HTTP event feed
// =============================================================================

/// Subscribes by polling the control plane's per-node event feed.
pub struct HttpEventSubscriber {
    client: Arc<ControlPlaneClient>,
    poll_interval: Duration,
    batch_limit: i64,
}

impl HttpEventSubscriber {
    pub fn new(client: Arc<ControlPlaneClient>, poll_interval: Duration, batch_limit: i64) -> Self {
        Self {
            client,
            poll_interval,
            batch_limit,
        }
    }
}

impl EventSubscriber for HttpEventSubscriber {
    fn subscribe(&self, node_key: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();

        Subscription {
            events: rx,
            delivery: Box::new(HttpEventDelivery {
                client: Arc::clone(&self.client),
                node_key: node_key.to_string(),
                checkpoint: Checkpoint::new(0),
                tx,
                poll_interval: self.poll_interval,
                batch_limit: self.batch_limit,
            }),
        }
    }
}

struct HttpEventDelivery {
    client: Arc<ControlPlaneClient>,
    node_key: String,
    checkpoint: Checkpoint,
    tx: mpsc::UnboundedSender<PodUpdateEvent>,
    poll_interval: Duration,
    batch_limit: i64,
}

#[async_trait]
impl EventDelivery for HttpEventDelivery {
    async fn run(self: Box<Self>, shutdown: watch::Receiver<bool>) {
        (*self).deliver(shutdown).await
    }
}

impl HttpEventDelivery {
    async fn deliver(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(node_key = %self.node_key, "Starting event feed delivery");
        let mut failures = FailureStreak::new("event_feed");

        loop {
            if self.tx.is_closed() {
                info!(node_key = %self.node_key, "Event receiver dropped, stopping delivery");
                return;
            }

            let fetch = self.client.fetch_events(
                &self.node_key,
                self.checkpoint.last_seq,
                self.batch_limit,
            );
            let result = tokio::select! {
                result = fetch => result,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };
            failures.record(&result);

            let batch = match result {
                Ok(batch) => batch,
                Err(_) => {
                    if !self.idle(&mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            if batch.items.is_empty() {
                self.checkpoint.advance(batch.next_after_seq);
                if !self.idle(&mut shutdown).await {
                    break;
                }
                continue;
            }

            for item in batch.items {
                if self.checkpoint.is_processed(item.seq) {
                    debug!(seq = item.seq, "Skipping already delivered event");
                    continue;
                }

                debug!(
                    seq = item.seq,
                    update_type = %item.event.update_type,
                    pod_key = %item.event.pod.key(),
                    "Delivering pod event"
                );
                if self.tx.send(item.event).is_err() {
                    info!(node_key = %self.node_key, "Event receiver dropped, stopping delivery");
                    return;
                }
                self.checkpoint.advance(item.seq);
            }

            self.checkpoint.advance(batch.next_after_seq);
        }

        info!(
            node_key = %self.node_key,
            last_seq = self.checkpoint.last_seq,
            "Event feed delivery shutting down"
        );
    }

    /// Sleep one poll interval. Returns false if shutdown arrived first.
    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => true,
            _ = wait_for_shutdown(shutdown) => false,
        }
    }
}
