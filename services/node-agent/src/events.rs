//! Event-consumption loop.
//!
//! A single consumer drains the subscription channel and dispatches each
//! `PodUpdateEvent` to the pod lifecycle manager. Add and update are
//! fire-and-forget. Remove carries a completion sender whose results are fed
//! back to the manager from this same loop.

use std::sync::Arc;

use mk8s_api::{PodUpdateEvent, PodUpdateType};
use mk8s_reconcile::{wait_for_shutdown, SyncError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::pods::{PodCompletion, PodLifecycle, PodOp};

/// Drain `events` until the channel closes or shutdown is signalled.
///
/// Returns `SyncError::ChannelClosed` if the event source terminated, `Ok` on
/// shutdown.
pub async fn run_event_loop(
    pods: Arc<dyn PodLifecycle>,
    mut events: mpsc::UnboundedReceiver<PodUpdateEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), SyncError> {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<PodCompletion>();
    let mut dispatched: u64 = 0;

    info!("Starting event-consumption loop");

    loop {
        tokio::select! {
            biased;

            _ = wait_for_shutdown(&mut shutdown) => {
                info!(dispatched, "Event-consumption loop shutting down");
                return Ok(());
            }

            Some(completion) = done_rx.recv() => {
                handle_completion(pods.as_ref(), completion).await;
            }

            event = events.recv() => {
                let Some(event) = event else {
                    warn!(dispatched, "Event channel closed");
                    return Err(SyncError::ChannelClosed);
                };

                dispatched += 1;
                dispatch(pods.as_ref(), event, &done_tx).await;
            }
        }
    }
}

async fn dispatch(
    pods: &dyn PodLifecycle,
    event: PodUpdateEvent,
    done_tx: &mpsc::UnboundedSender<PodCompletion>,
) {
    debug!(
        update_type = %event.update_type,
        pod_key = %event.pod.key(),
        "Dispatching pod event"
    );

    match event.update_type {
        PodUpdateType::Add => pods.add_pod(event.pod, None).await,
        PodUpdateType::Update => pods.update_pod(event.pod, None).await,
        PodUpdateType::Remove => pods.remove_pod(event.pod, Some(done_tx.clone())).await,
    }
}

async fn handle_completion(pods: &dyn PodLifecycle, completion: PodCompletion) {
    match completion.op {
        PodOp::Remove => pods.on_pod_removed(completion).await,
        op => debug!(pod_key = %completion.pod_key, ?op, "Pod operation completed"),
    }
}
