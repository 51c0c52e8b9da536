//! mk8s Node Agent Library
//!
//! The node agent runs on every worker node and keeps the pods assigned to it
//! converged with the control plane. It registers the node, recovers pods
//! that outlived a previous agent process, consumes the node's pod event feed,
//! and reports liveness through a periodic heartbeat.
//!
//! ## Architecture
//!
//! ```text
//! NodeAgent
//! ├── event loop      (drains the subscription, drives PodLifecycle)
//! ├── feed delivery   (polls the control plane into the event channel)
//! └── heartbeat       (node status + local pods, every interval)
//! ```
//!
//! ## Modules
//!
//! - `agent`: startup sequencing and the shared `Node`
//! - `pods`: pod lifecycle manager with per-pod workers
//! - `runtime`: container runtime seam (mock in dev)
//! - `feed`: event subscription and its delivery loop

pub mod agent;
pub mod client;
pub mod config;
pub mod events;
pub mod feed;
pub mod heartbeat;
pub mod pods;
pub mod resources;
pub mod runtime;

pub use agent::{AgentPhase, NodeAgent, NodeHandle, RunningAgent};
pub use client::{ControlPlaneClient, HeartbeatRequest};
pub use feed::{EventDelivery, EventSubscriber, HttpEventSubscriber, Subscription};
pub use pods::{CompletionSender, PodCompletion, PodLifecycle, PodManager, PodOp};
pub use resources::{HostStatusSource, NodeStatusSource};
pub use runtime::{ContainerRuntime, MockRuntime};
