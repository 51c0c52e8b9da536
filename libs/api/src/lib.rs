//! # mk8s-api
//!
//! Wire data model shared by the mk8s node agent and proxy agent.
//!
//! ## Design Principles
//!
//! - The control plane owns every object here; agents only consume them
//! - Field names follow the control plane's camelCase JSON
//! - Missing optional fields deserialize to their defaults so older control
//!   planes keep working
//!
//! ## Objects
//!
//! - `Node`: identity and observed state of a worker (owned by the node agent)
//! - `Pod`: declarative spec plus observed status (consumed)
//! - `Service` / `Endpoint` / `DnsRecord`: desired network state (consumed by the proxy agent)
//! - `PodUpdateEvent`: push-driven pod assignment changes for one node

mod error;
mod event;
mod node;
mod pod;
mod service;

pub use error::ApiError;
pub use event::*;
pub use node::*;
pub use pod::*;
pub use service::*;

/// Control plane endpoint paths, relative to the API server base URL.
pub mod paths {
    /// Prefix shared by every endpoint.
    pub const API_PREFIX: &str = "/api/v1";

    pub const SERVICES: &str = "/services";
    pub const ENDPOINTS: &str = "/endpoints";
    pub const DNS: &str = "/dns";
    pub const NODES: &str = "/nodes";
    pub const PODS: &str = "/pods";

    /// `POST /nodes/{id}/heartbeat`.
    pub fn node_heartbeat(node_id: &str) -> String {
        format!("{NODES}/{node_id}/heartbeat")
    }

    /// `GET /nodes/{key}/events`.
    pub fn node_events(node_key: &str) -> String {
        format!("{NODES}/{node_key}/events")
    }
}
