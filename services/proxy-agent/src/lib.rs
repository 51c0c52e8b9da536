//! mk8s Proxy Agent Library
//!
//! The proxy agent runs on every worker node and keeps local service
//! networking converged with the control plane: NAT rules for cluster-IP and
//! node-port services, and hosts-file entries for DNS records.
//!
//! ## Architecture
//!
//! ```text
//! ProxyAgent
//! ├── service sync   (services + endpoints -> RuleController)
//! ├── dns sync       (dns records -> HostsController)
//! └── status report  (StatusCache -> StatusSink)
//! ```

pub mod agent;
pub mod client;
pub mod config;
pub mod hosts;
pub mod rules;
pub mod status;

pub use agent::{ProxyAgent, RunningProxy};
pub use client::ControlPlaneClient;
pub use hosts::{EtcHostsController, HostsController};
pub use rules::{DryRunApplier, IptablesController, IptablesRestore, RuleApplier, RuleController};
pub use status::{
    DnsStatus, LogSink, ServiceRuleStatus, ServicesStatus, StatusCache, StatusReport, StatusSink,
};
