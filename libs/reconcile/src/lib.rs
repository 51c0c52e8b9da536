//! Reconciliation loop primitives.
//!
//! Both mk8s agents converge locally enforced state toward desired state held
//! by the control plane. This library holds the pieces they share:
//!
//! - **Desired state**: what the control plane says should exist, re-fetched
//!   in full on every firing.
//! - **Enforced state**: what the host actually has (rules, hosts entries, pods).
//! - **Convergence**: diff desired against enforced, apply the difference,
//!   and only then record the result.
//!
//! # Invariants
//!
//! - Every firing is idempotent: it recomputes from full state, never from a delta
//! - A failed firing commits nothing; the next tick is the retry
//! - Locks guarding shared status are never held across I/O

mod error;
mod periodic;
mod slot;

pub use error::SyncError;
pub use periodic::{run_periodic, wait_for_shutdown, FailureStreak, PeriodicTicker};
pub use slot::{DirtySlot, Pending};

use std::time::Duration;

use sha2::{Digest, Sha256};

/// A spec hash for deterministic comparison.
///
/// Used to detect when a pod spec has changed between two deliveries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecHash(String);

impl SpecHash {
    /// Compute a spec hash from canonical JSON.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let canonical = canonical_json(json);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let result = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(&result[..16])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpecHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produce canonical JSON (sorted keys, no extra whitespace).
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let inner: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("{}:{}", quote(k), canonical_json(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(arr) => {
            let inner: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        // serde_json already renders scalars canonically.
        scalar => scalar.to_string(),
    }
}

fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// Delivery cursor for an ordered event feed.
///
/// Tracks the last applied sequence number so redelivered events are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Last applied sequence number.
    pub last_seq: i64,

    /// Timestamp of last checkpoint update.
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Checkpoint {
    pub fn new(last_seq: i64) -> Self {
        Self {
            last_seq,
            updated_at: chrono::Utc::now(),
        }
    }

    /// Check if an event has already been applied.
    pub fn is_processed(&self, seq: i64) -> bool {
        seq <= self.last_seq
    }

    /// Advance the checkpoint. Never moves backwards.
    pub fn advance(&mut self, seq: i64) {
        if seq > self.last_seq {
            self.last_seq = seq;
            self.updated_at = chrono::Utc::now();
        }
    }
}

/// Default period of the proxy agent's service and DNS sync loops.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(10);

/// Default period of the proxy agent's report loop.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Default period of the node agent's heartbeat.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
