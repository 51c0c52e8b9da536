//! Host status collection for heartbeats.

use async_trait::async_trait;
use mk8s_api::{conditions, NodeStatus};
use mk8s_reconcile::SyncError;

/// Source of the node's current runtime status.
#[async_trait]
pub trait NodeStatusSource: Send + Sync {
    async fn collect(&self) -> Result<NodeStatus, SyncError>;
}

/// Reads load and memory pressure from procfs.
#[derive(Debug, Clone)]
pub struct HostStatusSource {
    hostname: String,
    ip: String,
}

impl HostStatusSource {
    pub fn new(hostname: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ip: ip.into(),
        }
    }
}

#[async_trait]
impl NodeStatusSource for HostStatusSource {
    async fn collect(&self) -> Result<NodeStatus, SyncError> {
        let loadavg = std::fs::read_to_string("/proc/loadavg")
            .map_err(|e| SyncError::Convergence(format!("read /proc/loadavg: {e}")))?;
        let meminfo = std::fs::read_to_string("/proc/meminfo")
            .map_err(|e| SyncError::Convergence(format!("read /proc/meminfo: {e}")))?;

        let load = parse_loadavg(&loadavg)
            .ok_or_else(|| SyncError::Convergence("malformed /proc/loadavg".to_string()))?;
        let (total, available) = parse_meminfo(&meminfo);

        Ok(NodeStatus {
            hostname: self.hostname.clone(),
            ip: self.ip.clone(),
            condition: vec![conditions::READY.to_string()],
            num_pods: 0,
            cpu_usage: cpu_usage(load, get_cpu_count()),
            memory_usage: memory_usage(total, available),
        })
    }
}

fn get_cpu_count() -> i32 {
    #[cfg(unix)]
    {
        let count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if count > 0 {
            return count as i32;
        }
    }

    std::thread::available_parallelism()
        .map(|p| p.get() as i32)
        .unwrap_or(1)
}

/// One-minute load average.
fn parse_loadavg(content: &str) -> Option<f64> {
    content.split_whitespace().next()?.parse().ok()
}

fn cpu_usage(load: f64, cores: i32) -> f64 {
    (load / f64::from(cores.max(1))).clamp(0.0, 1.0)
}

fn memory_usage(total: i64, available: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (1.0 - available as f64 / total as f64).clamp(0.0, 1.0)
}

/// Returns `(total, available)` in bytes.
fn parse_meminfo(content: &str) -> (i64, i64) {
    let mut total: i64 = 0;
    let mut available: i64 = 0;
    let mut free: i64 = 0;
    let mut buffers: i64 = 0;
    let mut cached: i64 = 0;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(field), Some(raw)) = (parts.next(), parts.next()) else {
            continue;
        };
        const KB_TO_BYTES: i64 = 1024;
        let value: i64 = raw.parse().unwrap_or(0) * KB_TO_BYTES;
        match field {
            "MemTotal:" => total = value,
            "MemAvailable:" => available = value,
            "MemFree:" => free = value,
            "Buffers:" => buffers = value,
            "Cached:" => cached = value,
            _ => {}
        }
    }

    if available == 0 {
        available = free + buffers + cached;
    }

    (total, available)
}
