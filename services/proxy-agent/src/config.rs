//! Configuration for the proxy agent.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Proxy agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Control plane API base URL.
    pub api_server_url: String,

    /// Period of the service and DNS sync loops.
    pub sync_interval: Duration,

    /// Period of the status report loop. Always shorter than `sync_interval`.
    pub report_interval: Duration,

    /// Hosts file edited by the hosts controller.
    pub hosts_file: PathBuf,

    /// Log rendered rules instead of applying them.
    pub iptables_dry_run: bool,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let api_server_url = std::env::var("MK8S_API_SERVER_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());

        let sync_secs: u64 = std::env::var("MK8S_SYNC_INTERVAL")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("MK8S_SYNC_INTERVAL must be an integer (seconds).")?
            .unwrap_or(10)
            .max(1);

        let report_secs: Option<u64> = std::env::var("MK8S_REPORT_INTERVAL")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("MK8S_REPORT_INTERVAL must be an integer (seconds).")?;

        let (sync_interval, report_interval) =
            intervals(Duration::from_secs(sync_secs), report_secs.map(Duration::from_secs));

        let hosts_file = std::env::var("MK8S_HOSTS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/etc/hosts"));

        let iptables_dry_run = std::env::var("MK8S_IPTABLES_DRY_RUN")
            .ok()
            .map(|v| parse_bool(&v))
            .transpose()
            .context("MK8S_IPTABLES_DRY_RUN must be true or false.")?
            .unwrap_or(false);

        let log_level = std::env::var("MK8S_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            api_server_url,
            sync_interval,
            report_interval,
            hosts_file,
            iptables_dry_run,
            log_level,
        })
    }
}

/// Resolve the sync and report periods. The report period must be strictly
/// shorter than the sync period and falls back to half of it otherwise.
pub fn intervals(sync: Duration, report: Option<Duration>) -> (Duration, Duration) {
    let half = sync / 2;
    let report = match report {
        Some(r) if !r.is_zero() && r < sync => r,
        Some(_) => half,
        None if mk8s_reconcile::DEFAULT_REPORT_INTERVAL < sync => {
            mk8s_reconcile::DEFAULT_REPORT_INTERVAL
        }
        None => half,
    };
    (sync, report)
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("invalid boolean: {other}"),
    }
}
