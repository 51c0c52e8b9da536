//! Shared fakes for proxy agent integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mk8s_api::{
    DnsRecord, Endpoint, EndpointAddress, Service, ServiceMetadata, ServicePort, ServiceSpec,
};
use mk8s_proxy_agent::config::Config;
use mk8s_proxy_agent::{
    ControlPlaneClient, EtcHostsController, IptablesController, ProxyAgent, RuleApplier,
    StatusReport, StatusSink,
};
use mk8s_reconcile::SyncError;
use serde::Serialize;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn test_config(api_server_url: &str, hosts_file: &Path) -> Config {
    Config {
        api_server_url: api_server_url.to_string(),
        sync_interval: Duration::from_millis(50),
        report_interval: Duration::from_millis(20),
        hosts_file: hosts_file.to_path_buf(),
        iptables_dry_run: true,
        log_level: "debug".to_string(),
    }
}

pub fn service(id: &str, cluster_ip: &str) -> Service {
    Service {
        metadata: ServiceMetadata {
            id: id.to_string(),
            name: id.to_string(),
            namespace: "default".to_string(),
            ..ServiceMetadata::default()
        },
        spec: ServiceSpec {
            cluster_ip: cluster_ip.to_string(),
            ports: vec![ServicePort {
                name: "http".to_string(),
                port: 80,
                target_port: 8080,
                ..ServicePort::default()
            }],
            ..ServiceSpec::default()
        },
    }
}

pub fn endpoint(service_id: &str, ips: &[&str]) -> Endpoint {
    Endpoint {
        service_id: service_id.to_string(),
        addresses: ips
            .iter()
            .map(|ip| EndpointAddress {
                ip: ip.to_string(),
                ..EndpointAddress::default()
            })
            .collect(),
        ..Endpoint::default()
    }
}

pub fn dns(host: &str, ip: &str) -> DnsRecord {
    DnsRecord {
        host: host.to_string(),
        ip: ip.to_string(),
        ..DnsRecord::default()
    }
}

/// Serve `body` as JSON on `GET /api/v1{route}`.
pub async fn mount_list<T: Serialize>(server: &MockServer, route: &str, body: &[T]) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v1{route}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Fail `GET /api/v1{route}` with `status`.
pub async fn mount_failure(server: &MockServer, route: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v1{route}")))
        .respond_with(ResponseTemplate::new(status).set_body_string("unavailable"))
        .mount(server)
        .await;
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

// =============================================================================
// Recording applier
// =============================================================================

/// Counts host rule changes instead of running iptables.
#[derive(Debug, Default)]
pub struct RecordingApplier {
    restores: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingApplier {
    pub fn restores(&self) -> Vec<String> {
        self.restores.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RuleApplier for RecordingApplier {
    async fn ensure_chain(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn restore(&self, payload: &str) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("iptables-restore failed: resource busy");
        }
        self.restores.lock().unwrap().push(payload.to_string());
        Ok(())
    }
}

// =============================================================================
// Recording sink
// =============================================================================

#[derive(Debug, Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<StatusReport>>,
    fail: AtomicBool,
}

impl RecordingSink {
    pub fn reports(&self) -> Vec<StatusReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn send(&self, report: &StatusReport) -> Result<(), SyncError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::status("POST /status", 503, "unavailable"));
        }
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub agent: Arc<ProxyAgent>,
    pub rules: Arc<IptablesController<RecordingApplier>>,
    pub sink: Arc<RecordingSink>,
    pub hosts_file: tempfile::NamedTempFile,
}

impl Harness {
    pub fn new(server: &MockServer) -> Self {
        let hosts_file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(hosts_file.path(), "127.0.0.1\tlocalhost\n").unwrap();

        let config = test_config(&server.uri(), hosts_file.path());
        let client = Arc::new(ControlPlaneClient::new(&config).unwrap());
        let rules = Arc::new(IptablesController::new(RecordingApplier::default()));
        let sink = Arc::new(RecordingSink::default());

        let agent = Arc::new(ProxyAgent::new(
            client,
            rules.clone(),
            Arc::new(EtcHostsController::new(config.hosts_file.clone())),
            sink.clone(),
            config.sync_interval,
            config.report_interval,
        ));

        Self {
            agent,
            rules,
            sink,
            hosts_file,
        }
    }

    pub fn hosts(&self) -> String {
        std::fs::read_to_string(self.hosts_file.path()).unwrap()
    }
}
