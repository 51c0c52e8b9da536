//! Integration tests for the report loop and the spawned agent.

mod common;

use std::time::Duration;

use common::{dns, endpoint, eventually, mount_list, service, Harness};
use tokio::sync::watch;
use wiremock::MockServer;

async fn desired_state(server: &MockServer) {
    mount_list(server, "/services", &[service("web", "10.96.0.10")]).await;
    mount_list(server, "/endpoints", &[endpoint("web", &["10.244.1.2"])]).await;
    mount_list(server, "/dns", &[dns("web.default", "10.96.0.10")]).await;
}

#[tokio::test]
async fn test_clean_cache_sends_nothing() {
    let server = MockServer::start().await;
    let harness = Harness::new(&server);

    harness.agent.report_once().await.unwrap();
    assert!(harness.sink.reports().is_empty());
}

#[tokio::test]
async fn test_report_clears_dirty_flags() {
    let server = MockServer::start().await;
    desired_state(&server).await;
    let harness = Harness::new(&server);
    harness.agent.sync_services_once().await.unwrap();
    harness.agent.sync_dns_once().await.unwrap();

    harness.agent.report_once().await.unwrap();

    let reports = harness.sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].services.as_ref().unwrap().value.rule_count, 1);
    assert_eq!(reports[0].dns.as_ref().unwrap().value.entries.len(), 1);

    let cache = harness.agent.cache();
    assert!(!cache.is_service_dirty().await);
    assert!(!cache.is_dns_dirty().await);

    harness.agent.report_once().await.unwrap();
    assert_eq!(harness.sink.reports().len(), 1);
}

#[tokio::test]
async fn test_failed_report_keeps_snapshots_dirty() {
    let server = MockServer::start().await;
    desired_state(&server).await;
    let harness = Harness::new(&server);
    harness.agent.sync_services_once().await.unwrap();
    harness.sink.set_failing(true);

    assert!(harness.agent.report_once().await.is_err());
    assert!(harness.agent.cache().is_service_dirty().await);

    harness.sink.set_failing(false);
    harness.agent.report_once().await.unwrap();
    assert!(!harness.agent.cache().is_service_dirty().await);
    assert_eq!(harness.sink.reports().len(), 1);
}

#[tokio::test]
async fn test_only_dirty_snapshots_are_reported() {
    let server = MockServer::start().await;
    desired_state(&server).await;
    let harness = Harness::new(&server);
    harness.agent.sync_dns_once().await.unwrap();

    harness.agent.report_once().await.unwrap();

    let reports = harness.sink.reports();
    assert!(reports[0].services.is_none());
    assert!(reports[0].dns.is_some());
}

#[tokio::test]
async fn test_spawned_loops_converge_and_report() {
    let server = MockServer::start().await;
    desired_state(&server).await;
    let harness = Harness::new(&server);
    harness.agent.init().await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = harness.agent.spawn(shutdown_rx);

    let sink = harness.sink.clone();
    eventually(|| {
        let reports = sink.reports();
        reports.iter().any(|r| r.services.is_some()) && reports.iter().any(|r| r.dns.is_some())
    })
    .await;

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), running.join())
        .await
        .unwrap();

    assert_eq!(harness.rules.applier().restores().len(), 1);
    assert!(harness.hosts().contains("10.96.0.10\tweb.default"));
}
