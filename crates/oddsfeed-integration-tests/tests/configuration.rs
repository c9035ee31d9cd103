//! Integration tests for building a feed from a configuration file
//!
//! These tests verify that loaded settings decide which producers are
//! managed and how their recoveries behave.

mod common;

use common::{mount_recovery_endpoint, t0, TestFeed, LIVE_ODDS};
use oddsfeed_core::{ProducerId, ProducerRecoveryStatus, SdkConfig};
use std::io::Write;
use std::time::Duration;
use wiremock::MockServer;

const PREMATCH: ProducerId = ProducerId::new(3);
const VIRTUAL: ProducerId = ProducerId::new(6);

fn write_config(server: &MockServer, extra: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .unwrap();
    writeln!(
        file,
        r#"
recovery:
  min_interval_between_recovery_requests_seconds: 60
{extra}
producers:
  - id: 1
    name: LO
    api_url: {uri}/v1/liveodds/
    scope: live
  - id: 3
    name: Ctrl
    api_url: {uri}/v1/pre/
    scope: prematch
  - id: 6
    name: VF
    api_url: {uri}/v1/vf/
    scope: virtual
sessions:
  - id: live
    interest: live_messages_only
  - id: prematch
    interest: prematch_messages_only
"#,
        extra = extra,
        uri = server.uri()
    )
    .unwrap();
    file
}

/// Verify producers no session receives are left unmanaged
#[tokio::test]
async fn test_session_interest_selects_managed_producers() {
    // Arrange
    let server = MockServer::start().await;
    let file = write_config(&server, "");

    // Act
    let config = SdkConfig::load(Some(file.path())).expect("valid configuration");
    let feed = TestFeed::open_with(server, config, |_| {});

    // Assert
    assert!(feed.coordinator.manager(LIVE_ODDS).is_some());
    assert!(feed.coordinator.manager(PREMATCH).is_some());
    assert!(feed.coordinator.manager(VIRTUAL).is_none());
    assert!(feed.coordinator.registry().get(VIRTUAL).is_disabled());
}

/// Verify the configured rate limit applies to recovery retries
#[tokio::test]
async fn test_configured_min_interval_is_applied() {
    // Arrange: recover once, then lose the system session
    let server = MockServer::start().await;
    mount_recovery_endpoint(&server).await;
    let file = write_config(&server, "");
    let config = SdkConfig::load(Some(file.path())).expect("valid configuration");
    let feed = TestFeed::open_with(server, config, |_| {});

    feed.system_alive(t0()).await;
    let request_id = feed.running_request_id().await;
    feed.snapshot_complete(&common::live_session(), request_id, t0())
        .await;
    assert_eq!(feed.status(), ProducerRecoveryStatus::Completed);
    feed.advance(Duration::from_secs(21));
    feed.poll().await;
    assert_eq!(feed.status(), ProducerRecoveryStatus::Error);

    // Act: 40s after the first attempt is fine by default but not here
    feed.advance(Duration::from_secs(19));
    feed.system_alive(t0().add_duration(Duration::from_secs(40)))
        .await;

    // Assert
    assert_eq!(feed.status(), ProducerRecoveryStatus::Error);
    assert_eq!(feed.recovery_requests().await.len(), 1);

    // Act
    feed.advance(Duration::from_secs(20));
    feed.system_alive(t0().add_duration(Duration::from_secs(60)))
        .await;

    // Assert
    assert_eq!(feed.status(), ProducerRecoveryStatus::Started);
    assert_eq!(feed.recovery_requests().await.len(), 2);
}

/// Verify replay mode keeps every producer available without recovering
#[tokio::test]
async fn test_ignore_recovery_mode() {
    // Arrange
    let server = MockServer::start().await;
    let file = write_config(&server, "  ignore_recovery: true");
    let config = SdkConfig::load(Some(file.path())).expect("valid configuration");
    let feed = TestFeed::open_with(server, config, |_| {});

    // Act
    feed.system_alive(t0()).await;
    feed.advance(Duration::from_secs(600));
    feed.poll().await;

    // Assert
    assert_eq!(feed.status(), ProducerRecoveryStatus::Completed);
    assert!(!feed.coordinator.registry().get(LIVE_ODDS).is_producer_down());
    assert!(feed.recovery_requests().await.is_empty());
}
