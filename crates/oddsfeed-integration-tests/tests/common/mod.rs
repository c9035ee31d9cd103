//! Common test utilities for odds feed recovery integration tests
//!
//! This module provides:
//! - A feed harness wiring a [`FeedRecoveryCoordinator`] to a wiremock
//!   control API and a manually driven clock
//! - A channel-backed notification handler
//! - Message builders for the system and user sessions

#![allow(dead_code)]

use async_trait::async_trait;
use oddsfeed_core::{
    AliveMessage, Clock, DataMessage, FeedMessage, FeedRecoveryCoordinator, ManualClock, MessageInterest,
    MessageKind, ProducerConfig, ProducerId, ProducerRecoveryStatus, ProducerScope, RecoveryEvent,
    RecoveryEventHandler, RequestId, SdkConfig, SessionConfig, SessionId, SnapshotCompleteMessage,
    StatusChange, Timestamp,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const LIVE_ODDS: ProducerId = ProducerId::new(1);

pub const RECOVERY_PATH: &str = "/v1/liveodds/recovery/initiate_request";

// ============================================================================
// Notification capture
// ============================================================================

/// Forwards every notification into a channel the test reads from.
pub struct ChannelHandler {
    sender: mpsc::UnboundedSender<RecoveryEvent>,
}

#[async_trait]
impl RecoveryEventHandler for ChannelHandler {
    async fn handle(&self, event: RecoveryEvent) {
        let _ = self.sender.send(event);
    }
}

// ============================================================================
// Feed harness
// ============================================================================

/// Coordinator for one live producer received on two sessions.
pub struct TestFeed {
    pub server: MockServer,
    pub clock: ManualClock,
    pub coordinator: FeedRecoveryCoordinator,
    events: mpsc::UnboundedReceiver<RecoveryEvent>,
}

pub fn t0() -> Timestamp {
    Timestamp::from_epoch_millis(1_700_000_000_000).unwrap()
}

pub fn live_session() -> SessionId {
    SessionId::new("live").unwrap()
}

pub fn all_session() -> SessionId {
    SessionId::new("all").unwrap()
}

/// Configuration used by [`TestFeed::start`], pointed at `server`.
pub fn feed_config(server: &MockServer) -> SdkConfig {
    SdkConfig {
        producers: vec![ProducerConfig {
            id: LIVE_ODDS,
            name: "LO".to_string(),
            description: "Live Odds".to_string(),
            api_url: format!("{}/v1/liveodds/", server.uri()),
            scope: ProducerScope::Live,
            active: true,
            stateful_recovery_window_minutes: 60,
        }],
        sessions: vec![
            SessionConfig::new("live", MessageInterest::LiveMessagesOnly),
            SessionConfig::new("all", MessageInterest::AllMessages),
        ],
        ..SdkConfig::default()
    }
}

/// Mount an accepting recovery endpoint.
pub async fn mount_recovery_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(RECOVERY_PATH))
        .respond_with(ResponseTemplate::new(202))
        .mount(server)
        .await;
}

impl TestFeed {
    /// Start a feed with an accepting recovery endpoint.
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        mount_recovery_endpoint(&server).await;
        let config = feed_config(&server);
        Self::open_with(server, config, |_| {})
    }

    /// Build and open a coordinator for `config`.
    ///
    /// `prepare` runs before the registry is locked. Status polls are not
    /// spawned; tests tick them through [`TestFeed::poll`].
    pub fn open_with(
        server: MockServer,
        config: SdkConfig,
        prepare: impl FnOnce(&TestFeed),
    ) -> Self {
        let clock = ManualClock::new(t0());
        let (sender, events) = mpsc::unbounded_channel();

        let coordinator = FeedRecoveryCoordinator::builder(config)
            .clock(Arc::new(clock.clone()))
            .event_handler(Arc::new(ChannelHandler { sender }))
            .poll_status(false)
            .build()
            .expect("valid test configuration");

        let feed = Self {
            server,
            clock,
            coordinator,
            events,
        };
        prepare(&feed);
        feed.coordinator.open();
        feed
    }

    pub fn status(&self) -> ProducerRecoveryStatus {
        self.coordinator
            .status(LIVE_ODDS)
            .expect("live odds is managed")
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Advance the clock.
    pub fn advance(&self, duration: Duration) {
        self.clock.advance(duration);
    }

    /// One status poll tick.
    pub async fn poll(&self) {
        self.coordinator
            .check_status()
            .await
            .expect("producer is not fatal");
    }

    pub async fn system_alive(&self, timestamp: Timestamp) {
        self.coordinator
            .process_system_message(&AliveMessage::new(LIVE_ODDS, timestamp, true))
            .await
            .expect("producer is not fatal");
    }

    pub async fn unsubscribed_system_alive(&self, timestamp: Timestamp) {
        self.coordinator
            .process_system_message(&AliveMessage::new(LIVE_ODDS, timestamp, false))
            .await
            .expect("producer is not fatal");
    }

    pub async fn user_message(&self, session: &SessionId, message: FeedMessage) {
        self.coordinator
            .process_user_message(&message, session)
            .await
            .expect("producer is not fatal");
    }

    pub async fn user_alive(&self, session: &SessionId, timestamp: Timestamp) {
        let message = FeedMessage::Alive(AliveMessage::new(LIVE_ODDS, timestamp, true));
        self.user_message(session, message).await;
    }

    pub async fn odds_change(&self, session: &SessionId, timestamp: Timestamp) {
        let message =
            FeedMessage::Data(DataMessage::new(LIVE_ODDS, MessageKind::OddsChange, timestamp));
        self.user_message(session, message).await;
    }

    pub async fn snapshot_complete(
        &self,
        session: &SessionId,
        request_id: RequestId,
        timestamp: Timestamp,
    ) {
        let message = FeedMessage::SnapshotComplete(SnapshotCompleteMessage::new(
            LIVE_ODDS, request_id, timestamp,
        ));
        self.user_message(session, message).await;
    }

    /// Confirm `request_id` on both sessions.
    pub async fn confirm_on_all_sessions(&self, request_id: RequestId, timestamp: Timestamp) {
        self.snapshot_complete(&live_session(), request_id, timestamp)
            .await;
        self.snapshot_complete(&all_session(), request_id, timestamp)
            .await;
    }

    pub async fn running_request_id(&self) -> RequestId {
        self.coordinator
            .manager(LIVE_ODDS)
            .expect("live odds is managed")
            .running_request_id()
            .await
            .expect("a recovery is running")
    }

    /// URLs of every recovery request received so far.
    pub async fn recovery_requests(&self) -> Vec<url::Url> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == RECOVERY_PATH)
            .map(|r| r.url)
            .collect()
    }

    /// Wait for the next status change, skipping other notifications.
    pub async fn next_status_change(&mut self) -> StatusChange {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match self.events.recv().await {
                    Some(RecoveryEvent::StatusChanged(change)) => return change,
                    Some(_) => continue,
                    None => panic!("notification channel closed"),
                }
            }
        })
        .await
        .expect("status change notification")
    }

    /// Wait for the next notification of any kind.
    pub async fn next_event(&mut self) -> RecoveryEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("notification")
            .expect("notification channel open")
    }
}

/// Value of query parameter `name`, if present.
pub fn query_param(url: &url::Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}
