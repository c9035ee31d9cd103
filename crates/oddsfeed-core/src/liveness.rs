//! Heartbeat and processing-delay tracking for one producer.
//!
//! The system session carries the producer's heartbeats as the producer
//! generates them; user sessions deliver the same heartbeats interleaved with
//! data, so they lag whenever the consumer processes slower than the producer
//! produces. Comparing the two yields the "behind" signal, and the local time
//! since the last system heartbeat yields the "alive violation" signal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::clock::Clock;
use crate::config::RecoverySettings;
use crate::messages::{AliveMessage, FeedMessage};
use crate::{ProducerId, SessionId, Timestamp};

#[derive(Debug, Clone, Copy)]
struct SystemAlive {
    /// Producer-side generation time
    timestamp: Timestamp,
    /// Local receive time
    received_at: Timestamp,
}

/// Liveness state of one producer.
///
/// Owned by the producer's recovery manager and only touched under its lock.
#[derive(Debug)]
pub struct LivenessTracker {
    producer_id: ProducerId,
    clock: Arc<dyn Clock>,
    inactivity_window: Duration,
    max_processing_delay: Duration,
    created_at: Timestamp,
    system_alive: Option<SystemAlive>,
    user_alive: HashMap<SessionId, Timestamp>,
    user_latest: HashMap<SessionId, Timestamp>,
}

impl LivenessTracker {
    pub fn new(producer_id: ProducerId, settings: &RecoverySettings, clock: Arc<dyn Clock>) -> Self {
        let created_at = clock.now();
        Self {
            producer_id,
            clock,
            inactivity_window: settings.inactivity_window,
            max_processing_delay: settings.max_processing_delay,
            created_at,
            system_alive: None,
            user_alive: HashMap::new(),
            user_latest: HashMap::new(),
        }
    }

    /// Record a heartbeat from the system session.
    pub fn on_system_alive(&mut self, alive: &AliveMessage) {
        self.system_alive = Some(SystemAlive {
            timestamp: alive.timestamp,
            received_at: self.clock.now(),
        });
    }

    /// Record a message received on a user session.
    ///
    /// Heartbeats only count while the session reports itself subscribed;
    /// every other message only feeds the delay measurement.
    pub fn on_user_message(&mut self, message: &FeedMessage, session: &SessionId) {
        match message {
            FeedMessage::Alive(alive) if !alive.subscribed => {
                debug!(
                    producer_id = %self.producer_id,
                    session = %session,
                    "Ignoring unsubscribed user-session heartbeat"
                );
            }
            FeedMessage::Alive(alive) => {
                self.user_alive.insert(session.clone(), alive.timestamp);
                self.record_user_timestamp(session, alive.timestamp);
            }
            other => self.record_user_timestamp(session, other.timestamp()),
        }
    }

    /// Whether the last system heartbeat is older than the inactivity window.
    ///
    /// Before the first heartbeat the window is measured from creation.
    pub fn is_alive_violated(&self) -> bool {
        self.time_since_system_alive() > self.inactivity_window
    }

    /// Local time elapsed since the last system heartbeat (or creation).
    pub fn time_since_system_alive(&self) -> Duration {
        let reference = self
            .system_alive
            .map(|a| a.received_at)
            .unwrap_or(self.created_at);
        self.clock.now().duration_since(reference)
    }

    /// Whether the slowest user session lags the system session by more than
    /// the processing-delay threshold.
    ///
    /// `false` until both a system heartbeat and user traffic have been seen.
    pub fn is_behind(&self) -> bool {
        match (self.system_alive_timestamp(), self.oldest_user_timestamp()) {
            (Some(system), Some(oldest)) => {
                system.duration_since(oldest) > self.max_processing_delay
            }
            _ => false,
        }
    }

    /// Oldest of the latest subscribed heartbeats seen on each user session.
    pub fn oldest_user_alive_timestamp(&self) -> Option<Timestamp> {
        self.user_alive.values().min().copied()
    }

    /// Producer-side timestamp of the last system heartbeat.
    pub fn system_alive_timestamp(&self) -> Option<Timestamp> {
        self.system_alive.map(|a| a.timestamp)
    }

    /// Local receive time of the last system heartbeat.
    pub fn system_alive_received_at(&self) -> Option<Timestamp> {
        self.system_alive.map(|a| a.received_at)
    }

    fn oldest_user_timestamp(&self) -> Option<Timestamp> {
        self.user_latest.values().min().copied()
    }

    fn record_user_timestamp(&mut self, session: &SessionId, timestamp: Timestamp) {
        let latest = self
            .user_latest
            .entry(session.clone())
            .or_insert(timestamp);
        if timestamp > *latest {
            *latest = timestamp;
        }
    }
}

#[cfg(test)]
#[path = "liveness_tests.rs"]
mod tests;
