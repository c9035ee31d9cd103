//! Tests for [`LivenessTracker`].

use super::*;
use crate::clock::ManualClock;
use crate::messages::{DataMessage, MessageKind};

const PRODUCER: ProducerId = ProducerId::new(1);

fn start() -> Timestamp {
    Timestamp::from_epoch_millis(1_700_000_000_000).unwrap()
}

fn at(seconds: u64) -> Timestamp {
    start().add_duration(Duration::from_secs(seconds))
}

fn session(name: &str) -> SessionId {
    SessionId::new(name).unwrap()
}

fn setup() -> (ManualClock, LivenessTracker) {
    let clock = ManualClock::new(start());
    let settings = RecoverySettings {
        inactivity_window: Duration::from_secs(20),
        max_processing_delay: Duration::from_secs(20),
        ..RecoverySettings::default()
    };
    let tracker = LivenessTracker::new(PRODUCER, &settings, Arc::new(clock.clone()));
    (clock, tracker)
}

fn user_alive(seconds: u64, subscribed: bool) -> FeedMessage {
    AliveMessage::new(PRODUCER, at(seconds), subscribed).into()
}

mod alive_violation_tests {
    use super::*;

    #[test]
    fn test_no_violation_within_window() {
        let (clock, mut tracker) = setup();
        tracker.on_system_alive(&AliveMessage::new(PRODUCER, at(0), true));

        clock.advance(Duration::from_secs(20));

        assert!(!tracker.is_alive_violated());
    }

    #[test]
    fn test_violation_after_window() {
        let (clock, mut tracker) = setup();
        tracker.on_system_alive(&AliveMessage::new(PRODUCER, at(0), true));

        clock.advance(Duration::from_secs(21));

        assert!(tracker.is_alive_violated());
    }

    /// Verify the window is measured from creation before any heartbeat.
    #[test]
    fn test_violation_measured_from_creation() {
        let (clock, tracker) = setup();

        clock.advance(Duration::from_secs(10));
        assert!(!tracker.is_alive_violated());

        clock.advance(Duration::from_secs(51));
        assert!(tracker.is_alive_violated());
        assert_eq!(tracker.time_since_system_alive(), Duration::from_secs(61));
    }

    /// Verify liveness uses the local receive time, not the producer timestamp.
    #[test]
    fn test_violation_uses_receive_time() {
        let (clock, mut tracker) = setup();
        clock.advance(Duration::from_secs(100));

        // Producer clock far behind the local clock
        tracker.on_system_alive(&AliveMessage::new(PRODUCER, at(0), true));

        assert!(!tracker.is_alive_violated());
        assert_eq!(tracker.system_alive_received_at(), Some(at(100)));
        assert_eq!(tracker.system_alive_timestamp(), Some(at(0)));
    }
}

mod behind_tests {
    use super::*;

    #[test]
    fn test_not_behind_without_data() {
        let (_clock, mut tracker) = setup();
        tracker.on_system_alive(&AliveMessage::new(PRODUCER, at(100), true));

        assert!(!tracker.is_behind());
    }

    #[test]
    fn test_behind_when_oldest_session_lags() {
        let (_clock, mut tracker) = setup();
        tracker.on_user_message(&user_alive(95, true), &session("live"));
        tracker.on_user_message(&user_alive(70, true), &session("virtual"));
        tracker.on_system_alive(&AliveMessage::new(PRODUCER, at(100), true));

        assert!(tracker.is_behind());
        assert_eq!(tracker.oldest_user_alive_timestamp(), Some(at(70)));
    }

    #[test]
    fn test_catching_up_clears_behind() {
        let (_clock, mut tracker) = setup();
        tracker.on_system_alive(&AliveMessage::new(PRODUCER, at(100), true));
        tracker.on_user_message(&user_alive(70, true), &session("live"));
        assert!(tracker.is_behind());

        tracker.on_user_message(&user_alive(90, true), &session("live"));

        assert!(!tracker.is_behind());
    }

    /// Verify data messages advance the delay measurement but not user heartbeats.
    #[test]
    fn test_data_messages_count_for_delay_only() {
        let (_clock, mut tracker) = setup();
        tracker.on_system_alive(&AliveMessage::new(PRODUCER, at(100), true));
        tracker.on_user_message(&user_alive(50, true), &session("live"));
        assert!(tracker.is_behind());

        let data = DataMessage::new(PRODUCER, MessageKind::OddsChange, at(99));
        tracker.on_user_message(&data.into(), &session("live"));

        assert!(!tracker.is_behind());
        assert_eq!(tracker.oldest_user_alive_timestamp(), Some(at(50)));
    }

    #[test]
    fn test_unsubscribed_user_alive_ignored() {
        let (_clock, mut tracker) = setup();

        tracker.on_user_message(&user_alive(50, false), &session("live"));

        assert!(tracker.oldest_user_alive_timestamp().is_none());
    }

    #[test]
    fn test_out_of_order_user_timestamp_does_not_regress() {
        let (_clock, mut tracker) = setup();
        tracker.on_system_alive(&AliveMessage::new(PRODUCER, at(100), true));
        let newer = DataMessage::new(PRODUCER, MessageKind::BetStop, at(99));
        let older = DataMessage::new(PRODUCER, MessageKind::BetStop, at(10));

        tracker.on_user_message(&newer.into(), &session("live"));
        tracker.on_user_message(&older.into(), &session("live"));

        assert!(!tracker.is_behind());
    }
}
