//! # Odds Feed Core
//!
//! Producer recovery orchestration for the odds feed SDK.
//!
//! The feed is delivered over several broker sessions. Whenever a session
//! drops, stalls, or falls behind, messages may have been missed and the SDK
//! has to ask the control API to re-deliver them ("recovery"). This crate owns
//! the decision logic for that:
//!
//! - [`producer`]: per-producer identity and mutable recovery state
//! - [`registry`]: the set of producers, frozen once feed processing starts
//! - [`liveness`]: heartbeat and processing-delay tracking
//! - [`operation`]: one recovery attempt and its per-session confirmations
//! - [`issuer`]: the recovery requests sent to the control API
//! - [`manager`]: the per-producer recovery state machine
//! - [`coordinator`]: message routing, connection hooks, and periodic polling
//!
//! ## Usage
//!
//! ```rust
//! use oddsfeed_core::{ProducerId, RequestId, SessionId};
//!
//! let producer = ProducerId::new(1);
//! let request = RequestId::new(42);
//! let session = SessionId::new("live").unwrap();
//!
//! assert_eq!(producer.as_u32(), 1);
//! assert_eq!(request.to_string(), "42");
//! assert_eq!(session.as_str(), "live");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Numeric identifier of a feed producer (e.g. 1 = live odds, 3 = pre-match).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProducerId(u32);

impl ProducerId {
    /// Create new producer ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get numeric value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProducerId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.parse::<u32>().map_err(|_| ParseError::InvalidFormat {
            expected: "positive integer".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self::new(id))
    }
}

/// Identifier of a recovery request.
///
/// Issued from a monotonic sequence and echoed back by the feed in
/// `snapshot_complete` messages, which is how confirmations are correlated
/// with the request that triggered them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(u64);

impl RequestId {
    /// Create new request ID
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a broker session the feed is consumed through.
///
/// Every message handed to the recovery layer is tagged with the session it
/// arrived on, and each session covering a producer has to confirm a recovery
/// before it is considered complete.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create new session ID with validation
    ///
    /// # Validation Rules
    /// - Must be 1-64 characters
    /// - Must contain only printable ASCII without whitespace
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();

        if value.is_empty() {
            return Err(ValidationError::Required {
                field: "session_id".to_string(),
            });
        }

        if value.len() > 64 {
            return Err(ValidationError::TooLong {
                field: "session_id".to_string(),
                max_length: 64,
            });
        }

        if !value.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ValidationError::InvalidCharacters {
                field: "session_id".to_string(),
                invalid_chars: "non-ASCII or whitespace".to_string(),
            });
        }

        Ok(Self(value))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Sport event identifier in URN form, e.g. `sr:match:12345`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(String);

impl EventId {
    /// Create new event ID with validation
    ///
    /// # Validation Rules
    /// - Must have the form `{prefix}:{type}:{id}`
    /// - No component may be empty
    /// - The id component must be numeric
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();

        if value.is_empty() {
            return Err(ValidationError::Required {
                field: "event_id".to_string(),
            });
        }

        let parts: Vec<&str> = value.split(':').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(ValidationError::InvalidFormat {
                field: "event_id".to_string(),
                message: "expected '{prefix}:{type}:{id}'".to_string(),
            });
        }

        if !parts[2].chars().all(|c| c.is_ascii_digit()) {
            return Err(ValidationError::InvalidFormat {
                field: "event_id".to_string(),
                message: "id component must be numeric".to_string(),
            });
        }

        Ok(Self(value))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// Time Types
// ============================================================================

/// UTC timestamp with millisecond precision
///
/// Feed messages carry their timestamps as epoch milliseconds, while the
/// control API takes epoch seconds; both conversions live here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Build from epoch milliseconds; `None` if out of range
    pub fn from_epoch_millis(millis: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(millis).map(Self)
    }

    /// Milliseconds since the Unix epoch
    pub fn epoch_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Whole seconds since the Unix epoch
    pub fn epoch_seconds(&self) -> i64 {
        self.0.timestamp()
    }

    /// Add duration to timestamp
    ///
    /// Saturates at the latest representable instant.
    pub fn add_duration(&self, duration: Duration) -> Self {
        chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| self.0.checked_add_signed(d))
            .map(Self)
            .unwrap_or(Self(DateTime::<Utc>::MAX_UTC))
    }

    /// Subtract duration from timestamp
    ///
    /// Saturates at the earliest representable instant.
    pub fn subtract_duration(&self, duration: Duration) -> Self {
        chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| self.0.checked_sub_signed(d))
            .map(Self)
            .unwrap_or(Self(DateTime::<Utc>::MIN_UTC))
    }

    /// Get duration since another timestamp
    ///
    /// Saturates to zero when `other` is later than `self`.
    pub fn duration_since(&self, other: Self) -> Duration {
        let chrono_duration = self.0.signed_duration_since(other.0);
        chrono_duration.to_std().unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error type for input validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },

    #[error("Field '{field}' contains invalid characters: {invalid_chars}")]
    InvalidCharacters {
        field: String,
        invalid_chars: String,
    },
}

/// Error type for string parsing failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

// ============================================================================
// Module declarations
// ============================================================================

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod issuer;
pub mod liveness;
pub mod logging;
pub mod manager;
pub mod messages;
pub mod monitoring;
pub mod operation;
pub mod producer;
pub mod registry;
pub mod status;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ApiConfig, ConfigError, LoggingConfig, MessageInterest, ProducerConfig, RecoveryConfig,
    RecoverySettings, SdkConfig, SessionConfig,
};
pub use coordinator::{FeedRecoveryCoordinator, FeedRecoveryCoordinatorBuilder};
pub use error::{ApiError, InitiationError, RecoveryError, RegistryError};
pub use events::{
    EventRecoveryCompleted, NoOpRecoveryEventHandler, RecoveryEvent, RecoveryEventDispatcher,
    RecoveryEventHandler, RecoveryInitiated, StatusChange,
};
pub use issuer::{EventRecoveryKind, InitiationOutcome, RecoveryRequestIssuer, RequestIdSequence};
pub use liveness::LivenessTracker;
pub use manager::ProducerRecoveryManager;
pub use messages::{AliveMessage, DataMessage, FeedMessage, MessageKind, SnapshotCompleteMessage};
pub use monitoring::{MetricsCollector, NoOpMetricsCollector};
pub use operation::{RecoveryOperation, RecoveryResult, SkipReason, StartOutcome};
pub use producer::{Producer, ProducerScope, RecoveryInfo};
pub use registry::ProducerRegistry;
pub use status::{ProducerRecoveryStatus, StatusChangeReason};
pub use transport::{HttpRecoveryTransport, RecoveryTransport};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
