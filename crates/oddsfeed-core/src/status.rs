//! Producer recovery status and the reasons it changes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Recovery status of a single producer.
///
/// # Transitions
///
/// - **NotStarted** → **Started** on the first system heartbeat
/// - **Started** → **Completed** / **Delayed** once every session confirmed
/// - **Started** → **Error** on interruption, time-out, or failure
/// - **Completed** ↔ **Delayed** as the consumer falls behind and catches up
/// - **Completed** / **Delayed** → **Error** on alive violation or disconnect
/// - any → **FatalError**, which is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerRecoveryStatus {
    /// No recovery attempted yet.
    NotStarted,

    /// A recovery is in flight.
    Started,

    /// Caught up; normal processing.
    Completed,

    /// Caught up, but the consumer processes slower than the producer produces.
    Delayed,

    /// A recovery is required and will be retried.
    Error,

    /// Recovery is impossible; the feed must stop.
    FatalError,
}

impl ProducerRecoveryStatus {
    /// Whether the producer is delivering up-to-date data.
    ///
    /// Only `Completed` counts as up; every other status means the producer
    /// is down from the application's point of view.
    pub fn is_up(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Whether feed messages may be forwarded to the application.
    pub fn allows_dispatch(&self) -> bool {
        matches!(self, Self::Completed | Self::Delayed)
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FatalError)
    }

    pub(crate) fn as_u8(&self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Started => 1,
            Self::Completed => 2,
            Self::Delayed => 3,
            Self::Error => 4,
            Self::FatalError => 5,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotStarted,
            1 => Self::Started,
            2 => Self::Completed,
            3 => Self::Delayed,
            4 => Self::Error,
            _ => Self::FatalError,
        }
    }
}

impl fmt::Display for ProducerRecoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not_started",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Delayed => "delayed",
            Self::Error => "error",
            Self::FatalError => "fatal_error",
        };
        f.write_str(name)
    }
}

/// Why a producer's status changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusChangeReason {
    /// A recovery request was accepted by the API.
    RecoveryStarted,

    /// The first recovery since start-up finished.
    FirstRecoveryCompleted,

    /// A later recovery finished.
    RecoveryCompleted,

    /// Recovery finished, or the producer was up, while the consumer lags.
    ProcessingQueueDelayViolation,

    /// The consumer caught up again.
    ProcessingQueueDelayStabilized,

    /// An expected system heartbeat did not arrive in time.
    AliveIntervalViolation,

    /// The broker connection went down.
    ConnectionDown,

    /// The system session stopped propagating the producer.
    ProducerUnsubscribed,

    /// The recovery request could not be issued.
    RecoveryFailed,

    /// A gap was observed while the recovery was running.
    RecoveryInterrupted,

    /// The recovery did not finish within its time budget.
    RecoveryTimedOut,

    /// Status and operation disagreed and were reconciled.
    InconsistentState,

    /// The required look-back exceeds what the API can serve.
    FatalLookback,
}
