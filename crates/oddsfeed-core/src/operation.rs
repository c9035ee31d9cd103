//! A single recovery attempt and the confirmations it waits for.
//!
//! A producer's data reaches the consumer over several sessions, and each of
//! them re-delivers its share of a recovery independently, ending with a
//! `snapshot_complete`. The recovery is only over once every session that
//! receives the producer has confirmed it.
//!
//! One [`RecoveryOperation`] exists per producer and is reused: it is idle,
//! then [`start`](RecoveryOperation::start)ed, then ends through completion,
//! time-out, or [`reset`](RecoveryOperation::reset).

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::RecoverySettings;
use crate::error::{ApiError, InitiationError};
use crate::issuer::{InitiationOutcome, RecoveryRequestIssuer};
use crate::producer::Producer;
use crate::{RequestId, SessionId, Timestamp};

/// Why [`RecoveryOperation::start`] did not send anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The operation is already running.
    AlreadyRunning,

    /// The broker connection is known to be down.
    ConnectionDown,

    /// The previous attempt was too recent.
    RateLimited { retry_in: Duration },
}

/// Result of [`RecoveryOperation::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The API accepted the request; the operation is running.
    Started(RequestId),

    /// No decision was made; try again later.
    Skipped(SkipReason),

    /// The request failed and may be retried.
    Failed {
        request_id: RequestId,
        error: ApiError,
    },

    /// The required recovery can never be served.
    Fatal(InitiationError),
}

/// How a recovery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryResult {
    pub request_id: RequestId,

    /// `true` only if every session confirmed and no gap was observed
    pub success: bool,

    /// Earliest gap observed while running
    pub interrupted_at: Option<Timestamp>,

    pub timed_out: bool,

    pub started_at: Timestamp,

    pub duration: Duration,
}

/// Lifecycle of one producer's recovery.
pub struct RecoveryOperation {
    producer: Arc<Producer>,
    issuer: Arc<RecoveryRequestIssuer>,
    connection_up: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
    min_interval: Duration,
    max_recovery_time: Duration,

    required_sessions: HashSet<SessionId>,
    confirmed_sessions: HashSet<SessionId>,

    running: bool,
    request_id: Option<RequestId>,
    started_at: Option<Timestamp>,
    last_attempt_at: Option<Timestamp>,
    last_progress_at: Option<Timestamp>,
    interrupted_at: Option<Timestamp>,
}

impl fmt::Debug for RecoveryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryOperation")
            .field("producer_id", &self.producer.id())
            .field("running", &self.running)
            .field("request_id", &self.request_id)
            .field("started_at", &self.started_at)
            .field("interrupted_at", &self.interrupted_at)
            .field("confirmed_sessions", &self.confirmed_sessions)
            .finish()
    }
}

impl RecoveryOperation {
    pub fn new(
        producer: Arc<Producer>,
        issuer: Arc<RecoveryRequestIssuer>,
        required_sessions: impl IntoIterator<Item = SessionId>,
        settings: &RecoverySettings,
        connection_up: Arc<AtomicBool>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            producer,
            issuer,
            connection_up,
            clock,
            min_interval: settings.min_interval_between_recovery_requests,
            max_recovery_time: settings.max_recovery_time,
            required_sessions: required_sessions.into_iter().collect(),
            confirmed_sessions: HashSet::new(),
            running: false,
            request_id: None,
            started_at: None,
            last_attempt_at: None,
            last_progress_at: None,
            interrupted_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Id of the current (or last completed) request.
    pub fn request_id(&self) -> Option<RequestId> {
        self.request_id
    }

    pub fn started_at(&self) -> Option<Timestamp> {
        self.started_at
    }

    pub fn interrupted_at(&self) -> Option<Timestamp> {
        self.interrupted_at
    }

    pub fn last_attempt_at(&self) -> Option<Timestamp> {
        self.last_attempt_at
    }

    /// Ask the API for a recovery.
    ///
    /// Recovers from the producer's last-good timestamp, or a full snapshot
    /// when none is known. Refuses without contacting the API while running,
    /// while the connection is down, or within the minimum interval since the
    /// previous attempt.
    pub async fn start(&mut self) -> StartOutcome {
        if self.running {
            return StartOutcome::Skipped(SkipReason::AlreadyRunning);
        }

        if !self.connection_up.load(Ordering::Acquire) {
            debug!(producer_id = %self.producer.id(), "Connection down; not starting recovery");
            return StartOutcome::Skipped(SkipReason::ConnectionDown);
        }

        let now = self.clock.now();
        if let Some(last) = self.last_attempt_at {
            let elapsed = now.duration_since(last);
            if elapsed < self.min_interval {
                let retry_in = self.min_interval - elapsed;
                debug!(
                    producer_id = %self.producer.id(),
                    retry_in_secs = retry_in.as_secs(),
                    "Recovery attempt rate limited"
                );
                return StartOutcome::Skipped(SkipReason::RateLimited { retry_in });
            }
        }

        self.last_attempt_at = Some(now);

        let outcome = match self.producer.last_timestamp_before_disconnect() {
            Some(after) => self.issuer.request_recovery_after(&self.producer, after).await,
            None => self.issuer.request_full_odds_recovery(&self.producer).await,
        };

        match outcome {
            InitiationOutcome::Accepted(request_id) => {
                let started_at = self.clock.now();
                self.running = true;
                self.request_id = Some(request_id);
                self.started_at = Some(started_at);
                self.last_progress_at = Some(started_at);
                self.interrupted_at = None;
                self.confirmed_sessions.clear();
                info!(
                    producer_id = %self.producer.id(),
                    request_id = %request_id,
                    sessions = self.required_sessions.len(),
                    "Recovery operation started"
                );
                StartOutcome::Started(request_id)
            }
            InitiationOutcome::Retryable { request_id, error } => {
                StartOutcome::Failed { request_id, error }
            }
            InitiationOutcome::Fatal(error) => StartOutcome::Fatal(error),
        }
    }

    /// Record `session`'s `snapshot_complete` for `request_id`.
    ///
    /// Returns `None` until every required session has confirmed, and for
    /// confirmations that do not belong to the running request.
    pub fn try_complete(
        &mut self,
        session: &SessionId,
        request_id: RequestId,
    ) -> Option<RecoveryResult> {
        if !self.running || self.request_id != Some(request_id) {
            debug!(
                producer_id = %self.producer.id(),
                request_id = %request_id,
                session = %session,
                "Ignoring snapshot_complete for a request that is not running"
            );
            return None;
        }

        if !self.required_sessions.is_empty() && !self.required_sessions.contains(session) {
            warn!(
                producer_id = %self.producer.id(),
                session = %session,
                "snapshot_complete from a session that does not receive this producer"
            );
            return None;
        }

        self.last_progress_at = Some(self.clock.now());
        self.confirmed_sessions.insert(session.clone());

        let pending = self
            .required_sessions
            .difference(&self.confirmed_sessions)
            .count();
        if pending > 0 {
            debug!(
                producer_id = %self.producer.id(),
                request_id = %request_id,
                session = %session,
                pending,
                "Session confirmed recovery"
            );
            return None;
        }

        Some(self.finish(false))
    }

    /// Note traffic belonging to the running recovery.
    pub fn record_progress(&mut self) {
        if self.running {
            self.last_progress_at = Some(self.clock.now());
        }
    }

    /// Time since the running recovery last made progress.
    pub fn time_since_progress(&self) -> Option<Duration> {
        if !self.running {
            return None;
        }
        self.last_progress_at
            .map(|at| self.clock.now().duration_since(at))
    }

    /// Mark a gap at `timestamp` without dropping confirmations.
    ///
    /// The eventual completion is reported as unsuccessful and carries the
    /// earliest gap seen. Returns `false` if nothing is running.
    pub fn interrupt(&mut self, timestamp: Timestamp) -> bool {
        if !self.running {
            return false;
        }

        let earliest = match self.interrupted_at {
            Some(existing) if existing <= timestamp => existing,
            _ => timestamp,
        };
        self.interrupted_at = Some(earliest);
        info!(
            producer_id = %self.producer.id(),
            request_id = ?self.request_id,
            interrupted_at = %earliest,
            "Recovery operation interrupted"
        );
        true
    }

    /// Whether the running recovery exceeded its time budget.
    pub fn has_timed_out(&self) -> bool {
        match (self.running, self.started_at) {
            (true, Some(started_at)) => {
                self.clock.now().duration_since(started_at) > self.max_recovery_time
            }
            _ => false,
        }
    }

    /// End a running recovery as failed.
    pub fn complete_timed_out(&mut self) -> Option<RecoveryResult> {
        if !self.running {
            return None;
        }
        Some(self.finish(true))
    }

    /// Return to idle, forgetting the current request.
    ///
    /// The last attempt time survives so rate limiting still applies.
    pub fn reset(&mut self) {
        self.running = false;
        self.request_id = None;
        self.started_at = None;
        self.last_progress_at = None;
        self.interrupted_at = None;
        self.confirmed_sessions.clear();
    }

    fn finish(&mut self, timed_out: bool) -> RecoveryResult {
        let now = self.clock.now();
        let started_at = self.started_at.unwrap_or(now);

        self.running = false;
        RecoveryResult {
            request_id: self.request_id.unwrap_or(RequestId::new(0)),
            success: !timed_out && self.interrupted_at.is_none(),
            interrupted_at: self.interrupted_at,
            timed_out,
            started_at,
            duration: now.duration_since(started_at),
        }
    }
}

#[cfg(test)]
#[path = "operation_tests.rs"]
mod tests;
