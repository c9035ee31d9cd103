//! Recovery requests against the control API.
//!
//! Three request shapes exist:
//!
//! - `recovery/initiate_request?after=..`: everything produced after a point in time
//! - `recovery/initiate_request`: full odds snapshot, when nothing is known
//! - `{odds|stateful_messages}/events/{id}/initiate_request`: one sport event
//!
//! Each request is tagged with a fresh id from a shared [`RequestIdSequence`];
//! the feed echoes it in `snapshot_complete` so completions can be correlated.
//! Outcomes are returned as an [`InitiationOutcome`] rather than an error, so
//! callers always handle the fatal and the retryable case explicitly.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use url::Url;

use crate::clock::Clock;
use crate::error::{ApiError, InitiationError};
use crate::events::{RecoveryEvent, RecoveryEventDispatcher, RecoveryInitiated};
use crate::producer::{Producer, RecoveryInfo};
use crate::transport::RecoveryTransport;
use crate::{EventId, RequestId, Timestamp};

/// Monotonic source of recovery request ids.
#[derive(Debug)]
pub struct RequestIdSequence {
    next: AtomicU64,
}

impl RequestIdSequence {
    /// Sequence whose first id is 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next_id(&self) -> RequestId {
        RequestId::new(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for RequestIdSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of asking the API to start a recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiationOutcome {
    /// The API accepted the request.
    Accepted(RequestId),

    /// The request failed but may succeed later.
    Retryable {
        request_id: RequestId,
        error: ApiError,
    },

    /// The request can never succeed; no HTTP call was made.
    Fatal(InitiationError),
}

impl InitiationOutcome {
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Accepted(id) => Some(*id),
            Self::Retryable { request_id, .. } => Some(*request_id),
            Self::Fatal(_) => None,
        }
    }
}

/// Which messages an event-scoped recovery re-delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventRecoveryKind {
    /// Current odds of the event.
    Odds,

    /// Stateful messages (settlements, cancellations and their rollbacks).
    Stateful,
}

impl EventRecoveryKind {
    fn path_segment(&self) -> &'static str {
        match self {
            Self::Odds => "odds",
            Self::Stateful => "stateful_messages",
        }
    }
}

/// Builds, sends, and records recovery requests.
pub struct RecoveryRequestIssuer {
    transport: Arc<dyn RecoveryTransport>,
    sequence: Arc<RequestIdSequence>,
    node_id: Option<i32>,
    clock: Arc<dyn Clock>,
    events: RecoveryEventDispatcher,
}

impl fmt::Debug for RecoveryRequestIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryRequestIssuer")
            .field("sequence", &self.sequence)
            .field("node_id", &self.node_id)
            .finish()
    }
}

impl RecoveryRequestIssuer {
    pub fn new(
        transport: Arc<dyn RecoveryTransport>,
        sequence: Arc<RequestIdSequence>,
        node_id: Option<i32>,
        clock: Arc<dyn Clock>,
        events: RecoveryEventDispatcher,
    ) -> Self {
        Self {
            transport,
            sequence,
            node_id,
            clock,
            events,
        }
    }

    /// Request everything the producer generated after `after`.
    ///
    /// `after` must lie within `[now - max_after_age, now]`; anything else is
    /// [`InitiationOutcome::Fatal`] and nothing is sent.
    pub async fn request_recovery_after(
        &self,
        producer: &Producer,
        after: Timestamp,
    ) -> InitiationOutcome {
        let now = self.clock.now();

        if after > now {
            let err = InitiationError::AfterInFuture { after, now };
            error!(producer_id = %producer.id(), error = %err, "Recovery boundary rejected");
            return InitiationOutcome::Fatal(err);
        }

        let oldest_allowed = producer.oldest_allowed_after(now);
        if after < oldest_allowed {
            let err = InitiationError::AfterTooOld {
                after,
                oldest_allowed,
            };
            error!(producer_id = %producer.id(), error = %err, "Recovery boundary rejected");
            return InitiationOutcome::Fatal(err);
        }

        let request_id = self.sequence.next_id();
        let mut query = vec![("after", after.epoch_seconds().to_string())];
        query.extend(self.common_query(request_id));
        let url = build_url(producer.api_url(), "recovery/initiate_request", &query);

        self.send(producer, request_id, url, Some(after), None).await
    }

    /// Request a full odds snapshot; used when no earlier timestamp is known.
    pub async fn request_full_odds_recovery(&self, producer: &Producer) -> InitiationOutcome {
        let request_id = self.sequence.next_id();
        let url = build_url(
            producer.api_url(),
            "recovery/initiate_request",
            &self.common_query(request_id),
        );

        self.send(producer, request_id, url, None, None).await
    }

    /// Request re-delivery for one sport event.
    ///
    /// The request id is registered on the producer before sending so the
    /// matching `snapshot_complete` is attributed to this request; it is
    /// removed again if the request fails.
    pub async fn request_event_recovery(
        &self,
        producer: &Producer,
        event_id: &EventId,
        kind: EventRecoveryKind,
    ) -> InitiationOutcome {
        let request_id = self.sequence.next_id();
        let path = format!("{}/events/{}/initiate_request", kind.path_segment(), event_id);
        let url = build_url(producer.api_url(), &path, &self.common_query(request_id));

        producer.register_event_recovery(request_id, event_id.clone(), self.clock.now());
        let outcome = self
            .send(producer, request_id, url, None, Some(event_id))
            .await;
        if !matches!(outcome, InitiationOutcome::Accepted(_)) {
            producer.take_event_recovery(request_id);
        }
        outcome
    }

    fn common_query(&self, request_id: RequestId) -> Vec<(&'static str, String)> {
        let mut query = vec![("request_id", request_id.to_string())];
        if let Some(node_id) = self.node_id {
            query.push(("node_id", node_id.to_string()));
        }
        query
    }

    async fn send(
        &self,
        producer: &Producer,
        request_id: RequestId,
        url: Result<Url, ApiError>,
        after: Option<Timestamp>,
        event_id: Option<&EventId>,
    ) -> InitiationOutcome {
        let requested_at = self.clock.now();
        let result = match url {
            Ok(url) => self.transport.post(&url).await,
            Err(e) => Err(e),
        };

        let (response_code, message) = match &result {
            Ok(status) => {
                info!(
                    producer_id = %producer.id(),
                    request_id = %request_id,
                    after = ?after,
                    event_id = ?event_id,
                    "Recovery request accepted"
                );
                (Some(*status), String::new())
            }
            Err(e) => {
                warn!(
                    producer_id = %producer.id(),
                    request_id = %request_id,
                    error = %e,
                    transient = e.is_transient(),
                    "Recovery request failed"
                );
                (e.status(), e.to_string())
            }
        };

        producer.set_recovery_info(RecoveryInfo {
            after,
            requested_at,
            request_id,
            node_id: self.node_id,
            response_code,
            response_message: (!message.is_empty()).then(|| message.clone()),
            successful: result.is_ok(),
        });

        self.events
            .publish(RecoveryEvent::RecoveryInitiated(RecoveryInitiated {
                producer_id: producer.id(),
                request_id,
                after,
                event_id: event_id.cloned(),
                message,
            }));

        match result {
            Ok(_) => InitiationOutcome::Accepted(request_id),
            Err(error) => InitiationOutcome::Retryable { request_id, error },
        }
    }
}

/// Join `path` onto the producer's API base and append the query.
fn build_url(base: &str, path: &str, query: &[(&str, String)]) -> Result<Url, ApiError> {
    let invalid = |message: String| ApiError::InvalidUrl {
        url: format!("{}{}", base, path),
        message,
    };

    let mut base_url = Url::parse(base).map_err(|e| invalid(e.to_string()))?;
    if !base_url.path().ends_with('/') {
        let with_slash = format!("{}/", base_url.path());
        base_url.set_path(&with_slash);
    }

    let mut url = base_url.join(path).map_err(|e| invalid(e.to_string()))?;
    if !query.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
    }
    Ok(url)
}

#[cfg(test)]
#[path = "issuer_tests.rs"]
mod tests;
