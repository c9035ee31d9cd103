//! Error types for recovery operations.
//!
//! Errors are split by who can act on them: [`ApiError`] is a transient
//! communication failure that the state machine simply retries,
//! [`InitiationError`] means the requested recovery can never succeed, and
//! [`RecoveryError`] is the single signal that escapes the message-processing
//! entry points and tells the owning feed to stop.

use thiserror::Error;

use crate::{ProducerId, Timestamp};

/// Errors returned by the recovery control API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The API answered with a non-success status.
    #[error("HTTP error calling {url}: {status} - {message}")]
    HttpError {
        url: String,
        status: u16,
        message: String,
    },

    /// The request did not complete within the configured timeout.
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    /// Connection, TLS, or other transport failure.
    #[error("Network error calling {url}: {message}")]
    Network { url: String, message: String },

    /// The request URL could not be built from the producer's API base.
    #[error("Invalid request URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// The HTTP client could not be created.
    #[error("HTTP client configuration error: {message}")]
    Configuration { message: String },
}

impl ApiError {
    /// Check if this error represents a transient condition that may succeed if retried.
    ///
    /// Transient conditions include:
    /// - Server errors (5xx)
    /// - Rate limiting (429)
    /// - Request timeouts
    /// - Network/transport errors
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpError { status, .. } => *status >= 500 || *status == 429,
            Self::Timeout { .. } => true,
            Self::Network { .. } => true,
            Self::InvalidUrl { .. } | Self::Configuration { .. } => false,
        }
    }

    /// HTTP status code, when the API produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// A recovery that cannot be initiated for the requested boundary.
///
/// The API only serves a bounded look-back per producer; asking for more than
/// that can never succeed, so these errors are always fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitiationError {
    /// The "after" boundary lies in the future.
    #[error("Recovery boundary {after} is later than current time {now}")]
    AfterInFuture { after: Timestamp, now: Timestamp },

    /// The "after" boundary is older than the producer allows.
    #[error("Recovery boundary {after} is older than the oldest allowed {oldest_allowed}")]
    AfterTooOld {
        after: Timestamp,
        oldest_allowed: Timestamp,
    },
}

/// Errors from producer registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Configuration changes are refused once feed processing has started.
    #[error("Producer registry is locked; configuration can no longer change")]
    Locked,

    /// No producer with this id is known.
    #[error("Producer {id} is not known")]
    UnknownProducer { id: ProducerId },

    /// The resume timestamp is older than the producer's recovery window.
    #[error("Timestamp {timestamp} for producer {id} is older than the oldest allowed {oldest_allowed}")]
    TimestampTooOld {
        id: ProducerId,
        timestamp: Timestamp,
        oldest_allowed: Timestamp,
    },
}

/// Errors escaping the recovery entry points.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecoveryError {
    /// The producer reached `FatalError`; the owning feed must stop.
    #[error("Producer {producer_id} cannot recover: {reason}")]
    Fatal {
        producer_id: ProducerId,
        reason: String,
    },

    /// No manager exists for the producer.
    #[error("Producer {producer_id} is not managed by this feed")]
    UnknownProducer { producer_id: ProducerId },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
