//! SDK configuration.
//!
//! Every section carries serde defaults, so an absent file or an entirely
//! unconfigured environment still yields a usable configuration. Sources are
//! layered in this order, later ones overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. An optional configuration file (format inferred from the extension)
//! 3. Environment variables prefixed `ODDSFEED__` with `__` as the separator,
//!    e.g. `ODDSFEED__RECOVERY__INACTIVITY_SECONDS=30`

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::producer::ProducerScope;
use crate::{ProducerId, SessionId, ValidationError};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {message}")]
    Load { message: String },

    #[error("Invalid configuration value for '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("Failed to initialize logging: {message}")]
    Logging { message: String },
}

/// Top-level SDK configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Control API settings
    pub api: ApiConfig,

    /// Recovery timing settings
    pub recovery: RecoveryConfig,

    /// Producers the feed consumes
    pub producers: Vec<ProducerConfig>,

    /// Broker sessions the feed is consumed through
    pub sessions: Vec<SessionConfig>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            recovery: RecoveryConfig::default(),
            producers: Vec::new(),
            sessions: vec![SessionConfig::default()],
            logging: LoggingConfig::default(),
        }
    }
}

impl SdkConfig {
    /// Load configuration from an optional file plus the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when a source cannot be read or coerced,
    /// and [`ConfigError::Validation`] when the merged result is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let merged = builder
            .add_source(config::Environment::with_prefix("ODDSFEED").separator("__"))
            .build()
            .map_err(|e| ConfigError::Load {
                message: e.to_string(),
            })?;

        let sdk_config: SdkConfig = merged.try_deserialize().map_err(|e| ConfigError::Load {
            message: e.to_string(),
        })?;

        sdk_config.validate()?;
        Ok(sdk_config)
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api.validate()?;
        self.recovery.validate()?;

        let mut producer_ids = HashSet::new();
        for producer in &self.producers {
            producer.validate()?;
            if !producer_ids.insert(producer.id) {
                return Err(ConfigError::Validation {
                    field: "producers".to_string(),
                    message: format!("duplicate producer id {}", producer.id),
                });
            }
        }

        if self.sessions.is_empty() {
            return Err(ConfigError::Validation {
                field: "sessions".to_string(),
                message: "at least one session is required".to_string(),
            });
        }

        let mut session_ids = HashSet::new();
        for session in &self.sessions {
            let id = session
                .session_id()
                .map_err(|e| ConfigError::Validation {
                    field: "sessions.id".to_string(),
                    message: e.to_string(),
                })?;
            if !session_ids.insert(id) {
                return Err(ConfigError::Validation {
                    field: "sessions".to_string(),
                    message: format!("duplicate session id '{}'", session.id),
                });
            }
        }

        Ok(())
    }
}

// ============================================================================
// API configuration
// ============================================================================

/// Control API settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Token sent in the `x-access-token` header
    pub access_token: Option<String>,

    /// Timeout for a single recovery request
    pub request_timeout_seconds: u64,

    /// Scopes recovery traffic to one consumer instance
    pub node_id: Option<i32>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            request_timeout_seconds: 30,
            node_id: None,
        }
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<REDACTED>"),
            )
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .field("node_id", &self.node_id)
            .finish()
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::Validation {
                field: "api.request_timeout_seconds".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Recovery configuration
// ============================================================================

/// Recovery timing, in seconds as they appear in configuration files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Minimum spacing between two recovery requests for one producer (20-180)
    pub min_interval_between_recovery_requests_seconds: u64,

    /// Wall-clock budget for one recovery (600-3600)
    pub max_recovery_time_seconds: u64,

    /// Max time without a system heartbeat before an alive violation (10-180)
    pub inactivity_seconds: u64,

    /// Max lag of user sessions behind the system session (5-180)
    pub max_processing_delay_seconds: u64,

    /// Idle producers with no system heartbeat for this long restart recovery
    pub idle_alive_timeout_seconds: u64,

    /// Running recoveries with no progress for this long are restarted
    pub stalled_recovery_timeout_seconds: u64,

    /// Period of the status poll
    pub status_check_interval_seconds: u64,

    /// Replay mode: producers never recover
    pub ignore_recovery: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            min_interval_between_recovery_requests_seconds: 30,
            max_recovery_time_seconds: 3600,
            inactivity_seconds: 20,
            max_processing_delay_seconds: 20,
            idle_alive_timeout_seconds: 60,
            stalled_recovery_timeout_seconds: 300,
            status_check_interval_seconds: 10,
            ignore_recovery: false,
        }
    }
}

impl RecoveryConfig {
    /// Convert to the durations the state machine works with.
    pub fn settings(&self) -> RecoverySettings {
        RecoverySettings {
            min_interval_between_recovery_requests: Duration::from_secs(
                self.min_interval_between_recovery_requests_seconds,
            ),
            max_recovery_time: Duration::from_secs(self.max_recovery_time_seconds),
            inactivity_window: Duration::from_secs(self.inactivity_seconds),
            max_processing_delay: Duration::from_secs(self.max_processing_delay_seconds),
            idle_alive_timeout: Duration::from_secs(self.idle_alive_timeout_seconds),
            stalled_recovery_timeout: Duration::from_secs(self.stalled_recovery_timeout_seconds),
            status_check_interval: Duration::from_secs(self.status_check_interval_seconds),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "recovery.min_interval_between_recovery_requests_seconds",
            self.min_interval_between_recovery_requests_seconds,
            20,
            180,
        )?;
        check_range(
            "recovery.max_recovery_time_seconds",
            self.max_recovery_time_seconds,
            600,
            3600,
        )?;
        check_range("recovery.inactivity_seconds", self.inactivity_seconds, 10, 180)?;
        check_range(
            "recovery.max_processing_delay_seconds",
            self.max_processing_delay_seconds,
            5,
            180,
        )?;
        check_range(
            "recovery.idle_alive_timeout_seconds",
            self.idle_alive_timeout_seconds,
            1,
            u64::MAX,
        )?;
        check_range(
            "recovery.stalled_recovery_timeout_seconds",
            self.stalled_recovery_timeout_seconds,
            1,
            u64::MAX,
        )?;
        check_range(
            "recovery.status_check_interval_seconds",
            self.status_check_interval_seconds,
            1,
            u64::MAX,
        )
    }
}

fn check_range(field: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::Validation {
            field: field.to_string(),
            message: format!("{} is outside the allowed range {}..={}", value, min, max),
        });
    }
    Ok(())
}

/// Recovery timing as durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverySettings {
    pub min_interval_between_recovery_requests: Duration,
    pub max_recovery_time: Duration,
    pub inactivity_window: Duration,
    pub max_processing_delay: Duration,
    pub idle_alive_timeout: Duration,
    pub stalled_recovery_timeout: Duration,
    pub status_check_interval: Duration,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        RecoveryConfig::default().settings()
    }
}

// ============================================================================
// Producers and sessions
// ============================================================================

/// One producer the feed consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    pub id: ProducerId,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Base URL of the producer's control API, e.g. `https://api.example.com/v1/liveodds/`
    pub api_url: String,

    pub scope: ProducerScope,

    /// Inactive producers are known but never recovered
    #[serde(default = "default_true")]
    pub active: bool,

    /// How far back a recovery may reach
    #[serde(default = "default_recovery_window_minutes")]
    pub stateful_recovery_window_minutes: u64,
}

fn default_true() -> bool {
    true
}

fn default_recovery_window_minutes() -> u64 {
    4320
}

/// One year; the control API never serves anything older.
const MAX_RECOVERY_WINDOW_MINUTES: u64 = 525_600;

impl ProducerConfig {
    /// Saturates instead of overflowing for windows that failed validation.
    pub fn max_after_age(&self) -> Duration {
        self.stateful_recovery_window_minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .unwrap_or(Duration::MAX)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: format!("producers[{}].name", self.id),
                message: "must not be empty".to_string(),
            });
        }

        url::Url::parse(&self.api_url).map_err(|e| ConfigError::Validation {
            field: format!("producers[{}].api_url", self.id),
            message: e.to_string(),
        })?;

        if !(1..=MAX_RECOVERY_WINDOW_MINUTES).contains(&self.stateful_recovery_window_minutes) {
            return Err(ConfigError::Validation {
                field: format!("producers[{}].stateful_recovery_window_minutes", self.id),
                message: format!("must be between 1 and {}", MAX_RECOVERY_WINDOW_MINUTES),
            });
        }

        Ok(())
    }
}

/// Which messages a broker session receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageInterest {
    AllMessages,
    LiveMessagesOnly,
    PrematchMessagesOnly,
    VirtualSportMessagesOnly,
    HighPriorityMessages,
    LowPriorityMessages,
}

impl MessageInterest {
    /// Whether a session with this interest receives a producer's messages.
    pub fn covers(&self, scope: ProducerScope) -> bool {
        match self {
            Self::AllMessages | Self::HighPriorityMessages | Self::LowPriorityMessages => true,
            Self::LiveMessagesOnly => scope == ProducerScope::Live,
            Self::PrematchMessagesOnly => scope == ProducerScope::Prematch,
            Self::VirtualSportMessagesOnly => scope == ProducerScope::Virtual,
        }
    }
}

/// One broker session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub id: String,
    pub interest: MessageInterest,
}

impl SessionConfig {
    pub fn new(id: impl Into<String>, interest: MessageInterest) -> Self {
        Self {
            id: id.into(),
            interest,
        }
    }

    pub fn session_id(&self) -> Result<SessionId, ValidationError> {
        SessionId::new(self.id.as_str())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new("all", MessageInterest::AllMessages)
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
