use crate::domain::models::{DeviceId, MessageSeverity};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

/// Non-fatal conditions reported by the session core.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("heart rate {rate} bpm is outside the valid range {min}..={max}")]
    RateOutOfRange { rate: u16, min: u16, max: u16 },

    #[error("sample at {time} is not after the last sample at {last}")]
    OutOfOrder {
        time: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    #[error("{action} ignored: {reason}")]
    IgnoredRequest {
        action: &'static str,
        reason: String,
    },

    #[error("unexpected {event} event for {device} while {state}")]
    InconsistentEvent {
        event: &'static str,
        device: DeviceId,
        state: String,
    },

    #[error("connection to {0} lost")]
    ConnectionLost(DeviceId),

    #[error("could not connect to {device}: {reason}")]
    ConnectionFailed { device: DeviceId, reason: String },

    #[error("session service is no longer running")]
    ServiceStopped,
}

impl SessionError {
    pub fn ignored(action: &'static str, reason: impl Into<String>) -> Self {
        Self::IgnoredRequest {
            action,
            reason: reason.into(),
        }
    }

    pub fn severity(&self) -> MessageSeverity {
        match self {
            Self::RateOutOfRange { .. } | Self::OutOfOrder { .. } => MessageSeverity::Warning,
            Self::IgnoredRequest { .. } | Self::InconsistentEvent { .. } => MessageSeverity::Info,
            Self::ConnectionLost(_) | Self::ConnectionFailed { .. } | Self::ServiceStopped => {
                MessageSeverity::Error
            }
        }
    }

    /// Whether this should reach the end user as an alert.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost(_) | Self::ConnectionFailed { .. }
        )
    }

    pub fn is_invalid_sample(&self) -> bool {
        matches!(self, Self::RateOutOfRange { .. } | Self::OutOfOrder { .. })
    }
}

/// Failures of the append-log collaborator.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("append log is not open")]
    NotOpen,

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reasons a persisted sample line could not be read back.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LineParseError {
    #[error("line has no ': ' separator")]
    MissingSeparator,

    #[error("malformed timestamp '{0}'")]
    BadTimestamp(String),

    #[error("unknown time zone abbreviation '{0}'")]
    UnknownZone(String),

    #[error("malformed rate '{0}'")]
    BadRate(String),
}
