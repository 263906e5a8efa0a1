//! Error types for the assistant driver.

use thiserror::Error;

/// Coarse classification of a [`DriverError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    /// Network or HTTP failure talking to the remote service.
    Transport,
    /// The remote job reported `failed`, `expired` or `incomplete`.
    RemoteJob,
    /// Unexpected lifecycle event ordering or an unsupported action.
    Protocol,
    /// A host skill failed while fulfilling a tool call.
    Skill,
    /// Session cleanup failed.
    Teardown,
    Configuration,
    Unknown,
}

/// Primary error type for all driver operations.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Run {status}: {reason}")]
    RunFailed { status: String, reason: String },

    #[error("Unsupported required action: {0}")]
    UnsupportedAction(String),

    #[error("Skill error ({skill}): {message}")]
    Skill { skill: String, message: String },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Teardown failed ({step}): {message}")]
    Teardown { step: &'static str, message: String },
}

impl DriverError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Wrap a failure reported by the skill registry.
    pub fn skill(skill: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Skill {
            skill: skill.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Api { .. }
            | Self::Authentication(_)
            | Self::RateLimited { .. }
            | Self::Network(_)
            | Self::Serialization(_)
            | Self::Stream(_) => ErrorCategory::Transport,
            Self::RunFailed { .. } => ErrorCategory::RemoteJob,
            Self::ProtocolViolation(_) | Self::UnsupportedAction(_) => ErrorCategory::Protocol,
            Self::Skill { .. } => ErrorCategory::Skill,
            Self::Teardown { .. } => ErrorCategory::Teardown,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::InvalidState(_) | Self::Io(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether this error came from the network boundary.
    pub fn is_transport(&self) -> bool {
        self.category() == ErrorCategory::Transport
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, DriverError>;
