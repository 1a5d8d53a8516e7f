//! Engine error types.
//!
//! Every variant maps to a catalogue [`ErrorCode`] so fatal failures can be
//! rendered as a diagnostic with remediation steps.

use crate::build::BuildPhase;
use crate::retry::RetryableError;
use healthcrew_common::{ErrorCode, ValidationError};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("failed to connect to {host}: {message}")]
    ConnectFailed { host: String, message: String },

    #[error("connection to {host} timed out after {timeout_secs}s")]
    ConnectTimeout { host: String, timeout_secs: u64 },

    #[error("administrative CLI unavailable on remote host: {detail}")]
    EnvironmentMissing { detail: String },

    #[error("cluster authentication expired: {detail}")]
    AuthExpired { detail: String },

    #[error("command timed out after {timeout_secs}s: {command}")]
    CommandTimeout { command: String, timeout_secs: u64 },

    #[error("command rejected: {0}")]
    Rejected(#[from] ValidationError),

    #[error("session is not connected")]
    NotConnected,

    #[error("remote execution failed: {0}")]
    Exec(String),
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ConnectFailed { .. } => ErrorCode::SessionConnectFailed,
            Self::ConnectTimeout { .. } => ErrorCode::SessionConnectTimeout,
            Self::EnvironmentMissing { .. } => ErrorCode::SessionEnvironmentMissing,
            Self::AuthExpired { .. } => ErrorCode::SessionAuthExpired,
            Self::CommandTimeout { .. } => ErrorCode::SessionCommandTimeout,
            Self::Rejected(_) => ErrorCode::CheckCommandRejected,
            Self::NotConnected => ErrorCode::SessionClosed,
            Self::Exec(_) => ErrorCode::SessionExecFailed,
        }
    }

    /// Errors that end the whole build rather than a single check.
    pub fn is_fatal_to_build(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. }
                | Self::ConnectTimeout { .. }
                | Self::EnvironmentMissing { .. }
                | Self::AuthExpired { .. }
                | Self::NotConnected
        )
    }
}

impl RetryableError for SessionError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. } | Self::ConnectTimeout { .. }
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("illegal phase transition {from} -> {to}")]
    InvalidTransition { from: BuildPhase, to: BuildPhase },

    #[error("build cancelled")]
    Cancelled,

    #[error("report delivery failed: {0}")]
    Report(String),

    #[error("build task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl BuildError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidTransition { .. } => ErrorCode::BuildInvalidTransition,
            Self::Cancelled => ErrorCode::BuildCancelled,
            Self::Report(_) => ErrorCode::BuildReportFailed,
            Self::Task(_) => ErrorCode::BuildTaskFailed,
            Self::Session(e) => e.code(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("knowledge store I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("knowledge entry could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid fix: {0}")]
    InvalidFix(String),
}

impl KnowledgeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Io { .. } => ErrorCode::KnowledgePersistFailed,
            Self::Encode(_) => ErrorCode::InternalSerdeError,
            Self::InvalidFix(_) => ErrorCode::KnowledgeInvalidInput,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("{source_name} unavailable: {message}")]
    Unavailable { source_name: String, message: String },

    #[error("{source_name} timed out after {timeout_ms}ms")]
    Timeout { source_name: String, timeout_ms: u64 },
}

impl LookupError {
    pub fn unavailable(source_name: &str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unavailable { .. } => ErrorCode::LookupUnavailable,
            Self::Timeout { .. } => ErrorCode::LookupTimeout,
        }
    }
}

impl RetryableError for LookupError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}
