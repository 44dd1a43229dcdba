//! Error types for stagehand-core

use crate::types::RecordKind;
use thiserror::Error;

/// Main error type for the stagehand-core library
#[derive(Error, Debug)]
pub enum Error {
    /// The device did not answer within the command timeout
    #[error("device unresponsive: `{command}` timed out after {timeout_secs}s")]
    DeviceUnresponsive { command: String, timeout_secs: u64 },

    /// A device command exited non-zero or reported an error
    #[error("command failed: `{command}` (status {status:?}): {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    /// No provider binding exists for a record kind on this device
    #[error("no provider available for {0} records")]
    ProviderUnavailable(RecordKind),

    /// The device rejected an operation for lack of permission
    #[error("permission denied: `{command}`: {detail}")]
    PermissionDenied { command: String, detail: String },

    /// One write/verify pair failed
    #[error("{kind} injection failed: {detail}")]
    RecordInjectionFailed { kind: RecordKind, detail: String },

    /// One integrity check could not complete
    #[error("verification check `{check}` failed: {detail}")]
    VerificationCheckFailed { check: String, detail: String },

    /// Ledger database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Character directory or contact list error
    #[error("character directory error: {0}")]
    Directory(String),
}

impl Error {
    /// Whether this failure came from the transport itself rather than the device's answer.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::DeviceUnresponsive { .. } | Error::Io(_))
    }

    /// Whether the device refused the operation for lack of permission.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Error::PermissionDenied { .. })
    }
}

/// Result type alias for stagehand-core
pub type Result<T> = std::result::Result<T, Error>;
