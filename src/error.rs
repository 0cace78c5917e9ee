//! Error handling and custom error types
//!
//! Provides unified error handling across the crate using thiserror. Every
//! failure carries a [`ErrorKind`] so callers can tell a retryable network
//! problem apart from a file the user has to replace.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Pipeline phase a timeout fired in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Decode,
    Encode,
    Upload,
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadPhase::Decode => "decode",
            UploadPhase::Encode => "encode",
            UploadPhase::Upload => "upload",
        };
        f.write_str(name)
    }
}

/// Coarse classification surfaced to whoever triggered the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Processing,
    Transient,
    Permission,
    Busy,
    Storage,
    Internal,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Image decode error: {0}")]
    Decode(String),

    #[error("Image encode error: {0}")]
    Encode(String),

    #[error("Timed out during {phase} after {}ms", .after.as_millis())]
    Timeout { phase: UploadPhase, after: Duration },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("An upload is already in progress")]
    Concurrency,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A conditional write lost: the object exists or changed since it was read.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] dotenvy::Error),

    #[error("Invariant violated: {0}")]
    Invariant(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Decode(_) | Error::Encode(_) => ErrorKind::Processing,
            Error::Timeout { .. } | Error::Network(_) => ErrorKind::Transient,
            Error::Permission(_) => ErrorKind::Permission,
            Error::Concurrency => ErrorKind::Busy,
            Error::Storage(_)
            | Error::NotFound(_)
            | Error::Conflict(_)
            | Error::PreconditionFailed(_) => ErrorKind::Storage,
            Error::Config(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::EnvVar(_)
            | Error::Invariant(_) => ErrorKind::Internal,
        }
    }

    /// Whether re-invoking the same operation unchanged may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Busy)
    }

    /// Short message suitable for showing to the person who started the action.
    ///
    /// Store-side details (keys, request ids) stay in the `Display` output,
    /// which is only logged.
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation(reason) => reason.clone(),
            Error::Decode(_) | Error::Encode(_) => {
                "Image processing failed. Please try a different image.".to_string()
            }
            Error::Timeout { phase, .. } => format!(
                "The {} step timed out. Please check your connection and try again.",
                phase
            ),
            Error::Network(_) => {
                "Network error. Please check your connection and try again.".to_string()
            }
            Error::Permission(_) => {
                "Permission denied. Make sure you are signed in as an administrator.".to_string()
            }
            Error::Concurrency => {
                "Please wait for the current upload to complete.".to_string()
            }
            Error::Conflict(reason) => reason.clone(),
            Error::NotFound(_) => "The requested item was not found.".to_string(),
            Error::Storage(_) | Error::PreconditionFailed(_) => {
                "The storage service rejected the request.".to_string()
            }
            _ => "Internal error. Please try again later.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
