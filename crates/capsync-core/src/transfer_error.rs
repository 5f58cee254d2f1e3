//! Transfer error types
//!
//! Errors reported by the uploader collaborator. Each variant carries enough to
//! decide whether the queue engine should schedule another automatic attempt
//! (retryable) or park the intent as failed (terminal).

use thiserror::Error;

use crate::models::LastError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// The request never produced an HTTP response (offline, DNS, reset, timeout).
    #[error("{0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("{message}")]
    Http {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// A success status whose body could not be understood.
    #[error("Malformed server response: {0}")]
    MalformedResponse(String),

    /// The request could not be built from the stored intent. Retrying the
    /// same record cannot succeed.
    #[error("Invalid upload request: {0}")]
    InvalidRequest(String),

    /// The uploader failed without producing an outcome (for example it panicked).
    #[error("Uploader failed: {0}")]
    Internal(String),

    /// The transfer was aborted by the caller.
    #[error("Upload cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Status-only HTTP failure, used when the error body carries no detail.
    pub fn http_status(status: u16) -> Self {
        Self::Http {
            status,
            code: Some("http_error".to_string()),
            message: format!("HTTP {}", status),
        }
    }

    /// Transport failures, 5xx and 429 are worth retrying. Everything else is
    /// final until a human intervenes.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Transport(_) => true,
            TransferError::Http { status, .. } => *status >= 500 || *status == 429,
            TransferError::MalformedResponse(_)
            | TransferError::InvalidRequest(_)
            | TransferError::Internal(_)
            | TransferError::Cancelled => false,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            TransferError::Transport(_) => Some("network_error"),
            TransferError::Http { code, .. } => code.as_deref(),
            TransferError::MalformedResponse(_) => Some("malformed_response"),
            TransferError::InvalidRequest(_) => Some("invalid_request"),
            TransferError::Internal(_) => Some("uploader_failed"),
            TransferError::Cancelled => Some("cancelled"),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TransferError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn to_last_error(&self) -> LastError {
        LastError {
            message: self.to_string(),
            code: self.code().map(str::to_string),
            status: self.status(),
        }
    }
}
