//! Errors raised at the poller and submission boundaries.
//!
//! None of these are fatal: callers log them and keep the last good state.

use tacmap_core::entity::DecodeFailure;
use tacmap_core::error::CoreError;

/// Coarse classification used for logging and status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Decode,
    Validation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Decode => "decode",
            Self::Validation => "validation",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The HTTP request itself failed (connect, DNS, timeout, TLS).
    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The backend answered with a non-2xx status.
    #[error("Backend returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The payload did not match the expected shape.
    #[error("Decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    /// A decoded record broke a domain invariant.
    #[error(transparent)]
    Validation(#[from] CoreError),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) | Self::HttpStatus { .. } => ErrorKind::Network,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Validation(_) => ErrorKind::Validation,
        }
    }
}

impl From<DecodeFailure> for SyncError {
    fn from(failure: DecodeFailure) -> Self {
        match failure {
            DecodeFailure::Malformed(e) => Self::Decode(e),
            DecodeFailure::Invalid(e) => Self::Validation(e),
        }
    }
}
