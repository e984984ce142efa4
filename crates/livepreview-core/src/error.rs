//! Error types
//!
//! A single error enum covers every failure the preview controller can
//! surface. It is serde-serializable so hosts can forward it to a frontend
//! unchanged.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Library-wide error type
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum PreviewError {
    /// Nothing left to send after the unwanted-file filter ran
    #[error("No previewable files remain after filtering")]
    EmptyFileSet,

    /// The sandbox API requires credentials and none were configured
    #[error("Missing sandbox API credentials")]
    MissingAuth,

    /// A session is booting, building or serving already
    #[error("A preview session is already active")]
    SessionActive,

    /// Archive or compression failure while packaging
    #[error("Packaging failed: {0}")]
    Packaging(String),

    /// Request could not be sent or the stream broke
    #[error("Transport error: {0}")]
    Transport(String),

    /// Sandbox API answered with a non-2xx status
    #[error("Sandbox API returned {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Console bridge failure
    #[error("Console bridge error: {0}")]
    Bridge(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session history database error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PreviewError {
    /// Precondition failures abort before any network call.
    pub fn is_precondition(&self) -> bool {
        matches!(self, PreviewError::EmptyFileSet | PreviewError::MissingAuth)
    }

    /// Transport failures end the current attempt.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            PreviewError::Transport(_) | PreviewError::HttpStatus { .. }
        )
    }
}

impl From<PreviewError> for String {
    fn from(error: PreviewError) -> String {
        error.to_string()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, PreviewError>;

impl From<std::io::Error> for PreviewError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PreviewError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<zip::result::ZipError> for PreviewError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Packaging(err.to_string())
    }
}

impl From<reqwest::Error> for PreviewError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<sled::Error> for PreviewError {
    fn from(err: sled::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(PreviewError::EmptyFileSet.is_precondition());
        assert!(PreviewError::MissingAuth.is_precondition());
        assert!(!PreviewError::SessionActive.is_precondition());

        assert!(PreviewError::Transport("reset".into()).is_transport());
        assert!(PreviewError::HttpStatus {
            status: 502,
            body: "bad gateway".into()
        }
        .is_transport());
        assert!(!PreviewError::Packaging("x".into()).is_transport());
    }

    #[test]
    fn test_error_serialization() {
        let json = serde_json::to_string(&PreviewError::Transport("refused".into())).unwrap();
        assert_eq!(json, r#"{"type":"Transport","message":"refused"}"#);

        let parsed: PreviewError = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.to_string(), "Transport error: refused");
    }

    #[test]
    fn test_http_status_display() {
        let err = PreviewError::HttpStatus {
            status: 401,
            body: "unauthorized".into(),
        };
        assert_eq!(err.to_string(), "Sandbox API returned 401: unauthorized");
    }
}
