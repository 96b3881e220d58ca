//! Error types and handling
//!
//! A single error enum covers every failure a reconciliation pass can hit.
//! Errors are classified as transient (the next pass retries) or terminal for
//! the outstanding signing request.

use thiserror::Error;

/// Rotation error types
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RotationError {
    /// Credential store call failed
    #[error("credential store error: {0}")]
    Store(String),

    /// CSR authority call failed
    #[error("csr authority error: {0}")]
    Authority(String),

    /// Status reporter call failed
    #[error("status report error: {0}")]
    Status(String),

    /// A remote call did not complete before its deadline
    #[error("{0} timed out")]
    Timeout(String),

    /// The pass was cancelled
    #[error("reconciliation cancelled")]
    Cancelled,

    /// The authority rejected or revoked the request
    #[error("certificate request {0} was rejected")]
    RequestRejected(String),

    /// The request no longer exists at the authority
    #[error("certificate request {0} not found")]
    RequestNotFound(String),

    /// advance was called with no request in flight
    #[error("no ongoing csr")]
    NoOngoingRequest,

    /// A request is in flight but its private key is gone
    #[error("no private key found for certificate in csr: {0}")]
    MissingPrivateKey(String),

    /// The issued certificate was not signed for the held key
    #[error("private key does not match with the certificate in csr: {0}")]
    KeyMismatch(String),

    /// Certificate could not be parsed
    #[error("invalid certificate: {0}")]
    Certificate(String),

    /// notAfter is not after notBefore
    #[error("invalid certificate validity window: not before {not_before}, not after {not_after}")]
    InvalidValidityWindow {
        not_before: String,
        not_after: String,
    },

    /// Private key generation or parsing failed
    #[error("invalid private key for certificate request: {0}")]
    KeyGeneration(String),

    /// CSR encoding failed
    #[error("unable to generate certificate request: {0}")]
    Csr(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl RotationError {
    /// Whether the next reconciliation pass may succeed without intervention
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RotationError::Store(_)
                | RotationError::Authority(_)
                | RotationError::Status(_)
                | RotationError::Timeout(_)
                | RotationError::Cancelled
        )
    }

    /// Whether the error ends the outstanding signing request
    pub fn is_terminal_for_request(&self) -> bool {
        matches!(
            self,
            RotationError::RequestRejected(_)
                | RotationError::RequestNotFound(_)
                | RotationError::NoOngoingRequest
                | RotationError::MissingPrivateKey(_)
                | RotationError::KeyMismatch(_)
        )
    }
}

// Implement From for common error types

impl From<sqlx::Error> for RotationError {
    fn from(err: sqlx::Error) -> Self {
        RotationError::Store(err.to_string())
    }
}

impl From<reqwest::Error> for RotationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RotationError::Timeout("CSR authority request".to_string())
        } else if err.is_connect() {
            RotationError::Authority("Failed to connect to CSR authority".to_string())
        } else {
            RotationError::Authority(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RotationError {
    fn from(err: serde_json::Error) -> Self {
        RotationError::Store(format!("JSON encoding error: {}", err))
    }
}

/// Result type alias for rotation operations
pub type RotationResult<T> = Result<T, RotationError>;
