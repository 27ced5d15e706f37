// Error handling module
// Defines the session engine error taxonomy

use thiserror::Error;

/// Errors surfaced by the session engine
///
/// Introspection failures never reach the UI as an error; they are absorbed
/// into a status transition. Everything else is returned to the caller of the
/// operation that triggered it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Login rejected by the authority
    #[error("Invalid credentials: {0}")]
    CredentialsInvalid(String),

    /// Access token rejected by the authority (or by the backend with a 401)
    #[error("Token invalid or expired")]
    TokenInvalidOrExpired,

    /// Token persistence read/write failed
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// Network failure talking to the authority or backend
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// Non-success answer from the authority or backend
    #[error("Authority error: {status} - {message}")]
    AuthorityError { status: u16, message: String },

    /// Response body could not be understood
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Input rejected before any I/O
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl SessionError {
    /// Wrap an anyhow chain from the storage layer
    pub fn storage(err: anyhow::Error) -> Self {
        SessionError::StorageFailure(format!("{:#}", err))
    }

    /// Classify a reqwest error into transport vs decode failures
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SessionError::MalformedResponse(err.to_string())
        } else {
            SessionError::TransportFailure(err.to_string())
        }
    }

    /// Whether the failure happened before the authority produced an answer
    pub fn is_transport(&self) -> bool {
        matches!(self, SessionError::TransportFailure(_))
    }
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SessionError::CredentialsInvalid("Sai mật khẩu".to_string());
        assert_eq!(err.to_string(), "Invalid credentials: Sai mật khẩu");

        let err = SessionError::TokenInvalidOrExpired;
        assert_eq!(err.to_string(), "Token invalid or expired");

        let err = SessionError::AuthorityError {
            status: 503,
            message: "Service unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "Authority error: 503 - Service unavailable");
    }

    #[test]
    fn test_storage_error_keeps_context_chain() {
        let inner = anyhow::anyhow!("disk full");
        let err = SessionError::storage(inner.context("Failed to write accessToken"));
        assert_eq!(
            err,
            SessionError::StorageFailure("Failed to write accessToken: disk full".to_string())
        );
    }

    #[test]
    fn test_is_transport() {
        assert!(SessionError::TransportFailure("timeout".to_string()).is_transport());
        assert!(!SessionError::TokenInvalidOrExpired.is_transport());
        assert!(!SessionError::StorageFailure("x".to_string()).is_transport());
    }
}
