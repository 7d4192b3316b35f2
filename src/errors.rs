//! Session error types.

use std::fmt;

use thiserror::Error;

/// Terminal outcome of a failed refresh cycle.
///
/// Every request waiting on the same cycle receives a clone of the same value,
/// so this type carries plain data rather than the underlying transport error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshFailure {
    /// HTTP status of the refresh response, if the server answered at all.
    pub status: Option<u16>,
    pub message: String,
}

impl RefreshFailure {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// The server answered and refused the refresh token.
    pub fn is_rejection(&self) -> bool {
        matches!(self.status, Some(401) | Some(403))
    }
}

impl fmt::Display for RefreshFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Session error type.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Login or registration rejected by the server
    #[error("Credential error: {0}")]
    Credential(String),

    /// The refresh cycle failed and the session was torn down
    #[error("Token refresh failed: {0}")]
    RefreshFailed(RefreshFailure),

    /// Authentication failed again after the one allowed replay
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Any non-authentication error response from the API
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Operation timed out")]
    Timeout,

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Durable token storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SessionError {
    /// Returns true when the host application must treat the session as ended
    /// and route to its unauthenticated entry point.
    pub fn is_session_terminal(&self) -> bool {
        matches!(self, SessionError::RefreshFailed(_))
    }

    /// Returns true for authentication failures, terminal or not.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            SessionError::Credential(_)
                | SessionError::RefreshFailed(_)
                | SessionError::Unauthorized(_)
        )
    }
}

impl From<RefreshFailure> for SessionError {
    fn from(failure: RefreshFailure) -> Self {
        SessionError::RefreshFailed(failure)
    }
}

impl From<figment::Error> for SessionError {
    fn from(e: figment::Error) -> Self {
        SessionError::Config(e.to_string())
    }
}

/// Result type alias using SessionError.
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_failure_is_terminal() {
        let err = SessionError::from(RefreshFailure::new(Some(401), "expired"));
        assert!(err.is_session_terminal());
        assert!(err.is_authentication());
    }

    #[test]
    fn test_unauthorized_is_not_terminal() {
        let err = SessionError::Unauthorized("/auth/profile".to_string());
        assert!(!err.is_session_terminal());
        assert!(err.is_authentication());
    }

    #[test]
    fn test_api_error_is_not_authentication() {
        let err = SessionError::Api {
            status: 422,
            message: "height must be positive".to_string(),
        };
        assert!(!err.is_authentication());
        assert_eq!(
            err.to_string(),
            "API error (HTTP 422): height must be positive"
        );
    }

    #[test]
    fn test_refresh_failure_rejection() {
        assert!(RefreshFailure::new(Some(403), "revoked").is_rejection());
        assert!(!RefreshFailure::new(Some(500), "boom").is_rejection());
        assert!(!RefreshFailure::new(None, "connection refused").is_rejection());
        assert_eq!(
            RefreshFailure::new(Some(401), "jwt expired").to_string(),
            "HTTP 401: jwt expired"
        );
    }
}
