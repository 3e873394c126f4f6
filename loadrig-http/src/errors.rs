//! HTTP error types

use loadrig_core::Outcome;
use std::time::Duration;

/// Why a login attempt did not produce a session
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Malformed login response: {0}")]
    MalformedResponse(String),

    #[error("Login returned unexpected status {0}")]
    UnexpectedStatus(u16),

    #[error("Login endpoint unreachable: {message}")]
    Unreachable { message: String, timed_out: bool },
}

impl AuthError {
    /// How the login request is classified in the metrics
    pub fn outcome(&self) -> Outcome {
        match self {
            AuthError::InvalidCredentials => Outcome::Unauthorized,
            AuthError::MalformedResponse(_) => Outcome::UnexpectedStatus { status: 200 },
            AuthError::UnexpectedStatus(status) => Outcome::UnexpectedStatus { status: *status },
            AuthError::Unreachable { timed_out: true, .. } => Outcome::Timeout,
            AuthError::Unreachable { .. } => Outcome::ConnectionFailed,
        }
    }
}

/// Why an authenticated request did not succeed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    /// 401 from the server, or a session that was already invalidated
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Unexpected status {status}")]
    Unexpected { status: u16 },

    #[error("Request timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl RequestError {
    pub fn outcome(&self) -> Outcome {
        match self {
            RequestError::Unauthorized => Outcome::Unauthorized,
            RequestError::Unexpected { status } => Outcome::UnexpectedStatus { status: *status },
            RequestError::Timeout { .. } => Outcome::Timeout,
            RequestError::ConnectionFailed(_) | RequestError::InvalidRequest(_) => {
                Outcome::ConnectionFailed
            }
        }
    }

    pub(crate) fn from_transport(error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            RequestError::Timeout { after: timeout }
        } else if error.is_builder() {
            RequestError::InvalidRequest(error.to_string())
        } else {
            RequestError::ConnectionFailed(error.to_string())
        }
    }
}
