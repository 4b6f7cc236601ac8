//! Session client error types

use conduit_foundation::Error as FoundationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    /// Network failure, timeout, connection refused
    #[error("Request failed: {0}")]
    Request(String),

    /// Non-success HTTP status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The service answered but reports itself unhealthy
    #[error("Service unhealthy: {0}")]
    Unhealthy(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to subscribe to events: {0}")]
    Subscribe(String),
}

impl From<reqwest::Error> for SessionError {
    fn from(e: reqwest::Error) -> Self {
        SessionError::Request(e.to_string())
    }
}

impl From<SessionError> for FoundationError {
    fn from(e: SessionError) -> Self {
        FoundationError::Session(e.to_string())
    }
}
