//! Sandbox error types

use conduit_foundation::Error as FoundationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    /// Container runtime not reachable
    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Failed to pull image {image}: {message}")]
    ImagePull { image: String, message: String },

    #[error("Failed to start sandbox: {0}")]
    StartFailed(String),

    /// The service port was not published to the host
    #[error("Sandbox port not published: {0}")]
    PortNotPublished(String),

    #[error("Failed to stop sandbox: {0}")]
    StopFailed(String),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

impl From<SandboxError> for FoundationError {
    fn from(e: SandboxError) -> Self {
        FoundationError::Sandbox(e.to_string())
    }
}
