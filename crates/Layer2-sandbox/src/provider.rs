//! SandboxProvider trait

use crate::error::SandboxError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Opaque handle to a started sandbox (container id for Docker)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SandboxHandle(pub String);

impl SandboxHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SandboxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A started sandbox and where its service can be reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxInstance {
    pub handle: SandboxHandle,
    pub host: String,
    pub port: u16,
}

impl SandboxInstance {
    pub fn new(handle: SandboxHandle, host: impl Into<String>, port: u16) -> Self {
        Self {
            handle,
            host: host.into(),
            port,
        }
    }

    /// Base URL of the embedded session service
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Starts and stops isolated execution environments
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Provider name (for logging)
    fn name(&self) -> &'static str;

    async fn start(&self, image: &str) -> Result<SandboxInstance, SandboxError>;

    /// Stop and discard a sandbox. Stopping one that is already gone succeeds.
    async fn stop(&self, handle: &SandboxHandle) -> Result<(), SandboxError>;
}
