//! # conduit-sandbox
//!
//! Isolated execution environments for tasks.
//!
//! - `SandboxProvider` - start/stop seam used by the orchestrator
//! - `DockerSandboxProvider` - Docker implementation (via `bollard`)
//! - `SandboxSpec` - image-independent container settings
//! - `SandboxLease` - owns a started sandbox and guarantees it is stopped

pub mod docker;
pub mod error;
pub mod lease;
pub mod provider;
pub mod spec;

pub use docker::DockerSandboxProvider;
pub use error::SandboxError;
pub use lease::SandboxLease;
pub use provider::{SandboxHandle, SandboxInstance, SandboxProvider};
pub use spec::{NetworkMode, ResourceLimits, SandboxSpec};
