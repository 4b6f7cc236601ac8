//! Conduit Config - unified settings
//!
//! Every section has working defaults so an empty file is a valid config.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Conduit Config
// ============================================================================

/// Unified configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConduitConfig {
    pub sandbox: SandboxSettings,
    pub orchestrator: OrchestratorSettings,
    pub session: SessionSettings,
    pub storage: StorageSettings,
}

impl ConduitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the orchestrator cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.sandbox.image.trim().is_empty() {
            return Err(Error::Config("sandbox.image must not be empty".to_string()));
        }
        if self.sandbox.container_port == 0 {
            return Err(Error::Config(
                "sandbox.container_port must be non-zero".to_string(),
            ));
        }
        if self.orchestrator.health_check_retries == 0 {
            return Err(Error::Config(
                "orchestrator.health_check_retries must be at least 1".to_string(),
            ));
        }
        if self.orchestrator.task_timeout_secs == 0 {
            return Err(Error::Config(
                "orchestrator.task_timeout_secs must be non-zero".to_string(),
            ));
        }
        if self.session.request_timeout_secs == 0 {
            return Err(Error::Config(
                "session.request_timeout_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Sandbox
// ============================================================================

/// Sandbox container settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Container image running the session service
    pub image: String,

    /// Port the session service listens on inside the container
    pub container_port: u16,

    /// Host address the published port is reachable on
    pub host: String,

    /// Memory limit in MB
    pub memory_mb: Option<u64>,

    /// CPU limit (cores, e.g. 1.5)
    pub cpus: Option<f64>,

    /// Docker network name ("bridge" when unset)
    pub network: Option<String>,

    /// Extra environment passed to the container
    pub env: HashMap<String, String>,

    /// Command override for the image
    pub command: Vec<String>,

    /// Pull the image when it is not present locally
    pub pull_if_missing: bool,

    /// Grace period for `docker stop`
    pub stop_timeout_secs: u64,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            image: "ghcr.io/sst/opencode:latest".to_string(),
            container_port: 4096,
            host: "127.0.0.1".to_string(),
            memory_mb: Some(4096),
            cpus: Some(2.0),
            network: None,
            env: HashMap::new(),
            command: vec![],
            pull_if_missing: true,
            stop_timeout_secs: 10,
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Lifecycle timing for a single task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Maximum number of health probes before giving up
    pub health_check_retries: u32,

    /// Delay between health probes
    pub health_check_interval_ms: u64,

    /// Hard cutoff for the whole task
    pub task_timeout_secs: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            health_check_retries: 30,
            health_check_interval_ms: 1000,
            task_timeout_secs: 3600,
        }
    }
}

impl OrchestratorSettings {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

// ============================================================================
// Session
// ============================================================================

/// Provider/model pair forwarded with the prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider_id: String,
    pub model_id: String,
}

/// Session service client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Per-request timeout (does not apply to the event stream)
    pub request_timeout_secs: u64,

    /// Working directory inside the sandbox
    pub directory: Option<String>,

    /// Agent name to run the prompt with
    pub agent: Option<String>,

    /// Model override
    pub model: Option<ModelRef>,

    /// Prefix for generated session titles
    pub title_prefix: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            directory: None,
            agent: None,
            model: None,
            title_prefix: "conduit".to_string(),
        }
    }
}

impl SessionSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Task store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Json,
    Sqlite,
}

/// Task store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,

    /// Data directory (platform data dir when unset)
    pub data_dir: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            data_dir: None,
        }
    }
}

impl StorageSettings {
    /// Resolve the data directory
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        dirs::data_dir()
            .map(|d| d.join("conduit"))
            .ok_or_else(|| Error::Config("Cannot find data directory".to_string()))
    }
}
