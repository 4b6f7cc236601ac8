//! Sandbox specification
//!
//! Everything about a sandbox container except the image, which is chosen
//! per task. Translates into a Docker create request.

use bollard::container::Config;
use bollard::models::{HostConfig, PortBinding};
use conduit_foundation::SandboxSettings;
use std::collections::HashMap;
use std::time::Duration;

/// Label put on every container we create
pub const MANAGED_LABEL: &str = "conduit.managed";

/// Resource limits for the container
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimits {
    /// Memory limit in MB
    pub memory_mb: Option<u64>,
    /// CPU limit (number of cores, e.g., 1.5)
    pub cpus: Option<f64>,
    /// PIDs limit
    pub pids_limit: Option<i64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: Some(4096),
            cpus: Some(2.0),
            pids_limit: Some(1024),
        }
    }
}

/// Network mode for the container
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NetworkMode {
    /// Default Docker bridge
    #[default]
    Bridge,
    Host,
    Custom(String),
}

impl NetworkMode {
    fn from_name(name: Option<&str>) -> Self {
        match name {
            None | Some("bridge") | Some("") => Self::Bridge,
            Some("host") => Self::Host,
            Some(other) => Self::Custom(other.to_string()),
        }
    }

    fn docker_name(&self) -> Option<String> {
        match self {
            Self::Bridge => None,
            Self::Host => Some("host".to_string()),
            Self::Custom(name) => Some(name.clone()),
        }
    }
}

/// Container settings shared by every sandbox
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSpec {
    /// Port the session service listens on inside the container
    pub container_port: u16,
    /// Host address the port is published on
    pub host: String,
    pub env: HashMap<String, String>,
    /// Command override (image default when empty)
    pub command: Vec<String>,
    pub limits: ResourceLimits,
    pub network: NetworkMode,
    pub labels: HashMap<String, String>,
    pub stop_timeout: Duration,
    pub pull_if_missing: bool,
}

impl Default for SandboxSpec {
    fn default() -> Self {
        Self::from_settings(&SandboxSettings::default())
    }
}

impl SandboxSpec {
    pub fn from_settings(settings: &SandboxSettings) -> Self {
        Self {
            container_port: settings.container_port,
            host: settings.host.clone(),
            env: settings.env.clone(),
            command: settings.command.clone(),
            limits: ResourceLimits {
                memory_mb: settings.memory_mb,
                cpus: settings.cpus,
                ..Default::default()
            },
            network: NetworkMode::from_name(settings.network.as_deref()),
            labels: HashMap::new(),
            stop_timeout: Duration::from_secs(settings.stop_timeout_secs),
            pull_if_missing: settings.pull_if_missing,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Docker port key, e.g. `4096/tcp`
    pub fn port_key(&self) -> String {
        format!("{}/tcp", self.container_port)
    }

    /// Build the Docker create request for `image`
    pub fn build_config(&self, image: &str) -> Config<String> {
        let port_key = self.port_key();

        let mut env: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        env.sort();

        let mut labels = self.labels.clone();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

        // Empty host port: Docker picks an ephemeral one
        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: Some(self.host.clone()),
                host_port: None,
            }]),
        );

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(port_key, HashMap::new());

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            memory: self
                .limits
                .memory_mb
                .map(|mb| (mb * 1024 * 1024) as i64),
            nano_cpus: self.limits.cpus.map(|c| (c * 1_000_000_000.0) as i64),
            pids_limit: self.limits.pids_limit,
            network_mode: self.network.docker_name(),
            auto_remove: Some(false),
            ..Default::default()
        };

        Config {
            image: Some(image.to_string()),
            env: if env.is_empty() { None } else { Some(env) },
            cmd: if self.command.is_empty() {
                None
            } else {
                Some(self.command.clone())
            },
            exposed_ports: Some(exposed_ports),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}
