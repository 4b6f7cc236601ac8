//! Docker sandbox provider

use crate::error::SandboxError;
use crate::provider::{SandboxHandle, SandboxInstance, SandboxProvider};
use crate::spec::SandboxSpec;
use async_trait::async_trait;
use bollard::container::{
    CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::PortMap;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info, warn};

/// Runs each sandbox as a Docker container
pub struct DockerSandboxProvider {
    docker: Docker,
    spec: SandboxSpec,
}

impl DockerSandboxProvider {
    /// Connect to the local Docker daemon
    pub fn connect(spec: SandboxSpec) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::RuntimeUnavailable(e.to_string()))?;
        Ok(Self { docker, spec })
    }

    pub fn with_client(docker: Docker, spec: SandboxSpec) -> Self {
        Self { docker, spec }
    }

    pub fn spec(&self) -> &SandboxSpec {
        &self.spec
    }

    /// Check that the daemon answers
    pub async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }
        if !self.spec.pull_if_missing {
            return Err(SandboxError::ImagePull {
                image: image.to_string(),
                message: "image not present and pulling is disabled".to_string(),
            });
        }

        info!("Pulling image: {}", image);
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(item) = progress.next().await {
            item.map_err(|e| SandboxError::ImagePull {
                image: image.to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    async fn published_port(&self, id: &str) -> Result<u16, SandboxError> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;

        inspect
            .network_settings
            .and_then(|n| n.ports)
            .and_then(|ports| host_port(&ports, &self.spec.port_key()))
            .ok_or_else(|| SandboxError::PortNotPublished(self.spec.port_key()))
    }

    /// Best-effort removal of a container that failed half-way through start
    async fn discard(&self, id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(id, Some(options)).await {
            warn!(container = id, "Failed to discard container: {}", e);
        }
    }
}

/// Host port bound to `port_key`, if any
pub(crate) fn host_port(ports: &PortMap, port_key: &str) -> Option<u16> {
    ports
        .get(port_key)?
        .as_ref()?
        .iter()
        .filter_map(|binding| binding.host_port.as_deref())
        .find_map(|port| port.parse().ok())
}

/// 404 (no such container) and 304 (already stopped) are not failures on teardown
fn is_gone(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404 | 304,
            ..
        }
    )
}

#[async_trait]
impl SandboxProvider for DockerSandboxProvider {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn start(&self, image: &str) -> Result<SandboxInstance, SandboxError> {
        self.ensure_image(image).await?;

        let name = format!("conduit-{}", uuid::Uuid::new_v4().simple());
        let options = CreateContainerOptions {
            name: name.clone(),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(Some(options), self.spec.build_config(image))
            .await
            .map_err(|e| SandboxError::StartFailed(e.to_string()))?;
        let id = created.id;
        debug!(container = %id, name = %name, "Created sandbox container");

        if let Err(e) = self
            .docker
            .start_container(&id, None::<StartContainerOptions<String>>)
            .await
        {
            self.discard(&id).await;
            return Err(SandboxError::StartFailed(e.to_string()));
        }

        let port = match self.published_port(&id).await {
            Ok(port) => port,
            Err(e) => {
                self.discard(&id).await;
                return Err(e);
            }
        };

        info!(container = %id, port, "Sandbox started from {}", image);
        Ok(SandboxInstance::new(
            SandboxHandle::new(id),
            self.spec.host.clone(),
            port,
        ))
    }

    async fn stop(&self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        let id = handle.as_str();
        info!(container = id, "Stopping sandbox");

        let stop = StopContainerOptions {
            t: self.spec.stop_timeout.as_secs() as i64,
        };
        // The force-remove below kills the container if the stop did not
        match self.docker.stop_container(id, Some(stop)).await {
            Ok(()) => {}
            Err(e) if is_gone(&e) => debug!(container = id, "Sandbox already stopped"),
            Err(e) => warn!(container = id, "Graceful stop failed, forcing removal: {}", e),
        }

        let remove = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(remove)).await {
            Ok(()) => Ok(()),
            Err(e) if is_gone(&e) => Ok(()),
            Err(e) => Err(SandboxError::StopFailed(e.to_string())),
        }
    }
}
