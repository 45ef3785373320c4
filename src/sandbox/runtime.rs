//! Docker/Podman connection.
//!
//! Connects through the bollard API for availability checks, image lookups
//! and container cleanup, and locates the matching CLI for `run` and `build`.

use crate::error::{EngineError, Result};
use bollard::Docker;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Connected container runtime.
#[derive(Clone)]
pub struct RuntimeClient {
    docker: Arc<Docker>,
    cli: PathBuf,
}

impl RuntimeClient {
    /// Connect to Docker, falling back to Podman sockets, and verify with a ping.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RunnerUnavailable`] if no runtime answers or no
    /// CLI is on `PATH`.
    pub async fn connect() -> Result<Self> {
        let cli = which::which("docker")
            .or_else(|_| which::which("podman"))
            .map_err(|_| {
                EngineError::RunnerUnavailable(
                    "neither docker nor podman was found on PATH".to_string(),
                )
            })?;
        let docker = Self::connect_api()?;
        let client = Self {
            docker: Arc::new(docker),
            cli,
        };
        client.ping().await?;
        Ok(client)
    }

    fn connect_api() -> Result<Docker> {
        debug!("Attempting to connect to container runtime...");

        match Docker::connect_with_local_defaults() {
            Ok(docker) => {
                info!("Connected to container runtime via local defaults");
                return Ok(docker);
            }
            Err(e) => {
                debug!("Local defaults failed: {}", e);
            }
        }

        #[cfg(unix)]
        {
            let mut sockets = Vec::new();
            if let Some(runtime_dir) = dirs::runtime_dir() {
                sockets.push(format!("unix://{}/podman/podman.sock", runtime_dir.display()));
            }
            sockets.push("unix:///run/podman/podman.sock".to_string());

            for socket in sockets {
                debug!("Trying Podman socket: {}", socket);
                match Docker::connect_with_socket(&socket, 120, bollard::API_DEFAULT_VERSION) {
                    Ok(docker) => {
                        info!("Connected to Podman via {}", socket);
                        return Ok(docker);
                    }
                    Err(e) => {
                        debug!("Podman socket {} failed: {}", socket, e);
                    }
                }
            }
        }

        Err(EngineError::RunnerUnavailable(
            "failed to connect to Docker or Podman; ensure one is installed and running"
                .to_string(),
        ))
    }

    /// Ping the container runtime to verify connectivity.
    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await.map_err(|e| {
            EngineError::RunnerUnavailable(format!("failed to ping container runtime: {}", e))
        })?;
        debug!("Container runtime ping successful");
        Ok(())
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    /// Path of the docker or podman executable.
    pub fn cli(&self) -> &Path {
        &self.cli
    }

    /// Force-remove a container by name, ignoring "not found".
    pub async fn force_remove(&self, name: &str) {
        let options = bollard::container::RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => debug!("Removed container {}", name),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => debug!("Could not remove container {}: {}", name, e),
        }
    }
}
