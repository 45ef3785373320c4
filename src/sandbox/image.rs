//! Course image tagging and building.
//!
//! Each course gets one image whose tag is derived from the course id alone.
//! An image is built only when the tag is absent locally; rebuilding a stale
//! image is an explicit user action (`docker rmi <tag>`).

use super::runtime::RuntimeClient;
use crate::error::{EngineError, Result};
use std::path::Path;
use tokio::process::Command;
use tracing::info;

/// Deterministic image tag for a course id.
pub fn image_tag_for(course_id: &str) -> String {
    let sanitized: String = course_id
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("coursebox-course-{}:latest", sanitized.trim_matches('-'))
}

/// Builds and looks up course images.
#[derive(Clone)]
pub struct ImageManager {
    client: RuntimeClient,
}

impl ImageManager {
    pub fn new(client: RuntimeClient) -> Self {
        Self { client }
    }

    /// Check if an image exists locally.
    pub async fn exists(&self, tag: &str) -> Result<bool> {
        match self.client.docker().inspect_image(tag).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(EngineError::RunnerUnavailable(format!(
                "failed to inspect image {}: {}",
                tag, e
            ))),
        }
    }

    /// Build `tag` from `dockerfile` with `context` as build context.
    ///
    /// Uses the CLI rather than the API to avoid streaming a tar of the context.
    pub async fn build(&self, tag: &str, dockerfile: &Path, context: &Path) -> Result<()> {
        info!("Building course image {} using {:?}", tag, self.client.cli());

        let output = Command::new(self.client.cli())
            .arg("build")
            .arg("-t")
            .arg(tag)
            .arg("-f")
            .arg(dockerfile)
            .arg(context)
            .output()
            .await
            .map_err(|e| EngineError::RunnerUnavailable(format!("failed to run build: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::RunnerUnavailable(format!(
                "image build failed: {}",
                stderr.trim()
            )));
        }

        info!("Successfully built image: {}", tag);
        Ok(())
    }

    /// Build the image unless it already exists. Returns whether a build ran.
    pub async fn ensure(&self, tag: &str, dockerfile: &Path, context: &Path) -> Result<bool> {
        if self.exists(tag).await? {
            info!("Reusing existing image {}", tag);
            return Ok(false);
        }
        self.build(tag, dockerfile, context).await?;
        Ok(true)
    }
}
