//! Container execution.
//!
//! Each run is a fresh `docker run --rm` with the working directory mounted at
//! `/workspace`, fixed resource caps, and no network unless the course asked
//! for it.

use super::capture::run_captured;
use super::runtime::RuntimeClient;
use super::{NetworkPolicy, PathPolicy, RunControl, RunFailure, RunOutcome, RunSpec};
use crate::error::Result;
use std::ffi::OsString;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

/// Mount point of the working directory inside the container.
pub const CONTAINER_WORKDIR: &str = "/workspace";
pub const CPU_LIMIT: &str = "2";
pub const MEMORY_LIMIT: &str = "2g";

pub const NETWORK_WARNING: &str =
    "This course requested network access; the verifier can reach the internet";

/// Runs verifiers inside a course image.
#[derive(Clone)]
pub struct ContainerRunner {
    client: RuntimeClient,
    image: String,
    policy: PathPolicy,
}

impl ContainerRunner {
    pub fn new(client: RuntimeClient, image: impl Into<String>, policy: PathPolicy) -> Self {
        Self {
            client,
            image: image.into(),
            policy,
        }
    }

    pub fn policy(&self) -> &PathPolicy {
        &self.policy
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub(crate) async fn health_check(&self) -> Result<()> {
        self.client.ping().await
    }

    /// Arguments passed to the runtime CLI for `spec`.
    pub fn run_args(&self, spec: &RunSpec, container_name: &str) -> Vec<OsString> {
        let network = match spec.network {
            NetworkPolicy::Isolated => "none",
            NetworkPolicy::Bridged => "bridge",
        };
        let mut mount = spec.cwd.as_os_str().to_os_string();
        mount.push(":");
        mount.push(CONTAINER_WORKDIR);

        let mut args: Vec<OsString> = vec![
            "run".into(),
            "--rm".into(),
            "--name".into(),
            container_name.into(),
            "--network".into(),
            network.into(),
            "-v".into(),
            mount,
            "-w".into(),
            CONTAINER_WORKDIR.into(),
            format!("--cpus={CPU_LIMIT}").into(),
            format!("--memory={MEMORY_LIMIT}").into(),
        ];
        for (key, value) in &spec.env {
            args.push("-e".into());
            args.push(format!("{key}={value}").into());
        }
        args.push(self.image.clone().into());
        args.push(spec.program.clone().into());
        args.extend(spec.args.iter().map(OsString::from));
        args
    }

    pub(crate) async fn run(&self, spec: &RunSpec, control: RunControl) -> RunOutcome {
        let mut warnings = Vec::new();
        if spec.network == NetworkPolicy::Bridged {
            warn!("{}", NETWORK_WARNING);
            warnings.push(NETWORK_WARNING.to_string());
        }

        if let Err(e) = self.client.ping().await {
            let mut outcome = RunOutcome::failed(RunFailure::RuntimeUnavailable(e.to_string()));
            outcome.warnings = warnings;
            return outcome;
        }

        let name = format!("coursebox-run-{}", uuid::Uuid::new_v4());
        info!("Starting container {} from {}", name, self.image);
        let mut command = Command::new(self.client.cli());
        command.args(self.run_args(spec, &name));

        let client = self.client.clone();
        let cleanup_name = name.clone();
        let captured = run_captured(command, control, async move {
            client.force_remove(&cleanup_name).await;
        })
        .await;

        RunOutcome {
            exit_code: captured.exit_code,
            output: captured.output,
            failure: captured.failure,
            warnings,
            duration: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxRunner;
    use test_tag::tag;

    async fn runner() -> Option<ContainerRunner> {
        let client = RuntimeClient::connect().await.ok()?;
        Some(ContainerRunner::new(
            client,
            "alpine:latest",
            PathPolicy::default(),
        ))
    }

    #[tokio::test]
    #[tag(docker)]
    async fn test_run_args_apply_fixed_limits() {
        let Some(runner) = runner().await else {
            eprintln!("Skipping: no container runtime");
            return;
        };
        let spec = RunSpec::shell("/srv/course", "make test")
            .with_env("FORCE_COLOR", "1")
            .with_network(NetworkPolicy::Isolated);
        let args: Vec<String> = runner
            .run_args(&spec, "coursebox-run-x")
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert!(args.contains(&"--rm".to_string()));
        assert!(args.contains(&"--cpus=2".to_string()));
        assert!(args.contains(&"--memory=2g".to_string()));
        assert!(args.contains(&"/srv/course:/workspace".to_string()));
        assert!(args.contains(&"FORCE_COLOR=1".to_string()));
        let net = args.iter().position(|a| a == "--network").unwrap();
        assert_eq!(args[net + 1], "none");
        assert_eq!(args[args.len() - 3..], ["sh", "-c", "make test"]);
    }

    #[tokio::test]
    #[tag(docker)]
    async fn test_network_request_warns() {
        let Some(runner) = runner().await else {
            eprintln!("Skipping: no container runtime");
            return;
        };
        let dir = tempfile::TempDir::new().unwrap();
        let spec = RunSpec::shell(dir.path(), "echo hi").with_network(NetworkPolicy::Bridged);
        let outcome = SandboxRunner::Container(runner)
            .run(&spec, RunControl::new())
            .await;
        assert_eq!(outcome.warnings, vec![NETWORK_WARNING.to_string()]);
    }
}
