//! Bare subprocess execution.

use super::capture::run_captured;
use super::{NetworkPolicy, PathPolicy, RunControl, RunOutcome, RunSpec};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Runs the verifier directly on the host.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    policy: PathPolicy,
}

impl ProcessRunner {
    pub fn new(policy: PathPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PathPolicy {
        &self.policy
    }

    pub(crate) async fn run(&self, spec: &RunSpec, control: RunControl) -> RunOutcome {
        if spec.network == NetworkPolicy::Isolated {
            debug!("Network isolation is not enforced for host processes");
        }

        let mut command = Command::new(&spec.program);
        command.args(&spec.args).current_dir(&spec.cwd).envs(&spec.env);

        let captured = run_captured(command, control, async {}).await;
        RunOutcome {
            exit_code: captured.exit_code,
            output: captured.output,
            failure: captured.failure,
            warnings: Vec::new(),
            duration: Duration::ZERO,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::sandbox::{RunFailure, SandboxRunner};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn runner() -> SandboxRunner {
        let temp = std::env::temp_dir();
        SandboxRunner::Process(ProcessRunner::new(PathPolicy::new(None, Some(temp))))
    }

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let dir = TempDir::new().unwrap();
        let spec = RunSpec::shell(dir.path(), "echo out; echo err >&2; exit 3");
        let outcome = runner().run(&spec, RunControl::new()).await;

        assert_eq!(outcome.exit_code, Some(3));
        assert!(outcome.failure.is_none());
        assert!(outcome.output.contains("out"));
        assert!(outcome.output.contains("err"));
        assert!(!outcome.completed());
    }

    #[tokio::test]
    async fn test_working_directory_and_env() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let spec = RunSpec::shell(dir.path(), "cat marker.txt; echo \" $GREETING\"")
            .with_env("GREETING", "hello");
        let outcome = runner().run(&spec, RunControl::new()).await;

        assert!(outcome.completed());
        assert!(outcome.output.contains("here hello"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_distinct() {
        let dir = TempDir::new().unwrap();
        let spec = RunSpec::new(dir.path(), "definitely-not-a-real-binary-xyz", vec![]);
        let outcome = runner().run(&spec, RunControl::new()).await;
        assert!(matches!(outcome.failure, Some(RunFailure::SpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let dir = TempDir::new().unwrap();
        let spec = RunSpec::shell(dir.path(), "echo started; sleep 10; echo never");
        let control = RunControl::new().with_timeout(Duration::from_millis(500));
        let outcome = runner().run(&spec, control).await;

        assert!(matches!(outcome.failure, Some(RunFailure::TimedOut(_))));
        assert!(outcome.output.contains("started"));
        assert!(!outcome.output.contains("never"));
        assert!(outcome.duration < Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_cancel_and_stream() {
        let dir = TempDir::new().unwrap();
        let spec = RunSpec::shell(dir.path(), "echo first; sleep 10");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let (control, handle) = RunControl::cancellable();
        let control = control.with_output(tx);

        let runner = runner();
        let task = tokio::spawn(async move { runner.run(&spec, control).await });

        let first = rx.recv().await.unwrap();
        assert!(first.contains("first"));
        handle.cancel();

        let outcome = task.await.unwrap();
        assert_eq!(outcome.failure, Some(RunFailure::Cancelled));
        assert!(outcome.output.contains("first"));
    }

    #[tokio::test]
    async fn test_unsafe_path_never_runs() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let spec = RunSpec::shell(PathBuf::from("/"), format!("touch {}", marker.display()));
        let outcome = runner().run(&spec, RunControl::new()).await;

        assert!(matches!(outcome.failure, Some(RunFailure::UnsafePath { .. })));
        assert!(!marker.exists());
    }
}
