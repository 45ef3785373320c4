//! # Sandbox Runner
//!
//! Runs one verifier command for one exercise, either as a bare subprocess or
//! inside a locally built container image.
//!
//! - **[`SandboxRunner`]**: closed set of execution variants behind one `run`
//! - **[`RunSpec`]**: working directory, program, arguments, environment and network policy
//! - **[`RunControl`]**: optional cancel signal, timeout and live output channel
//! - **[`RunOutcome`]**: exit status, combined output and a [`RunFailure`] when the
//!   verifier could not run to completion
//! - **[`PathPolicy`]**: rejects running in or mounting sensitive locations
//!
//! ```text
//! RunSpec ──▶ PathPolicy::check ──▶ ┌ Process   (tokio::process)
//!                 │                 └ Container (docker run --rm, fixed limits)
//!                 ▼                              │
//!      RunFailure::UnsafePath                    ▼
//!                                           RunOutcome
//! ```
//!
//! A non-zero verifier exit is a normal outcome, not a failure: it becomes a
//! failed [`crate::verdict::Verdict`]. Only conditions that prevent the
//! verifier from producing a verdict are reported as [`RunFailure`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

mod capture;

/// Bare subprocess execution.
pub mod host;

/// Mount and working-directory safety policy.
pub mod safety;

/// Container execution through Docker or Podman (requires `containers` feature).
#[cfg(feature = "containers")]
pub mod container;

/// Course image tagging and building (requires `containers` feature).
#[cfg(feature = "containers")]
pub mod image;

/// Container runtime connection (requires `containers` feature).
#[cfg(feature = "containers")]
pub mod runtime;

pub use host::ProcessRunner;
pub use safety::PathPolicy;

#[cfg(feature = "containers")]
pub use container::ContainerRunner;
#[cfg(feature = "containers")]
pub use image::{ImageManager, image_tag_for};
#[cfg(feature = "containers")]
pub use runtime::RuntimeClient;

/// Network access granted to a verifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPolicy {
    #[default]
    Isolated,
    Bridged,
}

/// What to run and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub cwd: PathBuf,
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub network: NetworkPolicy,
}

impl RunSpec {
    pub fn new(cwd: impl Into<PathBuf>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            cwd: cwd.into(),
            program: program.into(),
            args,
            env: BTreeMap::new(),
            network: NetworkPolicy::default(),
        }
    }

    /// Run a shell command line through `sh -c`.
    pub fn shell(cwd: impl Into<PathBuf>, command_line: impl Into<String>) -> Self {
        Self::new(cwd, "sh", vec!["-c".to_string(), command_line.into()])
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_network(mut self, network: NetworkPolicy) -> Self {
        self.network = network;
        self
    }
}

/// Requests cancellation of a running verifier.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Per-run knobs. The default runs to completion with no timeout.
#[derive(Debug, Default)]
pub struct RunControl {
    pub(crate) cancel: Option<watch::Receiver<bool>>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) output: Option<mpsc::UnboundedSender<String>>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// A control paired with the handle that cancels it.
    pub fn cancellable() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                cancel: Some(rx),
                ..Self::default()
            },
            CancelHandle { tx },
        )
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Forward output chunks as they arrive.
    pub fn with_output(mut self, sink: mpsc::UnboundedSender<String>) -> Self {
        self.output = Some(sink);
        self
    }
}

/// Why a verifier produced no complete result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunFailure {
    UnsafePath { path: PathBuf, reason: String },
    SpawnFailed(String),
    RuntimeUnavailable(String),
    ImageUnavailable(String),
    Cancelled,
    TimedOut(Duration),
}

impl RunFailure {
    /// Partial output of an interrupted run is still a verdict basis.
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Cancelled | Self::TimedOut(_))
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub exit_code: Option<i32>,
    /// stdout and stderr, interleaved in arrival order
    pub output: String,
    pub failure: Option<RunFailure>,
    /// Notices shown to the student before the output
    pub warnings: Vec<String>,
    pub duration: Duration,
}

impl RunOutcome {
    pub(crate) fn failed(failure: RunFailure) -> Self {
        Self {
            exit_code: None,
            output: String::new(),
            failure: Some(failure),
            warnings: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Process ran to the end and exited with status zero.
    pub fn completed(&self) -> bool {
        self.failure.is_none() && self.exit_code == Some(0)
    }
}

/// Verifier execution variants.
#[derive(Clone)]
pub enum SandboxRunner {
    Process(ProcessRunner),
    #[cfg(feature = "containers")]
    Container(ContainerRunner),
}

impl SandboxRunner {
    pub fn policy(&self) -> &PathPolicy {
        match self {
            Self::Process(runner) => runner.policy(),
            #[cfg(feature = "containers")]
            Self::Container(runner) => runner.policy(),
        }
    }

    /// Run `spec`. The working directory is checked against the path policy
    /// first; a rejected path never reaches the underlying process.
    pub async fn run(&self, spec: &RunSpec, control: RunControl) -> RunOutcome {
        if let Err(reason) = self.policy().check(&spec.cwd) {
            warn!("Refusing to run in {:?}: {}", spec.cwd, reason);
            return RunOutcome::failed(RunFailure::UnsafePath {
                path: spec.cwd.clone(),
                reason,
            });
        }

        debug!(
            "Running verifier via {}: {} {:?}",
            self.runner_type(),
            spec.program,
            spec.args
        );
        let start = Instant::now();
        let mut outcome = match self {
            Self::Process(runner) => runner.run(spec, control).await,
            #[cfg(feature = "containers")]
            Self::Container(runner) => runner.run(spec, control).await,
        };
        outcome.duration = start.elapsed();
        outcome
    }

    /// Get runner type name for logging
    pub fn runner_type(&self) -> &'static str {
        match self {
            Self::Process(_) => "process",
            #[cfg(feature = "containers")]
            Self::Container(_) => "container",
        }
    }

    pub async fn health_check(&self) -> crate::Result<()> {
        match self {
            Self::Process(_) => Ok(()),
            #[cfg(feature = "containers")]
            Self::Container(runner) => runner.health_check().await,
        }
    }
}
