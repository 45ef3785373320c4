//! # Student workspace
//!
//! Orchestrates the engine components for one workspace directory. Every
//! public method maps to one user-facing operation:
//!
//! ```text
//! init ──▶ CacheStore ──▶ apply_layering ──▶ coursebox.toml + .gitignore
//! refresh ─▶ CacheStore (pinned) ──▶ apply_layering
//! run_exercise ──▶ outline lock check ──▶ SandboxRunner ──▶ normalize ──▶ Progress
//! check_update / update_diff / apply_update ──▶ update engine
//! push_progress / pull_progress ──▶ RemoteAuthority
//! ```

use crate::archive;
use crate::cache::CacheEntry;
use crate::course::{self, CourseManifest, CourseTree, NodeKind};
use crate::env;
use crate::error::{EngineError, IoContext, Result};
use crate::layering::{self, LayeringOptions, LayeringReport, apply_layering};
use crate::progression::{DEFAULT_EXERCISE_XP, Outline, Progress, RecordOutcome, compute_outline};
use crate::project::{self, LocalProjectConfig};
use crate::remote::RemoteAuthority;
use crate::sandbox::{
    PathPolicy, ProcessRunner, RunControl, RunFailure, RunOutcome, RunSpec, SandboxRunner,
};
use crate::source::{SourceFetcher, SourceLocator};
use crate::update::{self, AppliedUpdate, UpdateDiff, UpdateStatus, content_dir_name};
use crate::verdict::{self, Verdict};
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub mod context;
pub mod run;
pub mod sync;

pub use context::EngineContext;
pub use run::Placeholders;
pub use sync::SyncOutcome;

/// Label for staging directories created before the course id is known.
const INCOMING_LABEL: &str = "incoming";

/// What `init` or `refresh` did.
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub course_id: String,
    pub version: String,
    pub layering: LayeringReport,
    /// The source was unreachable and the cached copy was used
    pub stale: bool,
}

/// Result of one verifier run.
#[derive(Debug, Clone)]
pub struct ExerciseRun {
    pub id: String,
    pub verdict: Verdict,
    pub outcome: RunOutcome,
    /// Progress change, `None` when the run was cancelled
    pub record: Option<RecordOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupCheckResult {
    pub name: String,
    pub passed: bool,
    pub output: String,
}

/// An initialized student workspace.
#[derive(Clone)]
pub struct Workspace {
    root: PathBuf,
    ctx: EngineContext,
    authority: Arc<dyn RemoteAuthority>,
}

impl Workspace {
    /// Open an existing workspace.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotInitialized`] when `root` has no `coursebox.toml`.
    pub fn open(
        ctx: EngineContext,
        authority: Arc<dyn RemoteAuthority>,
        root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let root = root.into();
        if !LocalProjectConfig::exists(&root) {
            return Err(EngineError::NotInitialized(root));
        }
        Ok(Self {
            root,
            ctx,
            authority,
        })
    }

    /// Provision `root` from `course_input` (directory, archive, URL, git
    /// remote or registry alias). An already initialized workspace is
    /// refreshed instead.
    pub async fn init(
        ctx: EngineContext,
        authority: Arc<dyn RemoteAuthority>,
        course_input: &str,
        root: impl Into<PathBuf>,
    ) -> Result<(Self, ProvisionReport)> {
        let root = root.into();
        let workspace = Self {
            root,
            ctx,
            authority,
        };
        if LocalProjectConfig::exists(&workspace.root) {
            info!("{:?} is already initialized, refreshing", workspace.root);
            let report = workspace.refresh().await?;
            return Ok((workspace, report));
        }

        let locator = SourceLocator::parse(course_input);
        let fetcher = workspace.fetcher();
        let resolved = fetcher.resolve(&locator).await?;
        let sub_path = resolved.sub_path.clone();

        let cache = workspace.ctx.cache();
        let staged = cache
            .stage(&fetcher, INCOMING_LABEL, &locator, None)
            .await?;
        let manifest = CourseManifest::load(&staged.course_root(sub_path.as_deref()))?;
        let entry = cache.commit(&manifest.id, staged)?;

        let course_root = entry.course_root(sub_path.as_deref());
        let options = LayeringOptions::default().with_content_dir(&manifest.content.exercises);
        let layering = apply_layering(&workspace.root, &course_root, &options)?;

        let source = match &locator {
            SourceLocator::Registry(alias) => alias.clone(),
            other => other.to_string(),
        };
        let mut config = LocalProjectConfig::new(&manifest.id, source);
        if let SourceLocator::Git {
            branch: Some(branch),
            ..
        } = &resolved.locator
        {
            config.branch = branch.clone();
        }
        config.sub_path = sub_path;
        config.version = entry.version.clone();
        config.last_sync = Some(Utc::now());
        config.save(&workspace.root)?;

        let state_dir = env::state_dir_path(&workspace.root);
        fs::create_dir_all(&state_dir).at(&state_dir)?;
        if project::write_gitignore(&workspace.root, &manifest.content.exercises)? {
            info!("Generated .gitignore for {}", manifest.id);
        }

        info!("Initialized {} ({}) in {:?}", manifest.id, entry.version, workspace.root);
        Ok((
            workspace,
            ProvisionReport {
                course_id: manifest.id,
                version: entry.version,
                layering,
                stale: false,
            },
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub(crate) fn authority(&self) -> &dyn RemoteAuthority {
        self.authority.as_ref()
    }

    fn fetcher(&self) -> SourceFetcher<'_> {
        SourceFetcher::new(self.authority.as_ref())
    }

    pub fn config(&self) -> Result<LocalProjectConfig> {
        LocalProjectConfig::load(&self.root)
    }

    /// The course manifest as checked out in the workspace.
    pub fn manifest(&self) -> Result<CourseManifest> {
        CourseManifest::load(&self.root)
    }

    /// Cache entry at the recorded version, falling back to whatever is
    /// cached when the source is unreachable.
    async fn official_copy(&self, config: &LocalProjectConfig) -> Result<(CacheEntry, bool)> {
        let cache = self.ctx.cache();
        if let Some(entry) = cache.lookup(&config.course_id)
            && entry.version == config.version
        {
            return Ok((entry, false));
        }
        cache
            .ensure_or_fallback(
                &self.fetcher(),
                &config.course_id,
                &config.locator(),
                config.sub_path.as_deref(),
                Some(&config.version),
            )
            .await
    }

    /// Re-apply the official course at the recorded version without touching
    /// student code. The recorded version never changes here.
    pub async fn refresh(&self) -> Result<ProvisionReport> {
        let config = self.config()?;
        let (entry, stale) = self.official_copy(&config).await?;
        if stale {
            warn!("Source unreachable; refreshing from cached {}", entry.version);
        }
        let course_root = entry.course_root(config.sub_path.as_deref());
        let options = LayeringOptions::default().with_content_dir(content_dir_name(&course_root));
        let layering = apply_layering(&self.root, &course_root, &options)?;
        Ok(ProvisionReport {
            course_id: config.course_id,
            version: config.version,
            layering,
            stale,
        })
    }

    /// Exercise tree plus lock state, recomputed from disk on every call.
    pub fn outline(&self) -> Result<(CourseTree, Outline)> {
        let manifest = self.manifest()?;
        let tree = course::tree::scan(&self.root, &manifest)?;
        let progress = Progress::load(&self.root)?;
        let outline = compute_outline(&tree, &progress, manifest.policy(), self.ctx.bypass);
        Ok((tree, outline))
    }

    pub fn progress(&self) -> Result<Progress> {
        Progress::load(&self.root)
    }

    /// Run the verifier for exercise `id` and record the result.
    ///
    /// # Errors
    ///
    /// Locked or unknown exercises are refused before anything runs. A run
    /// the sandbox could not start surfaces as
    /// [`EngineError::UnsafeSandboxPath`] or [`EngineError::RunnerUnavailable`].
    /// A failing verifier is not an error: see [`Verdict::success`].
    pub async fn run_exercise(&self, id: &str, mut control: RunControl) -> Result<ExerciseRun> {
        let manifest = self.manifest()?;
        let tree = course::tree::scan(&self.root, &manifest)?;
        let mut progress = Progress::load(&self.root)?;
        let outline = compute_outline(&tree, &progress, manifest.policy(), self.ctx.bypass);

        let node = tree
            .find(id)
            .filter(|n| n.kind == NodeKind::Exercise)
            .ok_or_else(|| EngineError::ExerciseNotFound(id.to_string()))?;
        if let Some(reason) = outline.get(id).and_then(|e| e.lock_reason.clone()) {
            return Err(EngineError::ExerciseLocked {
                id: id.to_string(),
                reason,
            });
        }

        if control.timeout.is_none() {
            control.timeout = self.ctx.run_timeout;
        }
        let prepared = run::prepare(&self.root, &manifest, node, PathPolicy::default()).await?;
        let outcome = prepared.runner.run(&prepared.spec, control).await;
        for warning in &outcome.warnings {
            warn!("{}", warning);
        }

        match &outcome.failure {
            Some(RunFailure::UnsafePath { path, reason }) => {
                return Err(EngineError::UnsafeSandboxPath {
                    path: path.clone(),
                    reason: reason.clone(),
                });
            }
            Some(
                RunFailure::SpawnFailed(message)
                | RunFailure::RuntimeUnavailable(message)
                | RunFailure::ImageUnavailable(message),
            ) => return Err(EngineError::RunnerUnavailable(message.clone())),
            _ => {}
        }

        let verdict = verdict::normalize(outcome.completed(), &outcome.output);
        let record = if outcome.failure == Some(RunFailure::Cancelled) {
            None
        } else {
            let xp = node.xp.unwrap_or(DEFAULT_EXERCISE_XP);
            let record = progress.record_exercise(id, verdict.success, xp, Utc::now());
            progress.save(&self.root)?;
            Some(record)
        };

        Ok(ExerciseRun {
            id: id.to_string(),
            verdict,
            outcome,
            record,
        })
    }

    /// Restore one file from the official copy. `path` may be absolute inside
    /// the workspace or relative to it.
    pub async fn reset_file(&self, path: &Path) -> Result<PathBuf> {
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.root)
                .map_err(|_| EngineError::NotInCache(path.to_path_buf()))?
        } else {
            path
        };
        let config = self.config()?;
        let (entry, _) = self.official_copy(&config).await?;
        layering::reset_file(
            &self.root,
            &entry.dir,
            relative,
            config.sub_path.as_deref().map(Path::new),
        )
    }

    pub async fn check_update(&self) -> Result<UpdateStatus> {
        update::check_update(&self.root, &self.fetcher()).await
    }

    pub async fn update_diff(&self, latest_version: &str) -> Result<UpdateDiff> {
        update::get_update_diff(&self.root, &self.fetcher(), latest_version).await
    }

    pub async fn apply_update(&self, latest_version: &str) -> Result<AppliedUpdate> {
        update::apply_update(&self.root, &self.fetcher(), &self.ctx.cache(), latest_version).await
    }

    /// Run each declared setup check as a bare subprocess.
    pub async fn setup_checks(&self) -> Result<Vec<SetupCheckResult>> {
        let manifest = self.manifest()?;
        let Some(setup) = manifest.setup else {
            return Ok(Vec::new());
        };
        let runner = SandboxRunner::Process(ProcessRunner::new(PathPolicy::default()));
        let mut results = Vec::with_capacity(setup.checks.len());
        for check in setup.checks {
            let spec = RunSpec::shell(&self.root, &check.command);
            let outcome = runner.run(&spec, RunControl::new()).await;
            let output = match &outcome.failure {
                Some(failure) => format!("{failure:?}"),
                None => outcome.output.trim().to_string(),
            };
            results.push(SetupCheckResult {
                name: check.name,
                passed: outcome.completed(),
                output,
            });
        }
        Ok(results)
    }
}

/// Validate the course at `course_dir` and pack it into `dest`.
pub fn pack_course(course_dir: &Path, dest: &Path) -> Result<usize> {
    let manifest = CourseManifest::load(course_dir)?;
    let count = archive::pack(course_dir, dest)?;
    info!("Packed course {} ({}) into {:?}", manifest.id, manifest.version, dest);
    Ok(count)
}
