//! Subcommand handlers.
//!
//! Each handler builds the engine context from discovered configuration plus
//! the global flags, performs one workspace operation and prints the result.

use super::args::{ExecutionMode, GlobalOptions};
use super::config::{ConfigDiscovery, EngineConfig};
use crate::archive;
use crate::progression::ManifestEntry;
use crate::remote::RemoteAuthority;
use crate::sandbox::RunControl;
use crate::watcher;
use crate::workspace::{self, EngineContext, SyncOutcome, Workspace};
use anyhow::{Context, bail};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Resolve configuration for this invocation. An explicit `--config` file
/// replaces discovery; environment overrides and flags apply on top.
pub fn load_context(options: &GlobalOptions) -> anyhow::Result<EngineContext> {
    let mut config = match &options.config {
        Some(path) => {
            info!("Loading configuration override from: {:?}", path);
            let mut config = EngineConfig::from_toml_file(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok());
            config
        }
        None => ConfigDiscovery::discover_config()?,
    };
    config.offline |= options.offline;
    config.bypass |= options.bypass;
    Ok(config.to_context())
}

fn workspace_root(options: &GlobalOptions) -> anyhow::Result<PathBuf> {
    match &options.workspace {
        Some(dir) => Ok(dir.clone()),
        None => std::env::current_dir().context("Could not determine current directory"),
    }
}

fn open_workspace(options: &GlobalOptions) -> anyhow::Result<Workspace> {
    let ctx = load_context(options)?;
    let authority: Arc<dyn RemoteAuthority> = Arc::new(ctx.http_authority()?);
    Ok(Workspace::open(ctx, authority, workspace_root(options)?)?)
}

pub async fn execute(mode: ExecutionMode, options: &GlobalOptions) -> anyhow::Result<()> {
    match mode {
        ExecutionMode::Init { course } => run_init(&course, options).await,
        ExecutionMode::Start { file: Some(file) } => run_start_archive(&file, options).await,
        ExecutionMode::Start { file: None } => run_refresh(options).await,
        ExecutionMode::Pack { course_dir, output } => run_pack(&course_dir, output),
        ExecutionMode::Reset { path } => {
            let workspace = open_workspace(options)?;
            let restored = workspace.reset_file(&path).await?;
            println!("✅ Restored {}", restored.display());
            Ok(())
        }
        ExecutionMode::CheckUpdate => {
            let workspace = open_workspace(options)?;
            let status = workspace.check_update().await?;
            if status.available {
                println!(
                    "⬆️  {} {} is available (you have {}). Run `coursebox upgrade`.",
                    status.course_id, status.latest_version, status.current_version
                );
            } else {
                println!(
                    "✅ {} is up to date ({})",
                    status.course_id, status.current_version
                );
            }
            Ok(())
        }
        ExecutionMode::Upgrade { assume_yes } => run_upgrade(assume_yes, options).await,
        ExecutionMode::Run { exercise, timeout } => run_exercise(&exercise, timeout, options).await,
        ExecutionMode::Status => show_status(options),
        ExecutionMode::Sync => {
            let workspace = open_workspace(options)?;
            match workspace.push_progress().await? {
                SyncOutcome::Pushed { files, bytes } => {
                    println!("☁️  Synced {} files ({} bytes)", files, bytes)
                }
                SyncOutcome::Busy => println!("⏳ A sync is already running; try again shortly"),
                other => warn!("Unexpected sync outcome: {:?}", other),
            }
            Ok(())
        }
        ExecutionMode::Restore => {
            let workspace = open_workspace(options)?;
            match workspace.pull_progress().await? {
                SyncOutcome::Restored { files } => println!("☁️  Restored {} files", files),
                SyncOutcome::NothingRemote => println!("No saved progress found for this course"),
                other => warn!("Unexpected restore outcome: {:?}", other),
            }
            Ok(())
        }
        ExecutionMode::Setup => run_setup(options).await,
        ExecutionMode::ShowConfig => {
            ConfigDiscovery::show_discovery_info();
            Ok(())
        }
    }
}

async fn run_init(course: &str, options: &GlobalOptions) -> anyhow::Result<()> {
    let ctx = load_context(options)?;
    let authority: Arc<dyn RemoteAuthority> = Arc::new(ctx.http_authority()?);
    let root = workspace_root(options)?;
    let (_, report) = Workspace::init(ctx, authority, course, &root).await?;

    println!(
        "✅ {} {} ready in {}",
        report.course_id,
        report.version,
        root.display()
    );
    let copied = report.layering.copied().count();
    let skipped = report.layering.skipped().count();
    println!("   {} files provisioned, {} kept as-is", copied, skipped);
    if options.verbose {
        for path in report.layering.skipped() {
            println!("   kept {}", path.display());
        }
    }
    Ok(())
}

async fn run_refresh(options: &GlobalOptions) -> anyhow::Result<()> {
    let workspace = open_workspace(options)?;
    let report = workspace.refresh().await?;
    if report.stale {
        println!("⚠️  Course source unreachable, using the cached copy");
    }
    println!(
        "✅ {} {}: {} files refreshed",
        report.course_id,
        report.version,
        report.layering.copied().count()
    );
    Ok(())
}

async fn run_start_archive(file: &Path, options: &GlobalOptions) -> anyhow::Result<()> {
    let ctx = load_context(options)?;
    let runtime_dir = archive::unpack(file)?;
    println!("📂 Working copy: {}", runtime_dir.display());
    println!("   Changes are saved back into {} (Ctrl+C to stop)", file.display());

    let handle = watcher::spawn_autosave(&runtime_dir, file, ctx.autosave_debounce);
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    let packs = handle.shutdown().await?;
    info!("Autosave stopped after {} packs", packs);
    if let Err(e) = std::fs::remove_dir_all(&runtime_dir) {
        warn!("Could not remove {:?}: {}", runtime_dir, e);
    }
    println!("💾 Saved {}", file.display());
    Ok(())
}

fn run_pack(course_dir: &Path, output: Option<PathBuf>) -> anyhow::Result<()> {
    let output = match output {
        Some(output) => output,
        None => {
            let manifest = crate::course::CourseManifest::load(course_dir)?;
            PathBuf::from(format!("{}.{}", manifest.id, crate::env::ARCHIVE_EXTENSION))
        }
    };
    let count = workspace::pack_course(course_dir, &output)?;
    println!("📦 Packed {} files into {}", count, output.display());
    Ok(())
}

async fn run_upgrade(assume_yes: bool, options: &GlobalOptions) -> anyhow::Result<()> {
    let workspace = open_workspace(options)?;
    let status = workspace.check_update().await?;
    if !status.available {
        println!("✅ Already on the latest version ({})", status.current_version);
        return Ok(());
    }

    let diff = workspace.update_diff(&status.latest_version).await?;
    println!(
        "{} {} -> {}",
        status.course_id, status.current_version, status.latest_version
    );
    if diff.is_empty() {
        println!("   No content changes");
    }
    for path in &diff.added {
        println!("   + {}", path);
    }
    for path in &diff.modified {
        println!("   ~ {}", path);
    }
    for path in &diff.deleted {
        println!("   - {} (kept locally)", path);
    }

    if !assume_yes && !confirm("Apply this update? Modified files will be overwritten")? {
        println!("Update cancelled");
        return Ok(());
    }

    let applied = workspace.apply_update(&status.latest_version).await?;
    println!(
        "✅ Updated {} -> {} ({} files written)",
        applied.previous_version,
        applied.version,
        applied.layering.copied().count()
    );
    Ok(())
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

async fn run_exercise(
    exercise: &str,
    timeout: Option<Duration>,
    options: &GlobalOptions,
) -> anyhow::Result<()> {
    let workspace = open_workspace(options)?;

    let (control, cancel) = RunControl::cancellable();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut control = control.with_output(tx);
    if let Some(timeout) = timeout {
        control = control.with_timeout(timeout);
    }

    let printer = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Some(chunk) = rx.recv().await {
            let _ = stdout.write_all(chunk.as_bytes());
            let _ = stdout.flush();
        }
    });
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let result = workspace.run_exercise(exercise, control).await;
    interrupt.abort();
    // the sender lives in the consumed control, so the printer drains and ends
    let _ = printer.await;
    let run = result?;

    println!();
    if run.verdict.success {
        println!("✅ {}: {}", run.id, run.verdict.summary);
    } else {
        println!("❌ {}: {}", run.id, run.verdict.summary);
        if let Some(friendly) = &run.verdict.friendly {
            println!();
            println!("{}", friendly);
        }
    }

    match run.record {
        Some(record) if record.first_pass => println!("🏆 +{} XP", record.xp_awarded),
        Some(_) => {}
        None => println!("Run cancelled; progress unchanged"),
    }
    Ok(())
}

fn entry_marker(entry: &ManifestEntry) -> &'static str {
    if entry.passed {
        "✅"
    } else if entry.is_locked {
        "🔒"
    } else {
        "⬜"
    }
}

fn show_status(options: &GlobalOptions) -> anyhow::Result<()> {
    let workspace = open_workspace(options)?;
    let config = workspace.config()?;
    let (_, outline) = workspace.outline()?;
    let progress = workspace.progress()?;

    println!("📚 {} ({})", config.course_id, config.version);
    let mut current_module: Option<&str> = None;
    for entry in &outline.entries {
        if current_module != Some(entry.module.as_str()) {
            println!();
            println!("  {}", entry.module);
            current_module = Some(entry.module.as_str());
        }
        print!("    {} {}", entry_marker(entry), entry.friendly_name);
        if let Some(reason) = &entry.lock_reason {
            print!("  ({})", reason);
        }
        println!();
    }

    println!();
    println!(
        "📊 {}/{} done, {} XP, streak {} (best {})",
        outline.completed(),
        outline.entries.len(),
        progress.stats.total_xp,
        progress.stats.current_streak,
        progress.stats.longest_streak
    );
    if let Some(last_sync) = config.last_sync {
        println!("   Last sync: {}", last_sync.format("%Y-%m-%d %H:%M"));
    }
    Ok(())
}

async fn run_setup(options: &GlobalOptions) -> anyhow::Result<()> {
    let workspace = open_workspace(options)?;
    let results = workspace.setup_checks().await?;
    if results.is_empty() {
        println!("This course declares no setup checks");
        return Ok(());
    }

    let mut failed = 0;
    for result in &results {
        if result.passed {
            println!("✅ {}", result.name);
        } else {
            failed += 1;
            println!("❌ {}", result.name);
            if !result.output.is_empty() {
                println!("   {}", result.output.replace('\n', "\n   "));
            }
        }
    }

    if failed > 0 {
        if let Some(guide) = workspace.manifest()?.setup.and_then(|s| s.guide) {
            println!();
            println!("See {} for setup instructions", guide);
        }
        bail!("{} of {} setup checks failed", failed, results.len());
    }
    Ok(())
}
