//! Debounced autosave of an unpacked course back into its archive.
//!
//! The runtime directory is polled for changes. A change arms a single
//! deadline; further changes push it back instead of queueing another pack.
//! When the deadline passes the directory is re-packed once. Shutdown always
//! performs one final pack so nothing written just before exit is lost.

use crate::archive;
use crate::env;
use crate::error::{EngineError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};
use walkdir::WalkDir;

pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

const IGNORED_DIRS: &[&str] = &[env::control::GIT_DIR, "node_modules", env::STATE_DIR_NAME];

type Snapshot = BTreeMap<PathBuf, (u64, Option<SystemTime>)>;

fn take_snapshot(root: &Path) -> Snapshot {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !IGNORED_DIRS.iter().any(|d| e.file_name() == *d))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .is_none_or(|ext| ext != env::ARCHIVE_EXTENSION)
        })
        .filter_map(|e| {
            let meta = e.metadata().ok()?;
            let relative = e.path().strip_prefix(root).ok()?.to_path_buf();
            Some((relative, (meta.len(), meta.modified().ok())))
        })
        .collect()
}

async fn flush(runtime_dir: &Path, archive_file: &Path) -> Result<usize> {
    let dir = runtime_dir.to_path_buf();
    let target = archive_file.to_path_buf();
    tokio::task::spawn_blocking(move || archive::sync(&dir, &target))
        .await
        .map_err(|e| EngineError::Packaging(format!("autosave task failed: {e}")))?
}

/// Running autosave loop.
pub struct AutosaveHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<usize>>,
}

impl AutosaveHandle {
    /// Stop watching, perform the final pack and return how many packs ran.
    pub async fn shutdown(self) -> Result<usize> {
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| EngineError::Packaging(format!("autosave task failed: {e}")))?
    }
}

/// Start autosaving `runtime_dir` into `archive_file`.
pub fn spawn_autosave(
    runtime_dir: impl Into<PathBuf>,
    archive_file: impl Into<PathBuf>,
    debounce: Duration,
) -> AutosaveHandle {
    let runtime_dir = runtime_dir.into();
    let archive_file = archive_file.into();
    let (tx, mut rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut snapshot = take_snapshot(&runtime_dir);
        let mut deadline: Option<Instant> = None;
        let mut packs = 0usize;
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        info!("Autosaving {:?} into {:?}", runtime_dir, archive_file);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let current = take_snapshot(&runtime_dir);
                    if current != snapshot {
                        snapshot = current;
                        deadline = Some(Instant::now() + debounce);
                        debug!("Change detected, autosave in {:?}", debounce);
                    }
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        deadline = None;
                        match flush(&runtime_dir, &archive_file).await {
                            Ok(count) => {
                                packs += 1;
                                debug!("Autosaved {} files", count);
                            }
                            Err(e) => error!("Autosave failed: {}", e),
                        }
                    }
                }
                changed = rx.changed() => {
                    if changed.is_err() || *rx.borrow() {
                        break;
                    }
                }
            }
        }

        flush(&runtime_dir, &archive_file).await?;
        packs += 1;
        info!("Final autosave of {:?} done", runtime_dir);
        Ok(packs)
    });

    AutosaveHandle { shutdown: tx, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_skips_ignored_dirs() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("node_modules/x")).unwrap();
        fs::write(dir.path().join("node_modules/x/index.js"), "x").unwrap();
        fs::create_dir_all(dir.path().join(".coursebox")).unwrap();
        fs::write(dir.path().join(".coursebox/progress.json"), "{}").unwrap();
        fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();

        let snapshot = take_snapshot(dir.path());
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key(Path::new("main.rs")));
    }

    #[tokio::test]
    async fn test_change_is_packed_after_debounce() {
        let runtime = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let archive_file = out.path().join("work.course");
        fs::write(runtime.path().join("main.rs"), "v1").unwrap();

        let handle = spawn_autosave(runtime.path(), &archive_file, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(300)).await;
        fs::write(runtime.path().join("main.rs"), "version two").unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(archive_file.exists());
        let packs = handle.shutdown().await.unwrap();
        assert!(packs >= 2);

        let unpacked = archive::unpack(&archive_file).unwrap();
        assert_eq!(
            fs::read_to_string(unpacked.join("main.rs")).unwrap(),
            "version two"
        );
        fs::remove_dir_all(unpacked).unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending_change() {
        let runtime = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let archive_file = out.path().join("work.course");

        let handle = spawn_autosave(runtime.path(), &archive_file, Duration::from_secs(30));
        fs::write(runtime.path().join("notes.md"), "unsaved").unwrap();
        let packs = handle.shutdown().await.unwrap();

        assert_eq!(packs, 1);
        let unpacked = archive::unpack(&archive_file).unwrap();
        assert_eq!(
            fs::read_to_string(unpacked.join("notes.md")).unwrap(),
            "unsaved"
        );
        fs::remove_dir_all(unpacked).unwrap();
    }
}
