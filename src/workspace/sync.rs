//! Cloud progress snapshots.
//!
//! A snapshot is a course container holding the content tree, the project
//! config and the progress file. Pushes are serialized with an advisory lock
//! so a second push started while one is in flight backs off instead of
//! racing it.

use super::Workspace;
use crate::archive;
use crate::env;
use crate::error::{EngineError, IoContext, Result};
use crate::project::LocalProjectConfig;
use crate::source::copy_tree;
use crate::update::content_dir_name;
use chrono::Utc;
use fs4::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Pushed { files: usize, bytes: usize },
    /// Another push holds the lock; try again later
    Busy,
    Restored { files: usize },
    /// The backend has no snapshot for this course
    NothingRemote,
}

#[derive(Debug)]
pub(crate) struct SyncLock {
    _file: File,
}

impl SyncLock {
    pub(crate) fn try_acquire(workspace: &Path) -> Result<Option<Self>> {
        let path = env::sync_lock_path(workspace);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .at(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { _file: file })),
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            #[cfg(windows)]
            Err(err) if matches!(err.raw_os_error(), Some(32 | 33)) => Ok(None),
            Err(err) => Err(EngineError::io(&path, err)),
        }
    }
}

impl Workspace {
    fn snapshot_filter(&self) -> impl Fn(&Path) -> bool {
        let content = PathBuf::from(content_dir_name(self.root()));
        let project = PathBuf::from(env::PROJECT_FILE_NAME);
        let progress = PathBuf::from(env::STATE_DIR_NAME).join(env::state::PROGRESS_FILE_NAME);
        move |relative: &Path| {
            relative.starts_with(&content) || relative == project || relative == progress
        }
    }

    /// Pack the student's content, project config and progress into `dest`.
    pub fn pack_progress(&self, dest: &Path) -> Result<usize> {
        archive::pack_filtered(self.root(), dest, self.snapshot_filter())
    }

    /// Upload a progress snapshot. Returns [`SyncOutcome::Busy`] without
    /// touching the backend when another push is running.
    pub async fn push_progress(&self) -> Result<SyncOutcome> {
        let Some(_lock) = SyncLock::try_acquire(self.root())? else {
            info!("Progress sync already in progress, skipping");
            return Ok(SyncOutcome::Busy);
        };

        let mut config = LocalProjectConfig::load(self.root())?;
        let scratch = tempfile::TempDir::new().map_err(|e| EngineError::io(std::env::temp_dir(), e))?;
        let snapshot = scratch.path().join(env::PROGRESS_ARCHIVE_NAME);
        let files = self.pack_progress(&snapshot)?;
        let bytes = fs::read(&snapshot).at(&snapshot)?;
        let size = bytes.len();

        self.authority()
            .upload_progress(&config.course_id, bytes)
            .await?;

        config.last_sync = Some(Utc::now());
        config.save(self.root())?;
        info!("Pushed {} files ({} bytes) for {}", files, size, config.course_id);
        Ok(SyncOutcome::Pushed { files, bytes: size })
    }

    /// Download the latest snapshot and lay it over the workspace.
    pub async fn pull_progress(&self) -> Result<SyncOutcome> {
        let config = LocalProjectConfig::load(self.root())?;
        let Some(bytes) = self
            .authority()
            .download_progress(&config.course_id)
            .await?
        else {
            return Ok(SyncOutcome::NothingRemote);
        };

        let scratch = tempfile::TempDir::new().map_err(|e| EngineError::io(std::env::temp_dir(), e))?;
        let snapshot = scratch.path().join(env::PROGRESS_ARCHIVE_NAME);
        fs::write(&snapshot, &bytes).at(&snapshot)?;
        let unpacked = scratch.path().join("snapshot");
        archive::unpack_to(&snapshot, &unpacked)?;

        let restored_config = LocalProjectConfig::load(&unpacked).ok();
        if let Some(restored) = &restored_config
            && restored.course_id != config.course_id
        {
            warn!(
                "Snapshot belongs to {}, not {}; ignoring it",
                restored.course_id, config.course_id
            );
            return Ok(SyncOutcome::NothingRemote);
        }
        // The local source locator and recorded version stay authoritative.
        let project_file = env::project_file_path(&unpacked);
        if project_file.exists() {
            fs::remove_file(&project_file).at(&project_file)?;
        }

        let files = copy_tree(&unpacked, self.root())?;
        info!("Restored {} files for {}", files, config.course_id);
        Ok(SyncOutcome::Restored { files })
    }
}
