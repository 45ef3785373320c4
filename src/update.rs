//! # Update Engine
//!
//! Detects a new official version, reports what would change in the
//! student's content tree, and applies an accepted update.
//!
//! The live cache is never used as scratch space: diffs are computed against
//! a throwaway fetch and updates are staged next to the cache entry and only
//! swapped in once the workspace has been written.

use crate::cache::CacheStore;
use crate::course::CourseManifest;
use crate::env;
use crate::error::{EngineError, IoContext, Result};
use crate::layering::{LayeringOptions, LayeringReport, apply_layering};
use crate::project::LocalProjectConfig;
use crate::source::SourceFetcher;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Whether the workspace is behind the official course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateStatus {
    pub course_id: String,
    pub available: bool,
    pub current_version: String,
    pub latest_version: String,
}

/// Content-tree changes between the workspace and a candidate version.
///
/// Paths are relative to the content directory, `/`-separated and sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateDiff {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl UpdateDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Outcome of [`apply_update`].
#[derive(Debug, Clone)]
pub struct AppliedUpdate {
    pub previous_version: String,
    pub version: String,
    pub layering: LayeringReport,
}

/// Compare the recorded version against the authoritative latest one. Any
/// difference counts as an available update.
pub async fn check_update(workspace: &Path, fetcher: &SourceFetcher<'_>) -> Result<UpdateStatus> {
    let config = LocalProjectConfig::load(workspace)?;
    let latest = fetcher
        .latest_version(&config.locator(), config.sub_path.as_deref())
        .await?;
    let available = latest != config.version;
    info!(
        "Update check for {}: current {}, latest {}",
        config.course_id, config.version, latest
    );
    Ok(UpdateStatus {
        course_id: config.course_id,
        available,
        current_version: config.version,
        latest_version: latest,
    })
}

/// Fetch `latest_version` into a temporary directory and diff its content
/// tree against the workspace.
pub async fn get_update_diff(
    workspace: &Path,
    fetcher: &SourceFetcher<'_>,
    latest_version: &str,
) -> Result<UpdateDiff> {
    let config = LocalProjectConfig::load(workspace)?;
    let scratch = tempfile::TempDir::new().map_err(|e| EngineError::io(std::env::temp_dir(), e))?;
    let dest = scratch.path().join("candidate");
    fetcher
        .materialize(&config.locator(), Some(latest_version), &dest)
        .await?;

    let candidate_root = course_root(&dest, config.sub_path.as_deref());
    let content = content_dir_name(&candidate_root);
    diff_trees(&workspace.join(&content), &candidate_root.join(&content))
}

/// Classify every file under two content trees by exact byte comparison.
/// A missing tree counts as empty.
pub fn diff_trees(local: &Path, candidate: &Path) -> Result<UpdateDiff> {
    let local_files = list_files(local)?;
    let candidate_files = list_files(candidate)?;
    let mut diff = UpdateDiff::default();

    for (relative, candidate_path) in &candidate_files {
        match local_files.get(relative) {
            None => diff.added.push(relative.clone()),
            Some(local_path) => {
                if !same_bytes(local_path, candidate_path)? {
                    diff.modified.push(relative.clone());
                }
            }
        }
    }
    diff.deleted = local_files
        .keys()
        .filter(|relative| !candidate_files.contains_key(*relative))
        .cloned()
        .collect();

    debug!(
        "Diff: {} added, {} modified, {} deleted",
        diff.added.len(),
        diff.modified.len(),
        diff.deleted.len()
    );
    Ok(diff)
}

/// Apply `latest_version` over the workspace, overwriting student code, then
/// record the new version and replace the cache entry.
///
/// Files that the new version no longer ships are left in place.
pub async fn apply_update(
    workspace: &Path,
    fetcher: &SourceFetcher<'_>,
    cache: &CacheStore,
    latest_version: &str,
) -> Result<AppliedUpdate> {
    let mut config = LocalProjectConfig::load(workspace)?;
    let staged = cache
        .stage(fetcher, &config.course_id, &config.locator(), Some(latest_version))
        .await?;
    let candidate_root = staged.course_root(config.sub_path.as_deref());
    if !candidate_root.is_dir() {
        return Err(EngineError::invalid_manifest(
            "course.path",
            format!(
                "{} does not exist in version {}",
                config.sub_path.as_deref().unwrap_or("."),
                staged.version()
            ),
        ));
    }

    let options =
        LayeringOptions::forced().with_content_dir(content_dir_name(&candidate_root));
    let layering = apply_layering(workspace, &candidate_root, &options)?;

    let previous_version = std::mem::replace(&mut config.version, staged.version().to_string());
    if config.version != latest_version {
        warn!(
            "Asked for {} but the source delivered {}; recording {}",
            latest_version, config.version, config.version
        );
    }
    config.last_sync = Some(Utc::now());
    config.save(workspace)?;

    let version = config.version.clone();
    cache.commit(&config.course_id, staged)?;
    info!(
        "Updated {} from {} to {}",
        config.course_id, previous_version, version
    );
    Ok(AppliedUpdate {
        previous_version,
        version,
        layering,
    })
}

fn course_root(dir: &Path, sub_path: Option<&str>) -> PathBuf {
    match sub_path {
        Some(sub) => dir.join(sub),
        None => dir.to_path_buf(),
    }
}

/// Content directory declared by the course manifest, or the default when the
/// manifest cannot be read.
pub(crate) fn content_dir_name(course_root: &Path) -> String {
    match CourseManifest::load(course_root) {
        Ok(manifest) => manifest.content.exercises,
        Err(e) => {
            debug!("Using default content dir for {:?}: {}", course_root, e);
            env::CONTENT_DIR_NAME.to_string()
        }
    }
}

fn list_files(root: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let mut files = BTreeMap::new();
    if !root.is_dir() {
        return Ok(files);
    }
    let walker = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !env::control::is_control_entry(&e.file_name().to_string_lossy()));
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            EngineError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| EngineError::io(entry.path(), std::io::Error::other(e)))?;
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.insert(key, entry.path().to_path_buf());
    }
    Ok(files)
}

fn same_bytes(a: &Path, b: &Path) -> Result<bool> {
    let left = fs::metadata(a).at(a)?;
    let right = fs::metadata(b).at(b)?;
    if left.len() != right.len() {
        return Ok(false);
    }
    Ok(fs::read(a).at(a)? == fs::read(b).at(b)?)
}
