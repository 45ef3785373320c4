//! # Cache Store
//!
//! One pristine copy of each course per user, under
//! `<cache_root>/<course_id>/`. Entries are never edited in place: a refresh
//! fetches into a staging directory next to the entry, stamps its version,
//! and swaps it in. A failed fetch leaves the previous entry untouched.

use crate::env::{self, control};
use crate::error::{EngineError, IoContext, Result};
use crate::source::{self, SourceFetcher, SourceLocator};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A course present in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub course_id: String,
    pub dir: PathBuf,
    pub version: String,
}

impl CacheEntry {
    /// Directory holding the course itself.
    pub fn course_root(&self, sub_path: Option<&str>) -> PathBuf {
        match sub_path {
            Some(sub) => self.dir.join(sub),
            None => self.dir.clone(),
        }
    }
}

/// A freshly fetched tree waiting to replace a cache entry. Dropping it
/// without [`CacheStore::commit`] removes the staging directory.
#[derive(Debug)]
pub struct StagedCourse {
    dir: PathBuf,
    version: String,
}

impl StagedCourse {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn course_root(&self, sub_path: Option<&str>) -> PathBuf {
        match sub_path {
            Some(sub) => self.dir.join(sub),
            None => self.dir.clone(),
        }
    }
}

impl Drop for StagedCourse {
    fn drop(&mut self) {
        if self.dir.exists() {
            debug!("Discarding staging directory {:?}", self.dir);
            if let Err(e) = fs::remove_dir_all(&self.dir) {
                warn!("Failed to remove staging directory {:?}: {}", self.dir, e);
            }
        }
    }
}

/// Per-user course cache.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, course_id: &str) -> PathBuf {
        env::cache_entry_path(&self.root, course_id)
    }

    /// The cached entry for `course_id`, if any.
    pub fn lookup(&self, course_id: &str) -> Option<CacheEntry> {
        let dir = self.entry_dir(course_id);
        if !dir.is_dir() {
            return None;
        }
        let version = fs::read_to_string(dir.join(control::CACHE_VERSION_FILE))
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| source::read_version(&dir));
        Some(CacheEntry {
            course_id: course_id.to_string(),
            dir,
            version,
        })
    }

    pub fn version_of(&self, course_id: &str) -> Option<String> {
        self.lookup(course_id).map(|entry| entry.version)
    }

    /// Fetch `locator` into a staging directory under the cache root.
    ///
    /// `label` only names the staging directory; the course id is often not
    /// known until the fetched manifest has been read.
    pub async fn stage(
        &self,
        fetcher: &SourceFetcher<'_>,
        label: &str,
        locator: &SourceLocator,
        version: Option<&str>,
    ) -> Result<StagedCourse> {
        fs::create_dir_all(&self.root).at(&self.root)?;
        let dir = env::staging_path(&self.root, label);
        // Owned before fetching so a failed fetch cleans up after itself.
        let mut staged = StagedCourse {
            dir,
            version: String::new(),
        };
        let fetched = fetcher.materialize(locator, version, &staged.dir).await?;
        staged.version = fetched.version;
        debug!("Staged {} at {:?} (version {})", locator, staged.dir, staged.version);
        Ok(staged)
    }

    /// Swap a staged tree in as the entry for `course_id`.
    pub fn commit(&self, course_id: &str, staged: StagedCourse) -> Result<CacheEntry> {
        validate_course_id(course_id)?;
        let version_file = staged.dir.join(control::CACHE_VERSION_FILE);
        fs::write(&version_file, &staged.version).at(&version_file)?;

        let target = self.entry_dir(course_id);
        self.swap_into_place(course_id, &staged, &target)?;
        info!("Cached {} at version {}", course_id, staged.version);
        Ok(CacheEntry {
            course_id: course_id.to_string(),
            dir: target,
            version: staged.version.clone(),
        })
    }

    fn swap_into_place(&self, course_id: &str, staged: &StagedCourse, target: &Path) -> Result<()> {
        let backup = if target.exists() {
            let backup = self.root.join(format!(
                ".old-{}-{}",
                course_id,
                uuid::Uuid::new_v4()
            ));
            fs::rename(target, &backup).at(target)?;
            Some(backup)
        } else {
            None
        };

        if let Err(e) = fs::rename(&staged.dir, target) {
            warn!("Rename into cache failed ({}), copying instead", e);
            let copied = source::copy_tree(&staged.dir, target).and_then(|_| {
                let version_file = target.join(control::CACHE_VERSION_FILE);
                fs::write(&version_file, &staged.version).at(&version_file)
            });
            if let Err(copy_err) = copied {
                let _ = fs::remove_dir_all(target);
                if let Some(backup) = &backup {
                    let _ = fs::rename(backup, target);
                }
                return Err(copy_err);
            }
        }

        if let Some(backup) = backup
            && let Err(e) = fs::remove_dir_all(&backup)
        {
            warn!("Failed to remove previous cache copy {:?}: {}", backup, e);
        }
        Ok(())
    }

    /// Make sure the official copy of `course_id` is present.
    ///
    /// With `pin`, an entry already at that version is returned untouched and
    /// anything else is refetched at that version. Without `pin` the entry is
    /// always refreshed from the source.
    ///
    /// # Errors
    ///
    /// A fetch failure is [`EngineError::SourceUnreachable`] and leaves any
    /// existing entry as it was.
    pub async fn ensure_official_course(
        &self,
        fetcher: &SourceFetcher<'_>,
        course_id: &str,
        locator: &SourceLocator,
        sub_path: Option<&str>,
        pin: Option<&str>,
    ) -> Result<CacheEntry> {
        validate_course_id(course_id)?;
        if let Some(pin) = pin
            && let Some(entry) = self.lookup(course_id)
            && entry.version == pin
        {
            debug!("Cache for {} already at {}", course_id, pin);
            return Ok(entry);
        }

        let staged = self.stage(fetcher, course_id, locator, pin).await?;
        if !staged.course_root(sub_path).is_dir() {
            return Err(EngineError::invalid_manifest(
                "course.path",
                format!("{} does not exist in the fetched course", sub_path.unwrap_or(".")),
            ));
        }
        self.commit(course_id, staged)
    }

    /// Like [`Self::ensure_official_course`], but an unreachable source falls
    /// back to an existing entry. Returns the entry and whether it is stale.
    pub async fn ensure_or_fallback(
        &self,
        fetcher: &SourceFetcher<'_>,
        course_id: &str,
        locator: &SourceLocator,
        sub_path: Option<&str>,
        pin: Option<&str>,
    ) -> Result<(CacheEntry, bool)> {
        match self
            .ensure_official_course(fetcher, course_id, locator, sub_path, pin)
            .await
        {
            Ok(entry) => Ok((entry, false)),
            Err(err) if err.is_recoverable() => match self.lookup(course_id) {
                Some(entry) => {
                    warn!(
                        "Using cached copy of {} ({}): {}",
                        course_id, entry.version, err
                    );
                    Ok((entry, true))
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }
}

fn validate_course_id(course_id: &str) -> Result<()> {
    let unsafe_id = course_id.is_empty()
        || course_id.starts_with('.')
        || course_id.contains(['/', '\\'])
        || course_id.contains("..");
    if unsafe_id {
        return Err(EngineError::invalid_manifest(
            "id",
            format!("'{course_id}' is not a valid course id"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::NoRemote;
    use tempfile::TempDir;

    fn course_dir(version: &str, body: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("course.json"),
            format!(r#"{{"id": "rust", "name": "Rust", "version": "{version}"}}"#),
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("content/01")).unwrap();
        fs::write(dir.path().join("content/01/main.rs"), body).unwrap();
        dir
    }

    fn staging_dirs(root: &Path) -> Vec<String> {
        fs::read_dir(root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with('.'))
            .collect()
    }

    #[tokio::test]
    async fn test_ensure_populates_and_stamps_version() {
        let cache_root = TempDir::new().unwrap();
        let source = course_dir("1.0.0", "fn main() {}");
        let store = CacheStore::new(cache_root.path());
        let fetcher = SourceFetcher::new(&NoRemote);
        let locator = SourceLocator::LocalDir(source.path().to_path_buf());

        let entry = store
            .ensure_official_course(&fetcher, "rust", &locator, None, None)
            .await
            .unwrap();

        assert_eq!(entry.version, "1.0.0");
        assert!(entry.dir.join("content/01/main.rs").exists());
        assert_eq!(
            fs::read_to_string(entry.dir.join(".cache-version")).unwrap(),
            "1.0.0"
        );
        assert!(staging_dirs(cache_root.path()).is_empty());
    }

    #[tokio::test]
    async fn test_pinned_entry_is_left_alone() {
        let cache_root = TempDir::new().unwrap();
        let source = course_dir("1.0.0", "v1");
        let store = CacheStore::new(cache_root.path());
        let fetcher = SourceFetcher::new(&NoRemote);
        let locator = SourceLocator::LocalDir(source.path().to_path_buf());
        store
            .ensure_official_course(&fetcher, "rust", &locator, None, None)
            .await
            .unwrap();

        // Upstream moves on; a pinned ensure keeps what is cached.
        fs::write(source.path().join("content/01/main.rs"), "v2").unwrap();
        let entry = store
            .ensure_official_course(&fetcher, "rust", &locator, None, Some("1.0.0"))
            .await
            .unwrap();
        assert_eq!(
            fs::read_to_string(entry.dir.join("content/01/main.rs")).unwrap(),
            "v1"
        );

        let refreshed = store
            .ensure_official_course(&fetcher, "rust", &locator, None, None)
            .await
            .unwrap();
        assert_eq!(
            fs::read_to_string(refreshed.dir.join("content/01/main.rs")).unwrap(),
            "v2"
        );
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_existing_entry() {
        let cache_root = TempDir::new().unwrap();
        let source = course_dir("1.0.0", "original");
        let store = CacheStore::new(cache_root.path());
        let fetcher = SourceFetcher::new(&NoRemote);
        store
            .ensure_official_course(
                &fetcher,
                "rust",
                &SourceLocator::LocalDir(source.path().to_path_buf()),
                None,
                None,
            )
            .await
            .unwrap();

        let gone = SourceLocator::LocalDir(PathBuf::from("/definitely/missing/course"));
        let err = store
            .ensure_official_course(&fetcher, "rust", &gone, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SourceUnreachable(_)));

        let entry = store.lookup("rust").unwrap();
        assert_eq!(
            fs::read_to_string(entry.dir.join("content/01/main.rs")).unwrap(),
            "original"
        );
        assert!(staging_dirs(cache_root.path()).is_empty());

        let (fallback, stale) = store
            .ensure_or_fallback(&fetcher, "rust", &gone, None, None)
            .await
            .unwrap();
        assert!(stale);
        assert_eq!(fallback.version, "1.0.0");
    }

    #[tokio::test]
    async fn test_fallback_without_entry_fails() {
        let cache_root = TempDir::new().unwrap();
        let store = CacheStore::new(cache_root.path());
        let fetcher = SourceFetcher::new(&NoRemote);
        let err = store
            .ensure_or_fallback(&fetcher, "rust", &SourceLocator::Registry("rust".into()), None, None)
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_missing_sub_path_is_invalid() {
        let cache_root = TempDir::new().unwrap();
        let source = course_dir("1.0.0", "x");
        let store = CacheStore::new(cache_root.path());
        let fetcher = SourceFetcher::new(&NoRemote);
        let err = store
            .ensure_official_course(
                &fetcher,
                "rust",
                &SourceLocator::LocalDir(source.path().to_path_buf()),
                Some("nested/course"),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidManifest { .. }));
        assert!(store.lookup("rust").is_none());
    }

    #[test]
    fn test_rejects_unsafe_course_ids() {
        assert!(validate_course_id("rust-basics").is_ok());
        assert!(validate_course_id("../etc").is_err());
        assert!(validate_course_id(".staging-x").is_err());
        assert!(validate_course_id("").is_err());
    }
}
