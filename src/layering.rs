//! Layering of official course content onto a student workspace.
//!
//! The merge is one-directional and asymmetric. Files outside the content
//! subtree (manifest, READMEs, runner scripts) always mirror the official
//! copy. Files inside it that carry a student-code extension are left alone
//! once they exist in the workspace, unless the caller forces the overwrite.

use crate::env::{self, control};
use crate::error::{EngineError, IoContext, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Extensions treated as student-authored code.
pub const STUDENT_EXTENSIONS: &[&str] = &[
    "rs", "go", "ts", "js", "py", "lua", "c", "cpp", "h", "toml", "mod", "sum", "json", "sql",
];

pub fn is_student_code(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| STUDENT_EXTENSIONS.contains(&ext.as_str()))
}

#[derive(Debug, Clone)]
pub struct LayeringOptions {
    /// Overwrite student code even when it already exists
    pub force: bool,
    /// Subdirectory of the cache to layer from
    pub source_sub_path: Option<PathBuf>,
    /// Roots, relative to the layered tree, whose code files are protected
    pub content_dirs: Vec<PathBuf>,
}

impl Default for LayeringOptions {
    fn default() -> Self {
        Self {
            force: false,
            source_sub_path: None,
            content_dirs: vec![PathBuf::from(env::CONTENT_DIR_NAME)],
        }
    }
}

impl LayeringOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    pub fn with_sub_path(mut self, sub_path: Option<PathBuf>) -> Self {
        self.source_sub_path = sub_path;
        self
    }

    pub fn with_content_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if !self.content_dirs.contains(&dir) {
            self.content_dirs.push(dir);
        }
        self
    }

    fn is_content(&self, relative: &Path) -> bool {
        self.content_dirs.iter().any(|dir| relative.starts_with(dir))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerAction {
    Copied(PathBuf),
    /// Existing student code left untouched
    Skipped(PathBuf),
}

#[derive(Debug, Clone, Default)]
pub struct LayeringReport {
    pub actions: Vec<LayerAction>,
}

impl LayeringReport {
    pub fn copied(&self) -> impl Iterator<Item = &Path> {
        self.actions.iter().filter_map(|a| match a {
            LayerAction::Copied(p) => Some(p.as_path()),
            LayerAction::Skipped(_) => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = &Path> {
        self.actions.iter().filter_map(|a| match a {
            LayerAction::Skipped(p) => Some(p.as_path()),
            LayerAction::Copied(_) => None,
        })
    }
}

/// Layer `cache_dir` onto `dest_dir`.
pub fn apply_layering(
    dest_dir: &Path,
    cache_dir: &Path,
    options: &LayeringOptions,
) -> Result<LayeringReport> {
    let root = match &options.source_sub_path {
        Some(sub) => cache_dir.join(sub),
        None => cache_dir.to_path_buf(),
    };
    if !root.is_dir() {
        return Err(EngineError::io(
            &root,
            std::io::Error::new(std::io::ErrorKind::NotFound, "layering source is missing"),
        ));
    }
    fs::create_dir_all(dest_dir).at(dest_dir)?;

    let mut report = LayeringReport::default();
    let walker = WalkDir::new(&root)
        .sort_by_file_name()
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !control::is_control_entry(&e.file_name().to_string_lossy()));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
            EngineError::io(path, e.into())
        })?;
        let relative = entry
            .path()
            .strip_prefix(&root)
            .map_err(|e| EngineError::io(entry.path(), std::io::Error::other(e)))?;
        let target = dest_dir.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).at(&target)?;
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }

        let protected = options.is_content(relative) && is_student_code(relative);
        if protected && !options.force && target.exists() {
            info!("Keeping local edits: {}", relative.display());
            report.actions.push(LayerAction::Skipped(relative.to_path_buf()));
            continue;
        }

        debug!("Copying {}", relative.display());
        fs::copy(entry.path(), &target).at(&target)?;
        report.actions.push(LayerAction::Copied(relative.to_path_buf()));
    }

    info!(
        "Layered {:?} onto {:?}: {} copied, {} kept",
        root,
        dest_dir,
        report.copied().count(),
        report.skipped().count()
    );
    Ok(report)
}

/// Restore one workspace file from the official copy.
pub fn reset_file(
    dest_dir: &Path,
    cache_dir: &Path,
    relative: &Path,
    source_sub_path: Option<&Path>,
) -> Result<PathBuf> {
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || relative.as_os_str().is_empty() {
        return Err(EngineError::NotInCache(relative.to_path_buf()));
    }

    let root = match source_sub_path {
        Some(sub) => cache_dir.join(sub),
        None => cache_dir.to_path_buf(),
    };
    let source = root.join(relative);
    if !source.is_file() {
        return Err(EngineError::NotInCache(relative.to_path_buf()));
    }

    let target = dest_dir.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    fs::copy(&source, &target).at(&target)?;
    info!("Reset {} to the official version", relative.display());
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_student_code_detection() {
        assert!(is_student_code(Path::new("content/a/main.rs")));
        assert!(is_student_code(Path::new("x/MAIN.PY")));
        assert!(!is_student_code(Path::new("content/a/README.md")));
        assert!(!is_student_code(Path::new("Makefile")));
    }

    #[test]
    fn test_skips_control_entries() {
        let temp = TempDir::new().unwrap();
        let cache = temp.path().join("cache");
        let dest = temp.path().join("dest");
        write(&cache, ".git/HEAD", "ref");
        write(&cache, ".cache-version", "1.0.0");
        write(&cache, "course.json", "{}");

        apply_layering(&dest, &cache, &LayeringOptions::default()).unwrap();
        assert!(!dest.join(".git").exists());
        assert!(!dest.join(".cache-version").exists());
        assert!(dest.join("course.json").exists());
    }

    #[test]
    fn test_sub_path_roots_the_walk() {
        let temp = TempDir::new().unwrap();
        let cache = temp.path().join("cache");
        let dest = temp.path().join("dest");
        write(&cache, "courses/rust/content/01/main.rs", "x");
        write(&cache, "other.txt", "no");

        let options = LayeringOptions::default().with_sub_path(Some("courses/rust".into()));
        apply_layering(&dest, &cache, &options).unwrap();
        assert!(dest.join("content/01/main.rs").exists());
        assert!(!dest.join("other.txt").exists());
    }

    #[test]
    fn test_code_outside_content_is_refreshed() {
        let temp = TempDir::new().unwrap();
        let cache = temp.path().join("cache");
        let dest = temp.path().join("dest");
        write(&cache, "runner/main.rs", "official");
        write(&dest, "runner/main.rs", "local");

        apply_layering(&dest, &cache, &LayeringOptions::default()).unwrap();
        assert_eq!(fs::read_to_string(dest.join("runner/main.rs")).unwrap(), "official");
    }

    #[test]
    fn test_reset_file() {
        let temp = TempDir::new().unwrap();
        let cache = temp.path().join("cache");
        let dest = temp.path().join("dest");
        write(&cache, "content/01/main.rs", "official");
        write(&dest, "content/01/main.rs", "broken");

        reset_file(&dest, &cache, Path::new("content/01/main.rs"), None).unwrap();
        assert_eq!(
            fs::read_to_string(dest.join("content/01/main.rs")).unwrap(),
            "official"
        );

        let err = reset_file(&dest, &cache, Path::new("content/01/nope.rs"), None).unwrap_err();
        assert!(matches!(err, EngineError::NotInCache(_)));
        let err = reset_file(&dest, &cache, Path::new("../escape.rs"), None).unwrap_err();
        assert!(matches!(err, EngineError::NotInCache(_)));
    }
}
