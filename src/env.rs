//! Environment constants and path utilities for coursebox.
//!
//! This module centralizes all hardcoded paths and directory names used throughout
//! the engine, making them easier to maintain and modify.

use std::path::{Path, PathBuf};

/// Workspace state directory name (hidden directory like .git, .vscode)
pub const STATE_DIR_NAME: &str = ".coursebox";

/// Engine configuration file name
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Local project configuration written at the workspace root
pub const PROJECT_FILE_NAME: &str = "coursebox.toml";

/// Course manifest file name at the top of a course tree
pub const MANIFEST_FILE_NAME: &str = "course.json";

/// Default name of the content subtree inside a course
pub const CONTENT_DIR_NAME: &str = "content";

/// Extension of packed course archives
pub const ARCHIVE_EXTENSION: &str = "course";

/// Progress snapshot name used for cloud upload
pub const PROGRESS_ARCHIVE_NAME: &str = "progress.course";

/// Version-control and bookkeeping entries that never travel between trees
pub mod control {
    /// Version-control directory
    pub const GIT_DIR: &str = ".git";

    /// Version tag stored inside each cache entry
    pub const CACHE_VERSION_FILE: &str = ".cache-version";

    /// Returns true when a path component is a control entry
    pub fn is_control_entry(name: &str) -> bool {
        name == GIT_DIR || name == CACHE_VERSION_FILE
    }
}

/// Files kept under the workspace state directory
pub mod state {
    /// Recorded exercise and quiz results
    pub const PROGRESS_FILE_NAME: &str = "progress.json";

    /// Advisory lock around cloud progress pushes
    pub const SYNC_LOCK_FILE_NAME: &str = "sync.lock";
}

/// Cache layout
pub mod cache {
    /// Directory under the platform cache dir holding course mirrors
    pub const CACHE_DIR_NAME: &str = "coursebox";

    /// Prefix of staging directories created next to cache entries
    pub const STAGING_PREFIX: &str = ".staging-";

    /// Prefix of disposable runtime directories for unpacked archives
    pub const RUNTIME_PREFIX: &str = "coursebox-runtime-";
}

/// Build the workspace state directory path
pub fn state_dir_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(STATE_DIR_NAME)
}

/// Build the progress file path
pub fn progress_file_path(workspace_root: &Path) -> PathBuf {
    state_dir_path(workspace_root).join(state::PROGRESS_FILE_NAME)
}

/// Build the sync lock path
pub fn sync_lock_path(workspace_root: &Path) -> PathBuf {
    state_dir_path(workspace_root).join(state::SYNC_LOCK_FILE_NAME)
}

/// Build the local project config path
pub fn project_file_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(PROJECT_FILE_NAME)
}

/// Build the manifest path for a course tree
pub fn manifest_file_path(course_root: &Path) -> PathBuf {
    course_root.join(MANIFEST_FILE_NAME)
}

/// Build the default cache root, falling back to the temp dir when the
/// platform has no cache directory
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(cache::CACHE_DIR_NAME)
}

/// Build a cache entry path for a course id
pub fn cache_entry_path(cache_root: &Path, course_id: &str) -> PathBuf {
    cache_root.join(course_id)
}

/// Build a fresh staging path for a course id next to its cache entry
pub fn staging_path(cache_root: &Path, course_id: &str) -> PathBuf {
    cache_root.join(format!(
        "{}{}-{}",
        cache::STAGING_PREFIX,
        course_id,
        uuid::Uuid::new_v4()
    ))
}

/// Build config directory path in user's home directory
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    home_dir.join(STATE_DIR_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(STATE_DIR_NAME).join(CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_paths() {
        let workspace = Path::new("/test/workspace");

        assert_eq!(state_dir_path(workspace), Path::new("/test/workspace/.coursebox"));
        assert_eq!(
            progress_file_path(workspace),
            Path::new("/test/workspace/.coursebox/progress.json")
        );
        assert_eq!(
            sync_lock_path(workspace),
            Path::new("/test/workspace/.coursebox/sync.lock")
        );
        assert_eq!(
            project_file_path(workspace),
            Path::new("/test/workspace/coursebox.toml")
        );
    }

    #[test]
    fn test_cache_paths() {
        let root = Path::new("/cache");
        assert_eq!(cache_entry_path(root, "rust"), Path::new("/cache/rust"));

        let staging = staging_path(root, "rust");
        assert_eq!(staging.parent(), Some(root));
        let name = staging.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(".staging-rust-"));
        assert_ne!(staging, staging_path(root, "rust"));
    }

    #[test]
    fn test_config_paths() {
        let home_dir = Path::new("/home/user");
        let current_dir = Path::new("/current/project");

        assert_eq!(
            user_config_file_path(home_dir),
            Path::new("/home/user/.coursebox/config.toml")
        );
        assert_eq!(
            local_config_file_path(current_dir),
            Path::new("/current/project/.coursebox/config.toml")
        );
    }

    #[test]
    fn test_control_entries() {
        assert!(control::is_control_entry(".git"));
        assert!(control::is_control_entry(".cache-version"));
        assert!(!control::is_control_entry("content"));
    }
}
