//! Mount and working-directory safety policy.
//!
//! Verifier commands are course-authored, so the directory they run in (and
//! that the container variant bind-mounts) must never expose the whole
//! filesystem, the home directory, or places where credentials live.

use std::path::{Component, Path, PathBuf};

/// Home subdirectories that hold credentials or cloud configuration.
pub const SENSITIVE_HOME_DIRS: &[&str] = &[".ssh", ".aws", ".config", ".gnupg", ".kube", ".docker"];

/// System directories that are never mounted.
#[cfg(unix)]
pub const SYSTEM_DIRS: &[&str] = &[
    "/etc", "/var", "/bin", "/sbin", "/usr", "/boot", "/proc", "/sys", "/dev",
];

#[cfg(windows)]
pub const SYSTEM_DIRS: &[&str] = &[
    "C:\\Windows",
    "C:\\Program Files",
    "C:\\Program Files (x86)",
    "C:\\ProgramData",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPolicy {
    home: Option<PathBuf>,
    /// Scratch area allowed even when it sits under a system directory
    temp: Option<PathBuf>,
}

impl Default for PathPolicy {
    fn default() -> Self {
        Self::new(dirs::home_dir(), Some(std::env::temp_dir()))
    }
}

impl PathPolicy {
    pub fn new(home: Option<PathBuf>, temp: Option<PathBuf>) -> Self {
        Self {
            home: home.map(|h| normalize(&h)),
            temp: temp.map(|t| normalize(&t)),
        }
    }

    /// Returns the rejection reason for `path`, if any.
    pub fn check(&self, path: &Path) -> Result<(), String> {
        if !path.is_absolute() {
            return Err("path must be absolute".to_string());
        }
        let lexical = normalize(path);
        self.check_normalized(&lexical)?;
        // resolve symlinks too, so a link into ~/.ssh is caught
        if let Ok(resolved) = std::fs::canonicalize(path) {
            self.check_normalized(&normalize(&resolved))?;
        }
        Ok(())
    }

    fn check_normalized(&self, path: &Path) -> Result<(), String> {
        if path.parent().is_none() {
            return Err("refusing to expose the filesystem root".to_string());
        }

        if let Some(home) = &self.home {
            if path == home {
                return Err("refusing to expose the entire home directory".to_string());
            }
            if home.starts_with(path) {
                return Err("directory contains the home directory".to_string());
            }
            for dir in SENSITIVE_HOME_DIRS {
                if path.starts_with(home.join(dir)) {
                    return Err(format!("~/{dir} holds credentials or private configuration"));
                }
            }
        }

        if let Some(temp) = &self.temp
            && path.starts_with(temp)
            && path != temp
        {
            return Ok(());
        }

        for dir in SYSTEM_DIRS {
            if path.starts_with(dir) {
                return Err(format!("{dir} is a system directory"));
            }
        }
        Ok(())
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn policy() -> PathPolicy {
        PathPolicy::new(Some(PathBuf::from("/home/student")), Some(PathBuf::from("/tmp")))
    }

    #[test]
    fn test_rejects_root_and_home() {
        let policy = policy();
        assert!(policy.check(Path::new("/")).is_err());
        assert!(policy.check(Path::new("/home/student")).is_err());
        assert!(policy.check(Path::new("/home/student/")).is_err());
        assert!(policy.check(Path::new("/home")).is_err());
    }

    #[test]
    fn test_rejects_sensitive_subdirectories() {
        let policy = policy();
        let err = policy.check(Path::new("/home/student/.ssh")).unwrap_err();
        assert!(err.contains(".ssh"));
        assert!(policy.check(Path::new("/home/student/.aws/creds")).is_err());
        assert!(policy.check(Path::new("/etc")).is_err());
        assert!(policy.check(Path::new("/usr/local/src")).is_err());
    }

    #[test]
    fn test_parent_segments_are_resolved() {
        let policy = policy();
        assert!(policy.check(Path::new("/home/student/course/../.ssh")).is_err());
        assert!(policy.check(Path::new("/home/student/course/../../..")).is_err());
    }

    #[test]
    fn test_allows_workspaces() {
        let policy = policy();
        assert!(policy.check(Path::new("/home/student/courses/rust")).is_ok());
        assert!(policy.check(Path::new("/tmp/coursebox-runtime-1")).is_ok());
        assert!(policy.check(Path::new("/srv/work")).is_ok());
    }

    #[test]
    fn test_relative_paths_rejected() {
        assert!(policy().check(Path::new("course")).is_err());
    }
}
