//! Engine error taxonomy.
//!
//! Every public operation converts its I/O, network, and parse failures into one
//! of these kinds at the component boundary. Two outcomes are deliberately not
//! errors: a failed verifier run is a [`crate::verdict::Verdict`] with
//! `success == false`, and a file the layering pass declines to overwrite is a
//! [`crate::layering::LayerAction::Skipped`] entry.

use std::path::{Path, PathBuf};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Network, registry, or source fetch failure. Recoverable: retry or fall
    /// back to the cached copy.
    #[error("Source unreachable: {0}")]
    SourceUnreachable(String),

    /// Malformed or missing course configuration.
    #[error("Invalid manifest: `{field}` {reason}")]
    InvalidManifest { field: String, reason: String },

    /// Sandbox refused to mount or run in a sensitive location.
    #[error("Unsafe sandbox path {}: {reason}", .path.display())]
    UnsafeSandboxPath { path: PathBuf, reason: String },

    /// Archive read or write failure.
    #[error("Packaging failed: {0}")]
    Packaging(String),

    /// Neither the process runner nor the container runtime could be used.
    #[error("Runner unavailable: {0}")]
    RunnerUnavailable(String),

    /// The directory holds no coursebox workspace.
    #[error("No course workspace at {}; run `coursebox init` first", .0.display())]
    NotInitialized(PathBuf),

    /// Reset target is absent from the official course.
    #[error("File {} not found in official course", .0.display())]
    NotInCache(PathBuf),

    #[error("Exercise not found: {0}")]
    ExerciseNotFound(String),

    #[error("Exercise {id} is locked: {reason}")]
    ExerciseLocked { id: String, reason: String },

    /// Progress store could not be read or written.
    #[error("Progress store error: {0}")]
    Progress(String),

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn invalid_manifest(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidManifest {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether the caller may retry or fall back to a cached copy.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SourceUnreachable(_))
    }
}

/// Attach a path to a raw I/O result.
pub(crate) trait IoContext<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| EngineError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_manifest_names_field() {
        let err = EngineError::invalid_manifest("runner.command", "must not be empty");
        assert_eq!(
            err.to_string(),
            "Invalid manifest: `runner.command` must not be empty"
        );
    }

    #[test]
    fn test_unsafe_path_message_is_actionable() {
        let err = EngineError::UnsafeSandboxPath {
            path: PathBuf::from("/etc"),
            reason: "system directory".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("/etc"));
        assert!(message.contains("system directory"));
    }

    #[test]
    fn test_only_source_errors_are_recoverable() {
        assert!(EngineError::SourceUnreachable("offline".into()).is_recoverable());
        assert!(!EngineError::Packaging("bad zip".into()).is_recoverable());
    }

    #[test]
    fn test_io_context() {
        let res: std::io::Result<()> = Err(std::io::Error::other("boom"));
        let err = res.at("/tmp/x").unwrap_err();
        assert!(matches!(err, EngineError::Io { ref path, .. } if path == Path::new("/tmp/x")));
    }
}
