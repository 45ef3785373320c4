//! Course sources.
//!
//! A course can come from a local directory, a packed `.course` file, an
//! archive URL, a git repository or a registry alias. [`SourceFetcher`]
//! materializes any of them into a directory the cache can adopt.

use crate::archive;
use crate::env::{self, control};
use crate::error::{EngineError, IoContext, Result};
use crate::remote::{RegistryEntry, RemoteAuthority};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;
use walkdir::WalkDir;

/// Where a course comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    LocalDir(PathBuf),
    ArchiveFile(PathBuf),
    ArchiveUrl(Url),
    Git { url: String, branch: Option<String> },
    Registry(String),
}

impl SourceLocator {
    /// Classify user input. Never fails: anything unrecognized is treated as
    /// a registry alias and only resolved when fetched.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        let path = Path::new(input);
        if path.is_dir() {
            return Self::LocalDir(absolute(path));
        }
        if path.is_file() && is_archive_name(input) {
            return Self::ArchiveFile(absolute(path));
        }

        let remote = input.starts_with("http://")
            || input.starts_with("https://")
            || input.starts_with("git@")
            || input.starts_with("ssh://");
        if remote {
            let (url, branch) = match input.split_once('#') {
                Some((url, branch)) if !branch.is_empty() => (url, Some(branch.to_string())),
                Some((url, _)) => (url, None),
                None => (input, None),
            };
            if branch.is_none()
                && is_archive_name(url)
                && let Ok(parsed) = Url::parse(url)
                && matches!(parsed.scheme(), "http" | "https")
            {
                return Self::ArchiveUrl(parsed);
            }
            return Self::Git {
                url: url.to_string(),
                branch,
            };
        }

        Self::Registry(input.to_string())
    }

    pub fn is_registry(&self) -> bool {
        matches!(self, Self::Registry(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::LocalDir(_) => "directory",
            Self::ArchiveFile(_) => "archive",
            Self::ArchiveUrl(_) => "archive-url",
            Self::Git { .. } => "git",
            Self::Registry(_) => "registry",
        }
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalDir(path) | Self::ArchiveFile(path) => write!(f, "{}", path.display()),
            Self::ArchiveUrl(url) => write!(f, "{url}"),
            Self::Git { url, branch: Some(branch) } => write!(f, "{url}#{branch}"),
            Self::Git { url, branch: None } => write!(f, "{url}"),
            Self::Registry(alias) => write!(f, "{alias}"),
        }
    }
}

fn is_archive_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(&format!(".{}", env::ARCHIVE_EXTENSION)) || lower.ends_with(".zip")
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// A source resolved to something fetchable, plus what the registry said
/// about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub locator: SourceLocator,
    /// Sub-directory of the fetched tree holding the course
    pub sub_path: Option<String>,
    /// Version advertised by the registry, when known
    pub version: Option<String>,
}

/// Result of materializing a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    pub dir: PathBuf,
    /// Version read from the fetched course manifest
    pub version: String,
}

/// Fetches course trees through a [`RemoteAuthority`].
pub struct SourceFetcher<'a> {
    authority: &'a dyn RemoteAuthority,
}

impl<'a> SourceFetcher<'a> {
    pub fn new(authority: &'a dyn RemoteAuthority) -> Self {
        Self { authority }
    }

    pub fn authority(&self) -> &'a dyn RemoteAuthority {
        self.authority
    }

    /// Resolve registry aliases into their backing locator. Other locators are
    /// returned as-is.
    pub async fn resolve(&self, locator: &SourceLocator) -> Result<ResolvedSource> {
        let SourceLocator::Registry(alias) = locator else {
            return Ok(ResolvedSource {
                locator: locator.clone(),
                sub_path: None,
                version: None,
            });
        };

        let RegistryEntry {
            source,
            branch,
            path,
            version,
        } = self.authority.resolve(alias).await?;
        let locator = match source {
            Some(source) => match SourceLocator::parse(&source) {
                SourceLocator::Registry(_) => {
                    return Err(EngineError::SourceUnreachable(format!(
                        "registry entry for '{alias}' points at another alias: {source}"
                    )));
                }
                SourceLocator::Git { url, branch: inline } => SourceLocator::Git {
                    url,
                    branch: branch.or(inline),
                },
                other => other,
            },
            None => locator.clone(),
        };
        info!("Resolved '{}' to {} {}", alias, locator.kind(), locator);
        Ok(ResolvedSource {
            locator,
            sub_path: path.filter(|p| !p.is_empty()),
            version,
        })
    }

    /// Latest version a source offers. Registry courses answer from the
    /// registry; everything else is fetched into a throwaway directory and its
    /// manifest read.
    pub async fn latest_version(&self, locator: &SourceLocator, sub_path: Option<&str>) -> Result<String> {
        if let SourceLocator::Registry(alias) = locator
            && let Some(version) = self.authority.latest_version(alias).await?
        {
            return Ok(version);
        }
        let scratch = tempfile::TempDir::new()
            .map_err(|e| EngineError::io(std::env::temp_dir(), e))?;
        let dest = scratch.path().join("course");
        let fetched = self.materialize(locator, None, &dest).await?;
        Ok(read_version(&course_root(&fetched.dir, sub_path)))
    }

    /// Fetch `locator` into `dest`, which must not exist yet.
    ///
    /// `version` is honored by the registry download endpoint; other sources
    /// deliver whatever they currently hold.
    pub async fn materialize(
        &self,
        locator: &SourceLocator,
        version: Option<&str>,
        dest: &Path,
    ) -> Result<Materialized> {
        let resolved = self.resolve(locator).await?;
        match &resolved.locator {
            SourceLocator::LocalDir(dir) => copy_tree(dir, dest)?,
            SourceLocator::ArchiveFile(file) => {
                if !file.is_file() {
                    return Err(EngineError::SourceUnreachable(format!(
                        "archive {} does not exist",
                        file.display()
                    )));
                }
                archive::unpack_to(file, dest)?;
            }
            SourceLocator::ArchiveUrl(url) => {
                let bytes = self.authority.download_url(url).await?;
                unpack_bytes(&bytes, dest)?;
            }
            SourceLocator::Git { url, branch } => git_clone(url, branch.as_deref(), dest).await?,
            SourceLocator::Registry(alias) => {
                let bytes = self.authority.download_archive(alias, version).await?;
                unpack_bytes(&bytes, dest)?;
            }
        }

        let root = course_root(dest, resolved.sub_path.as_deref());
        if !root.is_dir() {
            return Err(EngineError::SourceUnreachable(format!(
                "course path {} not found in {}",
                resolved.sub_path.as_deref().unwrap_or("."),
                resolved.locator
            )));
        }
        let fetched = read_version(&root);
        if let Some(wanted) = version
            && wanted != fetched
        {
            warn!("Requested version {} but source provided {}", wanted, fetched);
        }
        Ok(Materialized {
            dir: dest.to_path_buf(),
            version: fetched,
        })
    }
}

fn course_root(dir: &Path, sub_path: Option<&str>) -> PathBuf {
    match sub_path {
        Some(sub) => dir.join(sub),
        None => dir.to_path_buf(),
    }
}

#[derive(Deserialize)]
struct VersionOnly {
    #[serde(default)]
    version: Option<String>,
}

/// Version declared by the manifest under `course_root`, defaulting when the
/// manifest is missing or has none.
pub fn read_version(course_root: &Path) -> String {
    fs::read_to_string(env::manifest_file_path(course_root))
        .ok()
        .and_then(|text| serde_json::from_str::<VersionOnly>(&text).ok())
        .and_then(|doc| doc.version)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| crate::project::DEFAULT_VERSION.to_string())
}

fn unpack_bytes(bytes: &[u8], dest: &Path) -> Result<()> {
    let mut file = tempfile::Builder::new()
        .suffix(&format!(".{}", env::ARCHIVE_EXTENSION))
        .tempfile()
        .map_err(|e| EngineError::io(std::env::temp_dir(), e))?;
    std::io::Write::write_all(&mut file, bytes).at(file.path())?;
    archive::unpack_to(file.path(), dest)?;
    Ok(())
}

/// Copy a directory tree, leaving version-control entries behind.
pub(crate) fn copy_tree(src: &Path, dest: &Path) -> Result<usize> {
    if !src.is_dir() {
        return Err(EngineError::SourceUnreachable(format!(
            "course directory {} does not exist",
            src.display()
        )));
    }
    fs::create_dir_all(dest).at(dest)?;
    let mut copied = 0;
    let walker = WalkDir::new(src)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !control::is_control_entry(&e.file_name().to_string_lossy()));
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
            EngineError::io(path, e.into())
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| EngineError::io(entry.path(), std::io::Error::other(e)))?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).at(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).at(&target)?;
            copied += 1;
        }
    }
    debug!("Copied {} files from {:?} to {:?}", copied, src, dest);
    Ok(copied)
}

async fn git_clone(url: &str, branch: Option<&str>, dest: &Path) -> Result<()> {
    let git = which::which("git").map_err(|_| {
        EngineError::SourceUnreachable("git is required to fetch this course but was not found on PATH".to_string())
    })?;

    let mut command = Command::new(git);
    command.arg("clone").arg("--depth").arg("1");
    if let Some(branch) = branch {
        command.arg("--branch").arg(branch);
    }
    command.arg(url).arg(dest);

    info!("Cloning {}{}", url, branch.map(|b| format!(" ({b})")).unwrap_or_default());
    let output = command
        .output()
        .await
        .map_err(|e| EngineError::SourceUnreachable(format!("failed to run git: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EngineError::SourceUnreachable(format!(
            "git clone of {url} failed: {}",
            stderr.trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_local_dir_and_archive() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("rust.course");
        fs::write(&archive, b"zip").unwrap();
        let notes = dir.path().join("notes.txt");
        fs::write(&notes, b"x").unwrap();

        assert!(matches!(
            SourceLocator::parse(dir.path().to_str().unwrap()),
            SourceLocator::LocalDir(_)
        ));
        assert!(matches!(
            SourceLocator::parse(archive.to_str().unwrap()),
            SourceLocator::ArchiveFile(_)
        ));
        assert!(matches!(
            SourceLocator::parse(notes.to_str().unwrap()),
            SourceLocator::Registry(_)
        ));
    }

    #[test]
    fn test_parse_remote_forms() {
        assert_eq!(
            SourceLocator::parse("https://github.com/acme/course.git#dev"),
            SourceLocator::Git {
                url: "https://github.com/acme/course.git".to_string(),
                branch: Some("dev".to_string()),
            }
        );
        assert_eq!(
            SourceLocator::parse("git@github.com:acme/course.git"),
            SourceLocator::Git {
                url: "git@github.com:acme/course.git".to_string(),
                branch: None,
            }
        );
        assert!(matches!(
            SourceLocator::parse("https://cdn.example.com/rust.course"),
            SourceLocator::ArchiveUrl(_)
        ));
        assert_eq!(
            SourceLocator::parse("rust-basics"),
            SourceLocator::Registry("rust-basics".to_string())
        );
    }

    #[test]
    fn test_display_round_trips_git_branch() {
        let locator = SourceLocator::parse("https://github.com/acme/course.git#dev");
        assert_eq!(locator.to_string(), "https://github.com/acme/course.git#dev");
    }

    #[test]
    fn test_read_version_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(read_version(dir.path()), "1.0.0");

        fs::write(dir.path().join("course.json"), r#"{"version": "2.1.0"}"#).unwrap();
        assert_eq!(read_version(dir.path()), "2.1.0");
    }

    #[test]
    fn test_copy_tree_skips_git() {
        let src = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join(".git")).unwrap();
        fs::write(src.path().join(".git/HEAD"), "ref").unwrap();
        fs::create_dir_all(src.path().join("content/01")).unwrap();
        fs::write(src.path().join("content/01/main.rs"), "fn main() {}").unwrap();

        let dest = TempDir::new().unwrap();
        let target = dest.path().join("copy");
        assert_eq!(copy_tree(src.path(), &target).unwrap(), 1);
        assert!(target.join("content/01/main.rs").exists());
        assert!(!target.join(".git").exists());
    }

    #[test]
    fn test_copy_tree_missing_source_is_unreachable() {
        let dest = TempDir::new().unwrap();
        let err = copy_tree(Path::new("/definitely/missing/course"), dest.path()).unwrap_err();
        assert!(err.is_recoverable());
    }
}
