//! Local project configuration.
//!
//! `coursebox.toml` at the workspace root records where the course came from
//! and which official version the workspace was last converged with:
//!
//! ```text
//! [course]
//! id = "rust-basics"
//! repo = "https://example.com/rust-basics.git"
//! branch = "main"
//! path = "courses/rust"   # optional sub path
//! version = "1.2.0"
//!
//! [sync]
//! last_sync = "2026-01-05T10:00:00Z"
//! ```
//!
//! The document is read with a small line parser instead of a full TOML
//! deserializer so that hand edits with stray syntax still load.

use crate::env;
use crate::error::{EngineError, IoContext, Result};
use crate::layering::STUDENT_EXTENSIONS;
use crate::source::SourceLocator;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalProjectConfig {
    pub course_id: String,
    /// Source locator string as accepted by [`crate::source::SourceLocator::parse`]
    pub source: String,
    pub branch: String,
    pub sub_path: Option<String>,
    pub version: String,
    pub last_sync: Option<DateTime<Utc>>,
}

impl LocalProjectConfig {
    pub fn new(course_id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            source: source.into(),
            branch: DEFAULT_BRANCH.to_string(),
            sub_path: None,
            version: DEFAULT_VERSION.to_string(),
            last_sync: None,
        }
    }

    /// Whether `workspace` holds a project config.
    pub fn exists(workspace: &Path) -> bool {
        env::project_file_path(workspace).is_file()
    }

    pub fn load(workspace: &Path) -> Result<Self> {
        let path = env::project_file_path(workspace);
        if !path.is_file() {
            return Err(EngineError::NotInitialized(workspace.to_path_buf()));
        }
        let text = fs::read_to_string(&path).at(&path)?;
        Self::parse(&text)
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        let path = env::project_file_path(workspace);
        fs::write(&path, self.render()).at(&path)?;
        debug!("Saved project config to {:?}", path);
        Ok(())
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut section = String::new();
        let mut config = Self::new("", "");
        let mut saw_version = false;

        for raw in text.lines() {
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = name.trim().to_string();
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = unquote(value.trim());
            match (section.as_str(), key) {
                ("course", "id") => config.course_id = value,
                ("course", "repo") => config.source = value,
                ("course", "branch") if !value.is_empty() => config.branch = value,
                ("course", "path") if !value.is_empty() => config.sub_path = Some(value),
                ("course", "version") if !value.is_empty() => {
                    config.version = value;
                    saw_version = true;
                }
                ("sync", "last_sync") if !value.is_empty() => {
                    config.last_sync = DateTime::parse_from_rfc3339(&value)
                        .map(|t| t.with_timezone(&Utc))
                        .ok();
                }
                _ => {}
            }
        }

        if config.course_id.is_empty() {
            return Err(EngineError::invalid_manifest("course.id", "is missing"));
        }
        if config.source.is_empty() {
            return Err(EngineError::invalid_manifest("course.repo", "is missing"));
        }
        if !saw_version {
            debug!("No version recorded, assuming {}", DEFAULT_VERSION);
        }
        Ok(config)
    }

    /// Source locator to fetch the official course from. A git source with no
    /// inline branch uses the recorded branch.
    pub fn locator(&self) -> SourceLocator {
        match SourceLocator::parse(&self.source) {
            SourceLocator::Git { url, branch: None } => SourceLocator::Git {
                url,
                branch: Some(self.branch.clone()),
            },
            other => other,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::from("[course]\n");
        out.push_str(&format!("id = {}\n", quote(&self.course_id)));
        out.push_str(&format!("repo = {}\n", quote(&self.source)));
        out.push_str(&format!("branch = {}\n", quote(&self.branch)));
        if let Some(path) = &self.sub_path {
            out.push_str(&format!("path = {}\n", quote(path)));
        }
        out.push_str(&format!("version = {}\n", quote(&self.version)));
        out.push_str("\n[sync]\n");
        if let Some(ts) = self.last_sync {
            out.push_str(&format!("last_sync = {}\n", quote(&ts.to_rfc3339())));
        }
        out
    }
}

/// Drop a `#` comment that sits outside of quotes.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (Some('"'), '\\') if !escaped => {
                escaped = true;
                continue;
            }
            (Some(q), c) if c == q && !escaped => quote = None,
            (None, '"' | '\'') => quote = Some(c),
            (None, '#') => return &line[..i],
            _ => {}
        }
        escaped = false;
    }
    line
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        return value[1..value.len() - 1].to_string();
    }
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        // basic strings share JSON escaping
        return serde_json::from_str::<String>(value)
            .unwrap_or_else(|_| value[1..value.len() - 1].to_string());
    }
    value.to_string()
}

fn quote(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Student-code extensions present under a content tree, sorted.
pub fn detect_languages(content_dir: &Path) -> BTreeSet<String> {
    WalkDir::new(content_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
        })
        .filter(|ext| STUDENT_EXTENSIONS.contains(&ext.as_str()))
        .collect()
}

/// `.gitignore` that keeps only student code under `content_dir_name` tracked.
pub fn render_gitignore(content_dir_name: &str, extensions: &BTreeSet<String>) -> String {
    let mut out = String::from("# Generated by coursebox: only your solutions are tracked\n");
    out.push_str("/*\n!/.gitignore\n");
    out.push_str(&format!("!/{}/\n/{}/**\n!/{}/**/\n", content_dir_name, content_dir_name, content_dir_name));
    for ext in extensions {
        out.push_str(&format!("!/{}/**/*.{}\n", content_dir_name, ext));
    }
    out
}

/// Write a `.gitignore` unless the workspace already has one.
pub fn write_gitignore(workspace: &Path, content_dir_name: &str) -> Result<bool> {
    let path = workspace.join(".gitignore");
    if path.exists() {
        return Ok(false);
    }
    let extensions = detect_languages(&workspace.join(content_dir_name));
    fs::write(&path, render_gitignore(content_dir_name, &extensions)).at(&path)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_with_comments_and_quotes() {
        let text = r#"
# workspace file
[course]
id = "rust-basics"   # trailing comment
repo = 'https://example.com/r.git#dev'
branch = "dev"
version = "2.0.0"

[sync]
last_sync = "2026-01-05T10:00:00Z"
"#;
        let config = LocalProjectConfig::parse(text).unwrap();
        assert_eq!(config.course_id, "rust-basics");
        assert_eq!(config.source, "https://example.com/r.git#dev");
        assert_eq!(config.branch, "dev");
        assert_eq!(config.sub_path, None);
        assert_eq!(config.version, "2.0.0");
        assert!(config.last_sync.is_some());
    }

    #[test]
    fn test_defaults_and_missing_fields() {
        let config = LocalProjectConfig::parse("[course]\nid = \"x\"\nrepo = \"y\"\n").unwrap();
        assert_eq!(config.branch, DEFAULT_BRANCH);
        assert_eq!(config.version, DEFAULT_VERSION);

        let err = LocalProjectConfig::parse("[course]\nrepo = \"y\"\n").unwrap_err();
        assert!(matches!(err, EngineError::InvalidManifest { ref field, .. } if field == "course.id"));
    }

    #[test]
    fn test_render_round_trips_quotes() {
        let mut config = LocalProjectConfig::new("c\"1", "/path/with # hash");
        config.sub_path = Some("sub".into());
        config.last_sync = Some(Utc::now());
        let parsed = LocalProjectConfig::parse(&config.render()).unwrap();
        assert_eq!(parsed.course_id, config.course_id);
        assert_eq!(parsed.source, config.source);
        assert_eq!(parsed.sub_path.as_deref(), Some("sub"));
    }

    #[test]
    fn test_load_missing_is_not_initialized() {
        let temp = TempDir::new().unwrap();
        let err = LocalProjectConfig::load(temp.path()).unwrap_err();
        assert!(matches!(err, EngineError::NotInitialized(_)));
    }

    #[test]
    fn test_gitignore_tracks_detected_languages() {
        let temp = TempDir::new().unwrap();
        let content = temp.path().join("content/01_intro");
        fs::create_dir_all(&content).unwrap();
        fs::write(content.join("main.rs"), "").unwrap();
        fs::write(content.join("README.md"), "").unwrap();

        assert!(write_gitignore(temp.path(), "content").unwrap());
        let text = fs::read_to_string(temp.path().join(".gitignore")).unwrap();
        assert!(text.contains("!/content/**/*.rs"));
        assert!(!text.contains("*.md"));
        assert!(!write_gitignore(temp.path(), "content").unwrap());
    }
}
