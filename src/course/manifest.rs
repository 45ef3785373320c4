//! `course.json` loading and validation.

use crate::env;
use crate::error::{EngineError, IoContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// How a course's verifier is executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RunnerDescriptor {
    /// Bare subprocess on the host
    Process {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        /// Working directory relative to the course root
        #[serde(default)]
        cwd: Option<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    /// Shell command inside a locally built container image
    DockerLocal {
        command: String,
        /// Dockerfile relative to the course root
        #[serde(default)]
        dockerfile: Option<String>,
        #[serde(default)]
        image_tag: Option<String>,
        #[serde(default)]
        network_access: bool,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
}

impl RunnerDescriptor {
    pub fn command(&self) -> &str {
        match self {
            Self::Process { command, .. } | Self::DockerLocal { command, .. } => command,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Process { .. } => "process",
            Self::DockerLocal { .. } => "docker-local",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentLayout {
    #[serde(default = "default_content_root")]
    pub root: String,
    #[serde(default = "default_exercises_dir")]
    pub exercises: String,
}

impl Default for ContentLayout {
    fn default() -> Self {
        Self {
            root: default_content_root(),
            exercises: default_exercises_dir(),
        }
    }
}

fn default_content_root() -> String {
    ".".to_string()
}

fn default_exercises_dir() -> String {
    env::CONTENT_DIR_NAME.to_string()
}

fn default_version() -> String {
    crate::project::DEFAULT_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupCheck {
    pub name: String,
    #[serde(rename = "type", default = "default_check_kind")]
    pub kind: String,
    pub command: String,
}

fn default_check_kind() -> String {
    "command".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupSpec {
    #[serde(default)]
    pub checks: Vec<SetupCheck>,
    #[serde(default)]
    pub guide: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressionPolicy {
    Sequential,
    #[default]
    Open,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressionSpec {
    #[serde(default)]
    pub mode: ProgressionPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseMeta {
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Overrides the default XP award
    #[serde(default)]
    pub xp: Option<u32>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseManifest {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub content: ContentLayout,
    pub runner: RunnerDescriptor,
    #[serde(default)]
    pub setup: Option<SetupSpec>,
    #[serde(default)]
    pub progression: Option<ProgressionSpec>,
    #[serde(default)]
    pub exercises: BTreeMap<String, ExerciseMeta>,
}

impl CourseManifest {
    /// Read and validate the manifest of the course rooted at `course_root`.
    pub fn load(course_root: &Path) -> Result<Self> {
        let path = env::manifest_file_path(course_root);
        if !path.is_file() {
            return Err(EngineError::invalid_manifest(
                env::MANIFEST_FILE_NAME,
                format!("not found in {}", course_root.display()),
            ));
        }
        let text = fs::read_to_string(&path).at(&path)?;
        let manifest = Self::parse(&text)?;
        manifest.validate(course_root)?;
        debug!("Loaded manifest for course {} ({})", manifest.id, manifest.version);
        Ok(manifest)
    }

    /// Parse without touching the filesystem.
    pub fn parse(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| EngineError::invalid_manifest(env::MANIFEST_FILE_NAME, e.to_string()))?;
        let object = value.as_object().ok_or_else(|| {
            EngineError::invalid_manifest(env::MANIFEST_FILE_NAME, "must be a JSON object")
        })?;

        if object.contains_key("repo") {
            return Err(EngineError::invalid_manifest(
                "repo",
                "is not allowed; course sources are resolved by the engine",
            ));
        }
        for field in ["id", "name", "runner"] {
            if !object.contains_key(field) {
                return Err(EngineError::invalid_manifest(field, "is missing"));
            }
        }
        if let Some(runner) = object.get("runner") {
            serde_json::from_value::<RunnerDescriptor>(runner.clone())
                .map_err(|e| EngineError::invalid_manifest("runner", e.to_string()))?;
        }

        serde_json::from_value(value)
            .map_err(|e| EngineError::invalid_manifest(env::MANIFEST_FILE_NAME, e.to_string()))
    }

    pub fn validate(&self, course_root: &Path) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::invalid_manifest("id", "must not be empty"));
        }
        if !is_safe_component(&self.id) {
            return Err(EngineError::invalid_manifest(
                "id",
                "may only contain letters, digits, '-', '_' and '.'",
            ));
        }
        if self.name.trim().is_empty() {
            return Err(EngineError::invalid_manifest("name", "must not be empty"));
        }
        if self.runner.command().trim().is_empty() {
            return Err(EngineError::invalid_manifest("runner.command", "must not be empty"));
        }
        if !course_root.join(&self.content.root).is_dir() {
            return Err(EngineError::invalid_manifest(
                "content.root",
                format!("directory '{}' does not exist", self.content.root),
            ));
        }
        if !self.exercises_dir(course_root).is_dir() {
            return Err(EngineError::invalid_manifest(
                "content.exercises",
                format!("directory '{}' does not exist", self.content.exercises),
            ));
        }
        if let Some(guide) = self.setup.as_ref().and_then(|s| s.guide.as_ref())
            && !course_root.join(guide).is_file()
        {
            return Err(EngineError::invalid_manifest(
                "setup.guide",
                format!("file '{}' does not exist", guide),
            ));
        }
        if let RunnerDescriptor::DockerLocal {
            dockerfile: Some(dockerfile),
            ..
        } = &self.runner
            && !course_root.join(dockerfile).is_file()
        {
            return Err(EngineError::invalid_manifest(
                "runner.dockerfile",
                format!("file '{}' does not exist", dockerfile),
            ));
        }
        Ok(())
    }

    pub fn exercises_dir(&self, course_root: &Path) -> PathBuf {
        course_root.join(&self.content.exercises)
    }

    pub fn policy(&self) -> ProgressionPolicy {
        self.progression.as_ref().map(|p| p.mode).unwrap_or_default()
    }
}

fn is_safe_component(id: &str) -> bool {
    id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
