//! Exercise tree discovery.
//!
//! Modules are the directories of the exercises root in name order. Each may
//! carry an `info.toml` that titles the module and fixes exercise order; any
//! exercise it does not list is appended in name order.

use super::manifest::{CourseManifest, ExerciseMeta};
use crate::error::{EngineError, IoContext, Result};
use crate::layering::is_student_code;
use crate::progression::prerequisite::{self, Prerequisite};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::warn;

pub const MODULE_INFO_FILE: &str = "info.toml";
pub const QUIZ_FILE: &str = "quiz.json";
const README_FILE: &str = "README.md";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Exercise,
    Quiz,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExerciseNode {
    /// `module/exercise`
    pub id: String,
    pub module: String,
    pub name: String,
    pub friendly_name: String,
    pub kind: NodeKind,
    pub has_quiz: bool,
    pub difficulty: Option<String>,
    pub tags: Vec<String>,
    pub xp: Option<u32>,
    pub prerequisites: Vec<Prerequisite>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleNode {
    pub id: String,
    pub title: String,
    pub icon: Option<String>,
    pub completion_message: Option<String>,
    pub prerequisites: Vec<Prerequisite>,
    pub nodes: Vec<ExerciseNode>,
}

impl ModuleNode {
    pub fn exercises(&self) -> impl Iterator<Item = &ExerciseNode> {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Exercise)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CourseTree {
    pub modules: Vec<ModuleNode>,
}

impl CourseTree {
    pub fn module(&self, id: &str) -> Option<&ModuleNode> {
        self.modules.iter().find(|m| m.id == id)
    }

    /// Every node in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = (&ModuleNode, &ExerciseNode)> {
        self.modules
            .iter()
            .flat_map(|m| m.nodes.iter().map(move |n| (m, n)))
    }

    pub fn find(&self, id: &str) -> Option<&ExerciseNode> {
        self.nodes().map(|(_, n)| n).find(|n| n.id == id)
    }
}

#[derive(Debug, Default, Deserialize)]
struct InfoFile {
    #[serde(default)]
    module: ModuleSection,
    #[serde(default)]
    exercises: Vec<ExerciseEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct ModuleSection {
    title: Option<String>,
    icon: Option<String>,
    #[serde(default)]
    prerequisites: Vec<String>,
    completion_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExerciseEntry {
    name: String,
    title: Option<String>,
    #[serde(flatten)]
    meta: ExerciseMeta,
}

/// Scan the exercises root of a course.
pub fn scan(course_root: &Path, manifest: &CourseManifest) -> Result<CourseTree> {
    let root = manifest.exercises_dir(course_root);
    let mut module_dirs = list_dir(&root)?
        .into_iter()
        .filter(|(name, is_dir)| *is_dir && !name.starts_with('.'))
        .map(|(name, _)| name)
        .collect::<Vec<_>>();
    module_dirs.sort();

    let mut modules = Vec::with_capacity(module_dirs.len());
    for module_id in module_dirs {
        modules.push(scan_module(&root.join(&module_id), &module_id, manifest)?);
    }
    Ok(CourseTree { modules })
}

fn scan_module(dir: &Path, module_id: &str, manifest: &CourseManifest) -> Result<ModuleNode> {
    let info_path = dir.join(MODULE_INFO_FILE);
    let info_field = format!("{module_id}/{MODULE_INFO_FILE}");
    let info: InfoFile = if info_path.is_file() {
        let text = fs::read_to_string(&info_path).at(&info_path)?;
        toml::from_str(&text)
            .map_err(|e| EngineError::invalid_manifest(&info_field, e.to_string()))?
    } else {
        InfoFile::default()
    };

    let entries = list_dir(dir)?;
    let on_disk: BTreeSet<String> = entries
        .iter()
        .filter_map(|(name, is_dir)| exercise_name(name, *is_dir))
        .collect();

    let mut nodes = Vec::new();
    let mut seen = BTreeSet::new();
    for entry in &info.exercises {
        if !on_disk.contains(&entry.name) {
            warn!("{} lists missing exercise '{}'", info_field, entry.name);
            continue;
        }
        seen.insert(entry.name.clone());
        nodes.push(build_node(
            dir,
            module_id,
            &entry.name,
            entry.title.clone(),
            &entry.meta,
            manifest,
        )?);
    }
    for name in on_disk.iter().filter(|n| !seen.contains(*n)) {
        nodes.push(build_node(
            dir,
            module_id,
            name,
            None,
            &ExerciseMeta::default(),
            manifest,
        )?);
    }

    if dir.join(QUIZ_FILE).is_file() {
        nodes.push(ExerciseNode {
            id: format!("{module_id}/{QUIZ_FILE}"),
            module: module_id.to_string(),
            name: QUIZ_FILE.to_string(),
            friendly_name: "Module quiz".to_string(),
            kind: NodeKind::Quiz,
            has_quiz: true,
            difficulty: None,
            tags: Vec::new(),
            xp: None,
            prerequisites: Vec::new(),
        });
    }

    let prerequisites = prerequisite::parse_all(&info.module.prerequisites)
        .map_err(|e| EngineError::invalid_manifest(format!("{info_field} prerequisites"), e.to_string()))?;

    Ok(ModuleNode {
        id: module_id.to_string(),
        title: info
            .module
            .title
            .unwrap_or_else(|| friendly_name(module_id)),
        icon: info.module.icon,
        completion_message: info.module.completion_message,
        prerequisites,
        nodes,
    })
}

fn build_node(
    module_dir: &Path,
    module_id: &str,
    name: &str,
    title: Option<String>,
    info_meta: &ExerciseMeta,
    manifest: &CourseManifest,
) -> Result<ExerciseNode> {
    let id = format!("{module_id}/{name}");
    let meta = manifest.exercises.get(&id).unwrap_or(info_meta);
    let prerequisites = prerequisite::parse_all(&meta.prerequisites)
        .map_err(|e| EngineError::invalid_manifest(format!("exercises.{id}.prerequisites"), e.to_string()))?;

    Ok(ExerciseNode {
        module: module_id.to_string(),
        name: name.to_string(),
        friendly_name: title.unwrap_or_else(|| friendly_name(name)),
        kind: NodeKind::Exercise,
        has_quiz: module_dir.join(name).join(QUIZ_FILE).is_file(),
        difficulty: meta.difficulty.clone(),
        tags: meta.tags.clone(),
        xp: meta.xp,
        prerequisites,
        id,
    })
}

fn list_dir(dir: &Path) -> Result<Vec<(String, bool)>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).at(dir)? {
        let entry = entry.at(dir)?;
        let is_dir = entry.file_type().at(entry.path())?.is_dir();
        out.push((entry.file_name().to_string_lossy().to_string(), is_dir));
    }
    Ok(out)
}

/// Exercise name for a module entry, if it is one.
fn exercise_name(file_name: &str, is_dir: bool) -> Option<String> {
    if file_name.starts_with('.') {
        return None;
    }
    if is_dir {
        return Some(file_name.to_string());
    }
    if matches!(file_name, MODULE_INFO_FILE | QUIZ_FILE | README_FILE) {
        return None;
    }
    let path = Path::new(file_name);
    if !is_student_code(path) {
        return None;
    }
    path.file_stem().map(|s| s.to_string_lossy().to_string())
}

/// `01_hello_world` becomes `hello world`.
pub fn friendly_name(name: &str) -> String {
    let stripped = name
        .trim_start_matches(|c: char| c.is_ascii_digit())
        .trim_start_matches(['_', '-']);
    let base = if stripped.is_empty() { name } else { stripped };
    base.replace(['_', '-'], " ")
}
