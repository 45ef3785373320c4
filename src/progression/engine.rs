//! Lock computation.
//!
//! The outline is rebuilt from the tree and the recorded results on every
//! request and never patched in place.

use super::progress::Progress;
use crate::course::{CourseTree, ExerciseNode, NodeKind, ProgressionPolicy};
use serde::Serialize;

pub const PREVIOUS_LESSON_REASON: &str = "Complete previous lesson";

/// One derived manifest row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub module: String,
    pub id: String,
    pub friendly_name: String,
    pub kind: NodeKind,
    pub has_quiz: bool,
    pub passed: bool,
    pub is_locked: bool,
    pub lock_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Outline {
    pub entries: Vec<ManifestEntry>,
}

impl Outline {
    pub fn get(&self, id: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn completed(&self) -> usize {
        self.entries.iter().filter(|e| e.passed).count()
    }
}

fn node_passed(node: &ExerciseNode, progress: &Progress) -> bool {
    match node.kind {
        NodeKind::Exercise => progress.exercise_passed(&node.id),
        NodeKind::Quiz => progress.quiz_passed(&node.id),
    }
}

/// Compute lock state for every node of `tree`.
pub fn compute_outline(
    tree: &CourseTree,
    progress: &Progress,
    policy: ProgressionPolicy,
    bypass: bool,
) -> Outline {
    let nodes: Vec<_> = tree.nodes().collect();
    let passed: Vec<bool> = nodes.iter().map(|(_, n)| node_passed(n, progress)).collect();

    let entries = nodes
        .iter()
        .enumerate()
        .map(|(i, (module, node))| {
            let lock_reason = if bypass || policy == ProgressionPolicy::Open || passed[i] {
                None
            } else if i > 0 && !passed[i - 1] {
                Some(PREVIOUS_LESSON_REASON.to_string())
            } else {
                module
                    .prerequisites
                    .iter()
                    .chain(node.prerequisites.iter())
                    .find(|p| !p.is_met(tree, progress))
                    .map(|p| p.reason())
            };

            ManifestEntry {
                module: module.id.clone(),
                id: node.id.clone(),
                friendly_name: node.friendly_name.clone(),
                kind: node.kind,
                has_quiz: node.has_quiz,
                passed: passed[i],
                is_locked: lock_reason.is_some(),
                lock_reason,
            }
        })
        .collect();

    Outline { entries }
}
