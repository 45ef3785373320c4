//! Prerequisite expressions.
//!
//! ```text
//! module_<module id>          every exercise of the module passed
//! exercise:<exercise id>      that exercise passed
//! quiz:<quiz id>:<min score>  quiz passed with at least min score percent
//! ```

use super::progress::Progress;
use crate::course::CourseTree;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Prerequisite {
    Module(String),
    Exercise(String),
    Quiz { id: String, min_score: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized prerequisite '{0}'")]
pub struct PrerequisiteParseError(pub String);

impl FromStr for Prerequisite {
    type Err = PrerequisiteParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let err = || PrerequisiteParseError(s.to_string());

        if let Some(id) = s.strip_prefix("module_") {
            if id.is_empty() {
                return Err(err());
            }
            return Ok(Self::Module(id.to_string()));
        }
        if let Some(id) = s.strip_prefix("exercise:") {
            if id.is_empty() {
                return Err(err());
            }
            return Ok(Self::Exercise(id.to_string()));
        }
        if let Some(rest) = s.strip_prefix("quiz:") {
            let (id, score) = rest.rsplit_once(':').ok_or_else(err)?;
            let min_score: u32 = score.parse().map_err(|_| err())?;
            if id.is_empty() || min_score > 100 {
                return Err(err());
            }
            return Ok(Self::Quiz {
                id: id.to_string(),
                min_score,
            });
        }
        Err(err())
    }
}

impl fmt::Display for Prerequisite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module(id) => write!(f, "module_{id}"),
            Self::Exercise(id) => write!(f, "exercise:{id}"),
            Self::Quiz { id, min_score } => write!(f, "quiz:{id}:{min_score}"),
        }
    }
}

impl Prerequisite {
    /// Lock reason shown while the prerequisite is unmet.
    pub fn reason(&self) -> String {
        match self {
            Self::Module(id) => format!("Complete all items in module {id}"),
            Self::Exercise(id) => format!("Complete exercise {id}"),
            Self::Quiz { id, min_score } => format!("Score at least {min_score}% on quiz {id}"),
        }
    }

    /// Unknown modules count as unmet.
    pub fn is_met(&self, tree: &CourseTree, progress: &Progress) -> bool {
        match self {
            Self::Module(id) => tree
                .module(id)
                .is_some_and(|m| m.exercises().all(|n| progress.exercise_passed(&n.id))),
            Self::Exercise(id) => progress.exercise_passed(id),
            Self::Quiz { id, min_score } => progress
                .quizzes
                .get(id)
                .is_some_and(|q| q.passed && q.score >= *min_score),
        }
    }
}

pub fn parse_all<'a>(
    raw: impl IntoIterator<Item = &'a String>,
) -> Result<Vec<Prerequisite>, PrerequisiteParseError> {
    raw.into_iter().map(|s| s.parse()).collect()
}
