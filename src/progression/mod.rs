//! # Progression
//!
//! Recorded results, XP and streak bookkeeping, and the lock state machine.
//!
//! - **[`Progress`]**: persisted exercise and quiz results for one workspace
//! - **[`Prerequisite`]**: typed `module_`, `exercise:` and `quiz:` expressions
//! - **[`compute_outline`]**: derives a [`ManifestEntry`] per node from the tree,
//!   the results, the course policy and the bypass flag
//!
//! Under the `sequential` policy a node is open when it is the first node,
//! already passed, or directly follows a passed node. Prerequisites then
//! narrow the nodes the sequential rule opened. `open` and bypass unlock
//! everything.

pub mod engine;
pub mod prerequisite;
pub mod progress;

pub use engine::{ManifestEntry, Outline, PREVIOUS_LESSON_REASON, compute_outline};
pub use prerequisite::Prerequisite;
pub use progress::{
    DEFAULT_EXERCISE_XP, ExerciseResult, Progress, QuizResult, RecordOutcome, ResultStatus, Stats,
};
