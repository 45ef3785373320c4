//! Course description: the instructor-authored manifest and the exercise tree
//! discovered from the content directory.

pub mod manifest;
pub mod tree;

pub use manifest::{
    ContentLayout, CourseManifest, ExerciseMeta, ProgressionPolicy, ProgressionSpec,
    RunnerDescriptor, SetupCheck, SetupSpec,
};
pub use tree::{CourseTree, ExerciseNode, ModuleNode, NodeKind};
