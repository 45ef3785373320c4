//! # Coursebox
//!
//! A local content-delivery and execution engine for course-based coding
//! trainers. Courses are fetched from a directory, a packed `.course` file, a
//! URL, a git remote or a registry alias, cached per course id, and layered
//! into a student workspace without ever clobbering student code. Exercises
//! run inside a sandbox (host process or container) and their output is
//! normalized into a structured verdict that drives progression.
//!
//! ## Architecture Overview
//!
//! - **[`archive`]**: `.course` container codec (pack, unpack, sync)
//! - **[`source`]** / **[`remote`]**: locating, resolving and downloading courses
//! - **[`cache`]**: versioned per-course cache with atomic staging
//! - **[`layering`]**: copy-if-absent provisioning that preserves student code
//! - **[`update`]**: version checks, content diffs and forced upgrades
//! - **[`course`]** / **[`progression`]**: course manifest, exercise tree, locks and XP
//! - **[`sandbox`]** / **[`verdict`]**: verifier execution and output normalization
//! - **[`workspace`]**: one student workspace tying the engine together
//! - **[`watcher`]**: debounced autosave of an unpacked course file
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use coursebox::sandbox::RunControl;
//! use coursebox::workspace::{EngineContext, Workspace};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ctx = EngineContext::default();
//!     let authority = Arc::new(ctx.http_authority()?);
//!     let (workspace, report) =
//!         Workspace::init(ctx, authority, "./rust-course", "./my-work").await?;
//!     println!("Provisioned {} {}", report.course_id, report.version);
//!
//!     let run = workspace
//!         .run_exercise("01_intro/01_hello", RunControl::new())
//!         .await?;
//!     println!("{}", run.verdict.display_text());
//!     Ok(())
//! }
//! ```

/// Environment constants and path utilities.
///
/// Centralizes the file names and directory layout shared by the workspace,
/// the cache and the configuration discovery.
pub mod env;

/// Engine error taxonomy.
pub mod error;

/// Course container codec.
pub mod archive;

/// Course source locators and materialization.
pub mod source;

/// Course authority: registry, downloads, credentials and cloud progress.
pub mod remote;

/// Per-course cache store.
pub mod cache;

/// Layering engine.
///
/// Copies official course files into a workspace, keeping student code and
/// anything the student changed.
pub mod layering;

/// Update detection, diffing and application.
pub mod update;

/// Workspace project file (`coursebox.toml`).
pub mod project;

/// Course manifest and exercise tree.
pub mod course;

/// Progression policy, lock computation and the progress store.
pub mod progression;

/// Sandboxed verifier execution.
pub mod sandbox;

/// Verifier output normalization.
pub mod verdict;

/// Debounced autosave for unpacked course files.
pub mod watcher;

/// Student workspace orchestration.
pub mod workspace;

// CLI module for command-line interface
pub mod cli;

pub use error::{EngineError, Result};
pub use workspace::{EngineContext, Workspace};
