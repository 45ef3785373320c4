//! CLI-specific functionality for coursebox
//!
//! This module contains all CLI-related code including argument parsing,
//! configuration discovery and the subcommand handlers.

pub mod args;
pub mod commands;
pub mod config;

pub use args::{Args, ExecutionMode, GlobalOptions};
pub use commands::{execute, load_context};
pub use config::{ConfigDiscovery, EngineConfig};
