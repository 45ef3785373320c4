//! Command line argument parsing
//!
//! This module handles CLI argument parsing with subcommands:
//! - `init`: Provision a workspace from a course source
//! - `start`: Refresh the workspace, or open a `.course` file with autosave
//! - `pack`: Validate a course directory and pack it into a `.course` file
//! - `reset`: Restore one file from the official course
//! - `check-update` / `upgrade`: Detect and apply new course versions
//! - `run`: Run the verifier for one exercise
//! - `status`: Show exercises, lock state and stats
//! - `sync` / `restore`: Push or pull a cloud progress snapshot
//! - `setup`: Run the course's environment checks
//! - `show-config`: Show configuration discovery information

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    Init { course: String },
    Start { file: Option<PathBuf> },
    Pack { course_dir: PathBuf, output: Option<PathBuf> },
    Reset { path: PathBuf },
    CheckUpdate,
    Upgrade { assume_yes: bool },
    Run { exercise: String, timeout: Option<Duration> },
    Status,
    Sync,
    Restore,
    Setup,
    ShowConfig,
}

/// Options shared by every subcommand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalOptions {
    pub workspace: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub verbose: bool,
    pub offline: bool,
    pub bypass: bool,
}

#[derive(Debug, Parser)]
#[command(name = "coursebox")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Local engine for course-based coding exercises")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Workspace directory (defaults to the current directory)
    #[arg(short = 'w', long = "workspace", global = true)]
    pub workspace: Option<PathBuf>,

    /// Configuration file path
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Never touch the network; use cached courses only
    #[arg(long = "offline", global = true)]
    pub offline: bool,

    /// Unlock every exercise (instructor preview)
    #[arg(long = "bypass", global = true)]
    pub bypass: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Provision a workspace from a directory, archive, URL, git remote or alias
    Init {
        /// Course source
        course: String,
    },
    /// Refresh the workspace, or open a .course file and autosave it
    Start {
        /// Packed course to work in
        file: Option<PathBuf>,
    },
    /// Validate a course directory and pack it
    Pack {
        /// Course directory (defaults to the current directory)
        #[arg(default_value = ".")]
        course_dir: PathBuf,
        /// Output file (defaults to <course id>.course)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    /// Restore a file from the official course
    Reset {
        /// File to restore, relative to the workspace
        path: PathBuf,
    },
    /// Check whether a newer course version is available
    CheckUpdate,
    /// Show the changes in the latest version and apply them
    Upgrade {
        /// Apply without asking for confirmation
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },
    /// Run the verifier for an exercise
    Run {
        /// Exercise id, e.g. 01_intro/01_hello
        exercise: String,
        /// Abort the verifier after this many seconds
        #[arg(long = "timeout", value_name = "SECS")]
        timeout: Option<u64>,
    },
    /// Show exercises, lock state and progress
    Status,
    /// Upload a progress snapshot
    Sync,
    /// Download the latest progress snapshot into the workspace
    Restore,
    /// Run the course's environment checks
    Setup,
    /// Show configuration discovery information
    ShowConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn global_options(&self) -> GlobalOptions {
        GlobalOptions {
            workspace: self.workspace.clone(),
            config: self.config.clone(),
            verbose: self.verbose,
            offline: self.offline,
            bypass: self.bypass,
        }
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Init { course }) => {
                if course.trim().is_empty() {
                    return Err("A course source is required".to_string());
                }
                Ok(ExecutionMode::Init {
                    course: course.clone(),
                })
            }
            Some(Commands::Start { file }) => Ok(ExecutionMode::Start { file: file.clone() }),
            Some(Commands::Pack { course_dir, output }) => Ok(ExecutionMode::Pack {
                course_dir: course_dir.clone(),
                output: output.clone(),
            }),
            Some(Commands::Reset { path }) => Ok(ExecutionMode::Reset { path: path.clone() }),
            Some(Commands::CheckUpdate) => Ok(ExecutionMode::CheckUpdate),
            Some(Commands::Upgrade { yes }) => Ok(ExecutionMode::Upgrade { assume_yes: *yes }),
            Some(Commands::Run { exercise, timeout }) => {
                if timeout == &Some(0) {
                    return Err("--timeout must be greater than zero".to_string());
                }
                Ok(ExecutionMode::Run {
                    exercise: exercise.clone(),
                    timeout: timeout.map(Duration::from_secs),
                })
            }
            Some(Commands::Status) => Ok(ExecutionMode::Status),
            Some(Commands::Sync) => Ok(ExecutionMode::Sync),
            Some(Commands::Restore) => Ok(ExecutionMode::Restore),
            Some(Commands::Setup) => Ok(ExecutionMode::Setup),
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            None => Err(
                "No command specified. Use 'coursebox --help' to see available commands."
                    .to_string(),
            ),
        }
    }
}
