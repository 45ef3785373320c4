//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Current directory: ./coursebox.config.toml or ./.coursebox/config.toml
//! 2. User config: ~/.coursebox/config.toml
//! 3. System config: /etc/coursebox/config.toml
//! 4. Built-in defaults
//!
//! `COURSEBOX_*` environment variables override whatever the file says.

use crate::env;
use crate::workspace::EngineContext;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Local configuration file name checked in the current directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "coursebox.config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub api_url: Option<String>,
    pub cache_root: Option<PathBuf>,
    pub offline: bool,
    pub bypass: bool,
    pub token: Option<String>,
    pub autosave_debounce_ms: Option<u64>,
    pub run_timeout_secs: Option<u64>,
}

impl EngineConfig {
    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("failed to write {}", path.as_ref().display()))?;
        Ok(())
    }

    /// Apply `COURSEBOX_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("COURSEBOX_API_URL").filter(|v| !v.is_empty()) {
            self.api_url = Some(url);
        }
        if let Some(dir) = lookup("COURSEBOX_CACHE_DIR").filter(|v| !v.is_empty()) {
            self.cache_root = Some(PathBuf::from(dir));
        }
        if let Some(token) = lookup("COURSEBOX_TOKEN").filter(|v| !v.is_empty()) {
            self.token = Some(token);
        }
        if let Some(value) = lookup("COURSEBOX_OFFLINE") {
            match parse_flag(&value) {
                Some(flag) => self.offline = flag,
                None => warn!("Ignoring COURSEBOX_OFFLINE={:?}", value),
            }
        }
        if let Some(value) = lookup("COURSEBOX_BYPASS") {
            match parse_flag(&value) {
                Some(flag) => self.bypass = flag,
                None => warn!("Ignoring COURSEBOX_BYPASS={:?}", value),
            }
        }
    }

    /// Convert into the context passed to engine operations
    pub fn to_context(&self) -> EngineContext {
        let defaults = EngineContext::default();
        EngineContext {
            cache_root: self.cache_root.clone().unwrap_or(defaults.cache_root),
            api_url: self.api_url.clone().unwrap_or(defaults.api_url),
            token: self.token.clone(),
            offline: self.offline,
            bypass: self.bypass,
            autosave_debounce: self
                .autosave_debounce_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.autosave_debounce),
            run_timeout: self.run_timeout_secs.map(Duration::from_secs),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Discover and load configuration using the hierarchy, then apply
    /// environment overrides
    pub fn discover_config() -> anyhow::Result<EngineConfig> {
        let mut config = match Self::find_config_file() {
            Some(config_path) => {
                info!("Loading configuration from: {:?}", config_path);
                EngineConfig::from_toml_file(config_path)?
            }
            None => {
                debug!("No configuration file found, using defaults");
                EngineConfig::default()
            }
        };
        config.apply_env_overrides(|key| std_env::var(key).ok());
        Ok(config)
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        let current_dir = std_env::current_dir().ok();
        let home_dir = dirs::home_dir();
        Self::first_existing(&Self::config_candidates(
            current_dir.as_deref(),
            home_dir.as_deref(),
        ))
    }

    fn first_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
        for candidate in candidates {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                debug!("Found config file: {:?}", candidate);
                return Some(candidate.clone());
            }
        }

        debug!("No config file found in discovery hierarchy");
        None
    }

    /// List of configuration file candidates in priority order
    pub fn config_candidates(current_dir: Option<&Path>, home_dir: Option<&Path>) -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Some(current_dir) = current_dir {
            candidates.push(current_dir.join(LOCAL_CONFIG_FILE_NAME));
            candidates.push(env::local_config_file_path(current_dir));
        }

        if let Some(home_dir) = home_dir {
            candidates.push(env::user_config_file_path(home_dir));
        }

        #[cfg(unix)]
        candidates.push(PathBuf::from("/etc/coursebox/config.toml"));

        #[cfg(windows)]
        if let Ok(program_data) = std_env::var("PROGRAMDATA") {
            candidates.push(
                PathBuf::from(program_data)
                    .join("coursebox")
                    .join(env::CONFIG_FILE_NAME),
            );
        }

        candidates
    }

    /// Create a default config file in the user's home directory
    pub fn create_default_user_config() -> anyhow::Result<PathBuf> {
        let home_dir = dirs::home_dir().context("Could not determine home directory")?;

        let config_dir = env::user_config_dir_path(&home_dir);
        let config_path = env::user_config_file_path(&home_dir);

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)?;
            info!("Created configuration directory: {:?}", config_dir);
        }

        if !config_path.exists() {
            EngineConfig::default().to_toml_file(&config_path)?;
            info!("Created default configuration file: {:?}", config_path);
        } else {
            warn!("Configuration file already exists: {:?}", config_path);
        }

        Ok(config_path)
    }

    /// Show configuration discovery information for debugging
    pub fn show_discovery_info() {
        println!("Configuration Discovery Hierarchy:");
        println!();

        let current_dir = std_env::current_dir().ok();
        let home_dir = dirs::home_dir();
        let candidates = Self::config_candidates(current_dir.as_deref(), home_dir.as_deref());
        for (i, candidate) in candidates.iter().enumerate() {
            let status = if candidate.exists() {
                if candidate.is_file() {
                    "✓ EXISTS"
                } else {
                    "✗ NOT A FILE"
                }
            } else {
                "✗ NOT FOUND"
            };

            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        match Self::first_existing(&candidates) {
            Some(found) => println!("Active configuration: {:?}", found),
            None => println!("Active configuration: Built-in defaults"),
        }

        match Self::discover_config() {
            Ok(config) => {
                let ctx = config.to_context();
                println!();
                println!("Effective settings:");
                println!("  api_url:    {}", ctx.api_url);
                println!("  cache_root: {:?}", ctx.cache_root);
                println!("  offline:    {}", ctx.offline);
                println!("  bypass:     {}", ctx.bypass);
                println!(
                    "  token:      {}",
                    if ctx.token.is_some() { "set" } else { "not set" }
                );
            }
            Err(e) => println!("Configuration error: {:#}", e),
        }
    }
}
