//! Explicit engine context.

use crate::cache::CacheStore;
use crate::env;
use crate::error::Result;
use crate::remote::{DEFAULT_API_URL, HttpAuthority};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_AUTOSAVE_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Everything an operation needs to know about its environment. Built once by
/// the caller and passed in; nothing is read from process-wide state.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub cache_root: PathBuf,
    pub api_url: String,
    pub token: Option<String>,
    /// Refuse network access and rely on cached courses
    pub offline: bool,
    /// Unlock every exercise regardless of progression policy
    pub bypass: bool,
    pub autosave_debounce: Duration,
    /// Applied to verifier runs that do not set their own timeout
    pub run_timeout: Option<Duration>,
}

impl Default for EngineContext {
    fn default() -> Self {
        Self {
            cache_root: env::default_cache_root(),
            api_url: DEFAULT_API_URL.to_string(),
            token: None,
            offline: false,
            bypass: false,
            autosave_debounce: DEFAULT_AUTOSAVE_DEBOUNCE,
            run_timeout: None,
        }
    }
}

impl EngineContext {
    pub fn with_cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = cache_root.into();
        self
    }

    pub fn with_bypass(mut self, bypass: bool) -> Self {
        self.bypass = bypass;
        self
    }

    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn cache(&self) -> CacheStore {
        CacheStore::new(&self.cache_root)
    }

    /// HTTP authority configured from this context.
    pub fn http_authority(&self) -> Result<HttpAuthority> {
        HttpAuthority::new(&self.api_url, self.token.clone(), self.offline)
    }
}
