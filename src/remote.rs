//! Remote authority boundary.
//!
//! Everything the engine asks of the network goes through [`RemoteAuthority`]:
//! alias resolution, version lookups, archive downloads and progress
//! snapshots. [`HttpAuthority`] talks to the course backend; tests plug in an
//! in-memory implementation.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, multipart};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Default backend used when no configuration names one.
pub const DEFAULT_API_URL: &str = "https://api.coursebox.dev";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// One registry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Where the course content lives; absent when the registry serves the
    /// archive itself.
    #[serde(rename = "repo", default)]
    pub source: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    /// Sub-directory of the source holding the course
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    courses: BTreeMap<String, RegistryEntry>,
}

/// Short-lived credentials for one backend operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub token: String,
    #[serde(default, rename = "expiresAt")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Operations the engine needs from the course backend.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Look up a registry alias.
    async fn resolve(&self, alias: &str) -> Result<RegistryEntry>;

    /// Authoritative latest version of a registered course.
    async fn latest_version(&self, course_id: &str) -> Result<Option<String>> {
        Ok(self.resolve(course_id).await?.version)
    }

    /// Download a packed course archive, optionally at a specific version.
    async fn download_archive(&self, course_id: &str, version: Option<&str>) -> Result<Vec<u8>>;

    /// Fetch an arbitrary archive URL.
    async fn download_url(&self, url: &Url) -> Result<Vec<u8>>;

    async fn upload_progress(&self, course_id: &str, snapshot: Vec<u8>) -> Result<()>;

    /// Most recent progress snapshot, `None` when the backend has none.
    async fn download_progress(&self, course_id: &str) -> Result<Option<Vec<u8>>>;

    async fn credentials(&self, operation: &str) -> Result<Credentials>;
}

/// reqwest-backed authority.
#[derive(Debug, Clone)]
pub struct HttpAuthority {
    client: Client,
    base: Url,
    token: Option<String>,
    offline: bool,
}

impl HttpAuthority {
    /// Create an authority rooted at `api_url`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SourceUnreachable`] when the URL does not parse
    /// or the HTTP client cannot be built.
    pub fn new(api_url: &str, token: Option<String>, offline: bool) -> Result<Self> {
        let mut base = Url::parse(api_url)
            .map_err(|e| EngineError::SourceUnreachable(format!("invalid API URL {api_url}: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("coursebox/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EngineError::SourceUnreachable(format!("HTTP client setup failed: {e}")))?;
        Ok(Self {
            client,
            base,
            token,
            offline,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| EngineError::SourceUnreachable(format!("invalid endpoint {path}: {e}")))
    }

    fn ensure_online(&self, what: &str) -> Result<()> {
        if self.offline {
            return Err(EngineError::SourceUnreachable(format!(
                "offline mode: refusing to {what}"
            )));
        }
        Ok(())
    }

    fn require_token(&self) -> Result<&str> {
        self.token.as_deref().ok_or_else(|| {
            EngineError::SourceUnreachable("not logged in: no API token configured".to_string())
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_bytes(&self, url: Url) -> Result<Vec<u8>> {
        debug!("GET {}", url);
        let response = self
            .authorized(self.client.get(url.clone()))
            .send()
            .await
            .map_err(|e| unreachable_at(&url, e))?
            .error_for_status()
            .map_err(|e| unreachable_at(&url, e))?;
        let bytes = response.bytes().await.map_err(|e| unreachable_at(&url, e))?;
        Ok(bytes.to_vec())
    }
}

fn unreachable_at(url: &Url, err: reqwest::Error) -> EngineError {
    EngineError::SourceUnreachable(format!("{url}: {err}"))
}

#[async_trait]
impl RemoteAuthority for HttpAuthority {
    async fn resolve(&self, alias: &str) -> Result<RegistryEntry> {
        self.ensure_online("resolve registry aliases")?;
        let url = self.endpoint("registry")?;
        info!("Resolving alias '{}' via {}", alias, url);
        let body = self.get_bytes(url.clone()).await?;
        let document: RegistryDocument = serde_json::from_slice(&body).map_err(|e| {
            EngineError::SourceUnreachable(format!("malformed registry response from {url}: {e}"))
        })?;
        document.courses.get(alias).cloned().ok_or_else(|| {
            EngineError::SourceUnreachable(format!(
                "could not resolve course source for '{alias}': not a directory, URL or registered alias"
            ))
        })
    }

    async fn download_archive(&self, course_id: &str, version: Option<&str>) -> Result<Vec<u8>> {
        self.ensure_online("download courses")?;
        let mut url = self.endpoint(&format!("registry/{course_id}/download"))?;
        if let Some(version) = version {
            url.query_pairs_mut().append_pair("version", version);
        }
        self.get_bytes(url).await
    }

    async fn download_url(&self, url: &Url) -> Result<Vec<u8>> {
        self.ensure_online("download archives")?;
        self.get_bytes(url.clone()).await
    }

    async fn upload_progress(&self, course_id: &str, snapshot: Vec<u8>) -> Result<()> {
        self.ensure_online("upload progress")?;
        let token = self.require_token()?;
        let url = self.endpoint("progress/upload")?;
        let part = multipart::Part::bytes(snapshot)
            .file_name(crate::env::PROGRESS_ARCHIVE_NAME)
            .mime_str("application/zip")
            .map_err(|e| EngineError::SourceUnreachable(e.to_string()))?;
        let form = multipart::Form::new()
            .text("courseId", course_id.to_string())
            .part("file", part);

        info!("Uploading progress for {} to {}", course_id, url);
        self.client
            .post(url.clone())
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| unreachable_at(&url, e))?
            .error_for_status()
            .map_err(|e| unreachable_at(&url, e))?;
        Ok(())
    }

    async fn download_progress(&self, course_id: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_online("download progress")?;
        let token = self.require_token()?;
        let mut url = self.endpoint("progress/download")?;
        url.query_pairs_mut().append_pair("courseId", course_id);

        let response = self
            .client
            .get(url.clone())
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| unreachable_at(&url, e))?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("No remote progress for {}", course_id);
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| unreachable_at(&url, e))?;
        let bytes = response.bytes().await.map_err(|e| unreachable_at(&url, e))?;
        if bytes.is_empty() {
            warn!("Backend returned an empty progress snapshot for {}", course_id);
            return Ok(None);
        }
        Ok(Some(bytes.to_vec()))
    }

    async fn credentials(&self, operation: &str) -> Result<Credentials> {
        self.ensure_online("request credentials")?;
        self.require_token()?;
        let mut url = self.endpoint("auth/credentials")?;
        url.query_pairs_mut().append_pair("operation", operation);
        let body = self.get_bytes(url.clone()).await?;
        serde_json::from_slice(&body).map_err(|e| {
            EngineError::SourceUnreachable(format!("malformed credentials from {url}: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_document_parses_repo_as_source() {
        let json = r#"{"courses": {
            "rust": {"repo": "https://github.com/acme/rust-course.git", "branch": "main", "path": "course", "version": "1.2.0"},
            "go": {"version": "0.3.0"}
        }}"#;
        let document: RegistryDocument = serde_json::from_str(json).unwrap();

        let rust = &document.courses["rust"];
        assert_eq!(
            rust.source.as_deref(),
            Some("https://github.com/acme/rust-course.git")
        );
        assert_eq!(rust.path.as_deref(), Some("course"));
        assert_eq!(document.courses["go"].source, None);
        assert_eq!(document.courses["go"].version.as_deref(), Some("0.3.0"));
    }

    #[test]
    fn test_endpoints_keep_base_path() {
        let authority = HttpAuthority::new("https://example.com/api", None, false).unwrap();
        assert_eq!(
            authority.endpoint("registry").unwrap().as_str(),
            "https://example.com/api/registry"
        );
    }

    #[test]
    fn test_invalid_api_url_is_unreachable() {
        let err = HttpAuthority::new("not a url", None, false).unwrap_err();
        assert!(matches!(err, EngineError::SourceUnreachable(_)));
    }

    #[tokio::test]
    async fn test_offline_refuses_network() {
        let authority = HttpAuthority::new(DEFAULT_API_URL, Some("t".into()), true).unwrap();
        let err = authority.resolve("rust").await.unwrap_err();
        assert!(err.to_string().contains("offline"));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_progress_requires_token() {
        let authority = HttpAuthority::new(DEFAULT_API_URL, None, false).unwrap();
        let err = authority
            .upload_progress("rust", vec![1, 2, 3])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not logged in"));
    }
}

/// Authority that refuses every request, for tests that only use local sources.
#[cfg(test)]
pub(crate) struct NoRemote;

#[cfg(test)]
#[async_trait]
impl RemoteAuthority for NoRemote {
    async fn resolve(&self, alias: &str) -> Result<RegistryEntry> {
        Err(EngineError::SourceUnreachable(format!("no registry for {alias}")))
    }

    async fn download_archive(&self, course_id: &str, _version: Option<&str>) -> Result<Vec<u8>> {
        Err(EngineError::SourceUnreachable(format!("no archive for {course_id}")))
    }

    async fn download_url(&self, url: &Url) -> Result<Vec<u8>> {
        Err(EngineError::SourceUnreachable(url.to_string()))
    }

    async fn upload_progress(&self, _course_id: &str, _snapshot: Vec<u8>) -> Result<()> {
        Err(EngineError::SourceUnreachable("no backend".to_string()))
    }

    async fn download_progress(&self, _course_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn credentials(&self, _operation: &str) -> Result<Credentials> {
        Err(EngineError::SourceUnreachable("no backend".to_string()))
    }
}
