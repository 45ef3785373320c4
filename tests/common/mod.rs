//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use coursebox::EngineError;
use coursebox::remote::{Credentials, RegistryEntry, RemoteAuthority};
use coursebox::workspace::EngineContext;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use url::Url;

/// In-memory course backend.
#[derive(Default)]
pub struct FakeAuthority {
    pub registry: Mutex<BTreeMap<String, RegistryEntry>>,
    pub snapshots: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl FakeAuthority {
    pub fn with_alias(alias: &str, entry: RegistryEntry) -> Self {
        let authority = Self::default();
        authority
            .registry
            .lock()
            .unwrap()
            .insert(alias.to_string(), entry);
        authority
    }
}

#[async_trait]
impl RemoteAuthority for FakeAuthority {
    async fn resolve(&self, alias: &str) -> coursebox::Result<RegistryEntry> {
        self.registry
            .lock()
            .unwrap()
            .get(alias)
            .cloned()
            .ok_or_else(|| EngineError::SourceUnreachable(format!("unknown course '{alias}'")))
    }

    async fn download_archive(
        &self,
        course_id: &str,
        _version: Option<&str>,
    ) -> coursebox::Result<Vec<u8>> {
        Err(EngineError::SourceUnreachable(format!(
            "no archive for {course_id}"
        )))
    }

    async fn download_url(&self, url: &Url) -> coursebox::Result<Vec<u8>> {
        Err(EngineError::SourceUnreachable(url.to_string()))
    }

    async fn upload_progress(&self, course_id: &str, snapshot: Vec<u8>) -> coursebox::Result<()> {
        self.snapshots
            .lock()
            .unwrap()
            .insert(course_id.to_string(), snapshot);
        Ok(())
    }

    async fn download_progress(&self, course_id: &str) -> coursebox::Result<Option<Vec<u8>>> {
        Ok(self.snapshots.lock().unwrap().get(course_id).cloned())
    }

    async fn credentials(&self, _operation: &str) -> coursebox::Result<Credentials> {
        Ok(Credentials {
            token: "test-token".to_string(),
            expires_at: None,
        })
    }
}

pub fn authority() -> Arc<dyn RemoteAuthority> {
    Arc::new(FakeAuthority::default())
}

pub fn context(cache: &TempDir) -> EngineContext {
    EngineContext::default()
        .with_cache_root(cache.path())
        .with_offline(true)
}

pub fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

pub fn read(root: &Path, relative: &str) -> String {
    fs::read_to_string(root.join(relative)).unwrap()
}

/// Verifier: passes when the exercise file contains `PASS`.
const CHECK_SCRIPT: &str = r#"file="content/$1/$2.py"
if grep -q PASS "$file"; then
  echo "test $2 ... ok"
else
  echo "FAILED: $2 is not solved yet"
  exit 1
fi
"#;

/// Write a two-module sequential course with a shell verifier.
pub fn write_course(root: &Path, version: &str) {
    write(
        root,
        "course.json",
        &format!(
            r#"{{
  "id": "shell-basics",
  "name": "Shell Basics",
  "version": "{version}",
  "runner": {{
    "type": "process",
    "command": "sh",
    "args": ["check.sh", "{{{{module}}}}", "{{{{exercise}}}}"]
  }},
  "progression": {{ "mode": "sequential" }}
}}"#
        ),
    );
    write(root, "check.sh", CHECK_SCRIPT);
    write(root, "README.md", "# Shell Basics\n");
    write(root, "content/01_intro/01_hello.py", "# TODO\n");
    write(root, "content/01_intro/02_vars.py", "# TODO\n");
    write(root, "content/01_intro/README.md", "Intro module\n");
    write(root, "content/02_loops/01_for.py", "# TODO\n");
}
