//! Local object store implementations.

use async_trait::async_trait;
use nimbus_core::{Error, ObjectStore, PutObject, Result};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Filesystem-based object store for local development.
///
/// Objects land at `<root>/<bucket>/<key>`.
pub struct FilesystemObjectStore {
    root_dir: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.root_dir.join(bucket);
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn put(&self, object: PutObject) -> Result<()> {
        let path = self.object_path(&object.bucket, &object.key);
        let upload_failed = |e: std::io::Error| Error::UploadFailed {
            key: object.key.clone(),
            reason: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(upload_failed)?;
        }
        tokio::fs::write(&path, &object.body)
            .await
            .map_err(upload_failed)?;

        debug!(path = %path.display(), size = object.body.len(), "Wrote object");
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("file://{}", self.object_path(bucket, key).display())
    }

    fn name(&self) -> &str {
        "filesystem"
    }
}

/// In-memory object store that records every put.
#[derive(Default)]
pub struct MemoryObjectStore {
    puts: Mutex<Vec<PutObject>>,
    failure: Mutex<Option<String>>,
    latency: Duration,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every put, to widen race windows in tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make subsequent puts fail with `reason`, or succeed again with `None`.
    pub fn set_failure(&self, reason: Option<&str>) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = reason.map(str::to_string);
        }
    }

    /// Every successful put, in order.
    pub fn puts(&self) -> Vec<PutObject> {
        self.puts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn put_count(&self) -> usize {
        self.puts.lock().map(|p| p.len()).unwrap_or_default()
    }

    /// Latest object written under `key`.
    pub fn get(&self, bucket: &str, key: &str) -> Option<PutObject> {
        self.puts
            .lock()
            .ok()?
            .iter()
            .rev()
            .find(|p| p.bucket == bucket && p.key == key)
            .cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, object: PutObject) -> Result<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let failure = self
            .failure
            .lock()
            .map_err(|_| Error::Internal("memory store poisoned".into()))?
            .clone();
        if let Some(reason) = failure {
            return Err(Error::UploadFailed {
                key: object.key,
                reason,
            });
        }

        self.puts
            .lock()
            .map_err(|_| Error::Internal("memory store poisoned".into()))?
            .push(object);
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("memory://{}/{}", bucket, key)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
