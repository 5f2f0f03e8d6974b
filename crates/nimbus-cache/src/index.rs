//! Cache index: file key -> last uploaded fingerprint, backed by a snapshot.
//!
//! The snapshot is a JSON document written atomically (temp file in the same
//! directory, fsync, rename) so readers never observe a partial write:
//!
//! ```json
//! { "version": 1, "written_at": "2024-05-01T12:00:00Z", "entries": { "js/compiled.ab.js": "ab" } }
//! ```
//!
//! An unversioned flat `{ key: fingerprint }` object is accepted on read.

use chrono::{DateTime, Utc};
use nimbus_core::{CorruptIndexPolicy, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Snapshot format version written by this crate.
pub const SNAPSHOT_VERSION: u32 = 1;

pub type Entries = BTreeMap<String, String>;

#[derive(Serialize)]
struct SnapshotDocument<'a> {
    version: u32,
    written_at: DateTime<Utc>,
    entries: &'a Entries,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredSnapshot {
    Versioned {
        version: u32,
        #[serde(default)]
        #[allow(dead_code)]
        written_at: Option<DateTime<Utc>>,
        entries: Entries,
    },
    Legacy(Entries),
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Reads and writes the snapshot file. Nothing else touches that path.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. `Ok(None)` when it does not exist.
    pub async fn read(&self) -> Result<Option<Entries>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        let stored: StoredSnapshot = serde_json::from_str(&contents)
            .map_err(|e| self.corrupt(format!("unparseable: {}", e)))?;

        match stored {
            StoredSnapshot::Versioned {
                version, entries, ..
            } => {
                if version > SNAPSHOT_VERSION {
                    return Err(self.corrupt(format!(
                        "unsupported snapshot version {} (newest known is {})",
                        version, SNAPSHOT_VERSION
                    )));
                }
                Ok(Some(entries))
            }
            StoredSnapshot::Legacy(entries) => {
                debug!(path = %self.path.display(), "Read unversioned cache index snapshot");
                Ok(Some(entries))
            }
        }
    }

    /// Replace the snapshot with `entries`, atomically with respect to readers.
    pub async fn write(&self, entries: &Entries) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let document = SnapshotDocument {
            version: SNAPSHOT_VERSION,
            written_at: Utc::now(),
            entries,
        };
        let serialized = serde_json::to_vec_pretty(&document)?;

        let temp_path = self.temp_path();
        if let Err(e) = write_synced(&temp_path, &serialized).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(path = %self.path.display(), entries = entries.len(), "Wrote cache index snapshot");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot".to_string());
        let unique = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.path
            .with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), unique))
    }

    fn corrupt(&self, reason: String) -> Error {
        Error::CorruptIndex {
            path: self.path.clone(),
            reason,
        }
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

/// In-memory cache index.
#[derive(Debug)]
pub struct CacheIndex {
    snapshot: SnapshotStore,
    entries: Entries,
    /// Keys this process has set; they win over the snapshot when merging.
    touched: HashSet<String>,
}

impl CacheIndex {
    /// An empty index that persists to `snapshot`.
    pub fn empty(snapshot: SnapshotStore) -> Self {
        Self {
            snapshot,
            entries: Entries::new(),
            touched: HashSet::new(),
        }
    }

    /// Load the index, applying `policy` if the snapshot is corrupt.
    pub async fn load(snapshot: SnapshotStore, policy: CorruptIndexPolicy) -> Result<Self> {
        let entries = match snapshot.read().await {
            Ok(Some(entries)) => entries,
            Ok(None) => Entries::new(),
            Err(e @ Error::CorruptIndex { .. }) => match policy {
                CorruptIndexPolicy::Fail => return Err(e),
                CorruptIndexPolicy::Reset => {
                    warn!(error = %e, "Ignoring corrupt cache index; starting empty");
                    Entries::new()
                }
            },
            Err(e) => return Err(e),
        };

        debug!(
            path = %snapshot.path().display(),
            entries = entries.len(),
            "Loaded cache index"
        );

        Ok(Self {
            snapshot,
            entries,
            touched: HashSet::new(),
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Whether `key` is recorded with exactly `fingerprint`.
    pub fn matches(&self, key: &str, fingerprint: &str) -> bool {
        self.get(key) == Some(fingerprint)
    }

    /// In-memory update. Call [`CacheIndex::persist`] afterwards.
    pub fn set(&mut self, key: impl Into<String>, fingerprint: impl Into<String>) {
        let key = key.into();
        self.touched.insert(key.clone());
        self.entries.insert(key, fingerprint.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by key.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn snapshot_path(&self) -> &Path {
        self.snapshot.path()
    }

    /// Re-read one key from the snapshot, adopting what another process wrote.
    ///
    /// Keys set by this process are left alone. A corrupt snapshot is ignored.
    pub async fn refresh_entry(&mut self, key: &str) -> Result<Option<String>> {
        if !self.touched.contains(key) {
            match self.snapshot.read().await {
                Ok(Some(mut on_disk)) => {
                    if let Some(fingerprint) = on_disk.remove(key) {
                        self.entries.insert(key.to_string(), fingerprint);
                    }
                }
                Ok(None) => {}
                Err(Error::CorruptIndex { reason, .. }) => {
                    debug!(key, reason = %reason, "Skipping refresh from corrupt snapshot");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(self.entries.get(key).cloned())
    }

    /// Write the full index to the snapshot.
    ///
    /// Entries another process added for keys this process never set are
    /// merged in first so concurrent writers do not erase each other.
    pub async fn persist(&mut self) -> Result<()> {
        match self.snapshot.read().await {
            Ok(Some(on_disk)) => {
                for (key, fingerprint) in on_disk {
                    if !self.touched.contains(&key) {
                        self.entries.insert(key, fingerprint);
                    }
                }
            }
            Ok(None) => {}
            Err(Error::CorruptIndex { reason, .. }) => {
                warn!(
                    path = %self.snapshot.path().display(),
                    reason = %reason,
                    "Overwriting corrupt cache index snapshot"
                );
            }
            Err(e) => return Err(e),
        }

        self.snapshot.write(&self.entries).await
    }
}
