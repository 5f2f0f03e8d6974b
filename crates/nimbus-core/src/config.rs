//! Distributor configuration.
//!
//! [`DistributorSettings`] is the loosely typed shape read from files and the
//! environment. [`DistributorConfig::from_settings`] validates it once into an
//! immutable config; every later component trusts the result.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Raw distributor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributorSettings {
    /// Remote bucket name (required).
    pub bucket: Option<String>,
    /// Bucket region (required).
    pub region: Option<String>,
    /// Public origin URLs are built on, e.g. `https://cdn.example.com`.
    pub domain: Option<String>,
    /// Prefix under which every object is stored.
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// Location of the persisted cache index.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    /// Directory holding advisory lock files.
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,
    #[serde(default)]
    pub lock: LockSettings,
    #[serde(default)]
    pub on_corrupt_index: CorruptIndexPolicy,
    /// `Cache-Control` header attached to uploaded objects.
    pub cache_control: Option<String>,
    /// S3-compatible endpoint; enables path-style addressing.
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

fn default_base_path() -> String {
    "/".to_string()
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("cache/cdn-index.json")
}

fn default_lock_dir() -> PathBuf {
    PathBuf::from("cache/locks")
}

impl Default for DistributorSettings {
    fn default() -> Self {
        Self {
            bucket: None,
            region: None,
            domain: None,
            base_path: default_base_path(),
            snapshot_path: default_snapshot_path(),
            lock_dir: default_lock_dir(),
            lock: LockSettings::default(),
            on_corrupt_index: CorruptIndexPolicy::default(),
            cache_control: None,
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
        }
    }
}

impl DistributorSettings {
    /// Settings with the two required fields filled in.
    pub fn new(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: Some(bucket.into()),
            region: Some(region.into()),
            ..Default::default()
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Place the snapshot and lock directory under `dir`.
    pub fn with_state_dir(mut self, dir: &Path) -> Self {
        self.snapshot_path = dir.join("cdn-index.json");
        self.lock_dir = dir.join("locks");
        self
    }

    pub fn with_corrupt_index_policy(mut self, policy: CorruptIndexPolicy) -> Self {
        self.on_corrupt_index = policy;
        self
    }

    pub fn with_lock(mut self, lock: LockSettings) -> Self {
        self.lock = lock;
        self
    }
}

/// Lock acquisition tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSettings {
    /// Acquisition attempts before deferring to the holder.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Age after which a held lock is considered abandoned.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_attempts() -> u32 {
    1
}

fn default_retry_interval_ms() -> u64 {
    250
}

fn default_stale_after_secs() -> u64 {
    300
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            retry_interval_ms: default_retry_interval_ms(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

/// What to do when the snapshot exists but cannot be parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorruptIndexPolicy {
    /// Surface `Error::CorruptIndex` to the caller.
    #[default]
    Fail,
    /// Log and start from an empty index.
    Reset,
}

/// Static credentials passed through to the object store client.
#[derive(Clone, PartialEq, Eq)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Validated lock tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub attempts: u32,
    pub retry_interval: Duration,
    pub stale_after: Duration,
}

/// Validated, immutable distributor configuration.
#[derive(Debug, Clone)]
pub struct DistributorConfig {
    bucket: String,
    region: String,
    domain: Option<String>,
    base_path: String,
    snapshot_path: PathBuf,
    lock_dir: PathBuf,
    lock: LockPolicy,
    on_corrupt_index: CorruptIndexPolicy,
    cache_control: Option<String>,
    endpoint: Option<String>,
    credentials: Option<StaticCredentials>,
}

impl DistributorConfig {
    /// Validate settings. Missing required fields are fatal.
    pub fn from_settings(settings: DistributorSettings) -> Result<Self> {
        let bucket = required(settings.bucket, "bucket")?;
        let region = required(settings.region, "region")?;

        let domain = settings
            .domain
            .filter(|d| !d.trim().is_empty())
            .map(|d| parse_origin(&d, "domain"))
            .transpose()?;
        let endpoint = settings
            .endpoint
            .filter(|e| !e.trim().is_empty())
            .map(|e| parse_origin(&e, "endpoint"))
            .transpose()?;

        if settings.lock.attempts == 0 {
            return Err(Error::Configuration(
                "'lock.attempts' must be at least 1".into(),
            ));
        }
        if settings.lock.stale_after_secs == 0 {
            return Err(Error::Configuration(
                "'lock.stale_after_secs' must be at least 1".into(),
            ));
        }

        let credentials = match (settings.access_key_id, settings.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Some(StaticCredentials {
                access_key_id,
                secret_access_key,
                session_token: settings.session_token,
            }),
            (None, None) => None,
            _ => {
                return Err(Error::Configuration(
                    "'access_key_id' and 'secret_access_key' must be set together".into(),
                ));
            }
        };

        Ok(Self {
            bucket,
            region,
            domain,
            base_path: normalize_base_path(&settings.base_path),
            snapshot_path: settings.snapshot_path,
            lock_dir: settings.lock_dir,
            lock: LockPolicy {
                attempts: settings.lock.attempts,
                retry_interval: Duration::from_millis(settings.lock.retry_interval_ms),
                stale_after: Duration::from_secs(settings.lock.stale_after_secs),
            },
            on_corrupt_index: settings.on_corrupt_index,
            cache_control: settings.cache_control.filter(|c| !c.trim().is_empty()),
            endpoint,
            credentials,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Public origin without a trailing slash.
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Normalized prefix: empty, or segments ending in `/` with no leading `/`.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    pub fn lock(&self) -> LockPolicy {
        self.lock
    }

    pub fn on_corrupt_index(&self) -> CorruptIndexPolicy {
        self.on_corrupt_index
    }

    pub fn cache_control(&self) -> Option<&str> {
        self.cache_control.as_deref()
    }

    /// Custom endpoint without a trailing slash.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn credentials(&self) -> Option<&StaticCredentials> {
        self.credentials.as_ref()
    }
}

impl TryFrom<DistributorSettings> for DistributorConfig {
    type Error = Error;

    fn try_from(settings: DistributorSettings) -> Result<Self> {
        Self::from_settings(settings)
    }
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::Configuration(format!(
            "'{}' field was not defined in config",
            field
        ))),
    }
}

fn parse_origin(raw: &str, field: &str) -> Result<String> {
    let trimmed = raw.trim();
    let parsed = url::Url::parse(trimmed)
        .map_err(|e| Error::Configuration(format!("'{}' is not a valid URL: {}", field, e)))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::Configuration(format!(
                "'{}' must use http or https, got {}",
                field, other
            )));
        }
    }
    if parsed.host_str().is_none() {
        return Err(Error::Configuration(format!("'{}' has no host", field)));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

fn normalize_base_path(raw: &str) -> String {
    let segments: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        String::new()
    } else {
        format!("{}/", segments.join("/"))
    }
}
