//! Asset and publication types.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of compiled text bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Js,
    Css,
}

impl AssetType {
    /// File extension, also used as the key's directory.
    pub fn extension(&self) -> &'static str {
        match self {
            AssetType::Js => "js",
            AssetType::Css => "css",
        }
    }

    /// MIME type served for this bundle.
    pub fn content_type(&self) -> &'static str {
        match self {
            AssetType::Js => "application/javascript",
            AssetType::Css => "text/css",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for AssetType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "js" | "javascript" => Ok(AssetType::Js),
            "css" | "stylesheet" => Ok(AssetType::Css),
            other => Err(Error::UnknownAssetType(other.to_string())),
        }
    }
}

/// Bytes produced by a content supplier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub bytes: Vec<u8>,
    /// Overrides the content type the distributor would otherwise derive.
    pub content_type: Option<String>,
}

impl Content {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Object visibility on the remote store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    PublicRead,
    Private,
}

/// A single object write against the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObject {
    pub bucket: String,
    /// Remote object key (base path + file key).
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    pub visibility: Visibility,
    pub cache_control: Option<String>,
}

/// How a publish call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishOutcome {
    /// Fingerprint already recorded; nothing uploaded.
    CacheHit,
    /// This call held the lock and uploaded the object.
    Uploaded,
    /// Another caller holds the lock for this key; upload skipped.
    Deferred,
}

/// Result of a publish call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    /// Logical file key.
    pub key: String,
    pub fingerprint: String,
    pub url: String,
    pub outcome: PublishOutcome,
    pub duration_ms: u64,
}
