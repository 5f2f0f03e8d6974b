//! Error types for Nimbus.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Construction errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown asset type: {0}")]
    UnknownAssetType(String),

    // Index errors
    #[error("Cache index at {} is corrupt: {reason}", path.display())]
    CorruptIndex { path: PathBuf, reason: String },

    // Publish errors
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Content unavailable: {0}")]
    ContentUnavailable(String),

    #[error("Upload of {key} failed: {reason}")]
    UploadFailed { key: String, reason: String },

    /// The object was uploaded but the snapshot could not be written.
    /// `url` is valid and may be served.
    #[error("Uploaded {key} but failed to persist the cache index: {reason}")]
    PersistFailed {
        key: String,
        url: String,
        reason: String,
    },

    // Infrastructure errors
    #[error("Lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl Error {
    /// Whether the remote object was written even though the call failed.
    pub fn object_was_uploaded(&self) -> bool {
        matches!(self, Error::PersistFailed { .. })
    }
}
