//! Key and fingerprint derivation.

use nimbus_core::{AssetType, Error, Result};
use sha2::{Digest, Sha256};

/// Content fingerprint: SHA-256 of the bytes, hex encoded.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// File key of a compiled text bundle, e.g. `js/compiled.abc123.js`.
pub fn text_key(asset_type: AssetType, fingerprint: &str) -> String {
    let ext = asset_type.extension();
    format!("{}/compiled.{}.{}", ext, fingerprint, ext)
}

/// File key of an image: the virtual path without leading separators.
pub fn image_key(virtual_path: &str) -> String {
    virtual_path.trim_start_matches('/').to_string()
}

/// Lock name for a file key, scoped to one distributor target.
///
/// Hashed so arbitrary keys map onto a filename-safe namespace.
pub fn lock_name(scope: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    hasher.update([0u8]);
    hasher.update(key.as_bytes());
    let hash = hasher.finalize();
    format!("cdn-{}", hex::encode(&hash[..16]))
}

/// Reject keys that cannot be stored or would escape the base path.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidKey("key is empty".into()));
    }
    if key.contains('\\') {
        return Err(Error::InvalidKey(format!("{} contains a backslash", key)));
    }
    if key.split('/').any(|segment| segment == "..") {
        return Err(Error::InvalidKey(format!("{} contains '..'", key)));
    }
    if key.chars().any(char::is_control) {
        return Err(Error::InvalidKey(format!("{:?} contains control characters", key)));
    }
    Ok(())
}

pub fn validate_fingerprint(fingerprint: &str) -> Result<()> {
    if fingerprint.trim().is_empty() {
        return Err(Error::InvalidKey("fingerprint is empty".into()));
    }
    Ok(())
}
