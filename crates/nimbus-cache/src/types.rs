//! Cache types.

use serde::{Deserialize, Serialize};

/// A recorded upload: the fingerprint last confirmed for a file key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Logical file key.
    pub key: String,
    /// Content fingerprint.
    pub fingerprint: String,
}

/// Publish counters for one distributor instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DistributorStats {
    pub hits: u64,
    pub uploads: u64,
    pub deferred: u64,
    pub bytes_uploaded: u64,
}
