//! Content-addressed asset distribution for Nimbus (S3 compatible).
//!
//! Compiled bundles and images are uploaded at most once per fingerprint and
//! served from stable public URLs. A JSON snapshot remembers what has been
//! uploaded, and advisory locks keep concurrent workers from uploading the
//! same object twice.

pub mod distributor;
pub mod index;
pub mod keys;
pub mod lock;
pub mod s3;
pub mod sniff;
pub mod store;
pub mod types;
pub mod url;

pub use distributor::Distributor;
pub use index::{CacheIndex, SnapshotStore};
pub use keys::{fingerprint, image_key, lock_name, text_key, validate_key};
pub use lock::{FileLockProvider, MemoryLockProvider};
pub use s3::S3ObjectStore;
pub use sniff::sniff_content_type;
pub use store::{FilesystemObjectStore, MemoryObjectStore};
pub use types::{CacheEntry, DistributorStats};
pub use url::UrlResolver;
