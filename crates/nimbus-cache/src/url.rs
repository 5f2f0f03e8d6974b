//! Public URL resolution.

use nimbus_core::{DistributorConfig, ObjectStore};
use std::sync::Arc;

/// Maps a file key to its remote object key and public URL.
///
/// Pure: the output depends only on configuration and the key.
#[derive(Clone)]
pub struct UrlResolver {
    bucket: String,
    base_path: String,
    origin: Origin,
}

#[derive(Clone)]
enum Origin {
    Domain(String),
    Store(Arc<dyn ObjectStore>),
}

impl UrlResolver {
    pub fn new(config: &DistributorConfig, store: Arc<dyn ObjectStore>) -> Self {
        let origin = match config.domain() {
            Some(domain) => Origin::Domain(domain.to_string()),
            None => Origin::Store(store),
        };
        Self {
            bucket: config.bucket().to_string(),
            base_path: config.base_path().to_string(),
            origin,
        }
    }

    /// Remote object key: base path + file key, never with a leading `/`.
    pub fn object_key(&self, key: &str) -> String {
        format!("{}{}", self.base_path, key.trim_start_matches('/'))
    }

    /// Public URL of a file key.
    pub fn resolve(&self, key: &str) -> String {
        let object_key = self.object_key(key);
        match &self.origin {
            Origin::Domain(domain) => format!("{}/{}", domain, object_key),
            Origin::Store(store) => store.public_url(&self.bucket, &object_key),
        }
    }
}

impl std::fmt::Debug for UrlResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let origin = match &self.origin {
            Origin::Domain(domain) => domain.as_str(),
            Origin::Store(store) => store.name(),
        };
        f.debug_struct("UrlResolver")
            .field("bucket", &self.bucket)
            .field("base_path", &self.base_path)
            .field("origin", &origin)
            .finish()
    }
}
