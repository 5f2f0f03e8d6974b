//! Publish orchestrator.
//!
//! A publish call either finds the fingerprint already recorded for the key
//! (cache hit), uploads the content while holding the key's lock, or defers to
//! whoever holds that lock. The URL returned is the same in all three cases.

use crate::index::{CacheIndex, SnapshotStore};
use crate::keys::{fingerprint, image_key, lock_name, text_key, validate_fingerprint, validate_key};
use crate::lock::FileLockProvider;
use crate::s3::S3ObjectStore;
use crate::sniff::sniff_content_type;
use crate::types::{CacheEntry, DistributorStats};
use crate::url::UrlResolver;
use nimbus_core::{
    AssetType, Content, DistributorConfig, Error, LockProvider, LockToken, ObjectStore,
    Publication, PublishOutcome, PutObject, Result, Visibility,
};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    uploads: AtomicU64,
    deferred: AtomicU64,
    bytes_uploaded: AtomicU64,
}

/// Publishes artifacts to the object store and resolves their URLs.
pub struct Distributor {
    config: DistributorConfig,
    store: Arc<dyn ObjectStore>,
    locks: Arc<dyn LockProvider>,
    resolver: UrlResolver,
    index: OnceCell<Mutex<CacheIndex>>,
    counters: Counters,
}

impl Distributor {
    pub fn new(
        config: DistributorConfig,
        store: Arc<dyn ObjectStore>,
        locks: Arc<dyn LockProvider>,
    ) -> Self {
        let resolver = UrlResolver::new(&config, Arc::clone(&store));
        Self {
            config,
            store,
            locks,
            resolver,
            index: OnceCell::new(),
            counters: Counters::default(),
        }
    }

    /// Distributor using file locks under the configured lock directory.
    pub fn with_file_locks(config: DistributorConfig, store: Arc<dyn ObjectStore>) -> Self {
        let locks = FileLockProvider::new(config.lock_dir(), config.lock().stale_after);
        Self::new(config, store, Arc::new(locks))
    }

    /// Distributor backed by S3 and file locks.
    pub async fn s3(config: DistributorConfig) -> Self {
        let store = S3ObjectStore::from_config(&config).await;
        Self::with_file_locks(config, Arc::new(store))
    }

    pub fn config(&self) -> &DistributorConfig {
        &self.config
    }

    /// Public URL of a file key. Pure; never touches the index or the store.
    pub fn resolve_url(&self, key: &str) -> String {
        self.resolver.resolve(key)
    }

    /// Remote object key of a file key.
    pub fn object_key(&self, key: &str) -> String {
        self.resolver.object_key(key)
    }

    /// Publish a compiled script or stylesheet bundle.
    ///
    /// `supplier` is only called when an upload is actually attempted.
    pub async fn publish_text<F, Fut>(
        &self,
        asset_type: AssetType,
        fingerprint: &str,
        supplier: F,
    ) -> Result<String>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Content>> + Send,
    {
        Ok(self
            .publish_text_detailed(asset_type, fingerprint, supplier)
            .await?
            .url)
    }

    /// Like [`Distributor::publish_text`], reporting how the URL was obtained.
    pub async fn publish_text_detailed<F, Fut>(
        &self,
        asset_type: AssetType,
        fingerprint: &str,
        supplier: F,
    ) -> Result<Publication>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Content>> + Send,
    {
        validate_fingerprint(fingerprint)?;
        let key = text_key(asset_type, fingerprint);
        let supplier = move || async move {
            let mut content = supplier().await?;
            if content.content_type.is_none() {
                content.content_type = Some(asset_type.content_type().to_string());
            }
            Ok::<_, Error>(content)
        };
        self.publish(&key, fingerprint, supplier).await
    }

    /// Publish an image stored at `local_path` under `virtual_path`.
    ///
    /// The fingerprint is the digest of the file's bytes and the content type
    /// comes from its signature.
    pub async fn publish_image(
        &self,
        local_path: impl AsRef<Path>,
        virtual_path: &str,
    ) -> Result<String> {
        Ok(self
            .publish_image_detailed(local_path, virtual_path)
            .await?
            .url)
    }

    /// Like [`Distributor::publish_image`], reporting how the URL was obtained.
    pub async fn publish_image_detailed(
        &self,
        local_path: impl AsRef<Path>,
        virtual_path: &str,
    ) -> Result<Publication> {
        let local_path = local_path.as_ref();
        let bytes = tokio::fs::read(local_path).await.map_err(|e| {
            Error::ContentUnavailable(format!("{}: {}", local_path.display(), e))
        })?;

        let key = image_key(virtual_path);
        let digest = fingerprint(&bytes);
        let content_type = sniff_content_type(&bytes);
        let supplier = move || async move {
            Ok::<_, Error>(Content::new(bytes).with_content_type(content_type))
        };

        self.publish(&key, &digest, supplier).await
    }

    /// Publish `key` at `fingerprint`, uploading through `supplier` if needed.
    pub async fn publish<F, Fut>(
        &self,
        key: &str,
        fingerprint: &str,
        supplier: F,
    ) -> Result<Publication>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Content>> + Send,
    {
        let start = Instant::now();
        validate_key(key)?;
        validate_fingerprint(fingerprint)?;

        let index = self.index().await?;

        if index.lock().await.matches(key, fingerprint) {
            debug!(key, "Cache hit");
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(self.publication(key, fingerprint, PublishOutcome::CacheHit, start));
        }

        let Some(mut token) = self.acquire(key).await? else {
            debug!(key, "Upload in progress elsewhere; deferring");
            self.counters.deferred.fetch_add(1, Ordering::Relaxed);
            return Ok(self.publication(key, fingerprint, PublishOutcome::Deferred, start));
        };

        // Someone may have finished this upload between our lookup and the lock.
        {
            let mut index = index.lock().await;
            let already = index.matches(key, fingerprint)
                || index.refresh_entry(key).await?.as_deref() == Some(fingerprint);
            if already {
                token.release();
                debug!(key, "Uploaded by another caller");
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(self.publication(key, fingerprint, PublishOutcome::CacheHit, start));
            }
        }

        let content = supplier().await.map_err(|e| match e {
            Error::ContentUnavailable(_) => e,
            other => Error::ContentUnavailable(other.to_string()),
        })?;
        let size = content.bytes.len() as u64;
        let content_type = content
            .content_type
            .unwrap_or_else(|| sniff_content_type(&content.bytes).to_string());

        let object = PutObject {
            bucket: self.config.bucket().to_string(),
            key: self.resolver.object_key(key),
            body: content.bytes,
            content_type,
            visibility: Visibility::PublicRead,
            cache_control: self.config.cache_control().map(str::to_string),
        };
        let object_key = object.key.clone();

        self.store.put(object).await.map_err(|e| match e {
            Error::UploadFailed { .. } => e,
            other => Error::UploadFailed {
                key: object_key.clone(),
                reason: other.to_string(),
            },
        })?;

        self.counters.uploads.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_uploaded.fetch_add(size, Ordering::Relaxed);
        info!(
            key,
            object_key = %object_key,
            store = self.store.name(),
            size,
            "Uploaded asset"
        );

        self.record(key, fingerprint, &mut token).await?;
        Ok(self.publication(key, fingerprint, PublishOutcome::Uploaded, start))
    }

    /// Current fingerprint recorded for `key`.
    pub async fn fingerprint_of(&self, key: &str) -> Result<Option<String>> {
        let index = self.index().await?;
        Ok(index.lock().await.get(key).map(str::to_string))
    }

    /// All recorded entries, sorted by key.
    pub async fn entries(&self) -> Result<Vec<CacheEntry>> {
        let index = self.index().await?;
        Ok(index
            .lock()
            .await
            .entries()
            .map(|(key, fingerprint)| CacheEntry {
                key: key.to_string(),
                fingerprint: fingerprint.to_string(),
            })
            .collect())
    }

    pub fn stats(&self) -> DistributorStats {
        DistributorStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            uploads: self.counters.uploads.load(Ordering::Relaxed),
            deferred: self.counters.deferred.load(Ordering::Relaxed),
            bytes_uploaded: self.counters.bytes_uploaded.load(Ordering::Relaxed),
        }
    }

    async fn index(&self) -> Result<&Mutex<CacheIndex>> {
        self.index
            .get_or_try_init(|| async {
                let snapshot = SnapshotStore::new(self.config.snapshot_path());
                let index = CacheIndex::load(snapshot, self.config.on_corrupt_index()).await?;
                Ok::<_, Error>(Mutex::new(index))
            })
            .await
    }

    async fn acquire(&self, key: &str) -> Result<Option<LockToken>> {
        let name = lock_name(self.config.bucket(), &self.resolver.object_key(key));
        let policy = self.config.lock();

        for attempt in 1..=policy.attempts {
            // File locking is blocking I/O.
            let locks = Arc::clone(&self.locks);
            let lock = name.clone();
            let acquired = tokio::task::spawn_blocking(move || locks.try_acquire(&lock))
                .await
                .map_err(|e| Error::Lock(format!("Lock task failed: {}", e)))??;
            if let Some(token) = acquired {
                return Ok(Some(token));
            }
            if attempt < policy.attempts {
                tokio::time::sleep(policy.retry_interval).await;
            }
        }
        Ok(None)
    }

    /// Update and persist the index, then release the lock.
    async fn record(&self, key: &str, fingerprint: &str, token: &mut LockToken) -> Result<()> {
        let persisted = {
            let mut index = self.index().await?.lock().await;
            index.set(key, fingerprint);
            index.persist().await
        };
        token.release();

        persisted.map_err(|e| Error::PersistFailed {
            key: key.to_string(),
            url: self.resolver.resolve(key),
            reason: e.to_string(),
        })
    }

    fn publication(
        &self,
        key: &str,
        fingerprint: &str,
        outcome: PublishOutcome,
        start: Instant,
    ) -> Publication {
        Publication {
            key: key.to_string(),
            fingerprint: fingerprint.to_string(),
            url: self.resolver.resolve(key),
            outcome,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

impl std::fmt::Debug for Distributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Distributor")
            .field("bucket", &self.config.bucket())
            .field("store", &self.store.name())
            .field("resolver", &self.resolver)
            .field("index_loaded", &self.index.initialized())
            .finish()
    }
}
