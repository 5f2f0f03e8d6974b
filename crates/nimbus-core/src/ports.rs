//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the publish orchestrator and
//! external adapters.

use crate::Result;
use crate::asset::PutObject;
use async_trait::async_trait;
use std::fmt;

/// Remote object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object, overwriting any previous version.
    async fn put(&self, object: PutObject) -> Result<()>;

    /// Public URL of an object. Must be deterministic and perform no I/O.
    fn public_url(&self, bucket: &str, key: &str) -> String;

    /// Store name for logging.
    fn name(&self) -> &str;
}

/// Advisory, non-blocking mutual exclusion keyed by name.
pub trait LockProvider: Send + Sync {
    /// Try to take the lock once.
    ///
    /// `Ok(None)` means another holder has it; that is expected control flow,
    /// not an error.
    fn try_acquire(&self, name: &str) -> Result<Option<LockToken>>;
}

type ReleaseFn = Box<dyn FnOnce() + Send + Sync>;

/// Held lock. Released by [`LockToken::release`] or on drop.
pub struct LockToken {
    name: String,
    release: Option<ReleaseFn>,
}

impl LockToken {
    /// Create a token that runs `release` exactly once.
    pub fn new(name: impl Into<String>, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_held(&self) -> bool {
        self.release.is_some()
    }

    /// Release the lock. Calling this more than once is a no-op.
    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockToken")
            .field("name", &self.name)
            .field("held", &self.is_held())
            .finish()
    }
}
