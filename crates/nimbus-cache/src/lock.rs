//! Advisory lock providers.
//!
//! Both providers are non-blocking: `try_acquire` either takes the lock or
//! reports that someone else holds it. `FileLockProvider` still performs
//! synchronous file I/O, so async callers run it on the blocking pool.

use fs2::FileExt;
use nimbus_core::{Error, LockProvider, LockToken, Result};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

/// Cross-process lock backed by `flock` on `<dir>/<name>.lock`.
///
/// The kernel drops the lock if the holder dies. A holder that is alive but
/// has kept the lock longer than `stale_after` is broken by unlinking the
/// lock file and locking a fresh one. Breakers serialize on `<name>.break`,
/// and a lock only counts if the locked file is still the one at the path,
/// so a process that opened the unlinked file cannot hold it too.
/// Lock files are never removed on release.
#[derive(Debug, Clone)]
pub struct FileLockProvider {
    dir: PathBuf,
    stale_after: Duration,
}

impl FileLockProvider {
    pub fn new(dir: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            dir: dir.into(),
            stale_after,
        }
    }

    pub fn lock_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", name))
    }

    fn break_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.break", name))
    }

    fn is_stale(&self, file: &File) -> bool {
        let Ok(modified) = file.metadata().and_then(|m| m.modified()) else {
            return false;
        };
        match SystemTime::now().duration_since(modified) {
            Ok(age) => age >= self.stale_after,
            Err(_) => false,
        }
    }

    fn break_stale(&self, name: &str, path: &Path) -> Result<Option<LockToken>> {
        let guard_path = self.break_path(name);
        let guard = open_lock_file(&guard_path)?;
        if !try_lock(&guard, &guard_path)? {
            debug!(lock = name, "Another process is breaking this lock");
            return Ok(None);
        }

        let result = self.break_while_guarded(name, path);
        if let Err(e) = FileExt::unlock(&guard) {
            debug!(error = %e, "Failed to unlock break guard");
        }
        result
    }

    /// Only breakers unlink lock files, so while the guard is held the file
    /// at `path` cannot be swapped underneath us.
    fn break_while_guarded(&self, name: &str, path: &Path) -> Result<Option<LockToken>> {
        let file = open_lock_file(path)?;
        if try_lock(&file, path)? {
            // The previous holder let go, or an earlier breaker finished.
            return lock_opened(name, file, path);
        }
        if !self.is_stale(&file) {
            return Ok(None);
        }

        warn!(
            lock = name,
            path = %path.display(),
            stale_after_secs = self.stale_after.as_secs(),
            "Breaking stale lock"
        );
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Lock(format!(
                    "Failed to break stale lock {}: {}",
                    path.display(),
                    e
                )));
            }
        }
        drop(file);

        let fresh = open_lock_file(path)?;
        if try_lock(&fresh, path)? {
            lock_opened(name, fresh, path)
        } else {
            Ok(None)
        }
    }
}

impl LockProvider for FileLockProvider {
    fn try_acquire(&self, name: &str) -> Result<Option<LockToken>> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Lock(format!(
                "Failed to create lock directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let path = self.lock_path(name);
        let file = open_lock_file(&path)?;
        if try_lock(&file, &path)? {
            return lock_opened(name, file, &path);
        }

        if !self.is_stale(&file) {
            debug!(lock = name, "Lock held elsewhere");
            return Ok(None);
        }
        drop(file);
        self.break_stale(name, &path)
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| Error::Lock(format!("Failed to open lock {}: {}", path.display(), e)))
}

fn try_lock(file: &File, path: &Path) -> Result<bool> {
    match file.try_lock_exclusive() {
        Ok(()) => Ok(true),
        Err(e) if is_contended(&e) => Ok(false),
        Err(e) => Err(Error::Lock(format!(
            "Failed to lock {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Turn a successfully flocked `file` into a token, unless a breaker has
/// already unlinked it. Dropping `file` releases the flock.
fn lock_opened(name: &str, file: File, path: &Path) -> Result<Option<LockToken>> {
    if !is_current(&file, path)? {
        debug!(lock = name, "Locked file was replaced by a breaker");
        return Ok(None);
    }
    stamp(&file);
    Ok(Some(file_token(name, file)))
}

#[cfg(unix)]
fn is_current(file: &File, path: &Path) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file
        .metadata()
        .map_err(|e| Error::Lock(format!("Failed to stat lock {}: {}", path.display(), e)))?;
    match fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::Lock(format!(
            "Failed to stat lock {}: {}",
            path.display(),
            e
        ))),
    }
}

// Open files cannot be unlinked here, so the path always names the held file.
#[cfg(not(unix))]
fn is_current(_file: &File, path: &Path) -> Result<bool> {
    Ok(path.exists())
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Record the holder and refresh the mtime used for staleness checks.
fn stamp(mut file: &File) {
    let holder = format!("{}\n{}\n", std::process::id(), chrono::Utc::now().to_rfc3339());
    let result = file
        .set_len(0)
        .and_then(|_| file.write_all(holder.as_bytes()))
        .and_then(|_| file.flush());
    if let Err(e) = result {
        debug!(error = %e, "Failed to stamp lock file");
    }
}

fn file_token(name: &str, file: File) -> LockToken {
    LockToken::new(name, move || {
        if let Err(e) = FileExt::unlock(&file) {
            debug!(error = %e, "Failed to unlock lock file");
        }
    })
}

/// In-process lock table for single-process deployments and tests.
#[derive(Debug, Clone)]
pub struct MemoryLockProvider {
    held: Arc<Mutex<HashMap<String, Holder>>>,
    next_id: Arc<AtomicU64>,
    stale_after: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Holder {
    id: u64,
    acquired_at: Instant,
}

impl MemoryLockProvider {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            held: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            stale_after,
        }
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held
            .lock()
            .map(|held| held.contains_key(name))
            .unwrap_or(false)
    }
}

impl Default for MemoryLockProvider {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl LockProvider for MemoryLockProvider {
    fn try_acquire(&self, name: &str) -> Result<Option<LockToken>> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| Error::Lock("lock table poisoned".into()))?;

        if let Some(holder) = held.get(name) {
            if holder.acquired_at.elapsed() < self.stale_after {
                return Ok(None);
            }
            warn!(lock = name, "Breaking stale lock");
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        held.insert(
            name.to_string(),
            Holder {
                id,
                acquired_at: Instant::now(),
            },
        );

        let table = Arc::clone(&self.held);
        let owned = name.to_string();
        Ok(Some(LockToken::new(name, move || {
            if let Ok(mut held) = table.lock() {
                // A broken lock may already belong to someone else.
                if held.get(&owned).is_some_and(|h| h.id == id) {
                    held.remove(&owned);
                }
            }
        })))
    }
}
