//! End-to-end publish behaviour against in-memory and filesystem stores.

use nimbus_cache::{
    Distributor, FilesystemObjectStore, MemoryLockProvider, MemoryObjectStore, fingerprint,
};
use nimbus_core::{
    AssetType, Content, CorruptIndexPolicy, DistributorConfig, DistributorSettings, Error,
    LockSettings, PublishOutcome, Visibility,
};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];

fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,nimbus_cache=debug")),
        )
        .with_test_writer()
        .try_init();
}

fn settings(state_dir: &Path) -> DistributorSettings {
    DistributorSettings::new("b", "us-east-1")
        .with_domain("https://cdn.example.com")
        .with_base_path("/assets/")
        .with_state_dir(state_dir)
}

fn config(settings: DistributorSettings) -> DistributorConfig {
    DistributorConfig::from_settings(settings).unwrap()
}

fn memory_distributor(state_dir: &Path, store: Arc<MemoryObjectStore>) -> Distributor {
    Distributor::new(
        config(settings(state_dir)),
        store,
        Arc::new(MemoryLockProvider::default()),
    )
}

async fn publish_js(distributor: &Distributor, fp: &str, body: &'static str) -> String {
    distributor
        .publish_text(AssetType::Js, fp, move || async move { Ok(Content::new(body)) })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_worked_example() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let distributor = memory_distributor(dir.path(), store.clone());

    let url = publish_js(&distributor, "abc123", "console.log(1)").await;

    assert_eq!(url, "https://cdn.example.com/assets/js/compiled.abc123.js");
    let puts = store.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].bucket, "b");
    assert_eq!(puts[0].key, "assets/js/compiled.abc123.js");
    assert_eq!(puts[0].content_type, "application/javascript");
    assert_eq!(puts[0].visibility, Visibility::PublicRead);
    assert_eq!(puts[0].body, b"console.log(1)");
    assert_eq!(
        distributor
            .fingerprint_of("js/compiled.abc123.js")
            .await
            .unwrap(),
        Some("abc123".to_string())
    );

    let again = publish_js(&distributor, "abc123", "console.log(1)").await;
    assert_eq!(again, url);
    assert_eq!(store.put_count(), 1);
}

#[tokio::test]
async fn test_publish_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let distributor = memory_distributor(dir.path(), store.clone());

    let first = publish_js(&distributor, "abc123", "a()").await;
    let second = publish_js(&distributor, "abc123", "a()").await;

    assert_eq!(first, second);
    assert_eq!(store.put_count(), 1);
    assert_eq!(distributor.stats().hits, 1);
}

#[tokio::test]
async fn test_new_fingerprint_uploads_new_object() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let distributor = memory_distributor(dir.path(), store.clone());

    let old = publish_js(&distributor, "aaa", "a()").await;
    let new = publish_js(&distributor, "bbb", "b()").await;

    assert_ne!(old, new);
    assert_eq!(store.put_count(), 2);
    assert_eq!(distributor.entries().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_index_survives_restart() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryObjectStore::new());

    let url = publish_js(&memory_distributor(dir.path(), store.clone()), "abc", "a()").await;

    let restarted = memory_distributor(dir.path(), store.clone());
    let publication = restarted
        .publish("js/compiled.abc.js", "abc", || async { Ok(Content::new("a()")) })
        .await
        .unwrap();

    assert_eq!(publication.outcome, PublishOutcome::CacheHit);
    assert_eq!(publication.url, url);
    assert_eq!(store.put_count(), 1);
}

#[tokio::test]
async fn test_resolve_url_is_stable() {
    let dir = TempDir::new().unwrap();
    let distributor = memory_distributor(dir.path(), Arc::new(MemoryObjectStore::new()));

    let before = distributor.resolve_url("images/logo.png");
    let published = distributor
        .publish("images/logo.png", "f00", || async { Ok(Content::new(PNG)) })
        .await
        .unwrap();

    assert_eq!(before, "https://cdn.example.com/assets/images/logo.png");
    assert_eq!(published.url, before);
    assert_eq!(distributor.resolve_url("images/logo.png"), before);
}

#[tokio::test]
async fn test_store_url_without_domain() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let distributor = Distributor::new(
        config(DistributorSettings::new("b", "us-east-1").with_state_dir(dir.path())),
        store,
        Arc::new(MemoryLockProvider::default()),
    );

    let url = publish_js(&distributor, "abc", "a()").await;
    assert_eq!(url, "memory://b/js/compiled.abc.js");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_publish_uploads_once() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryObjectStore::new().with_latency(Duration::from_millis(50)));
    let distributor = Arc::new(memory_distributor(dir.path(), store.clone()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let distributor = distributor.clone();
        handles.push(tokio::spawn(async move {
            distributor
                .publish("js/compiled.abc.js", "abc", || async { Ok(Content::new("a()")) })
                .await
        }));
    }

    let mut outcomes = Vec::new();
    for handle in handles {
        let publication = handle.await.unwrap().unwrap();
        assert_eq!(publication.url, "https://cdn.example.com/assets/js/compiled.abc.js");
        outcomes.push(publication.outcome);
    }

    assert_eq!(store.put_count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == PublishOutcome::Uploaded)
            .count(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_instances_share_state_dir() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryObjectStore::new().with_latency(Duration::from_millis(50)));

    // Two distributors with separate in-memory indexes, as two workers would have.
    let a = Arc::new(Distributor::with_file_locks(
        config(settings(dir.path())),
        store.clone(),
    ));
    let b = Arc::new(Distributor::with_file_locks(
        config(settings(dir.path())),
        store.clone(),
    ));

    let mut handles = Vec::new();
    for distributor in [a.clone(), b.clone(), a.clone(), b.clone()] {
        handles.push(tokio::spawn(async move { publish_logo(&distributor).await }));
    }

    let mut urls = Vec::new();
    for handle in handles {
        urls.push(handle.await.unwrap());
    }
    urls.dedup();

    assert_eq!(urls, vec!["https://cdn.example.com/assets/images/logo.png".to_string()]);
    assert_eq!(store.put_count(), 1);

    // Whoever did not upload can still confirm the entry from the snapshot.
    let on_disk = memory_distributor(dir.path(), store.clone());
    assert_eq!(
        on_disk.fingerprint_of("images/logo.png").await.unwrap(),
        Some(fingerprint(PNG))
    );
}

async fn publish_logo(distributor: &Distributor) -> String {
    distributor
        .publish("images/logo.png", &fingerprint(PNG), || async {
            Ok(Content::new(PNG).with_content_type("image/png"))
        })
        .await
        .unwrap()
        .url
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lock_retry_turns_wait_into_hit() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryObjectStore::new().with_latency(Duration::from_millis(30)));
    let distributor = Arc::new(Distributor::new(
        config(settings(dir.path()).with_lock(LockSettings {
            attempts: 20,
            retry_interval_ms: 25,
            stale_after_secs: 300,
        })),
        store.clone(),
        Arc::new(MemoryLockProvider::default()),
    ));

    let first = {
        let d = distributor.clone();
        tokio::spawn(async move { publish_js(&d, "abc", "a()").await })
    };
    let second = {
        let d = distributor.clone();
        tokio::spawn(async move {
            d.publish("js/compiled.abc.js", "abc", || async { Ok(Content::new("a()")) })
                .await
                .unwrap()
                .outcome
        })
    };

    first.await.unwrap();
    let outcome = second.await.unwrap();

    assert_ne!(outcome, PublishOutcome::Deferred);
    assert_eq!(store.put_count(), 1);
    assert_eq!(distributor.stats().deferred, 0);
}

#[tokio::test]
async fn test_upload_failure_leaves_index_untouched() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let distributor = memory_distributor(dir.path(), store.clone());
    store.set_failure(Some("503 Slow Down"));

    let err = distributor
        .publish_text(AssetType::Css, "c55", || async { Ok(Content::new("a{}")) })
        .await
        .unwrap_err();

    match err {
        Error::UploadFailed { key, reason } => {
            assert_eq!(key, "assets/css/compiled.c55.css");
            assert_eq!(reason, "503 Slow Down");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        distributor.fingerprint_of("css/compiled.c55.css").await.unwrap(),
        None
    );
    assert!(!dir.path().join("cdn-index.json").exists());

    store.set_failure(None);
    let url = distributor
        .publish_text(AssetType::Css, "c55", || async { Ok(Content::new("a{}")) })
        .await
        .unwrap();
    assert_eq!(url, "https://cdn.example.com/assets/css/compiled.c55.css");
    assert_eq!(store.put_count(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_persist_failure_reports_url_without_reupload() {
    let dir = TempDir::new().unwrap();
    // A dangling state directory reads as empty but cannot be written.
    let state = dir.path().join("state");
    std::os::unix::fs::symlink(dir.path().join("missing").join("x"), &state).unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let distributor = Distributor::new(
        config(settings(&state)),
        store.clone(),
        Arc::new(MemoryLockProvider::default()),
    );

    let err = distributor
        .publish("images/a.png", "f00", || async { Ok(Content::new(PNG)) })
        .await
        .unwrap_err();

    assert!(err.object_was_uploaded());
    match err {
        Error::PersistFailed { url, .. } => {
            assert_eq!(url, "https://cdn.example.com/assets/images/a.png");
        }
        other => panic!("unexpected error: {other}"),
    }

    let retry = distributor
        .publish("images/a.png", "f00", || async { Ok(Content::new(PNG)) })
        .await
        .unwrap();
    assert_eq!(retry.outcome, PublishOutcome::CacheHit);
    assert_eq!(store.put_count(), 1);
}

#[tokio::test]
async fn test_corrupt_snapshot_fails_by_default() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("cdn-index.json"), "{ not json").unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let distributor = memory_distributor(dir.path(), store.clone());

    let err = distributor
        .publish("images/a.png", "f00", || async { Ok(Content::new(PNG)) })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::CorruptIndex { .. }));
    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn test_corrupt_snapshot_reset_policy_rebuilds() {
    let dir = TempDir::new().unwrap();
    let snapshot = dir.path().join("cdn-index.json");
    std::fs::write(&snapshot, "{ not json").unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let distributor = Distributor::new(
        config(settings(dir.path()).with_corrupt_index_policy(CorruptIndexPolicy::Reset)),
        store.clone(),
        Arc::new(MemoryLockProvider::default()),
    );

    publish_js(&distributor, "abc", "a()").await;

    let raw = std::fs::read_to_string(&snapshot).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["entries"]["js/compiled.abc.js"], "abc");
}

#[tokio::test]
async fn test_publish_image_sniffs_and_fingerprints() {
    let dir = TempDir::new().unwrap();
    let image = dir.path().join("logo.bin");
    std::fs::write(&image, PNG).unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let distributor = memory_distributor(&dir.path().join("state"), store.clone());

    let url = distributor
        .publish_image(&image, "/images/logo.png")
        .await
        .unwrap();

    assert_eq!(url, "https://cdn.example.com/assets/images/logo.png");
    let put = store.get("b", "assets/images/logo.png").unwrap();
    assert_eq!(put.content_type, "image/png");
    assert_eq!(
        distributor.fingerprint_of("images/logo.png").await.unwrap(),
        Some(fingerprint(PNG))
    );

    // Same bytes: no upload. New bytes: same URL, new upload.
    distributor.publish_image(&image, "images/logo.png").await.unwrap();
    assert_eq!(store.put_count(), 1);

    std::fs::write(&image, [0xFF, 0xD8, 0xFF, 0xE0]).unwrap();
    let again = distributor.publish_image(&image, "images/logo.png").await.unwrap();
    assert_eq!(again, url);
    assert_eq!(store.put_count(), 2);
    assert_eq!(store.puts()[1].content_type, "image/jpeg");
}

#[tokio::test]
async fn test_publish_image_missing_file() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let distributor = memory_distributor(dir.path(), store.clone());

    let err = distributor
        .publish_image(dir.path().join("missing.png"), "images/missing.png")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ContentUnavailable(_)));
    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn test_filesystem_store_with_file_locks() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("objects");
    let distributor = Distributor::with_file_locks(
        config(settings(&dir.path().join("state"))),
        Arc::new(FilesystemObjectStore::new(&root)),
    );

    publish_js(&distributor, "abc", "a()").await;

    let written = std::fs::read(root.join("b/assets/js/compiled.abc.js")).unwrap();
    assert_eq!(written, b"a()");
}
