//! Command handlers.
//!
//! URLs and index data go to stdout; status lines go to stderr.

use crate::config::CliConfig;
use console::style;
use nimbus_cache::{Distributor, FilesystemObjectStore};
use nimbus_core::{AssetType, Content, DistributorConfig, Error, Publication, PublishOutcome};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

type HandlerResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Build the distributor described by `config`.
pub async fn distributor(config: &CliConfig) -> HandlerResult<Distributor> {
    let settings = DistributorConfig::from_settings(config.distributor.clone())?;
    let distributor = match &config.filesystem_root {
        Some(root) => {
            Distributor::with_file_locks(settings, Arc::new(FilesystemObjectStore::new(root)))
        }
        None => Distributor::s3(settings).await,
    };
    debug!(?distributor, "Configured distributor");
    Ok(distributor)
}

/// Publish a compiled bundle.
pub async fn publish_text(
    distributor: &Distributor,
    asset_type: AssetType,
    file: &Path,
    fingerprint: Option<String>,
) -> HandlerResult<PublishOutcome> {
    let path = file.to_path_buf();
    let result = match fingerprint {
        // Read the file only if an upload actually happens.
        Some(fingerprint) => {
            distributor
                .publish_text_detailed(asset_type, &fingerprint, move || async move {
                    tokio::fs::read(&path).await.map(Content::new).map_err(|e| {
                        Error::ContentUnavailable(format!("{}: {}", path.display(), e))
                    })
                })
                .await
        }
        None => {
            let bytes = tokio::fs::read(&path).await.map_err(|e| {
                Error::ContentUnavailable(format!("{}: {}", path.display(), e))
            })?;
            let fingerprint = nimbus_cache::fingerprint(&bytes);
            distributor
                .publish_text_detailed(asset_type, &fingerprint, move || async move {
                    Ok(Content::new(bytes))
                })
                .await
        }
    };

    report(result)
}

/// Publish an image.
pub async fn publish_image(
    distributor: &Distributor,
    local_path: &Path,
    virtual_path: &str,
) -> HandlerResult<PublishOutcome> {
    let result = distributor
        .publish_image_detailed(local_path, virtual_path)
        .await;
    report(result)
}

/// Print the public URL of a key.
pub fn url(distributor: &Distributor, key: &str) -> HandlerResult {
    println!("{}", distributor.resolve_url(key));
    Ok(())
}

/// List index entries.
pub async fn list_index(distributor: &Distributor, json: bool) -> HandlerResult {
    let entries = distributor.entries().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        eprintln!("{} Cache index is empty", style("i").blue());
        return Ok(());
    }

    for entry in &entries {
        println!("{}\t{}", entry.key, style(&entry.fingerprint).dim());
    }
    eprintln!("{} entries", entries.len());
    Ok(())
}

/// Show the fingerprint recorded for a key.
pub async fn get_index(distributor: &Distributor, key: &str) -> HandlerResult {
    match distributor.fingerprint_of(key).await? {
        Some(fingerprint) => {
            println!("{}", fingerprint);
            Ok(())
        }
        None => Err(format!("No entry for {}", key).into()),
    }
}

fn report(result: nimbus_core::Result<Publication>) -> HandlerResult<PublishOutcome> {
    match result {
        Ok(publication) => {
            let status = match publication.outcome {
                PublishOutcome::Uploaded => style("uploaded").green(),
                PublishOutcome::CacheHit => style("cached").cyan(),
                PublishOutcome::Deferred => style("deferred").yellow(),
            };
            eprintln!(
                "{} {} {} ({}ms)",
                style("✓").green(),
                status,
                publication.key,
                publication.duration_ms
            );
            println!("{}", publication.url);
            Ok(publication.outcome)
        }
        Err(Error::PersistFailed { url, reason, .. }) => {
            // The object is live; only the index write failed.
            eprintln!(
                "{} uploaded, but the cache index was not saved: {}",
                style("!").yellow(),
                reason
            );
            println!("{}", url);
            Err("cache index not saved".into())
        }
        Err(e) => Err(e.into()),
    }
}
