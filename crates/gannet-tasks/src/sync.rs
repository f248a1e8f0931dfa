//! Index synchronization: reconcile local metadata with an upstream using
//! its monotonic change serials.
//!
//! Resumable by construction: the watermark is persisted after every event,
//! re-imports are idempotent, and a restart picks up from the last durable
//! serial.

use url::Url;

use gannet_client::{best_release, IndexBackend, IndexClient, IndexClientBuilder};
use gannet_normalize::PackageName;
use gannet_store::{BackingIndex, IndexBackendKind};
use tracing::{debug, info, warn};

use crate::queue::TaskRuntime;
use crate::task::TaskError;

enum Import {
    Imported,
    NoReleases,
}

/// Process all pending upstream change events for the index.
pub async fn sync_index(runtime: &TaskRuntime, index_id: i64) -> Result<(), TaskError> {
    let index = runtime.store.index_by_id(index_id).await?;
    let client = index_client(&index)?;

    let mut watermark = index.last_update_serial;
    let events = client.updated_packages(watermark).await?;
    info!(index = %index.slug, events = events.len(), "syncing");

    for event in events {
        if let Some(name) = &event.name {
            let Ok(normalized) = PackageName::new(name) else {
                warn!(index = %index.slug, %name, "skipping unusable package name");
                continue;
            };
            match import_package(runtime, &client, &index, name, &normalized).await? {
                Import::Imported => {}
                Import::NoReleases => {
                    remove_package(runtime, &index, &normalized).await?;
                }
            }
        }
        if watermark.map_or(true, |serial| event.serial > serial) {
            watermark = Some(event.serial);
            // Persist before consuming further events so a restart resumes
            // from here.
            runtime
                .store
                .advance_update_serial(index.id, event.serial)
                .await?;
        }
    }
    Ok(())
}

/// Import (or refresh) one package from the upstream. "No releases" tells
/// the caller to drop the local row.
async fn import_package(
    runtime: &TaskRuntime,
    client: &IndexClient,
    index: &BackingIndex,
    display_name: &str,
    name: &PackageName,
) -> Result<Import, TaskError> {
    let versions = match client.get_package_releases(name).await {
        Ok(versions) => versions,
        Err(gannet_client::Error::PackageNotFound(_)) => {
            debug!(index = %index.slug, %name, "package not found upstream");
            return Ok(Import::NoReleases);
        }
        Err(err) => return Err(err.into()),
    };

    let package = runtime
        .store
        .get_or_create_package(index.id, display_name, name)
        .await?;
    let mut keep = Vec::new();
    for (version, descriptors) in &versions {
        let Some(best) = best_release(descriptors) else {
            continue;
        };
        let release = runtime
            .store
            .upsert_release(package.id, version, &best.url, &best.md5_digest)
            .await?;
        keep.push(release.id);
    }
    if keep.is_empty() {
        return Ok(Import::NoReleases);
    }

    // Remove releases that vanished upstream, taking their artifacts with
    // them.
    let doomed = runtime
        .store
        .artifact_blobs_except(package.id, &keep)
        .await?;
    runtime
        .store
        .delete_releases_except(package.id, &keep)
        .await?;
    for blob in doomed {
        if let Err(err) = runtime.storage.remove(&blob).await {
            warn!(%blob, "stale artifact could not be removed: {err}");
        }
    }

    runtime.cache.invalidate_package(&index.slug, name);
    Ok(Import::Imported)
}

async fn remove_package(
    runtime: &TaskRuntime,
    index: &BackingIndex,
    name: &PackageName,
) -> Result<(), TaskError> {
    if let Some(package) = runtime.store.package_by_slug(index.id, name).await? {
        let blobs = runtime.store.artifact_blobs_except(package.id, &[]).await?;
        runtime.store.delete_package(index.id, name).await?;
        for blob in blobs {
            if let Err(err) = runtime.storage.remove(&blob).await {
                warn!(%blob, "orphaned artifact could not be removed: {err}");
            }
        }
        runtime.cache.invalidate_package(&index.slug, name);
        info!(index = %index.slug, %name, "removed vanished package");
    }
    Ok(())
}

/// The upstream client for a backing index row.
pub fn index_client(index: &BackingIndex) -> Result<IndexClient, TaskError> {
    let backend = match index.backend {
        IndexBackendKind::SimpleXmlRpc => IndexBackend::SimpleXmlRpc,
        IndexBackendKind::DevIndex => IndexBackend::DevIndex,
    };
    Ok(IndexClientBuilder::new().build(Url::parse(&index.url)?, backend)?)
}
