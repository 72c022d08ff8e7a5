//! Resolve source asset descriptors to verified local files
//!
//! A descriptor is usable when `{assets_dir}/{objectId}` matches its size and
//! hash. Stale or missing copies are fetched from source distributors when
//! any are configured. Anything that still does not verify is skipped with a
//! warning and the entity is migrated without it.

use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::hash::{ContentAddressedStore, LocalAssetStatus};
use crate::http::HttpClient;
use crate::humanize::ByteSize;
use crate::observability::Metrics;
use crate::snapshot::AssetDescriptor;

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("Failed to inspect cached asset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PrepareError>;

/// Logical asset name paired with what the snapshot says about it
pub type AssetSlot = (&'static str, Option<AssetDescriptor>);

/// A verified local asset ready to be declared in a creation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedAsset {
    pub slot: &'static str,
    pub descriptor: AssetDescriptor,
    pub local_path: PathBuf,
}

struct Distributors {
    client: HttpClient,
    endpoints: Vec<String>,
}

pub struct AssetPreparer {
    assets_dir: PathBuf,
    max_asset_size: ByteSize,
    distributors: Option<Distributors>,
    metrics: Arc<Metrics>,
}

impl AssetPreparer {
    pub fn new(assets_dir: PathBuf, max_asset_size: ByteSize, metrics: Arc<Metrics>) -> Self {
        Self {
            assets_dir,
            max_asset_size,
            distributors: None,
            metrics,
        }
    }

    /// Download missing or stale assets from these endpoints, in order
    pub fn with_distributors(mut self, client: HttpClient, endpoints: Vec<String>) -> Self {
        if !endpoints.is_empty() {
            self.distributors = Some(Distributors {
                client,
                endpoints: endpoints
                    .into_iter()
                    .map(|e| e.trim_end_matches('/').to_string())
                    .collect(),
            });
        }
        self
    }

    pub fn cache_path(&self, descriptor: &AssetDescriptor) -> PathBuf {
        self.assets_dir.join(descriptor.object_id.to_string())
    }

    /// Prepare every present slot concurrently, keeping slot order
    pub async fn prepare_all(&self, slots: Vec<AssetSlot>) -> Result<Vec<PreparedAsset>> {
        let attempts = slots
            .into_iter()
            .filter_map(|(slot, descriptor)| descriptor.map(|d| (slot, d)))
            .map(|(slot, descriptor)| async move { self.prepare(slot, descriptor).await });

        let prepared = join_all(attempts).await;
        let mut ready = Vec::new();
        for asset in prepared {
            if let Some(asset) = asset? {
                ready.push(asset);
            }
        }
        Ok(ready)
    }

    /// `Ok(None)` when the asset has to be skipped
    pub async fn prepare(
        &self,
        slot: &'static str,
        descriptor: AssetDescriptor,
    ) -> Result<Option<PreparedAsset>> {
        if descriptor.size > self.max_asset_size.as_u64() {
            warn!(
                slot,
                object_id = descriptor.object_id,
                size = %ByteSize(descriptor.size),
                limit = %self.max_asset_size,
                "Asset exceeds size limit, skipping"
            );
            self.metrics.asset_skipped();
            return Ok(None);
        }

        let path = self.cache_path(&descriptor);
        let mut status = self.check(&path, &descriptor).await?;

        if !status.is_valid() {
            if let Some(distributors) = &self.distributors {
                status = self.download(distributors, &path, &descriptor).await?;
            }
        }

        if !status.is_valid() {
            warn!(
                slot,
                object_id = descriptor.object_id,
                path = %path.display(),
                status = ?status,
                "Asset missing or stale, migrating without it"
            );
            self.metrics.asset_skipped();
            return Ok(None);
        }

        debug!(slot, object_id = descriptor.object_id, "Asset verified");
        Ok(Some(PreparedAsset {
            slot,
            descriptor,
            local_path: path,
        }))
    }

    async fn check(&self, path: &Path, descriptor: &AssetDescriptor) -> Result<LocalAssetStatus> {
        ContentAddressedStore::check(path, &descriptor.hash, descriptor.size)
            .await
            .map_err(|source| PrepareError::Io {
                path: path.display().to_string(),
                source,
            })
    }

    /// Try each distributor until one serves content that verifies
    async fn download(
        &self,
        distributors: &Distributors,
        path: &Path,
        descriptor: &AssetDescriptor,
    ) -> Result<LocalAssetStatus> {
        let mut status = LocalAssetStatus::Missing;
        let mut partial = path.as_os_str().to_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %parent.display(), error = %e, "Cannot create assets dir");
                return Ok(status);
            }
        }

        for endpoint in &distributors.endpoints {
            let url = format!("{endpoint}/api/v1/assets/{}", descriptor.object_id);
            if let Err(e) = distributors.client.download_to(&url, &partial).await {
                warn!(url, error = %e, "Asset download failed");
                remove_quietly(&partial).await;
                continue;
            }

            if let Err(e) = tokio::fs::rename(&partial, path).await {
                warn!(url, error = %e, "Failed to store downloaded asset");
                remove_quietly(&partial).await;
                continue;
            }

            status = self.check(path, descriptor).await?;
            if status.is_valid() {
                debug!(url, object_id = descriptor.object_id, "Asset downloaded");
                return Ok(status);
            }

            warn!(url, status = ?status, "Downloaded asset does not match descriptor");
            remove_quietly(path).await;
        }

        Ok(status)
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove asset file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn descriptor(object_id: u64, content: &[u8]) -> AssetDescriptor {
        AssetDescriptor {
            object_id,
            size: content.len() as u64,
            hash: ContentAddressedStore::hash_bytes(content),
        }
    }

    fn preparer(dir: &Path, metrics: Arc<Metrics>) -> AssetPreparer {
        AssetPreparer::new(dir.to_path_buf(), ByteSize::mib(1), metrics)
    }

    #[tokio::test]
    async fn test_valid_cached_asset() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("7"), b"cover").unwrap();
        let metrics = Arc::new(Metrics::new());

        let prepared = preparer(temp_dir.path(), metrics)
            .prepare("coverPhoto", descriptor(7, b"cover"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(prepared.slot, "coverPhoto");
        assert_eq!(prepared.local_path, temp_dir.path().join("7"));
    }

    #[tokio::test]
    async fn test_missing_and_stale_assets_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("8"), b"XXXXX").unwrap();
        let metrics = Arc::new(Metrics::new());
        let preparer = preparer(temp_dir.path(), Arc::clone(&metrics));

        let prepared = preparer
            .prepare_all(vec![
                ("avatar", Some(descriptor(7, b"avatar"))),
                ("coverPhoto", Some(descriptor(8, b"cover"))),
                ("thumbnail", None),
            ])
            .await
            .unwrap();

        assert!(prepared.is_empty());
        assert_eq!(metrics.snapshot().assets_skipped, 2);
    }

    #[tokio::test]
    async fn test_oversized_asset_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let metrics = Arc::new(Metrics::new());
        let preparer = AssetPreparer::new(temp_dir.path().to_path_buf(), ByteSize(4), metrics);
        std::fs::write(temp_dir.path().join("1"), b"toolarge").unwrap();

        let prepared = preparer.prepare("media", descriptor(1, b"toolarge")).await.unwrap();
        assert!(prepared.is_none());
    }

    #[tokio::test]
    async fn test_prepare_all_keeps_slot_order() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("1"), b"thumb").unwrap();
        std::fs::write(temp_dir.path().join("2"), b"media").unwrap();
        let metrics = Arc::new(Metrics::new());

        let prepared = preparer(temp_dir.path(), metrics)
            .prepare_all(vec![
                ("thumbnail", Some(descriptor(1, b"thumb"))),
                ("media", Some(descriptor(2, b"media"))),
            ])
            .await
            .unwrap();

        let slots: Vec<_> = prepared.iter().map(|p| p.slot).collect();
        assert_eq!(slots, vec!["thumbnail", "media"]);
    }
}
