//! Durable queue of staged assets waiting for upload
//!
//! The queue file is a JSON array with one record per pending upload: the
//! `"bucket|objectId"` string once the asset is staged at
//! `{uploads_dir}/{objectId}`, or `{"key": "bucket|objectId", "source": path}`
//! while the staged copy still has to be made from the local cache. Every
//! enqueue rewrites the file before the copy is attempted, so an allocated
//! object is never forgotten. The staged copy is removed once its upload is
//! confirmed.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::storage::UploadPool;
use crate::observability::Metrics;
use crate::persist;
use crate::snapshot::EntityId;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue file {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to stage asset {key} from {from}: {source}")]
    Staging {
        key: String,
        from: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid queue entry {0:?}, expected \"bucket|objectId\"")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Destination object identity: bucket plus object id within it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetKey {
    pub bucket: String,
    pub object_id: EntityId,
}

impl AssetKey {
    pub fn new(bucket: impl Into<String>, object_id: EntityId) -> Self {
        Self {
            bucket: bucket.into(),
            object_id,
        }
    }

    /// Path of the object inside a storage endpoint
    pub fn object_path(&self) -> String {
        format!("{}/{}", self.bucket, self.object_id)
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.bucket, self.object_id)
    }
}

impl FromStr for AssetKey {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self> {
        // bucket names may contain '|', object ids never do
        let (bucket, object_id) = s
            .rsplit_once('|')
            .ok_or_else(|| QueueError::InvalidKey(s.to_string()))?;

        if bucket.is_empty() {
            return Err(QueueError::InvalidKey(s.to_string()));
        }

        let object_id = object_id
            .parse()
            .map_err(|_| QueueError::InvalidKey(s.to_string()))?;

        Ok(Self::new(bucket, object_id))
    }
}

/// On-disk form of one queue entry
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum QueueRecord {
    Staged(String),
    Unstaged { key: String, source: PathBuf },
}

/// Outcome of one [`AssetTransferQueue::drain`] pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub uploaded: usize,
    pub failed: Vec<AssetKey>,
}

impl DrainReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct AssetTransferQueue {
    /// Pending uploads; `Some(source)` until the staged copy exists
    entries: BTreeMap<AssetKey, Option<PathBuf>>,
    queue_file: PathBuf,
    uploads_dir: PathBuf,
    pool: Arc<UploadPool>,
    metrics: Arc<Metrics>,
}

impl AssetTransferQueue {
    /// Empty queue persisting to `queue_file`
    pub fn new(
        queue_file: PathBuf,
        uploads_dir: PathBuf,
        pool: Arc<UploadPool>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            entries: BTreeMap::new(),
            queue_file,
            uploads_dir,
            pool,
            metrics,
        }
    }

    /// Queue persisting to `queue_file`, resuming whatever it already holds
    pub async fn open(
        queue_file: PathBuf,
        uploads_dir: PathBuf,
        pool: Arc<UploadPool>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let mut queue = Self::new(queue_file.clone(), uploads_dir, pool, metrics);
        queue.load_from_file(&queue_file).await?;
        if !queue.is_empty() {
            info!(
                pending = queue.len(),
                file = %queue_file.display(),
                "Resumed pending uploads"
            );
        }
        Ok(queue)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn queue_file(&self) -> &Path {
        &self.queue_file
    }

    pub fn staged_path(&self, key: &AssetKey) -> PathBuf {
        self.uploads_dir.join(key.object_id.to_string())
    }

    /// Queue `source` for upload under `key`
    ///
    /// The entry is persisted before the staged copy is made. A failed copy
    /// is not an error here; the entry keeps its source and the next
    /// [`Self::drain`] stages it again.
    pub async fn enqueue(&mut self, key: AssetKey, source: &Path) -> Result<()> {
        self.entries.insert(key.clone(), Some(source.to_path_buf()));
        self.metrics.asset_queued();
        self.persist().await?;

        let staged = self.staged_path(&key);
        match stage(&key, source, &self.uploads_dir, &staged).await {
            Ok(()) => {
                debug!(key = %key, staged = %staged.display(), "Asset staged");
                self.entries.insert(key, None);
                self.persist().await
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Staging failed, will retry on next drain");
                Ok(())
            }
        }
    }

    /// Attempt every queued upload once, concurrently
    ///
    /// Entries still missing their staged copy are staged first. Confirmed
    /// uploads leave the queue and lose their staged copy; failed ones stay
    /// for the next drain. The queue file is rewritten afterwards.
    pub async fn drain(&mut self) -> Result<DrainReport> {
        if self.entries.is_empty() {
            return Ok(DrainReport::default());
        }

        info!(pending = self.entries.len(), "Draining upload queue");

        let attempts = self.entries.iter().map(|(key, source)| {
            let staged = self.staged_path(key);
            let uploads_dir = self.uploads_dir.as_path();
            let pool = Arc::clone(&self.pool);
            async move {
                let mut freshly_staged = false;
                if let Some(source) = source {
                    if let Err(e) = stage(key, source, uploads_dir, &staged).await {
                        return (key.clone(), staged, false, Err(e.to_string()));
                    }
                    freshly_staged = true;
                }
                let outcome = pool
                    .upload(key, &staged)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string());
                (key.clone(), staged, freshly_staged, outcome)
            }
        });
        let results = join_all(attempts).await;

        let mut report = DrainReport::default();
        for (key, staged, freshly_staged, outcome) in results {
            match outcome {
                Ok(()) => {
                    self.entries.remove(&key);
                    if let Err(e) = tokio::fs::remove_file(&staged).await {
                        warn!(key = %key, error = %e, "Failed to remove staged asset");
                    }
                    self.metrics.asset_uploaded();
                    report.uploaded += 1;
                }
                Err(reason) => {
                    warn!(key = %key, error = %reason, "Upload failed, keeping in queue");
                    if freshly_staged {
                        self.entries.insert(key.clone(), None);
                    }
                    self.metrics.upload_failed();
                    report.failed.push(key);
                }
            }
        }

        self.persist().await?;

        info!(
            uploaded = report.uploaded,
            failed = report.failed.len(),
            "Upload queue drained"
        );
        Ok(report)
    }

    /// Merge entries from a saved queue file; a missing file adds nothing
    pub async fn load_from_file(&mut self, path: &Path) -> Result<()> {
        let records: Option<Vec<QueueRecord>> =
            persist::read_json(path)
                .await
                .map_err(|source| QueueError::Persist {
                    path: path.display().to_string(),
                    source,
                })?;

        for record in records.unwrap_or_default() {
            let (key, source) = match record {
                QueueRecord::Staged(key) => (key, None),
                QueueRecord::Unstaged { key, source } => (key, Some(source)),
            };
            self.entries.insert(key.parse()?, source);
        }
        Ok(())
    }

    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let records: Vec<QueueRecord> = self
            .entries
            .iter()
            .map(|(key, source)| match source {
                None => QueueRecord::Staged(key.to_string()),
                Some(source) => QueueRecord::Unstaged {
                    key: key.to_string(),
                    source: source.clone(),
                },
            })
            .collect();

        persist::write_json_atomic(path, &records)
            .await
            .map_err(|source| QueueError::Persist {
                path: path.display().to_string(),
                source,
            })
    }

    async fn persist(&self) -> Result<()> {
        self.save_to_file(&self.queue_file).await
    }
}

/// Copy the cached asset to its staging path
async fn stage(key: &AssetKey, source: &Path, uploads_dir: &Path, staged: &Path) -> Result<()> {
    let staging_err = |e| QueueError::Staging {
        key: key.to_string(),
        from: source.display().to_string(),
        source: e,
    };

    tokio::fs::create_dir_all(uploads_dir)
        .await
        .map_err(staging_err)?;
    tokio::fs::copy(source, staged).await.map_err(staging_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::storage::StorageClient;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        root: PathBuf,
        target: StorageClient,
        metrics: Arc<Metrics>,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let root = temp_dir.path().to_path_buf();
            Self {
                _temp_dir: temp_dir,
                root,
                target: StorageClient::in_memory("mem"),
                metrics: Arc::new(Metrics::new()),
            }
        }

        fn queue_file(&self) -> PathBuf {
            self.root.join("results").join("pending_uploads.json")
        }

        fn queue_with(&self, targets: Vec<StorageClient>) -> AssetTransferQueue {
            AssetTransferQueue::new(
                self.queue_file(),
                self.root.join("uploads"),
                Arc::new(UploadPool::new(targets)),
                Arc::clone(&self.metrics),
            )
        }

        fn source_file(&self, name: &str, content: &[u8]) -> PathBuf {
            let path = self.root.join(name);
            std::fs::write(&path, content).unwrap();
            path
        }
    }

    fn read_queue_file(path: &Path) -> Vec<String> {
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn test_key_format() {
        let key: AssetKey = "channel:4|17".parse().unwrap();
        assert_eq!(key, AssetKey::new("channel:4", 17));
        assert_eq!(key.to_string(), "channel:4|17");
        assert_eq!(key.object_path(), "channel:4/17");

        let piped: AssetKey = "a|b|3".parse().unwrap();
        assert_eq!(piped.bucket, "a|b");

        assert!("no-separator".parse::<AssetKey>().is_err());
        assert!("bucket|x".parse::<AssetKey>().is_err());
        assert!("|5".parse::<AssetKey>().is_err());
    }

    #[tokio::test]
    async fn test_enqueue_persists_before_returning() {
        let fixture = Fixture::new();
        let mut queue = fixture.queue_with(vec![fixture.target.clone()]);
        let source = fixture.source_file("100", b"avatar");

        queue.enqueue(AssetKey::new("channel:1", 5), &source).await.unwrap();

        assert_eq!(read_queue_file(&fixture.queue_file()), vec!["channel:1|5"]);
        assert!(fixture.root.join("uploads").join("5").exists());
        // cached source stays in place
        assert!(source.exists());
        assert_eq!(fixture.metrics.snapshot().assets_queued, 1);
    }

    #[tokio::test]
    async fn test_staging_failure_keeps_entry_with_source() {
        let fixture = Fixture::new();
        let mut queue = fixture.queue_with(vec![fixture.target.clone()]);
        let source = fixture.source_file("100", b"avatar");
        // a regular file where the uploads dir should be
        let blocker = fixture.root.join("uploads");
        std::fs::write(&blocker, b"").unwrap();

        queue.enqueue(AssetKey::new("channel:1", 5), &source).await.unwrap();

        let saved: Vec<serde_json::Value> =
            serde_json::from_slice(&std::fs::read(fixture.queue_file()).unwrap()).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0]["key"], "channel:1|5");
        assert_eq!(saved[0]["source"], source.display().to_string());

        // still blocked: the entry survives the drain with its source
        let report = queue.drain().await.unwrap();
        assert_eq!(report.failed, vec![AssetKey::new("channel:1", 5)]);

        std::fs::remove_file(&blocker).unwrap();
        let mut resumed = AssetTransferQueue::open(
            fixture.queue_file(),
            fixture.root.join("uploads"),
            Arc::new(UploadPool::new(vec![fixture.target.clone()])),
            Arc::clone(&fixture.metrics),
        )
        .await
        .unwrap();
        let report = resumed.drain().await.unwrap();

        assert_eq!(report.uploaded, 1);
        assert!(resumed.is_empty());
        assert!(read_queue_file(&fixture.queue_file()).is_empty());
        let stored = fixture.target.download("channel:1/5").await.unwrap();
        assert_eq!(stored.as_ref(), b"avatar");
    }

    #[tokio::test]
    async fn test_staged_after_failed_upload_is_not_restaged() {
        let fixture = Fixture::new();
        let mut queue = fixture.queue_with(Vec::new());
        let source = fixture.source_file("100", b"avatar");
        let blocker = fixture.root.join("uploads");
        std::fs::write(&blocker, b"").unwrap();

        queue.enqueue(AssetKey::new("channel:1", 5), &source).await.unwrap();
        std::fs::remove_file(&blocker).unwrap();

        // staging succeeds this time, the upload does not (no endpoints)
        queue.drain().await.unwrap();
        assert_eq!(read_queue_file(&fixture.queue_file()), vec!["channel:1|5"]);
        assert!(fixture.root.join("uploads").join("5").exists());
    }

    #[tokio::test]
    async fn test_drain_uploads_and_cleans_up() {
        let fixture = Fixture::new();
        let mut queue = fixture.queue_with(vec![fixture.target.clone()]);
        let a = fixture.source_file("a", b"first");
        let b = fixture.source_file("b", b"second");

        queue.enqueue(AssetKey::new("channel:1", 1), &a).await.unwrap();
        queue.enqueue(AssetKey::new("channel:1", 2), &b).await.unwrap();

        let report = queue.drain().await.unwrap();
        assert_eq!(report.uploaded, 2);
        assert!(report.is_complete());
        assert!(queue.is_empty());
        assert!(read_queue_file(&fixture.queue_file()).is_empty());
        assert!(!fixture.root.join("uploads").join("1").exists());

        let stored = fixture.target.download("channel:1/2").await.unwrap();
        assert_eq!(stored.as_ref(), b"second");
    }

    #[tokio::test]
    async fn test_failed_upload_stays_queued() {
        let fixture = Fixture::new();
        let mut queue = fixture.queue_with(Vec::new());
        let a = fixture.source_file("a", b"first");

        queue.enqueue(AssetKey::new("channel:1", 1), &a).await.unwrap();

        let report = queue.drain().await.unwrap();
        assert_eq!(report.failed, vec![AssetKey::new("channel:1", 1)]);
        assert_eq!(queue.len(), 1);
        assert!(fixture.root.join("uploads").join("1").exists());
        assert_eq!(fixture.metrics.snapshot().upload_failures, 1);
    }

    #[tokio::test]
    async fn test_resume_from_saved_file() {
        let fixture = Fixture::new();
        let a = fixture.source_file("a", b"first");

        {
            // no endpoints: the upload fails and the entry is left on disk
            let mut queue = fixture.queue_with(Vec::new());
            queue.enqueue(AssetKey::new("channel:2", 9), &a).await.unwrap();
            queue.drain().await.unwrap();
        }

        let mut resumed = AssetTransferQueue::open(
            fixture.queue_file(),
            fixture.root.join("uploads"),
            Arc::new(UploadPool::new(vec![fixture.target.clone()])),
            Arc::clone(&fixture.metrics),
        )
        .await
        .unwrap();
        assert_eq!(resumed.len(), 1);

        let report = resumed.drain().await.unwrap();
        assert_eq!(report.uploaded, 1);
        assert!(fixture.target.exists("channel:2/9").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_staged_file_is_a_transfer_failure() {
        let fixture = Fixture::new();
        std::fs::create_dir_all(fixture.queue_file().parent().unwrap()).unwrap();
        std::fs::write(fixture.queue_file(), br#"["channel:3|4"]"#).unwrap();

        let mut queue = AssetTransferQueue::open(
            fixture.queue_file(),
            fixture.root.join("uploads"),
            Arc::new(UploadPool::new(vec![fixture.target.clone()])),
            Arc::clone(&fixture.metrics),
        )
        .await
        .unwrap();

        let report = queue.drain().await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_queue_file() {
        let fixture = Fixture::new();
        std::fs::create_dir_all(fixture.queue_file().parent().unwrap()).unwrap();
        std::fs::write(fixture.queue_file(), br#"["nonsense"]"#).unwrap();

        let mut queue = fixture.queue_with(Vec::new());
        let result = queue.load_from_file(&fixture.queue_file()).await;
        assert!(matches!(result, Err(QueueError::InvalidKey(_))));
    }
}
