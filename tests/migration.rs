//! Orchestrator scenarios against the in-process ledger and in-memory storage

use async_trait::async_trait;
use contentmig::assets::{
    AssetPreparer, AssetTransferQueue, ContentAddressedStore, StorageClient, UploadPool,
};
use contentmig::config::Config;
use contentmig::ledger::{self, Call, LedgerClient, LedgerEvent, MockLedger};
use contentmig::migration::orchestrator::pending_uploads_path;
use contentmig::migration::shutdown::SIGTERM;
use contentmig::migration::{MigrationError, MigrationOrchestrator, MigrationState, Shutdown};
use contentmig::observability::Metrics;
use contentmig::snapshot::{AssetDescriptor, Category, Channel, EntityId, Snapshot, Video};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

struct TestContext {
    _temp_dir: TempDir,
    config: Config,
    ledger: Arc<MockLedger>,
    storage: StorageClient,
    metrics: Arc<Metrics>,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();

        let mut config = Config::default();
        config.migration.results_dir = root.join("results");
        config.source.assets_dir = root.join("assets");
        config.destination.uploads_dir = root.join("uploads");
        std::fs::create_dir_all(&config.source.assets_dir).unwrap();

        Self {
            _temp_dir: temp_dir,
            config,
            ledger: Arc::new(MockLedger::new()),
            storage: StorageClient::in_memory("storage-1"),
            metrics: Arc::new(Metrics::new()),
        }
    }

    async fn orchestrator(&self) -> MigrationOrchestrator {
        self.orchestrator_with(self.ledger.clone(), vec![self.storage.clone()], Shutdown::new())
            .await
    }

    async fn orchestrator_with(
        &self,
        ledger: Arc<dyn LedgerClient>,
        targets: Vec<StorageClient>,
        shutdown: Shutdown,
    ) -> MigrationOrchestrator {
        let preparer = AssetPreparer::new(
            self.config.source.assets_dir.clone(),
            self.config.migration.max_asset_size,
            Arc::clone(&self.metrics),
        );
        let queue = AssetTransferQueue::open(
            self.queue_file(),
            self.config.destination.uploads_dir.clone(),
            Arc::new(UploadPool::new(targets)),
            Arc::clone(&self.metrics),
        )
        .await
        .unwrap();

        MigrationOrchestrator::new(
            &self.config,
            ledger,
            preparer,
            queue,
            Arc::clone(&self.metrics),
            shutdown,
        )
    }

    fn queue_file(&self) -> PathBuf {
        pending_uploads_path(&self.config.migration.results_dir)
    }

    fn state_file(&self, stage: &str) -> PathBuf {
        self.config.migration.results_dir.join(format!("{stage}.json"))
    }

    async fn state(&self, stage: &str) -> MigrationState {
        MigrationState::load(&self.state_file(stage)).await.unwrap()
    }

    /// Put a valid cached copy of `content` in the assets dir
    fn cached_asset(&self, object_id: EntityId, content: &[u8]) -> AssetDescriptor {
        std::fs::write(
            self.config.source.assets_dir.join(object_id.to_string()),
            content,
        )
        .unwrap();
        descriptor(object_id, content)
    }
}

fn descriptor(object_id: EntityId, content: &[u8]) -> AssetDescriptor {
    AssetDescriptor {
        object_id,
        size: content.len() as u64,
        hash: ContentAddressedStore::hash_bytes(content),
    }
}

fn category(id: EntityId) -> Category {
    Category {
        id,
        name: format!("category-{id}"),
        description: None,
    }
}

fn channel(id: EntityId) -> Channel {
    Channel {
        id,
        owner_account: format!("owner-{id}"),
        title: format!("channel-{id}"),
        description: None,
        is_public: true,
        language: None,
        category_id: None,
        avatar: None,
        cover_photo: None,
    }
}

fn video(id: EntityId, channel_id: EntityId) -> Video {
    Video {
        id,
        channel_id,
        category_id: None,
        title: format!("video-{id}"),
        description: None,
        duration: Some(30),
        is_public: true,
        language: None,
        thumbnail: None,
        media: None,
    }
}

fn category_names(calls: &[Call]) -> Vec<String> {
    calls
        .iter()
        .filter_map(|call| match call {
            Call::CreateCategory { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

/// Requests shutdown as soon as the first batch has been answered
struct ShutdownAfterFirstBatch {
    inner: Arc<MockLedger>,
    shutdown: Shutdown,
}

#[async_trait]
impl LedgerClient for ShutdownAfterFirstBatch {
    async fn submit_batch(&self, calls: Vec<Call>) -> ledger::Result<Vec<LedgerEvent>> {
        let events = self.inner.submit_batch(calls).await?;
        self.shutdown.trigger(SIGTERM);
        Ok(events)
    }
}

#[tokio::test]
async fn test_three_categories_full_success() {
    let ctx = TestContext::new();
    let snapshot = Snapshot {
        channel_categories: vec![category(1), category(2), category(3)],
        ..Default::default()
    };

    let report = ctx
        .orchestrator()
        .await
        .migrate_content(&snapshot, &[])
        .await
        .unwrap();

    assert!(report.is_complete());
    let stage = report.stage("channelCategories").unwrap();
    assert_eq!(stage.migrated, 3);

    let state = ctx.state("channelCategories").await;
    assert_eq!(state.len(), 3);
    assert!(state.failed().is_empty());

    let batches = ctx.ledger.submitted_batches().await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 3);
    assert_eq!(ctx.metrics.snapshot().entities_migrated, 3);
}

#[tokio::test]
async fn test_interrupted_batch_fails_trailing_entities() {
    let ctx = TestContext::new();
    let snapshot = Snapshot {
        channels: (1..=5).map(channel).collect(),
        ..Default::default()
    };
    ctx.ledger.interrupt_next_batch_at(6).await;

    let err = ctx
        .orchestrator()
        .await
        .migrate_content(&snapshot, &[])
        .await
        .unwrap_err();

    match err {
        MigrationError::StageFailed { stage, failed } => {
            assert_eq!(stage, "channels");
            assert_eq!(failed, vec![4, 5]);
        }
        other => panic!("unexpected error {other}"),
    }

    let state = ctx.state("channels").await;
    assert_eq!(state.len(), 3);
    assert!((1..=3).all(|id| state.has(id)));
    assert_eq!(state.failed().iter().copied().collect::<Vec<_>>(), vec![4, 5]);
    assert_eq!(ctx.ledger.submitted_batches().await[0].len(), 10);
}

#[tokio::test]
async fn test_resumed_run_submits_only_unmapped() {
    let ctx = TestContext::new();
    let mut state = MigrationState::new();
    state.record(1, 101).unwrap();
    state.record(2, 102).unwrap();
    state.save(&ctx.state_file("channelCategories")).await.unwrap();

    let snapshot = Snapshot {
        channel_categories: (1..=5).map(category).collect(),
        ..Default::default()
    };
    let report = ctx
        .orchestrator()
        .await
        .migrate_content(&snapshot, &[])
        .await
        .unwrap();

    let stage = report.stage("channelCategories").unwrap();
    assert_eq!(stage.already_migrated, 2);
    assert_eq!(stage.migrated, 3);

    let batches = ctx.ledger.submitted_batches().await;
    assert_eq!(batches.len(), 1);
    assert_eq!(
        category_names(&batches[0]),
        vec!["category-3", "category-4", "category-5"]
    );

    let state = ctx.state("channelCategories").await;
    assert_eq!(state.len(), 5);
    assert_eq!(state.destination_id(1), Some(101));
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let ctx = TestContext::new();
    let snapshot = Snapshot {
        channel_categories: vec![category(1)],
        video_categories: vec![category(2)],
        channels: vec![channel(10), channel(11)],
        videos: vec![video(20, 10), video(21, 11)],
        ..Default::default()
    };

    ctx.orchestrator()
        .await
        .migrate_content(&snapshot, &[])
        .await
        .unwrap();
    let batches_after_first = ctx.ledger.batch_count().await;
    let stages = ["channelCategories", "videoCategories", "channels", "videos"];
    let first: Vec<Vec<u8>> = stages
        .iter()
        .map(|s| std::fs::read(ctx.state_file(s)).unwrap())
        .collect();

    let report = ctx
        .orchestrator()
        .await
        .migrate_content(&snapshot, &[])
        .await
        .unwrap();

    assert!(report.is_complete());
    assert!(report.stages.iter().all(|s| s.migrated == 0));
    assert_eq!(ctx.ledger.batch_count().await, batches_after_first);
    let second: Vec<Vec<u8>> = stages
        .iter()
        .map(|s| std::fs::read(ctx.state_file(s)).unwrap())
        .collect();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_missing_asset_is_skipped_not_failed() {
    let ctx = TestContext::new();
    let mut source = channel(1);
    source.avatar = Some(ctx.cached_asset(500, b"avatar-bytes"));
    source.cover_photo = Some(descriptor(501, b"never cached"));
    let snapshot = Snapshot {
        channels: vec![source],
        ..Default::default()
    };

    let report = ctx
        .orchestrator()
        .await
        .migrate_content(&snapshot, &[])
        .await
        .unwrap();
    assert!(report.is_complete());
    assert!(ctx.state("channels").await.has(1));

    let batches = ctx.ledger.submitted_batches().await;
    match &batches[0][1] {
        Call::CreateChannel { assets, .. } => {
            assert_eq!(assets.len(), 1);
            assert_eq!(assets[0].name, "avatar");
        }
        other => panic!("unexpected call {other:?}"),
    }

    // destination channel 1, first allocated object 1
    let stored = ctx.storage.download("channel:1/1").await.unwrap();
    assert_eq!(stored.as_ref(), b"avatar-bytes");
    assert_eq!(ctx.metrics.snapshot().assets_skipped, 1);
    assert!(!ctx.config.destination.uploads_dir.join("1").exists());
    assert!(ctx.config.source.assets_dir.join("500").exists());
}

#[tokio::test]
async fn test_video_assets_use_mapped_channel_bucket() {
    let ctx = TestContext::new();
    let mut clip = video(20, 10);
    clip.thumbnail = Some(ctx.cached_asset(600, b"thumb"));
    clip.media = Some(ctx.cached_asset(601, b"media-bytes"));
    let snapshot = Snapshot {
        channels: vec![channel(10)],
        videos: vec![clip],
        ..Default::default()
    };

    let report = ctx
        .orchestrator()
        .await
        .migrate_content(&snapshot, &[])
        .await
        .unwrap();
    assert!(report.is_complete());
    assert_eq!(report.pending_uploads, 0);

    let batches = ctx.ledger.submitted_batches().await;
    assert!(matches!(&batches[1][1], Call::CreateVideo { channel: 1, .. }));
    assert_eq!(ctx.state("videos").await.destination_id(20), Some(1));
    assert_eq!(
        ctx.storage.download("channel:1/1").await.unwrap().as_ref(),
        b"thumb"
    );
    assert_eq!(
        ctx.storage.download("channel:1/2").await.unwrap().as_ref(),
        b"media-bytes"
    );
}

#[tokio::test]
async fn test_channel_selection_limits_channels_and_videos() {
    let ctx = TestContext::new();
    let snapshot = Snapshot {
        channels: vec![channel(10), channel(11)],
        videos: vec![video(20, 10), video(21, 11)],
        ..Default::default()
    };

    ctx.orchestrator()
        .await
        .migrate_content(&snapshot, &[11])
        .await
        .unwrap();

    let channels = ctx.state("channels").await;
    assert!(channels.has(11));
    assert!(!channels.has(10));
    let videos = ctx.state("videos").await;
    assert!(videos.has(21));
    assert!(!videos.has(20));
}

#[tokio::test]
async fn test_unmigrated_upstream_reference_is_fatal() {
    let ctx = TestContext::new();
    let mut orphan = channel(1);
    orphan.category_id = Some(7);
    let snapshot = Snapshot {
        channels: vec![orphan],
        ..Default::default()
    };

    let err = ctx
        .orchestrator()
        .await
        .migrate_content(&snapshot, &[])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        MigrationError::MissingReference {
            stage: "channels",
            reference: 7,
            ..
        }
    ));
    assert_eq!(ctx.ledger.batch_count().await, 0);
}

#[tokio::test]
async fn test_rejected_dispatch_is_retried_on_next_run() {
    let ctx = TestContext::new();
    let snapshot = Snapshot {
        channels: vec![channel(1), channel(2), channel(3)],
        ..Default::default()
    };
    // creation call of the second channel
    ctx.ledger.reject_next_dispatch_at(3).await;

    let err = ctx
        .orchestrator()
        .await
        .migrate_content(&snapshot, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::StageFailed { ref failed, .. } if failed == &vec![2]));

    let state = ctx.state("channels").await;
    assert!(state.has(1) && state.has(3));
    assert!(state.failed().contains(&2));

    let report = ctx
        .orchestrator()
        .await
        .migrate_content(&snapshot, &[])
        .await
        .unwrap();
    assert!(report.is_complete());

    let batches = ctx.ledger.submitted_batches().await;
    assert_eq!(batches.last().unwrap().len(), 2);
    let state = ctx.state("channels").await;
    assert_eq!(state.len(), 3);
    assert!(state.failed().is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_between_chunks() {
    let mut ctx = TestContext::new();
    ctx.config.migration.category_batch_size = 2;
    let snapshot = Snapshot {
        channel_categories: (1..=5).map(category).collect(),
        ..Default::default()
    };

    let shutdown = Shutdown::new();
    let ledger = Arc::new(ShutdownAfterFirstBatch {
        inner: ctx.ledger.clone(),
        shutdown: shutdown.clone(),
    });
    let report = ctx
        .orchestrator_with(ledger, vec![ctx.storage.clone()], shutdown.clone())
        .await
        .migrate_content(&snapshot, &[])
        .await
        .unwrap();

    assert!(report.interrupted);
    assert!(!report.is_complete());
    assert_eq!(shutdown.exit_code(), Some(143));
    assert_eq!(ctx.ledger.batch_count().await, 1);
    assert_eq!(ctx.state("channelCategories").await.len(), 2);

    let report = ctx
        .orchestrator()
        .await
        .migrate_content(&snapshot, &[])
        .await
        .unwrap();
    assert!(report.is_complete());
    assert_eq!(ctx.ledger.batch_count().await, 3);
    assert_eq!(ctx.state("channelCategories").await.len(), 5);
}

#[tokio::test]
async fn test_transport_failure_is_fatal_and_checkpointed() {
    let ctx = TestContext::new();
    let snapshot = Snapshot {
        members: vec![contentmig::snapshot::Member {
            id: 1,
            handle: "alice".to_string(),
            root_account: "root".to_string(),
            controller_account: "ctrl".to_string(),
            name: None,
            about: None,
            avatar_uri: None,
        }],
        ..Default::default()
    };
    ctx.ledger.fail_next_submission().await;

    let err = ctx
        .orchestrator()
        .await
        .migrate_members(&snapshot)
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::Ledger(_)));
    assert!(ctx.state_file("members").exists());

    let report = ctx
        .orchestrator()
        .await
        .migrate_members(&snapshot)
        .await
        .unwrap();
    assert!(report.is_complete());
    assert_eq!(ctx.state("members").await.destination_id(1), Some(1));
}

#[tokio::test]
async fn test_pending_uploads_survive_for_retry() {
    let ctx = TestContext::new();
    let mut source = channel(1);
    source.avatar = Some(ctx.cached_asset(700, b"avatar"));
    let snapshot = Snapshot {
        channels: vec![source],
        ..Default::default()
    };

    // no reachable upload endpoints
    let report = ctx
        .orchestrator_with(ctx.ledger.clone(), Vec::new(), Shutdown::new())
        .await
        .migrate_content(&snapshot, &[])
        .await
        .unwrap();
    assert_eq!(report.pending_uploads, 1);
    assert!(!report.is_complete());
    assert!(ctx.state("channels").await.has(1));

    let saved: Vec<String> =
        serde_json::from_slice(&std::fs::read(ctx.queue_file()).unwrap()).unwrap();
    assert_eq!(saved, vec!["channel:1|1"]);

    let mut queue = AssetTransferQueue::new(
        ctx.queue_file(),
        ctx.config.destination.uploads_dir.clone(),
        Arc::new(UploadPool::new(vec![ctx.storage.clone()])),
        Arc::new(Metrics::new()),
    );
    queue.load_from_file(&ctx.queue_file()).await.unwrap();
    let drained = queue.drain().await.unwrap();

    assert_eq!(drained.uploaded, 1);
    assert!(ctx.storage.exists("channel:1/1").await.unwrap());
    let saved: Vec<String> =
        serde_json::from_slice(&std::fs::read(ctx.queue_file()).unwrap()).unwrap();
    assert!(saved.is_empty());
}

#[tokio::test]
async fn test_unwritable_uploads_dir_keeps_asset_pending() {
    let ctx = TestContext::new();
    let mut source = channel(1);
    source.avatar = Some(ctx.cached_asset(700, b"avatar"));
    let snapshot = Snapshot {
        channels: vec![source],
        ..Default::default()
    };

    let blocker = ctx.config.destination.uploads_dir.clone();
    std::fs::write(&blocker, b"not a directory").unwrap();

    let report = ctx
        .orchestrator()
        .await
        .migrate_content(&snapshot, &[])
        .await
        .unwrap();
    assert!(ctx.state("channels").await.has(1));
    assert_eq!(report.pending_uploads, 1);
    assert!(!report.is_complete());

    let saved: Vec<serde_json::Value> =
        serde_json::from_slice(&std::fs::read(ctx.queue_file()).unwrap()).unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0]["key"], "channel:1|1");

    // next run skips the channel but still delivers its avatar
    std::fs::remove_file(&blocker).unwrap();
    let report = ctx
        .orchestrator()
        .await
        .migrate_content(&snapshot, &[])
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.pending_uploads, 0);
    assert_eq!(ctx.ledger.batch_count().await, 1);
    assert_eq!(
        ctx.storage.download("channel:1/1").await.unwrap().as_ref(),
        b"avatar"
    );
}
