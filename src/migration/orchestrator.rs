//! Stage sequencing: `channelCategories -> videoCategories -> channels -> videos`,
//! or `members` on its own
//!
//! Each stage's state lives at `{results_dir}/{stage}.json`; downstream stages
//! read the upstream id maps. A stage that leaves failed entities stops the
//! pipeline with [`MigrationError::StageFailed`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::batch::{BatchMigrator, StageReport};
use super::shutdown::Shutdown;
use super::strategy::EntityMigration;
use super::{
    CategoryMigration, ChannelMigration, MemberMigration, MigrationError, MigrationState, Result,
    VideoMigration,
};
use crate::assets::{AssetPreparer, AssetTransferQueue, UploadPool};
use crate::config::{Config, FeesConfig, MigrationConfig};
use crate::http::HttpClient;
use crate::ledger::{CategoryKind, LedgerClient};
use crate::observability::Metrics;
use crate::snapshot::{EntityId, Snapshot};

/// Queue file for uploads still pending at the end of a run
pub fn pending_uploads_path(results_dir: &Path) -> PathBuf {
    results_dir.join("pending_uploads.json")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub stages: Vec<StageReport>,
    pub interrupted: bool,
    pub pending_uploads: usize,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        !self.interrupted
            && self.pending_uploads == 0
            && self.stages.iter().all(StageReport::is_complete)
    }

    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == name)
    }
}

pub struct MigrationOrchestrator {
    run_id: Uuid,
    settings: MigrationConfig,
    fees: FeesConfig,
    ledger: Arc<dyn LedgerClient>,
    preparer: AssetPreparer,
    queue: AssetTransferQueue,
    metrics: Arc<Metrics>,
    shutdown: Shutdown,
}

impl MigrationOrchestrator {
    pub fn new(
        config: &Config,
        ledger: Arc<dyn LedgerClient>,
        preparer: AssetPreparer,
        queue: AssetTransferQueue,
        metrics: Arc<Metrics>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            settings: config.migration.clone(),
            fees: config.fees.clone(),
            ledger,
            preparer,
            queue,
            metrics,
            shutdown,
        }
    }

    /// Wire distributors, upload endpoints and the resumed queue from config
    pub async fn from_config(
        config: &Config,
        ledger: Arc<dyn LedgerClient>,
        metrics: Arc<Metrics>,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let preparer = AssetPreparer::new(
            config.source.assets_dir.clone(),
            config.migration.max_asset_size,
            Arc::clone(&metrics),
        )
        .with_distributors(
            HttpClient::new(&config.http)?,
            config.source.distributor_endpoints.clone(),
        );

        let pool = UploadPool::from_endpoints(&config.destination.upload_endpoints, &config.http)?;
        let queue = AssetTransferQueue::open(
            pending_uploads_path(&config.migration.results_dir),
            config.destination.uploads_dir.clone(),
            Arc::new(pool),
            Arc::clone(&metrics),
        )
        .await?;

        Ok(Self::new(config, ledger, preparer, queue, metrics, shutdown))
    }

    pub fn state_path(&self, stage: &str) -> PathBuf {
        self.settings.results_dir.join(format!("{stage}.json"))
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn start(&self, pipeline: &'static str) -> RunReport {
        info!(
            run_id = %self.run_id,
            pipeline,
            results_dir = %self.settings.results_dir.display(),
            resumed_uploads = self.queue.len(),
            "Starting migration run"
        );
        RunReport {
            run_id: self.run_id,
            ..Default::default()
        }
    }

    pub fn queue(&self) -> &AssetTransferQueue {
        &self.queue
    }

    /// Categories, then the selected channels (all when `channel_ids` is
    /// empty), then their videos
    pub async fn migrate_content(
        &mut self,
        snapshot: &Snapshot,
        channel_ids: &[EntityId],
    ) -> Result<RunReport> {
        let mut run = self.start("content");

        let channel_categories =
            CategoryMigration::new(CategoryKind::Channel, self.settings.category_batch_size);
        let (report, channel_category_ids) = self
            .run_stage(&channel_categories, &snapshot.channel_categories)
            .await?;
        if !settle(&mut run, report)? {
            return self.finish(run).await;
        }

        let video_categories =
            CategoryMigration::new(CategoryKind::Video, self.settings.category_batch_size);
        let (report, video_category_ids) = self
            .run_stage(&video_categories, &snapshot.video_categories)
            .await?;
        if !settle(&mut run, report)? {
            return self.finish(run).await;
        }

        let channels = snapshot.select_channels(channel_ids);
        if !channel_ids.is_empty() && channels.len() < channel_ids.len() {
            warn!(
                requested = channel_ids.len(),
                found = channels.len(),
                "Some requested channels are not in the snapshot"
            );
        }
        let videos = snapshot.videos_of(&channels);

        let channel_migration = ChannelMigration::new(
            &channel_category_ids,
            self.fees.clone(),
            self.settings.channel_batch_size,
        );
        let (report, channel_ids_map) = self.run_stage(&channel_migration, &channels).await?;
        if !settle(&mut run, report)? {
            return self.finish(run).await;
        }

        let video_migration = VideoMigration::new(
            &channel_ids_map,
            &video_category_ids,
            &channels,
            self.fees.clone(),
            self.settings.video_batch_size,
        );
        let (report, _) = self.run_stage(&video_migration, &videos).await?;
        settle(&mut run, report)?;

        self.finish(run).await
    }

    pub async fn migrate_members(&mut self, snapshot: &Snapshot) -> Result<RunReport> {
        let mut run = self.start("members");
        let members = MemberMigration::new(self.settings.member_batch_size);
        let (report, _) = self.run_stage(&members, &snapshot.members).await?;
        settle(&mut run, report)?;
        self.finish(run).await
    }

    async fn run_stage<M: EntityMigration>(
        &mut self,
        migration: &M,
        entities: &[M::Entity],
    ) -> Result<(StageReport, MigrationState)> {
        let path = self.state_path(migration.name());
        let mut state = MigrationState::load(&path).await?;

        let mut migrator = BatchMigrator::new(
            self.ledger.as_ref(),
            &self.preparer,
            &mut self.queue,
            &self.metrics,
            &self.shutdown,
        );
        let report = migrator.run(migration, entities, &mut state, &path).await?;

        Ok((report, state))
    }

    /// Last upload attempt for this run; anything left stays in the queue file
    async fn finish(&mut self, mut run: RunReport) -> Result<RunReport> {
        if !run.interrupted && !self.queue.is_empty() {
            self.queue.drain().await?;
        }
        run.pending_uploads = self.queue.len();

        if run.pending_uploads > 0 {
            warn!(
                pending = run.pending_uploads,
                file = %self.queue.queue_file().display(),
                "Uploads still pending, rerun retry-uploads with this file"
            );
        }

        let metrics = self.metrics.snapshot();
        info!(
            run_id = %run.run_id,
            batches = metrics.batches_submitted,
            migrated = metrics.entities_migrated,
            failed = metrics.entities_failed,
            assets_skipped = metrics.assets_skipped,
            assets_uploaded = metrics.assets_uploaded,
            interrupted = run.interrupted,
            "Migration run finished"
        );

        Ok(run)
    }
}

/// Record a finished stage; `Ok(false)` means stop without error (shutdown)
fn settle(run: &mut RunReport, report: StageReport) -> Result<bool> {
    info!(
        stage = report.stage,
        candidates = report.candidates,
        already_migrated = report.already_migrated,
        migrated = report.migrated,
        failed = report.failed.len(),
        "Stage settled"
    );

    let interrupted = report.interrupted;
    if !report.failed.is_empty() {
        return Err(MigrationError::StageFailed {
            stage: report.stage,
            failed: report.failed,
        });
    }

    run.stages.push(report);
    if interrupted {
        run.interrupted = true;
        return Ok(false);
    }
    Ok(true)
}
