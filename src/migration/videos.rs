use std::collections::HashMap;

use super::fees::storage_fee;
use super::strategy::{EntityMigration, asset_uploads, resolve_reference};
use super::{MigrationError, MigrationState, Result};
use crate::assets::{AssetSlot, PreparedAsset};
use crate::config::FeesConfig;
use crate::ledger::{Call, EntityKind};
use crate::snapshot::{Channel, EntityId, Video};

/// Videos with thumbnail and media, created as their channel's owner
pub struct VideoMigration<'a> {
    channels: &'a MigrationState,
    categories: &'a MigrationState,
    /// Source channel id -> owner account
    owners: HashMap<EntityId, String>,
    fees: FeesConfig,
    batch_size: usize,
}

impl<'a> VideoMigration<'a> {
    pub fn new(
        channels: &'a MigrationState,
        categories: &'a MigrationState,
        source_channels: &[Channel],
        fees: FeesConfig,
        batch_size: usize,
    ) -> Self {
        let owners = source_channels
            .iter()
            .map(|c| (c.id, c.owner_account.clone()))
            .collect();

        Self {
            channels,
            categories,
            owners,
            fees,
            batch_size,
        }
    }
}

impl EntityMigration for VideoMigration<'_> {
    type Entity = Video;

    fn name(&self) -> &'static str {
        "videos"
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Video
    }

    fn calls_per_entity(&self) -> usize {
        2
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn confirms_dispatch(&self) -> bool {
        true
    }

    fn extract_assets(&self, video: &Video) -> Vec<AssetSlot> {
        vec![
            ("thumbnail", video.thumbnail.clone()),
            ("media", video.media.clone()),
        ]
    }

    fn prepare_calls(&self, video: &Video, assets: &[PreparedAsset]) -> Result<Vec<Call>> {
        let stage = self.name();
        let channel = resolve_reference(stage, video.id, "channel", self.channels, video.channel_id)?;
        let owner = self
            .owners
            .get(&video.channel_id)
            .cloned()
            .ok_or(MigrationError::MissingReference {
                stage,
                entity: video.id,
                reference_kind: "channel owner",
                reference: video.channel_id,
            })?;
        let category = video
            .category_id
            .map(|id| resolve_reference(stage, video.id, "video category", self.categories, id))
            .transpose()?;

        Ok(vec![
            Call::TransferFunds {
                to: owner.clone(),
                amount: storage_fee(&self.fees, assets),
            },
            Call::CreateVideo {
                owner,
                channel,
                title: video.title.clone(),
                description: video.description.clone(),
                duration: video.duration,
                is_public: video.is_public,
                language: video.language.clone(),
                category,
                assets: asset_uploads(assets),
            },
        ])
    }
}
