use super::fees::storage_fee;
use super::strategy::{EntityMigration, asset_uploads, resolve_reference};
use super::{MigrationState, Result};
use crate::assets::{AssetSlot, PreparedAsset};
use crate::config::FeesConfig;
use crate::ledger::{Call, EntityKind};
use crate::snapshot::Channel;

/// Channels with avatar and cover photo
///
/// Each channel is a fee transfer to its owner followed by the creation call
/// dispatched as that owner.
pub struct ChannelMigration<'a> {
    categories: &'a MigrationState,
    fees: FeesConfig,
    batch_size: usize,
}

impl<'a> ChannelMigration<'a> {
    pub fn new(categories: &'a MigrationState, fees: FeesConfig, batch_size: usize) -> Self {
        Self {
            categories,
            fees,
            batch_size,
        }
    }
}

impl EntityMigration for ChannelMigration<'_> {
    type Entity = Channel;

    fn name(&self) -> &'static str {
        "channels"
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Channel
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

    fn extract_assets(&self, channel: &Channel) -> Vec<AssetSlot> {
        vec![
            ("avatar", channel.avatar.clone()),
            ("coverPhoto", channel.cover_photo.clone()),
        ]
    }

    fn prepare_calls(&self, channel: &Channel, assets: &[PreparedAsset]) -> Result<Vec<Call>> {
        let category = channel
            .category_id
            .map(|id| {
                resolve_reference(self.name(), channel.id, "channel category", self.categories, id)
            })
            .transpose()?;

        Ok(vec![
            Call::TransferFunds {
                to: channel.owner_account.clone(),
                amount: storage_fee(&self.fees, assets),
            },
            Call::CreateChannel {
                owner: channel.owner_account.clone(),
                title: channel.title.clone(),
                description: channel.description.clone(),
                is_public: channel.is_public,
                language: channel.language.clone(),
                category,
                assets: asset_uploads(assets),
            },
        ])
    }
}
