use super::strategy::EntityMigration;
use super::Result;
use crate::assets::PreparedAsset;
use crate::ledger::{Call, CategoryKind, EntityKind};
use crate::snapshot::Category;

/// Channel or video categories; one creation call each, no assets
pub struct CategoryMigration {
    kind: CategoryKind,
    batch_size: usize,
}

impl CategoryMigration {
    pub fn new(kind: CategoryKind, batch_size: usize) -> Self {
        Self { kind, batch_size }
    }
}

impl EntityMigration for CategoryMigration {
    type Entity = Category;

    fn name(&self) -> &'static str {
        match self.kind {
            CategoryKind::Channel => "channelCategories",
            CategoryKind::Video => "videoCategories",
        }
    }

    fn kind(&self) -> EntityKind {
        self.kind.entity_kind()
    }

    fn calls_per_entity(&self) -> usize {
        1
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn prepare_calls(&self, category: &Category, _assets: &[PreparedAsset]) -> Result<Vec<Call>> {
        Ok(vec![Call::CreateCategory {
            kind: self.kind,
            name: category.name.clone(),
            description: category.description.clone(),
        }])
    }
}
