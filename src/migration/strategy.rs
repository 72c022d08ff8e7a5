use super::{MigrationError, MigrationState, Result};
use crate::assets::{AssetSlot, PreparedAsset};
use crate::ledger::{AssetUpload, Call, EntityKind};
use crate::snapshot::{EntityId, SourceEntity};

/// Entity-specific half of a migration stage
///
/// [`super::BatchMigrator`] owns chunking, submission and reconciliation;
/// a strategy only says how one entity becomes calls.
pub trait EntityMigration: Send + Sync {
    type Entity: SourceEntity + Send + Sync;

    /// Stage name, also the state file stem
    fn name(&self) -> &'static str;

    /// Kind of the `EntityCreated` events this stage produces
    fn kind(&self) -> EntityKind;

    /// Exact number of calls [`Self::prepare_calls`] returns per entity
    fn calls_per_entity(&self) -> usize;

    fn batch_size(&self) -> usize;

    /// Whether the last call per entity reports a `Dispatched` confirmation
    fn confirms_dispatch(&self) -> bool {
        false
    }

    /// Named asset slots of an entity, in declaration order
    fn extract_assets(&self, _entity: &Self::Entity) -> Vec<AssetSlot> {
        Vec::new()
    }

    /// Build the entity's calls; `assets` are the slots that verified locally
    fn prepare_calls(&self, entity: &Self::Entity, assets: &[PreparedAsset]) -> Result<Vec<Call>>;
}

/// Look up an upstream stage's destination id, failing hard when missing
pub fn resolve_reference(
    stage: &'static str,
    entity: EntityId,
    reference_kind: &'static str,
    upstream: &MigrationState,
    reference: EntityId,
) -> Result<EntityId> {
    upstream
        .destination_id(reference)
        .ok_or(MigrationError::MissingReference {
            stage,
            entity,
            reference_kind,
            reference,
        })
}

pub fn asset_uploads(assets: &[PreparedAsset]) -> Vec<AssetUpload> {
    assets
        .iter()
        .map(|asset| AssetUpload {
            name: asset.slot.to_string(),
            size: asset.descriptor.size,
            hash: asset.descriptor.hash.clone(),
        })
        .collect()
}
