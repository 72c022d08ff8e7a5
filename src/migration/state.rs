//! Per-stage id mapping and failure set
//!
//! Stored as `{ "idsMapEntries": [[old, new], ...], "failedMigrations": [old, ...] }`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;

use crate::persist;
use crate::snapshot::EntityId;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("State file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Source id {source_id} is already mapped to {existing}, refusing to remap to {new}")]
    Remap {
        source_id: EntityId,
        existing: EntityId,
        new: EntityId,
    },

    #[error("Source id {0} is already migrated and cannot be marked failed")]
    AlreadyMigrated(EntityId),
}

pub type Result<T> = std::result::Result<T, StateError>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationState {
    ids_map: BTreeMap<EntityId, EntityId>,
    failed: BTreeSet<EntityId>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateFile {
    #[serde(default)]
    ids_map_entries: Vec<(EntityId, EntityId)>,
    #[serde(default)]
    failed_migrations: Vec<EntityId>,
}

impl MigrationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, source_id: EntityId) -> bool {
        self.ids_map.contains_key(&source_id)
    }

    pub fn destination_id(&self, source_id: EntityId) -> Option<EntityId> {
        self.ids_map.get(&source_id).copied()
    }

    /// Map `source_id` to `destination_id`, clearing any earlier failure.
    /// Recording the same pair twice is a no-op; a different target is an error.
    pub fn record(&mut self, source_id: EntityId, destination_id: EntityId) -> Result<()> {
        if let Some(&existing) = self.ids_map.get(&source_id) {
            if existing != destination_id {
                return Err(StateError::Remap {
                    source_id,
                    existing,
                    new: destination_id,
                });
            }
            return Ok(());
        }

        self.ids_map.insert(source_id, destination_id);
        self.failed.remove(&source_id);
        Ok(())
    }

    pub fn mark_failed(&mut self, source_id: EntityId) -> Result<()> {
        if self.has(source_id) {
            return Err(StateError::AlreadyMigrated(source_id));
        }
        self.failed.insert(source_id);
        Ok(())
    }

    pub fn ids_map(&self) -> &BTreeMap<EntityId, EntityId> {
        &self.ids_map
    }

    pub fn failed(&self) -> &BTreeSet<EntityId> {
        &self.failed
    }

    pub fn len(&self) -> usize {
        self.ids_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids_map.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "idsMapEntries": self.ids_map.iter().map(|(k, v)| [*k, *v]).collect::<Vec<_>>(),
            "failedMigrations": self.failed.iter().collect::<Vec<_>>(),
        })
    }

    pub fn from_json(value: serde_json::Value) -> serde_json::Result<Self> {
        let file: StateFile = serde_json::from_value(value)?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: StateFile) -> Self {
        let ids_map: BTreeMap<_, _> = file.ids_map_entries.into_iter().collect();
        // a mapped id wins over a stale failure entry
        let failed = file
            .failed_migrations
            .into_iter()
            .filter(|id| !ids_map.contains_key(id))
            .collect();
        Self { ids_map, failed }
    }

    fn to_file(&self) -> StateFile {
        StateFile {
            ids_map_entries: self.ids_map.iter().map(|(k, v)| (*k, *v)).collect(),
            failed_migrations: self.failed.iter().copied().collect(),
        }
    }

    /// Load a stage state, empty when the file does not exist yet
    pub async fn load(path: &Path) -> Result<Self> {
        let file: Option<StateFile> =
            persist::read_json(path)
                .await
                .map_err(|source| StateError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
        Ok(file.map(Self::from_file).unwrap_or_default())
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        persist::write_json_atomic(path, &self.to_file())
            .await
            .map_err(|source| StateError::Io {
                path: path.display().to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_and_fail() {
        let mut state = MigrationState::new();
        state.mark_failed(3).unwrap();
        assert!(!state.has(3));

        state.record(3, 30).unwrap();
        assert!(state.has(3));
        assert_eq!(state.destination_id(3), Some(30));
        assert!(state.failed().is_empty());

        assert!(matches!(state.mark_failed(3), Err(StateError::AlreadyMigrated(3))));
    }

    #[test]
    fn test_map_is_never_overwritten() {
        let mut state = MigrationState::new();
        state.record(1, 10).unwrap();
        state.record(1, 10).unwrap();

        let result = state.record(1, 11);
        assert!(matches!(result, Err(StateError::Remap { existing: 10, .. })));
        assert_eq!(state.destination_id(1), Some(10));
    }

    #[test]
    fn test_json_layout() {
        let mut state = MigrationState::new();
        state.record(5, 50).unwrap();
        state.mark_failed(6).unwrap();

        let json = state.to_json();
        assert_eq!(json["idsMapEntries"], serde_json::json!([[5, 50]]));
        assert_eq!(json["failedMigrations"], serde_json::json!([6]));

        assert_eq!(MigrationState::from_json(json).unwrap(), state);
    }

    #[test]
    fn test_from_json_drops_failures_that_are_mapped() {
        let state = MigrationState::from_json(serde_json::json!({
            "idsMapEntries": [[1, 2]],
            "failedMigrations": [1, 4]
        }))
        .unwrap();
        assert_eq!(state.failed().iter().copied().collect::<Vec<_>>(), vec![4]);
    }

    #[tokio::test]
    async fn test_load_missing_then_save() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("results").join("channels.json");

        let mut state = MigrationState::load(&path).await.unwrap();
        assert!(state.is_empty());

        state.record(1, 100).unwrap();
        state.save(&path).await.unwrap();

        let loaded = MigrationState::load(&path).await.unwrap();
        assert_eq!(loaded, state);
    }
}
