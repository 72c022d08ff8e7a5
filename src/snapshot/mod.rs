//! Source-system snapshot model
//!
//! A snapshot is a read-only, point-in-time export of every entity the
//! migration consumes. It is produced by [`fetch::SnapshotFetcher`] (or any
//! other tool emitting the same JSON) and loaded whole into memory.
//!
//! Ids are numeric but travel as strings in the export (`"id": "42"`);
//! plain JSON numbers are accepted too.

pub mod fetch;
mod ids;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub use fetch::SnapshotFetcher;

/// Numeric entity id in either system
pub type EntityId = u64;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to read snapshot {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed snapshot {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Snapshot query failed: {0}")]
    Query(#[from] crate::http::HttpError),
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Anything carrying a stable source id
pub trait SourceEntity {
    fn id(&self) -> EntityId;
}

/// Binary asset stored in the source system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDescriptor {
    /// Source storage object id; also the file name in the local asset cache
    #[serde(with = "ids")]
    pub object_id: EntityId,
    pub size: u64,
    /// Hex-encoded SHA-256 of the content
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    #[serde(with = "ids")]
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    #[serde(with = "ids")]
    pub id: EntityId,
    pub owner_account: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_public: bool,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default, with = "ids::option")]
    pub category_id: Option<EntityId>,
    #[serde(default)]
    pub avatar: Option<AssetDescriptor>,
    #[serde(default)]
    pub cover_photo: Option<AssetDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    #[serde(with = "ids")]
    pub id: EntityId,
    #[serde(with = "ids")]
    pub channel_id: EntityId,
    #[serde(default, with = "ids::option")]
    pub category_id: Option<EntityId>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Seconds
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default = "default_true")]
    pub is_public: bool,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<AssetDescriptor>,
    #[serde(default)]
    pub media: Option<AssetDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    #[serde(with = "ids")]
    pub id: EntityId,
    pub handle: String,
    pub root_account: String,
    pub controller_account: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub avatar_uri: Option<String>,
}

fn default_true() -> bool {
    true
}

macro_rules! impl_source_entity {
    ($($ty:ty),*) => {
        $(impl SourceEntity for $ty {
            fn id(&self) -> EntityId {
                self.id
            }
        })*
    };
}

impl_source_entity!(Category, Channel, Video, Member);

/// Whole source export
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// When the export was taken, if the producer recorded it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub channel_categories: Vec<Category>,
    #[serde(default)]
    pub video_categories: Vec<Category>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub videos: Vec<Video>,
    #[serde(default)]
    pub members: Vec<Member>,
}

impl Snapshot {
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|source| SnapshotError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let snapshot: Snapshot =
            serde_json::from_slice(&bytes).map_err(|source| SnapshotError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        tracing::info!(
            path = %path.display(),
            taken_at = ?snapshot.taken_at,
            channel_categories = snapshot.channel_categories.len(),
            video_categories = snapshot.video_categories.len(),
            channels = snapshot.channels.len(),
            videos = snapshot.videos.len(),
            members = snapshot.members.len(),
            "Snapshot loaded"
        );

        Ok(snapshot)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let io_err = |source| SnapshotError::Io {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let json = serde_json::to_vec_pretty(self).map_err(|source| SnapshotError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        tokio::fs::write(path, json).await.map_err(io_err)
    }

    /// Channels to migrate; an empty selection means all of them
    pub fn select_channels(&self, selection: &[EntityId]) -> Vec<Channel> {
        self.channels
            .iter()
            .filter(|c| selection.is_empty() || selection.contains(&c.id))
            .cloned()
            .collect()
    }

    /// Videos belonging to the given channels
    pub fn videos_of(&self, channels: &[Channel]) -> Vec<Video> {
        self.videos
            .iter()
            .filter(|v| channels.iter().any(|c| c.id == v.channel_id))
            .cloned()
            .collect()
    }
}
