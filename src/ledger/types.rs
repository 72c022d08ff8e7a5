use serde::{Deserialize, Serialize};
use std::fmt;

use crate::snapshot::EntityId;

/// Entity families created on the destination ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    ChannelCategory,
    VideoCategory,
    Channel,
    Video,
    Member,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::ChannelCategory => "channel_category",
            EntityKind::VideoCategory => "video_category",
            EntityKind::Channel => "channel",
            EntityKind::Video => "video",
            EntityKind::Member => "member",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryKind {
    Channel,
    Video,
}

impl CategoryKind {
    pub fn entity_kind(self) -> EntityKind {
        match self {
            CategoryKind::Channel => EntityKind::ChannelCategory,
            CategoryKind::Video => EntityKind::VideoCategory,
        }
    }
}

/// Declared asset slot attached to a creation call; the ledger allocates
/// one destination object per slot, in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetUpload {
    pub name: String,
    pub size: u64,
    pub hash: String,
}

/// One remote call inside a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum Call {
    TransferFunds {
        to: String,
        amount: u128,
    },
    CreateCategory {
        kind: CategoryKind,
        name: String,
        description: Option<String>,
    },
    CreateChannel {
        owner: String,
        title: String,
        description: Option<String>,
        is_public: bool,
        language: Option<String>,
        category: Option<EntityId>,
        assets: Vec<AssetUpload>,
    },
    CreateVideo {
        owner: String,
        channel: EntityId,
        title: String,
        description: Option<String>,
        duration: Option<u32>,
        is_public: bool,
        language: Option<String>,
        category: Option<EntityId>,
        assets: Vec<AssetUpload>,
    },
    CreateMember {
        handle: String,
        root_account: String,
        controller_account: String,
        name: Option<String>,
        about: Option<String>,
        avatar_uri: Option<String>,
    },
}

impl Call {
    /// Calls executed on behalf of another account; the ledger reports a
    /// `Dispatched` confirmation for each of them
    pub fn is_dispatched(&self) -> bool {
        matches!(self, Call::CreateChannel { .. } | Call::CreateVideo { .. })
    }
}

/// Events returned by a batch submission, in emission order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    FundsTransferred {
        to: String,
        amount: u128,
    },
    EntityCreated {
        kind: EntityKind,
        id: EntityId,
        /// Destination bucket holding the entity's assets
        #[serde(default)]
        bucket: Option<String>,
        /// Allocated object ids, one per declared asset slot
        #[serde(default)]
        object_ids: Vec<EntityId>,
    },
    Dispatched {
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
    BatchInterrupted {
        index: usize,
        #[serde(default)]
        error: Option<String>,
    },
}
