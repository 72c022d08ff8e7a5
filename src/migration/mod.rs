//! Resumable batch migration of snapshot entities onto the destination ledger
//!
//! - [`MigrationState`]: per-stage id map and failure set, saved after every chunk
//! - [`BatchMigrator`]: chunking, submission and positional reconciliation
//! - [`EntityMigration`]: per-entity call construction (categories, channels,
//!   videos, members)
//! - [`MigrationOrchestrator`]: runs stages in dependency order
//!
//! Per-entity failures are data ([`batch::EntityOutcome`]); [`MigrationError`]
//! is reserved for conditions that must stop the run.

pub mod batch;
pub mod categories;
pub mod channels;
pub mod fees;
pub mod members;
pub mod orchestrator;
pub mod shutdown;
pub mod state;
pub mod strategy;
pub mod videos;

pub use batch::{BatchMigrator, BatchResult, EntityFailure, EntityOutcome, StageReport, reconcile};
pub use categories::CategoryMigration;
pub use channels::ChannelMigration;
pub use members::MemberMigration;
pub use orchestrator::{MigrationOrchestrator, RunReport};
pub use shutdown::Shutdown;
pub use state::{MigrationState, StateError};
pub use strategy::EntityMigration;
pub use videos::VideoMigration;

use thiserror::Error;

use crate::assets::{PrepareError, QueueError, StorageError};
use crate::http::HttpError;
use crate::ledger::LedgerError;
use crate::snapshot::{EntityId, SnapshotError};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Inconsistent batch result in stage {stage}: {reason}")]
    Inconsistent { stage: &'static str, reason: String },

    #[error(
        "Stage {stage}: entity {entity} references {reference_kind} {reference}, which is not migrated"
    )]
    MissingReference {
        stage: &'static str,
        entity: EntityId,
        reference_kind: &'static str,
        reference: EntityId,
    },

    #[error("Stage {stage} left {} entities unmigrated: {failed:?}", .failed.len())]
    StageFailed {
        stage: &'static str,
        failed: Vec<EntityId>,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Asset(#[from] PrepareError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Http(#[from] HttpError),
}

pub type Result<T> = std::result::Result<T, MigrationError>;
