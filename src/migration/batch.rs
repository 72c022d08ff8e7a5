//! Chunked batch submission and positional reconciliation
//!
//! Entity `i` of a chunk owns calls `[i * cpe, (i + 1) * cpe)` where `cpe` is
//! the strategy's calls per entity. The ledger stops at the first failing
//! call `K`, so the first `K / cpe` entities ran completely. Strategies whose
//! last call is dispatched on behalf of another account additionally get a
//! `Dispatched` confirmation per executed entity, and that confirmation
//! decides whether the entity succeeded.

use futures::future::try_join_all;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use super::shutdown::Shutdown;
use super::strategy::EntityMigration;
use super::{MigrationError, MigrationState, Result};
use crate::assets::{AssetKey, AssetPreparer, AssetTransferQueue, PreparedAsset};
use crate::ledger::{Call, EntityKind, LedgerClient, LedgerEvent};
use crate::observability::Metrics;
use crate::snapshot::{EntityId, SourceEntity};

/// Destination entity reported by an `EntityCreated` event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedEntity {
    pub id: EntityId,
    pub bucket: Option<String>,
    pub object_ids: Vec<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub ok: bool,
    pub error: Option<String>,
}

/// Events of one submission, narrowed to what reconciliation needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Created entities of the stage's kind, in emission order
    pub created: Vec<CreatedEntity>,
    pub interrupted_at: Option<usize>,
    pub confirmations: Vec<Confirmation>,
}

impl BatchResult {
    pub fn from_events(kind: EntityKind, events: Vec<LedgerEvent>) -> Self {
        let mut result = BatchResult::default();

        for event in events {
            match event {
                LedgerEvent::EntityCreated {
                    kind: created_kind,
                    id,
                    bucket,
                    object_ids,
                } if created_kind == kind => result.created.push(CreatedEntity {
                    id,
                    bucket,
                    object_ids,
                }),
                LedgerEvent::Dispatched { ok, error } => {
                    result.confirmations.push(Confirmation { ok, error })
                }
                LedgerEvent::BatchInterrupted { index, .. } => {
                    result.interrupted_at.get_or_insert(index);
                }
                _ => {}
            }
        }

        result
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The batch stopped before the entity's last call
    NotExecuted,
    /// The entity's last call ran but reported failure
    Rejected(Option<String>),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NotExecuted => f.write_str("batch interrupted before the entity ran"),
            FailureReason::Rejected(Some(e)) => write!(f, "rejected: {e}"),
            FailureReason::Rejected(None) => f.write_str("rejected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFailure {
    pub position: usize,
    pub reason: FailureReason,
}

pub type EntityOutcome = std::result::Result<CreatedEntity, EntityFailure>;

/// Attribute a batch result to the chunk's entities by position
///
/// Fails with [`MigrationError::Inconsistent`] whenever the events cannot be
/// matched to entities unambiguously.
pub fn reconcile(
    stage: &'static str,
    result: BatchResult,
    chunk_len: usize,
    calls_per_entity: usize,
    confirms_dispatch: bool,
) -> Result<Vec<EntityOutcome>> {
    let inconsistent = |reason: String| MigrationError::Inconsistent { stage, reason };

    if calls_per_entity == 0 {
        return Err(inconsistent("zero calls per entity".to_string()));
    }

    let total_calls = chunk_len * calls_per_entity;
    let migrated = match result.interrupted_at {
        Some(k) if k > total_calls => {
            return Err(inconsistent(format!(
                "interrupted at call {k} but the batch had {total_calls} calls"
            )));
        }
        Some(k) => k / calls_per_entity,
        None => chunk_len,
    };

    if confirms_dispatch && result.confirmations.len() != migrated {
        return Err(inconsistent(format!(
            "{} dispatch confirmations for {migrated} executed entities",
            result.confirmations.len()
        )));
    }

    let confirmed = |i: usize| !confirms_dispatch || result.confirmations[i].ok;
    let succeeded = (0..migrated).filter(|&i| confirmed(i)).count();
    if result.created.len() != succeeded {
        return Err(inconsistent(format!(
            "{} created events for {succeeded} succeeded entities",
            result.created.len()
        )));
    }

    let mut created = result.created.into_iter();
    let mut outcomes = Vec::with_capacity(chunk_len);
    for position in 0..chunk_len {
        let outcome = if position >= migrated {
            Err(EntityFailure {
                position,
                reason: FailureReason::NotExecuted,
            })
        } else if !confirmed(position) {
            Err(EntityFailure {
                position,
                reason: FailureReason::Rejected(result.confirmations[position].error.clone()),
            })
        } else {
            match created.next() {
                Some(entity) => Ok(entity),
                None => return Err(inconsistent("ran out of created events".to_string())),
            }
        };
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

/// What one stage did in this run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub stage: &'static str,
    pub candidates: usize,
    pub already_migrated: usize,
    pub migrated: usize,
    pub failed: Vec<EntityId>,
    /// Stopped early on a shutdown request
    pub interrupted: bool,
}

impl StageReport {
    fn new(stage: &'static str, candidates: usize, already_migrated: usize) -> Self {
        Self {
            stage,
            candidates,
            already_migrated,
            ..Default::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && !self.interrupted
    }
}

/// Drives one strategy over a list of entities, chunk by chunk
pub struct BatchMigrator<'a> {
    ledger: &'a dyn LedgerClient,
    preparer: &'a AssetPreparer,
    queue: &'a mut AssetTransferQueue,
    metrics: &'a Metrics,
    shutdown: &'a Shutdown,
}

impl<'a> BatchMigrator<'a> {
    pub fn new(
        ledger: &'a dyn LedgerClient,
        preparer: &'a AssetPreparer,
        queue: &'a mut AssetTransferQueue,
        metrics: &'a Metrics,
        shutdown: &'a Shutdown,
    ) -> Self {
        Self {
            ledger,
            preparer,
            queue,
            metrics,
            shutdown,
        }
    }

    /// Migrate every entity not yet in `state`, saving `state` to
    /// `state_path` after each chunk
    pub async fn run<M: EntityMigration>(
        &mut self,
        migration: &M,
        entities: &[M::Entity],
        state: &mut MigrationState,
        state_path: &Path,
    ) -> Result<StageReport> {
        let stage = migration.name();
        let pending: Vec<&M::Entity> = entities.iter().filter(|e| !state.has(e.id())).collect();
        let mut report = StageReport::new(stage, entities.len(), entities.len() - pending.len());

        if pending.is_empty() {
            info!(stage, already_migrated = report.already_migrated, "Nothing to migrate");
            return Ok(report);
        }

        let batch_size = migration.batch_size().max(1);
        let chunk_count = pending.len().div_ceil(batch_size);
        info!(
            stage,
            pending = pending.len(),
            already_migrated = report.already_migrated,
            chunks = chunk_count,
            "Starting stage"
        );

        for (index, chunk) in pending.chunks(batch_size).enumerate() {
            if self.shutdown.is_cancelled() {
                warn!(stage, chunk = index, "Shutdown requested, stopping before next chunk");
                report.interrupted = true;
                break;
            }

            self.migrate_chunk(migration, chunk, state, state_path, &mut report)
                .await?;

            info!(
                stage,
                chunk = index + 1,
                of = chunk_count,
                migrated = report.migrated,
                failed = report.failed.len(),
                "Chunk settled"
            );
        }

        if !report.failed.is_empty() {
            error!(stage, failed = ?report.failed, "Stage finished with failed entities");
        }

        Ok(report)
    }

    async fn migrate_chunk<M: EntityMigration>(
        &mut self,
        migration: &M,
        chunk: &[&M::Entity],
        state: &mut MigrationState,
        state_path: &Path,
        report: &mut StageReport,
    ) -> Result<()> {
        let stage = migration.name();
        let calls_per_entity = migration.calls_per_entity();

        let prepared: Vec<Vec<PreparedAsset>> = try_join_all(
            chunk
                .iter()
                .map(|entity| self.preparer.prepare_all(migration.extract_assets(entity))),
        )
        .await?;

        let mut calls: Vec<Call> = Vec::with_capacity(chunk.len() * calls_per_entity);
        for (entity, assets) in chunk.iter().zip(&prepared) {
            let entity_calls = migration.prepare_calls(entity, assets)?;
            if entity_calls.len() != calls_per_entity {
                return Err(MigrationError::Inconsistent {
                    stage,
                    reason: format!(
                        "entity {} produced {} calls, expected {calls_per_entity}",
                        entity.id(),
                        entity_calls.len()
                    ),
                });
            }
            calls.extend(entity_calls);
        }

        self.metrics.batch_submitted();
        let events = match self.ledger.submit_batch(calls).await {
            Ok(events) => events,
            Err(e) => {
                // outcome unknown; keep what earlier chunks established
                state.save(state_path).await?;
                return Err(e.into());
            }
        };

        let result = BatchResult::from_events(migration.kind(), events);
        let outcomes = reconcile(
            stage,
            result,
            chunk.len(),
            calls_per_entity,
            migration.confirms_dispatch(),
        )?;
        check_allocations(stage, &outcomes, &prepared)?;

        let mut transfers: Vec<(AssetKey, PathBuf)> = Vec::new();
        for ((entity, assets), outcome) in chunk.iter().zip(prepared).zip(outcomes) {
            let source_id = entity.id();
            match outcome {
                Ok(created) => {
                    state.record(source_id, created.id)?;
                    self.metrics.entity_migrated();
                    report.migrated += 1;

                    if let Some(bucket) = created.bucket {
                        for (asset, object_id) in assets.into_iter().zip(created.object_ids) {
                            transfers.push((AssetKey::new(bucket.clone(), object_id), asset.local_path));
                        }
                    }
                }
                Err(failure) => {
                    error!(
                        stage,
                        source_id,
                        position = failure.position,
                        reason = %failure.reason,
                        "Entity migration failed"
                    );
                    state.mark_failed(source_id)?;
                    self.metrics.entity_failed();
                    report.failed.push(source_id);
                }
            }
        }

        let enqueued = self.enqueue_all(transfers).await;
        state.save(state_path).await?;
        enqueued?;

        if !self.queue.is_empty() {
            self.queue.drain().await?;
        }

        Ok(())
    }

    async fn enqueue_all(&mut self, transfers: Vec<(AssetKey, PathBuf)>) -> Result<()> {
        for (key, path) in transfers {
            self.queue.enqueue(key, &path).await?;
        }
        Ok(())
    }
}

/// Every succeeded entity must get exactly one object id per declared asset
fn check_allocations(
    stage: &'static str,
    outcomes: &[EntityOutcome],
    prepared: &[Vec<PreparedAsset>],
) -> Result<()> {
    for (outcome, assets) in outcomes.iter().zip(prepared) {
        let Ok(created) = outcome else { continue };

        if created.object_ids.len() != assets.len() {
            return Err(MigrationError::Inconsistent {
                stage,
                reason: format!(
                    "entity {} got {} object ids for {} declared assets",
                    created.id,
                    created.object_ids.len(),
                    assets.len()
                ),
            });
        }
        if !assets.is_empty() && created.bucket.is_none() {
            return Err(MigrationError::Inconsistent {
                stage,
                reason: format!("entity {} has assets but no bucket", created.id),
            });
        }
    }
    Ok(())
}
