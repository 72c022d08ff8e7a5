//! In-process ledger for tests and dry runs
//!
//! Executes calls in order, assigns sequential ids per entity kind and
//! sequential object ids for declared assets. Failures are injected per
//! submission with [`MockLedger::interrupt_next_batch_at`] and
//! [`MockLedger::reject_next_dispatch_at`].

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

use super::{Call, EntityKind, LedgerClient, LedgerError, LedgerEvent, Result};
use crate::snapshot::EntityId;

#[derive(Debug, Default)]
struct MockState {
    next_ids: HashMap<EntityKind, EntityId>,
    next_object_id: EntityId,
    batches: Vec<Vec<Call>>,
    interrupt_at: Option<usize>,
    reject_dispatch: HashSet<usize>,
    fail_submission: bool,
}

impl MockState {
    fn allocate(&mut self, kind: EntityKind) -> EntityId {
        let next = self.next_ids.entry(kind).or_insert(1);
        let id = *next;
        *next += 1;
        id
    }

    fn allocate_objects(&mut self, count: usize) -> Vec<EntityId> {
        (0..count)
            .map(|_| {
                self.next_object_id += 1;
                self.next_object_id
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct MockLedger {
    state: Mutex<MockState>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next submission stop at call `index`
    pub async fn interrupt_next_batch_at(&self, index: usize) {
        self.state.lock().await.interrupt_at = Some(index);
    }

    /// Make the dispatched call at `index` of the next submission report failure
    pub async fn reject_next_dispatch_at(&self, index: usize) {
        self.state.lock().await.reject_dispatch.insert(index);
    }

    /// Make the next submission fail at the transport level
    pub async fn fail_next_submission(&self) {
        self.state.lock().await.fail_submission = true;
    }

    pub async fn submitted_batches(&self) -> Vec<Vec<Call>> {
        self.state.lock().await.batches.clone()
    }

    pub async fn batch_count(&self) -> usize {
        self.state.lock().await.batches.len()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn submit_batch(&self, calls: Vec<Call>) -> Result<Vec<LedgerEvent>> {
        let mut state = self.state.lock().await;

        if std::mem::take(&mut state.fail_submission) {
            return Err(LedgerError::Transport("mock transport failure".to_string()));
        }

        let interrupt_at = state.interrupt_at.take();
        let reject = std::mem::take(&mut state.reject_dispatch);
        state.batches.push(calls.clone());

        let mut events = Vec::new();
        for (index, call) in calls.iter().enumerate() {
            if interrupt_at == Some(index) {
                events.push(LedgerEvent::BatchInterrupted {
                    index,
                    error: Some("mock interruption".to_string()),
                });
                break;
            }

            if call.is_dispatched() && reject.contains(&index) {
                events.push(LedgerEvent::Dispatched {
                    ok: false,
                    error: Some("mock dispatch rejection".to_string()),
                });
                continue;
            }

            match call {
                Call::TransferFunds { to, amount } => {
                    events.push(LedgerEvent::FundsTransferred {
                        to: to.clone(),
                        amount: *amount,
                    });
                }
                Call::CreateCategory { kind, .. } => {
                    let kind = kind.entity_kind();
                    let id = state.allocate(kind);
                    events.push(LedgerEvent::EntityCreated {
                        kind,
                        id,
                        bucket: None,
                        object_ids: Vec::new(),
                    });
                }
                Call::CreateChannel { assets, .. } => {
                    let id = state.allocate(EntityKind::Channel);
                    let object_ids = state.allocate_objects(assets.len());
                    events.push(LedgerEvent::EntityCreated {
                        kind: EntityKind::Channel,
                        id,
                        bucket: Some(format!("channel:{id}")),
                        object_ids,
                    });
                }
                Call::CreateVideo {
                    channel, assets, ..
                } => {
                    let id = state.allocate(EntityKind::Video);
                    let object_ids = state.allocate_objects(assets.len());
                    events.push(LedgerEvent::EntityCreated {
                        kind: EntityKind::Video,
                        id,
                        bucket: Some(format!("channel:{channel}")),
                        object_ids,
                    });
                }
                Call::CreateMember { .. } => {
                    let id = state.allocate(EntityKind::Member);
                    events.push(LedgerEvent::EntityCreated {
                        kind: EntityKind::Member,
                        id,
                        bucket: None,
                        object_ids: Vec::new(),
                    });
                }
            }

            if call.is_dispatched() {
                events.push(LedgerEvent::Dispatched {
                    ok: true,
                    error: None,
                });
            }
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::CategoryKind;

    fn category(name: &str) -> Call {
        Call::CreateCategory {
            kind: CategoryKind::Channel,
            name: name.to_string(),
            description: None,
        }
    }

    #[tokio::test]
    async fn test_sequential_ids() {
        let ledger = MockLedger::new();
        let events = ledger
            .submit_batch(vec![category("a"), category("b")])
            .await
            .unwrap();

        let ids: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                LedgerEvent::EntityCreated { id, .. } => Some(*id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(ledger.batch_count().await, 1);
    }

    #[tokio::test]
    async fn test_interrupt_is_one_shot() {
        let ledger = MockLedger::new();
        ledger.interrupt_next_batch_at(1).await;

        let events = ledger
            .submit_batch(vec![category("a"), category("b"), category("c")])
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], LedgerEvent::BatchInterrupted { index: 1, .. }));

        let events = ledger.submit_batch(vec![category("d")]).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let ledger = MockLedger::new();
        ledger.fail_next_submission().await;

        assert!(ledger.submit_batch(vec![category("a")]).await.is_err());
        assert!(ledger.submit_batch(vec![category("a")]).await.is_ok());
        assert_eq!(ledger.batch_count().await, 1);
    }
}
