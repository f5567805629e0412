//! Offline operation queue.
//!
//! A durable, capacity-bounded backlog of operations deferred while the
//! remote service is unreachable. Entries are keyed by `(entity_id, type)`
//! so the latest intent replaces any earlier one, kept in priority order
//! (`Push` > `Pull` > `Metadata`, oldest first within a priority), and the
//! lowest-priority oldest entry is evicted on overflow.

use crate::storage::{load_json, save_json, KvStore, StorageError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// KV blob holding the persisted queue
pub const QUEUE_KEY: &str = "offline_queue";

/// Default maximum number of queued operations
pub const DEFAULT_CAPACITY: usize = 100;

type Result<T> = std::result::Result<T, StorageError>;

/// Kind of deferred operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Push,
    Pull,
    Metadata,
}

impl OperationType {
    /// Higher runs first and survives eviction longer
    pub fn priority(self) -> u8 {
        match self {
            Self::Push => 3,
            Self::Pull => 2,
            Self::Metadata => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
            Self::Metadata => "metadata",
        }
    }
}

/// One deferred operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    pub id: String,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub entity_id: String,
    pub file_name: String,
    /// Unix timestamp in milliseconds
    pub queued_at: i64,
    pub priority: u8,
}

impl QueuedOperation {
    pub fn new(op_type: OperationType, entity_id: &str, file_name: &str) -> Self {
        Self::at(
            op_type,
            entity_id,
            file_name,
            chrono::Utc::now().timestamp_millis(),
        )
    }

    pub fn at(op_type: OperationType, entity_id: &str, file_name: &str, queued_at: i64) -> Self {
        Self {
            id: operation_id(op_type, entity_id),
            op_type,
            entity_id: entity_id.to_string(),
            file_name: file_name.to_string(),
            queued_at,
            priority: op_type.priority(),
        }
    }
}

/// Stable id for the `(type, entity)` dedup key
pub fn operation_id(op_type: OperationType, entity_id: &str) -> String {
    format!("{}:{}", op_type.as_str(), entity_id)
}

/// Result of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub remaining: usize,
}

/// Durable bounded priority backlog
pub struct OfflineQueue {
    store: Arc<dyn KvStore>,
    capacity: usize,
    entries: Mutex<Vec<QueuedOperation>>,
    draining: AtomicBool,
}

impl OfflineQueue {
    /// Open the queue, restoring any persisted backlog
    pub fn open(store: Arc<dyn KvStore>, capacity: usize) -> Result<Self> {
        let mut entries: Vec<QueuedOperation> = load_json(store.as_ref(), QUEUE_KEY)?;
        sort_by_priority(&mut entries);
        entries.truncate(capacity.max(1));

        Ok(Self {
            store,
            capacity: capacity.max(1),
            entries: Mutex::new(entries),
            draining: AtomicBool::new(false),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of the backlog in priority order
    pub fn snapshot(&self) -> Vec<QueuedOperation> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Add an operation, replacing any earlier one with the same key.
    ///
    /// Returns the evicted entry when the queue was full. The newcomer is
    /// treated as a candidate for eviction too: if its priority is below
    /// every queued entry, it is the lowest entry and is returned unchanged
    /// with nothing inserted. On a priority tie the oldest queued entry of
    /// that priority is evicted and the newcomer is kept.
    pub fn enqueue(&self, op: QueuedOperation) -> Result<Option<QueuedOperation>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| crate::storage::lock_poisoned("offline queue"))?;

        entries.retain(|e| !(e.entity_id == op.entity_id && e.op_type == op.op_type));

        let mut evicted = None;
        if entries.len() >= self.capacity {
            let lowest = lowest_index(&entries);
            match lowest {
                // The newcomer itself is the lowest-priority entry
                Some(i) if op.priority < entries[i].priority => {
                    warn!(id = %op.id, "Offline queue full, dropped operation");
                    return Ok(Some(op));
                }
                Some(i) => {
                    let gone = entries.remove(i);
                    warn!(id = %gone.id, "Offline queue full, evicted operation");
                    evicted = Some(gone);
                }
                None => {}
            }
        }

        debug!(id = %op.id, file_name = %op.file_name, "Queued offline operation");
        let position = entries
            .iter()
            .position(|e| ranks_before(&op, e))
            .unwrap_or(entries.len());
        entries.insert(position, op);

        save_json(self.store.as_ref(), QUEUE_KEY, &*entries)?;
        Ok(evicted)
    }

    /// Remove an entry by id
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| crate::storage::lock_poisoned("offline queue"))?;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if removed {
            save_json(self.store.as_ref(), QUEUE_KEY, &*entries)?;
        }
        Ok(removed)
    }

    pub fn clear(&self) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| crate::storage::lock_poisoned("offline queue"))?;
        entries.clear();
        save_json(self.store.as_ref(), QUEUE_KEY, &*entries)
    }

    /// Replay a snapshot of the backlog through `processor`.
    ///
    /// Entries whose processor returns `true` are removed; failures stay for
    /// a later drain. Returns `None` without doing anything if a drain is
    /// already running.
    pub async fn drain<F, Fut>(&self, mut processor: F) -> Result<Option<DrainReport>>
    where
        F: FnMut(QueuedOperation) -> Fut,
        Fut: Future<Output = bool>,
    {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Offline queue drain already in progress");
            return Ok(None);
        }
        let _reset = DrainGuard(&self.draining);

        let snapshot = self.snapshot();
        let mut report = DrainReport {
            attempted: snapshot.len(),
            ..Default::default()
        };

        for op in snapshot {
            let id = op.id.clone();
            let queued_at = op.queued_at;
            if processor(op).await {
                report.succeeded += 1;
                self.remove_if_unchanged(&id, queued_at)?;
            }
        }

        report.remaining = self.len();
        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            remaining = report.remaining,
            "Drained offline queue"
        );
        Ok(Some(report))
    }

    /// Remove `id` only if it was not re-enqueued while being processed.
    fn remove_if_unchanged(&self, id: &str, queued_at: i64) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| crate::storage::lock_poisoned("offline queue"))?;
        let before = entries.len();
        entries.retain(|e| !(e.id == id && e.queued_at == queued_at));
        if entries.len() != before {
            save_json(self.store.as_ref(), QUEUE_KEY, &*entries)?;
        }
        Ok(())
    }
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Higher priority first, then older first
fn ranks_before(a: &QueuedOperation, b: &QueuedOperation) -> bool {
    (a.priority, std::cmp::Reverse(a.queued_at)) > (b.priority, std::cmp::Reverse(b.queued_at))
}

fn sort_by_priority(entries: &mut [QueuedOperation]) {
    entries.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.queued_at.cmp(&b.queued_at))
    });
}

/// Index of the lowest-priority entry, oldest on ties
fn lowest_index(entries: &[QueuedOperation]) -> Option<usize> {
    entries
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            a.priority
                .cmp(&b.priority)
                .then(a.queued_at.cmp(&b.queued_at))
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;

    fn queue(capacity: usize) -> OfflineQueue {
        OfflineQueue::open(Arc::new(MemoryKvStore::new()), capacity).unwrap()
    }

    #[test]
    fn orders_by_priority_then_age() {
        let q = queue(10);
        q.enqueue(QueuedOperation::at(OperationType::Metadata, "m", "m", 1))
            .unwrap();
        q.enqueue(QueuedOperation::at(OperationType::Pull, "b", "b", 2))
            .unwrap();
        q.enqueue(QueuedOperation::at(OperationType::Push, "c", "c", 3))
            .unwrap();
        q.enqueue(QueuedOperation::at(OperationType::Push, "d", "d", 4))
            .unwrap();

        let order: Vec<String> = q.snapshot().into_iter().map(|o| o.entity_id).collect();
        assert_eq!(order, vec!["c", "d", "b", "m"]);
    }

    #[test]
    fn latest_intent_replaces_same_key() {
        let q = queue(10);
        q.enqueue(QueuedOperation::at(OperationType::Push, "f1", ".env", 1))
            .unwrap();
        q.enqueue(QueuedOperation::at(OperationType::Push, "f1", ".env", 5))
            .unwrap();
        // Different type for the same entity is a different key
        q.enqueue(QueuedOperation::at(OperationType::Pull, "f1", ".env", 6))
            .unwrap();

        let snapshot = q.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].queued_at, 5);
        assert_eq!(snapshot[0].id, operation_id(OperationType::Push, "f1"));
    }

    #[test]
    fn overflow_evicts_lowest_priority_oldest() {
        let q = queue(3);
        q.enqueue(QueuedOperation::at(OperationType::Pull, "p1", "p1", 1))
            .unwrap();
        q.enqueue(QueuedOperation::at(OperationType::Metadata, "m1", "m1", 2))
            .unwrap();
        q.enqueue(QueuedOperation::at(OperationType::Metadata, "m2", "m2", 3))
            .unwrap();

        let evicted = q
            .enqueue(QueuedOperation::at(OperationType::Push, "s1", "s1", 4))
            .unwrap()
            .unwrap();

        assert_eq!(evicted.entity_id, "m1");
        assert_eq!(q.len(), 3);
        assert!(q.snapshot().iter().any(|o| o.entity_id == "s1"));
    }

    #[test]
    fn lower_priority_newcomer_is_dropped_when_full() {
        let q = queue(2);
        q.enqueue(QueuedOperation::at(OperationType::Push, "a", "a", 1))
            .unwrap();
        q.enqueue(QueuedOperation::at(OperationType::Push, "b", "b", 2))
            .unwrap();

        let dropped = q
            .enqueue(QueuedOperation::at(OperationType::Metadata, "m", "m", 3))
            .unwrap()
            .unwrap();

        assert_eq!(dropped.entity_id, "m");
        let ids: Vec<String> = q.snapshot().into_iter().map(|o| o.entity_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn equal_priority_newcomer_evicts_oldest_when_full() {
        let q = queue(2);
        q.enqueue(QueuedOperation::at(OperationType::Push, "a", "a", 1))
            .unwrap();
        q.enqueue(QueuedOperation::at(OperationType::Push, "b", "b", 2))
            .unwrap();

        let evicted = q
            .enqueue(QueuedOperation::at(OperationType::Push, "c", "c", 3))
            .unwrap()
            .unwrap();

        assert_eq!(evicted.entity_id, "a");
        let ids: Vec<String> = q.snapshot().into_iter().map(|o| o.entity_id).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn never_exceeds_capacity() {
        let q = queue(5);
        for i in 0..50 {
            let op_type = match i % 3 {
                0 => OperationType::Push,
                1 => OperationType::Pull,
                _ => OperationType::Metadata,
            };
            q.enqueue(QueuedOperation::at(op_type, &format!("e{}", i), "f", i))
                .unwrap();
            assert!(q.len() <= 5);
        }
        assert!(q
            .snapshot()
            .iter()
            .all(|o| o.op_type == OperationType::Push));
    }

    #[test]
    fn backlog_survives_reopen() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        {
            let q = OfflineQueue::open(store.clone(), 10).unwrap();
            q.enqueue(QueuedOperation::at(OperationType::Pull, "a", "a", 1))
                .unwrap();
            q.enqueue(QueuedOperation::at(OperationType::Push, "b", "b", 2))
                .unwrap();
        }
        let reopened = OfflineQueue::open(store, 10).unwrap();
        let ids: Vec<String> = reopened
            .snapshot()
            .into_iter()
            .map(|o| o.entity_id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn drain_removes_successes_and_keeps_failures() {
        let q = queue(10);
        q.enqueue(QueuedOperation::at(OperationType::Push, "ok", "ok", 1))
            .unwrap();
        q.enqueue(QueuedOperation::at(OperationType::Push, "fail", "fail", 2))
            .unwrap();

        let report = q
            .drain(|op| async move { op.entity_id == "ok" })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.remaining, 1);
        assert_eq!(q.snapshot()[0].entity_id, "fail");
        assert!(!q.is_draining());
    }

    #[tokio::test]
    async fn drain_is_not_reentrant() {
        let q = Arc::new(queue(10));
        q.enqueue(QueuedOperation::at(OperationType::Push, "a", "a", 1))
            .unwrap();

        let inner = q.clone();
        let report = q
            .drain(|_| {
                let inner = inner.clone();
                async move {
                    let nested = inner.drain(|_| async { true }).await.unwrap();
                    assert!(nested.is_none());
                    true
                }
            })
            .await
            .unwrap();

        assert_eq!(report.unwrap().succeeded, 1);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn reenqueued_during_drain_is_kept() {
        let q = Arc::new(queue(10));
        q.enqueue(QueuedOperation::at(OperationType::Push, "a", ".env", 1))
            .unwrap();

        let inner = q.clone();
        q.drain(|_| {
            let inner = inner.clone();
            async move {
                inner
                    .enqueue(QueuedOperation::at(OperationType::Push, "a", ".env", 9))
                    .unwrap();
                true
            }
        })
        .await
        .unwrap();

        assert_eq!(q.snapshot()[0].queued_at, 9);
    }
}
