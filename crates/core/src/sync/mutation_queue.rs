//! Persisted FIFO queue of writes waiting for the backend.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use log::{debug, info, warn};

use crate::errors::{Error, Result};
use crate::events::{NotificationSink, SyncEvent};
use crate::storage::{load_json, PersistentStore, MUTATION_QUEUE_KEY};

use super::{MutationAction, MutationRecord, MutationStatus, QueueCounts};

/// Ordered, durable collection of [`MutationRecord`]s.
///
/// Every mutation is applied to a copy of the queue, the copy is written to
/// the store, and only then does it replace the in-memory queue. A caller
/// never observes a change that is not on disk.
pub struct MutationQueue {
    store: Arc<dyn PersistentStore>,
    sink: Arc<dyn NotificationSink>,
    records: Mutex<Vec<MutationRecord>>,
}

impl MutationQueue {
    /// Loads the persisted queue.
    ///
    /// Records left in `syncing` by an interrupted drain go back to `pending`;
    /// records left in `success` were confirmed by the server and are dropped.
    pub fn load(store: Arc<dyn PersistentStore>, sink: Arc<dyn NotificationSink>) -> Result<Self> {
        let mut records: Vec<MutationRecord> =
            load_json(store.as_ref(), MUTATION_QUEUE_KEY)?.unwrap_or_default();

        let before = records.len();
        records.retain(|r| r.status != MutationStatus::Success);
        let dropped = before - records.len();

        let mut recovered = 0usize;
        for record in records
            .iter_mut()
            .filter(|r| r.status == MutationStatus::Syncing)
        {
            record.status = MutationStatus::Pending;
            recovered += 1;
        }

        let queue = Self {
            store,
            sink,
            records: Mutex::new(records),
        };

        if recovered > 0 || dropped > 0 {
            info!(
                "[OfflineSync] Recovered {} interrupted and dropped {} confirmed mutation(s) on load",
                recovered, dropped
            );
            queue.commit(|_| Ok(()))?;
        }
        debug!("[OfflineSync] Loaded {} queued mutation(s)", queue.len());
        Ok(queue)
    }

    /// Appends a new `pending` record and returns its id once it is durable.
    pub fn enqueue(&self, action: MutationAction) -> Result<String> {
        action.validate()?;
        let record = MutationRecord::from_action(action);
        let id = record.id.clone();

        self.commit(move |records| {
            if records.iter().any(|r| r.id == record.id) {
                return Err(Error::invalid_state(format!(
                    "Duplicate mutation id {}",
                    record.id
                )));
            }
            records.push(record);
            Ok(())
        })?;

        debug!("[OfflineSync] Enqueued mutation {}", id);
        Ok(id)
    }

    /// Deletes a record regardless of its status.
    pub fn remove(&self, id: &str) -> Result<MutationRecord> {
        self.commit(|records| {
            let index = position(records, id)?;
            Ok(records.remove(index))
        })
    }

    /// Deletes a single `failed` record at the user's request.
    pub fn discard_failed(&self, id: &str) -> Result<MutationRecord> {
        self.commit(|records| {
            let index = position(records, id)?;
            if records[index].status != MutationStatus::Failed {
                return Err(Error::invalid_state(format!(
                    "Mutation {} is {:?}; only failed mutations can be discarded",
                    id, records[index].status
                )));
            }
            Ok(records.remove(index))
        })
    }

    /// In-place status transition. `error` is required for `failed` and
    /// rejected for every other status.
    ///
    /// Only the engine moves records through `syncing` and `success`; callers
    /// outside the crate use `retry_failed`, `discard_failed` and friends.
    pub(crate) fn update_status(
        &self,
        id: &str,
        status: MutationStatus,
        error: Option<String>,
    ) -> Result<()> {
        let error = error.filter(|e| !e.trim().is_empty());
        match (status, &error) {
            (MutationStatus::Failed, None) => {
                return Err(Error::invalid_input(
                    "A failed mutation needs an error message",
                ))
            }
            (MutationStatus::Failed, Some(_)) => {}
            (_, Some(_)) => {
                return Err(Error::invalid_input(
                    "Only failed mutations carry an error message",
                ))
            }
            (_, None) => {}
        }

        self.commit(|records| {
            let index = position(records, id)?;
            let record = &mut records[index];
            record.status = status;
            record.error = error;
            Ok(())
        })
    }

    /// Moves a `pending` record to `syncing` and counts the attempt.
    ///
    /// Returns `None` when the record is gone or no longer pending.
    pub(crate) fn begin_attempt(&self, id: &str) -> Result<Option<MutationRecord>> {
        self.commit(|records| {
            let Some(record) = records
                .iter_mut()
                .find(|r| r.id == id && r.status == MutationStatus::Pending)
            else {
                return Ok(None);
            };
            record.status = MutationStatus::Syncing;
            record.error = None;
            record.attempts = record.attempts.saturating_add(1);
            record.last_attempt_at = Some(Utc::now());
            Ok(Some(record.clone()))
        })
    }

    /// Puts an in-flight record back to `pending` after an aborted drain.
    pub(crate) fn release_in_flight(&self, id: &str) -> Result<()> {
        self.commit(|records| {
            if let Some(record) = records
                .iter_mut()
                .find(|r| r.id == id && r.status == MutationStatus::Syncing)
            {
                record.status = MutationStatus::Pending;
            }
            Ok(())
        })
    }

    /// Resets every `failed` record to `pending`. Does not start a drain.
    pub fn retry_failed(&self) -> Result<usize> {
        if self.counts().failed == 0 {
            return Ok(0);
        }
        let count = self.commit(|records| {
            let mut count = 0;
            for record in records
                .iter_mut()
                .filter(|r| r.status == MutationStatus::Failed)
            {
                record.status = MutationStatus::Pending;
                record.error = None;
                count += 1;
            }
            Ok(count)
        })?;
        info!("[OfflineSync] {} failed mutation(s) queued for retry", count);
        Ok(count)
    }

    /// Removes every `failed` record without sending it.
    pub fn clear_failed(&self) -> Result<usize> {
        if self.counts().failed == 0 {
            return Ok(0);
        }
        let count = self.commit(|records| {
            let before = records.len();
            records.retain(|r| r.status != MutationStatus::Failed);
            Ok(before - records.len())
        })?;
        info!("[OfflineSync] Cleared {} failed mutation(s)", count);
        Ok(count)
    }

    /// Snapshot of the queue in FIFO order.
    pub fn list(&self) -> Vec<MutationRecord> {
        self.lock_records().clone()
    }

    pub fn get(&self, id: &str) -> Option<MutationRecord> {
        self.lock_records().iter().find(|r| r.id == id).cloned()
    }

    /// `pending` records in FIFO order.
    pub fn pending(&self) -> Vec<MutationRecord> {
        self.lock_records()
            .iter()
            .filter(|r| r.status == MutationStatus::Pending)
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> QueueCounts {
        let records = self.lock_records();
        let mut counts = QueueCounts::default();
        for record in records.iter() {
            match record.status {
                MutationStatus::Pending => counts.pending += 1,
                MutationStatus::Syncing => counts.syncing += 1,
                MutationStatus::Failed => counts.failed += 1,
                MutationStatus::Success => {}
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.lock_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_records().is_empty()
    }

    // Mutations go through a draft, so a poisoned guard never holds a
    // half-applied change.
    fn lock_records(&self) -> MutexGuard<'_, Vec<MutationRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn commit<T>(&self, mutate: impl FnOnce(&mut Vec<MutationRecord>) -> Result<T>) -> Result<T> {
        let (result, notice) = {
            let mut guard = self.lock_records();
            let mut draft = guard.clone();
            let value = mutate(&mut draft)?;

            match self.persist(&mut draft) {
                Ok(discarded) => {
                    *guard = draft;
                    let notice = (!discarded.is_empty()).then(|| SyncEvent::StorageQuotaExceeded {
                        discarded,
                        recovered: true,
                    });
                    (Ok(value), notice)
                }
                Err(err) => {
                    let notice = match &err {
                        Error::Storage(storage) if storage.is_quota_exceeded() => {
                            Some(SyncEvent::StorageQuotaExceeded {
                                discarded: Vec::new(),
                                recovered: false,
                            })
                        }
                        Error::Storage(storage) => Some(SyncEvent::StorageFailure {
                            message: storage.to_string(),
                        }),
                        _ => None,
                    };
                    (Err(err), notice)
                }
            }
        };

        if let Some(event) = notice {
            self.sink.emit(event);
        }
        result
    }

    /// Writes `draft` to the store. When the store is full, the oldest
    /// attempted failures are dropped from `draft` one by one until the
    /// write fits; pending records are never dropped. Returns the ids of the
    /// dropped records.
    fn persist(&self, draft: &mut Vec<MutationRecord>) -> Result<Vec<String>> {
        let mut discarded = Vec::new();
        loop {
            let json = serde_json::to_string(&*draft)?;
            let err = match self.store.save(MUTATION_QUEUE_KEY, &json) {
                Ok(()) => return Ok(discarded),
                Err(err) => err,
            };

            if !err.is_quota_exceeded() {
                log::error!("[OfflineSync] Failed to persist mutation queue: {}", err);
                return Err(err.into());
            }

            let Some(index) = draft.iter().position(MutationRecord::is_attempted_failure) else {
                log::error!(
                    "[OfflineSync] Storage full and no failed mutations left to discard ({} discarded): {}",
                    discarded.len(),
                    err
                );
                return Err(err.into());
            };
            let evicted = draft.remove(index);
            warn!(
                "[OfflineSync] Storage full, discarding failed mutation {} ({} {} {}, attempts={}, error={:?})",
                evicted.id,
                evicted.action_type,
                evicted.method,
                evicted.endpoint,
                evicted.attempts,
                evicted.error
            );
            discarded.push(evicted.id);
        }
    }
}

fn position(records: &[MutationRecord], id: &str) -> Result<usize> {
    records
        .iter()
        .position(|r| r.id == id)
        .ok_or_else(|| Error::not_found(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingNotificationSink;
    use crate::storage::MemoryStore;
    use crate::sync::HttpMethod;
    use serde_json::json;

    fn action(action_type: &str, endpoint: &str) -> MutationAction {
        MutationAction::new(action_type, endpoint, HttpMethod::Post, json!({ "v": 1 }))
    }

    fn setup() -> (Arc<MemoryStore>, Arc<RecordingNotificationSink>, MutationQueue) {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingNotificationSink::new());
        let queue = MutationQueue::load(store.clone(), sink.clone()).expect("load queue");
        (store, sink, queue)
    }

    fn persisted(store: &MemoryStore) -> Vec<MutationRecord> {
        load_json(store, MUTATION_QUEUE_KEY)
            .expect("load persisted")
            .unwrap_or_default()
    }

    #[test]
    fn enqueue_appends_in_fifo_order_and_persists() {
        let (store, _sink, queue) = setup();
        let a = queue.enqueue(action("UPDATE_MARKS", "/marks")).expect("a");
        let b = queue.enqueue(action("UPDATE_REMARK", "/remarks")).expect("b");

        let ids: Vec<_> = queue.list().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a.clone(), b.clone()]);

        let on_disk: Vec<_> = persisted(&store).into_iter().map(|r| r.id).collect();
        assert_eq!(on_disk, vec![a, b]);
        assert!(queue.list().iter().all(|r| r.status == MutationStatus::Pending));
    }

    #[test]
    fn enqueue_rejects_blank_endpoint() {
        let (_store, _sink, queue) = setup();
        let err = queue.enqueue(action("UPDATE_MARKS", " ")).expect_err("invalid");
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(queue.is_empty());
    }

    #[test]
    fn enqueue_fails_instead_of_dropping_when_store_is_full() {
        let store = Arc::new(MemoryStore::with_capacity_bytes(64));
        let sink = Arc::new(RecordingNotificationSink::new());
        let queue = MutationQueue::load(store.clone(), sink.clone()).expect("load");

        let err = queue
            .enqueue(action("UPDATE_MARKS", "/marks"))
            .expect_err("does not fit");
        assert!(err.is_quota_exceeded());
        assert!(queue.is_empty());
        assert_eq!(
            sink.events(),
            vec![SyncEvent::StorageQuotaExceeded {
                discarded: vec![],
                recovered: false
            }]
        );
    }

    #[test]
    fn update_status_validates_error_pairing() {
        let (store, _sink, queue) = setup();
        let id = queue.enqueue(action("UPDATE_MARKS", "/marks")).expect("enqueue");

        assert!(matches!(
            queue.update_status(&id, MutationStatus::Failed, None),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            queue.update_status(&id, MutationStatus::Pending, Some("x".into())),
            Err(Error::InvalidInput(_))
        ));

        queue
            .update_status(&id, MutationStatus::Failed, Some("HTTP 500: boom".into()))
            .expect("mark failed");
        let stored = persisted(&store);
        assert_eq!(stored[0].status, MutationStatus::Failed);
        assert_eq!(stored[0].error.as_deref(), Some("HTTP 500: boom"));

        assert!(matches!(
            queue.update_status("missing", MutationStatus::Pending, None),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn retry_and_clear_only_touch_failed_records() {
        let (_store, _sink, queue) = setup();
        let a = queue.enqueue(action("A", "/a")).expect("a");
        let b = queue.enqueue(action("B", "/b")).expect("b");
        let c = queue.enqueue(action("C", "/c")).expect("c");
        queue
            .update_status(&b, MutationStatus::Failed, Some("boom".into()))
            .expect("fail b");

        assert_eq!(queue.retry_failed().expect("retry"), 1);
        let b_record = queue.get(&b).expect("b still queued");
        assert_eq!(b_record.status, MutationStatus::Pending);
        assert_eq!(b_record.error, None);

        queue
            .update_status(&c, MutationStatus::Failed, Some("boom".into()))
            .expect("fail c");
        assert_eq!(queue.clear_failed().expect("clear"), 1);
        let ids: Vec<_> = queue.list().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a, b]);
        assert_eq!(queue.clear_failed().expect("nothing left"), 0);
    }

    #[test]
    fn discard_refuses_records_that_are_not_failed() {
        let (_store, _sink, queue) = setup();
        let id = queue.enqueue(action("A", "/a")).expect("a");
        assert!(matches!(
            queue.discard_failed(&id),
            Err(Error::InvalidState(_))
        ));

        queue
            .update_status(&id, MutationStatus::Failed, Some("boom".into()))
            .expect("fail");
        queue.discard_failed(&id).expect("discard");
        assert!(queue.is_empty());
    }

    #[test]
    fn load_recovers_interrupted_records() {
        let (store, sink, queue) = setup();
        let a = queue.enqueue(action("A", "/a")).expect("a");
        let b = queue.enqueue(action("B", "/b")).expect("b");
        queue.begin_attempt(&a).expect("begin").expect("pending");
        queue
            .update_status(&b, MutationStatus::Success, None)
            .expect("success");
        drop(queue);

        let reloaded = MutationQueue::load(store.clone(), sink).expect("reload");
        let records = reloaded.list();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, a);
        assert_eq!(records[0].status, MutationStatus::Pending);
        assert_eq!(records[0].attempts, 1);
        assert_eq!(persisted(&store)[0].status, MutationStatus::Pending);
    }

    #[test]
    fn begin_attempt_skips_records_that_are_not_pending() {
        let (_store, _sink, queue) = setup();
        let id = queue.enqueue(action("A", "/a")).expect("a");
        queue
            .update_status(&id, MutationStatus::Failed, Some("boom".into()))
            .expect("fail");
        assert!(queue.begin_attempt(&id).expect("begin").is_none());
        assert!(queue.begin_attempt("missing").expect("begin").is_none());
    }

    #[test]
    fn storage_pressure_evicts_oldest_attempted_failures_first() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingNotificationSink::new());
        let queue = MutationQueue::load(store.clone(), sink.clone()).expect("load");

        let old_failed = queue.enqueue(action("A", "/a")).expect("a");
        let newer_failed = queue.enqueue(action("B", "/b")).expect("b");
        let pending = queue.enqueue(action("C", "/c")).expect("c");
        for id in [&old_failed, &newer_failed] {
            queue.begin_attempt(id).expect("begin").expect("pending");
            queue
                .update_status(id, MutationStatus::Failed, Some("HTTP 500: boom".into()))
                .expect("fail");
        }

        // Swap in a store that only fits the current queue minus one record.
        let current = serde_json::to_string(&queue.list()).expect("serialize");
        let tight = Arc::new(MemoryStore::with_capacity_bytes(current.len()));
        tight.save(MUTATION_QUEUE_KEY, &current).expect("seed");
        let queue = MutationQueue::load(tight.clone(), sink.clone()).expect("reload");
        sink.clear();

        let added = queue.enqueue(action("D", "/d")).expect("fits after eviction");

        let ids: Vec<_> = queue.list().into_iter().map(|r| r.id).collect();
        assert!(!ids.contains(&old_failed));
        assert!(ids.contains(&pending));
        assert!(ids.contains(&added));
        assert_eq!(ids.last(), Some(&added));
        match sink.events().as_slice() {
            [SyncEvent::StorageQuotaExceeded {
                discarded,
                recovered: true,
            }] => assert_eq!(discarded.first(), Some(&old_failed)),
            other => panic!("unexpected events: {other:?}"),
        }
    }
}
