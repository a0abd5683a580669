//! Drains the mutation queue against the transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use log::{debug, info, warn};

use crate::errors::Result;
use crate::events::{NotificationSink, SyncEvent};
use crate::transport::Transport;

use super::{
    ConnectivityMonitor, DrainOutcome, DrainReport, DrainTrigger, ModeController, MutationQueue,
    MutationRecord, MutationStatus, SyncSummary,
};

/// Clears the draining flag however the drain ends. A record still marked
/// in flight (the pass errored or its future was dropped mid-send) goes back
/// to `pending` first, so `syncing` only exists while a drain is running.
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
    queue: &'a MutationQueue,
    in_flight: Option<String>,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.in_flight.take() {
            match self.queue.release_in_flight(&id) {
                Ok(()) => debug!("[OfflineSync] Mutation {} returned to pending", id),
                Err(err) => warn!(
                    "[OfflineSync] Mutation {} stays in flight until reload: {}",
                    id, err
                ),
            }
        }
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Single-flight, strictly sequential replay of queued writes.
pub struct SyncEngine {
    queue: Arc<MutationQueue>,
    transport: Arc<dyn Transport>,
    monitor: Arc<ConnectivityMonitor>,
    mode: Arc<ModeController>,
    sink: Arc<dyn NotificationSink>,
    is_draining: AtomicBool,
    last_drain: Mutex<Option<DrainReport>>,
}

impl SyncEngine {
    pub fn new(
        queue: Arc<MutationQueue>,
        transport: Arc<dyn Transport>,
        monitor: Arc<ConnectivityMonitor>,
        mode: Arc<ModeController>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            queue,
            transport,
            monitor,
            mode,
            sink,
            is_draining: AtomicBool::new(false),
            last_drain: Mutex::new(None),
        }
    }

    /// Network present AND online mode selected.
    pub fn is_online_effective(&self) -> bool {
        self.monitor.is_online() && self.mode.is_online_mode()
    }

    pub fn is_draining(&self) -> bool {
        self.is_draining.load(Ordering::SeqCst)
    }

    pub fn last_drain(&self) -> Option<DrainReport> {
        self.last_drain
            .lock()
            .map(|guard| *guard)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    /// One pass over the `pending` records present when the call starts, in
    /// FIFO order, one at a time.
    ///
    /// Per-record failures are recorded on the record and counted in the
    /// summary; they never abort the pass. `Err` is only returned when the
    /// queue can no longer be persisted.
    pub async fn drain(&self, trigger: DrainTrigger) -> Result<DrainOutcome> {
        if self
            .is_draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(
                "[OfflineSync] Drain requested ({:?}) while another is running; ignoring",
                trigger
            );
            self.sink.emit(SyncEvent::DrainAlreadyRunning);
            return Ok(DrainOutcome::AlreadyRunning);
        }
        let mut guard = DrainGuard {
            flag: &self.is_draining,
            queue: &self.queue,
            in_flight: None,
        };

        if !self.is_online_effective() {
            warn!(
                "[OfflineSync] Cannot sync while offline (network={}, online_mode={})",
                self.monitor.is_online(),
                self.mode.is_online_mode()
            );
            self.sink.emit(SyncEvent::CannotSyncOffline);
            return Ok(DrainOutcome::Offline);
        }

        let snapshot = self.queue.pending();
        if snapshot.is_empty() {
            debug!("[OfflineSync] Nothing to sync ({:?})", trigger);
            self.sink.emit(SyncEvent::NothingToSync);
            return Ok(DrainOutcome::NothingToSync);
        }

        let started_at = Instant::now();
        info!(
            "[OfflineSync] Drain started trigger={:?} pending={}",
            trigger,
            snapshot.len()
        );
        self.sink.emit(SyncEvent::DrainStarted {
            pending: snapshot.len(),
        });

        let mut summary = SyncSummary::default();
        for queued in snapshot {
            let Some(record) = self.queue.begin_attempt(&queued.id)? else {
                debug!(
                    "[OfflineSync] Mutation {} left the pending state before its turn; skipping",
                    queued.id
                );
                continue;
            };
            guard.in_flight = Some(record.id.clone());

            let committed = match self.send_record(&record).await {
                Ok(()) => self.queue.remove(&record.id).map(|_| {
                    debug!("[OfflineSync] Mutation {} synced", record.id);
                    summary.success_count += 1;
                }),
                Err(message) => {
                    warn!(
                        "[OfflineSync] Mutation {} ({} {} {}) failed: {}",
                        record.id, record.action_type, record.method, record.endpoint, message
                    );
                    self.queue
                        .update_status(&record.id, MutationStatus::Failed, Some(message))
                        .map(|_| summary.fail_count += 1)
                }
            };

            if let Err(err) = committed {
                log::error!(
                    "[OfflineSync] Drain aborted, could not persist mutation {}: {}",
                    record.id,
                    err
                );
                return Err(err);
            }
            guard.in_flight = None;
        }

        let report = DrainReport {
            trigger,
            summary,
            completed_at: Utc::now(),
            duration_ms: i64::try_from(started_at.elapsed().as_millis()).unwrap_or(i64::MAX),
        };
        match self.last_drain.lock() {
            Ok(mut guard) => *guard = Some(report),
            Err(poisoned) => *poisoned.into_inner() = Some(report),
        }

        info!(
            "[OfflineSync] Drain complete trigger={:?} synced={} failed={} duration_ms={}",
            trigger, summary.success_count, summary.fail_count, report.duration_ms
        );
        self.sink.emit(SyncEvent::DrainCompleted { summary });
        Ok(DrainOutcome::Completed { summary })
    }

    /// Transport failure, HTTP failure and an application-level error flag are
    /// all the same thing here: an error message for the record.
    async fn send_record(&self, record: &MutationRecord) -> std::result::Result<(), String> {
        match self
            .transport
            .send(&record.endpoint, record.method, &record.payload)
            .await
        {
            Ok(response) if response.is_success() => Ok(()),
            Ok(response) => Err(response.failure_message()),
            Err(err) => Err(err.to_string()),
        }
    }
}
