//! Process-wide entry point of the offline sync subsystem.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::errors::Result;
use crate::events::{NotificationSink, SyncEvent};
use crate::storage::PersistentStore;
use crate::transport::Transport;

use super::{
    next_sweep_delay, ConnectivityEvent, ConnectivityMonitor, DrainOutcome, DrainTrigger,
    ModeController, ModeTransition, MutationAction, MutationQueue, MutationRecord, SyncEngine,
    SyncStatusSnapshot,
};

/// What happened to a write handed to [`OfflineSyncService::submit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// The backend confirmed the write.
    Sent,
    /// The write is in the queue and will be replayed.
    Queued { id: String },
    /// The backend answered and refused the write. Nothing was queued.
    Rejected { message: String },
}

/// Mode change plus the drain it triggered, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeChangeReport {
    pub transition: ModeTransition,
    pub drain: Option<DrainOutcome>,
}

/// Owns the queue, the connectivity and mode state, and the engine.
///
/// Created once per process with [`OfflineSyncService::init`]; everything
/// else talks to the subsystem through its methods.
pub struct OfflineSyncService {
    queue: Arc<MutationQueue>,
    monitor: Arc<ConnectivityMonitor>,
    mode: Arc<ModeController>,
    engine: Arc<SyncEngine>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn NotificationSink>,
}

impl OfflineSyncService {
    /// Loads the persisted queue and mode preference.
    pub fn init(
        store: Arc<dyn PersistentStore>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn NotificationSink>,
        network_present: bool,
    ) -> Result<Arc<Self>> {
        let queue = Arc::new(MutationQueue::load(store.clone(), sink.clone())?);
        let monitor = Arc::new(ConnectivityMonitor::new(network_present, sink.clone()));
        let mode = Arc::new(ModeController::load(store, sink.clone(), monitor.clone())?);
        let engine = Arc::new(SyncEngine::new(
            queue.clone(),
            transport.clone(),
            monitor.clone(),
            mode.clone(),
            sink.clone(),
        ));

        info!(
            "[OfflineSync] Initialized: {} queued, network={}, online_mode={}",
            queue.len(),
            monitor.is_online(),
            mode.is_online_mode()
        );

        Ok(Arc::new(Self {
            queue,
            monitor,
            mode,
            engine,
            transport,
            sink,
        }))
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    /// Queues a write for later replay.
    pub fn enqueue(&self, action: MutationAction) -> Result<String> {
        let action_type = action.action_type.clone();
        let id = self.queue.enqueue(action)?;
        self.sink.emit(SyncEvent::MutationQueued {
            id: id.clone(),
            action_type,
        });
        Ok(id)
    }

    /// Sends a write directly when effectively online, otherwise queues it.
    ///
    /// While unsent records are still queued the write goes behind them so the
    /// server sees writes in the order they were made. A send that produced no
    /// response falls back to the queue.
    pub async fn submit(&self, action: MutationAction) -> Result<SubmitOutcome> {
        action.validate()?;

        if !self.is_online_effective() {
            let id = self.enqueue(action)?;
            return Ok(SubmitOutcome::Queued { id });
        }

        let counts = self.queue.counts();
        if counts.pending + counts.syncing > 0 {
            let id = self.enqueue(action)?;
            self.engine.drain(DrainTrigger::LocalMutation).await?;
            return Ok(SubmitOutcome::Queued { id });
        }

        match self
            .transport
            .send(&action.endpoint, action.method, &action.payload)
            .await
        {
            Ok(response) if response.is_success() => Ok(SubmitOutcome::Sent),
            Ok(response) => Ok(SubmitOutcome::Rejected {
                message: response.failure_message(),
            }),
            Err(err) => {
                warn!(
                    "[OfflineSync] Direct send of {} failed ({}); queueing",
                    action.action_type, err
                );
                let id = self.enqueue(action)?;
                Ok(SubmitOutcome::Queued { id })
            }
        }
    }

    pub fn list(&self) -> Vec<MutationRecord> {
        self.queue.list()
    }

    pub async fn drain(&self, trigger: DrainTrigger) -> Result<DrainOutcome> {
        self.engine.drain(trigger).await
    }

    /// Resets failed records to pending. Callers decide whether to drain.
    pub fn retry_failed(&self) -> Result<usize> {
        self.queue.retry_failed()
    }

    pub fn clear_failed(&self) -> Result<usize> {
        self.queue.clear_failed()
    }

    /// Drops one failed record at the user's request.
    pub fn discard(&self, id: &str) -> Result<MutationRecord> {
        let record = self.queue.discard_failed(id)?;
        info!(
            "[OfflineSync] Discarded failed mutation {} ({})",
            record.id, record.action_type
        );
        Ok(record)
    }

    pub async fn set_mode(&self, online: bool) -> Result<ModeChangeReport> {
        let transition = self.mode.set_mode(online)?;
        self.after_mode_change(transition).await
    }

    pub async fn toggle_mode(&self) -> Result<ModeChangeReport> {
        let transition = self.mode.toggle()?;
        self.after_mode_change(transition).await
    }

    /// Feeds the host's network-presence signal. Reconnect drains are run by
    /// the task started with [`OfflineSyncService::start_auto_sync`].
    pub fn report_network(&self, present: bool) -> Option<ConnectivityEvent> {
        self.monitor.set_network_present(present)
    }

    pub fn is_online_effective(&self) -> bool {
        self.engine.is_online_effective()
    }

    pub fn status(&self) -> SyncStatusSnapshot {
        SyncStatusSnapshot {
            network_online: self.monitor.is_online(),
            online_mode: self.mode.is_online_mode(),
            effective_online: self.engine.is_online_effective(),
            is_draining: self.engine.is_draining(),
            counts: self.queue.counts(),
            last_drain: self.engine.last_drain(),
        }
    }

    /// Spawns the task that turns connectivity events (and, with an
    /// `interval`, a periodic sweep) into drains.
    ///
    /// The sweep only drains pending records; failed records wait for an
    /// explicit retry.
    pub fn start_auto_sync(self: &Arc<Self>, interval: Option<Duration>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let mut events = self.monitor.subscribe();

        tokio::spawn(async move {
            if service.is_online_effective() && service.queue.counts().pending > 0 {
                service.run_drain(DrainTrigger::Startup).await;
            }

            loop {
                let sweep = async {
                    match interval {
                        Some(interval) => tokio::time::sleep(next_sweep_delay(interval)).await,
                        None => std::future::pending::<()>().await,
                    }
                };

                tokio::select! {
                    received = events.recv() => match received {
                        Ok(ConnectivityEvent::WentOnline) => {
                            if service.is_online_effective() && !service.queue.is_empty() {
                                service.run_drain(DrainTrigger::Reconnect).await;
                            }
                        }
                        Ok(ConnectivityEvent::WentOffline) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            debug!("[OfflineSync] Auto-sync skipped {} connectivity event(s)", skipped);
                        }
                        Err(RecvError::Closed) => {
                            info!("[OfflineSync] Connectivity events closed. Stopping auto-sync.");
                            break;
                        }
                    },
                    _ = sweep => {
                        if service.is_online_effective()
                            && !service.engine.is_draining()
                            && service.queue.counts().pending > 0
                        {
                            service.run_drain(DrainTrigger::Periodic).await;
                        }
                    }
                }
            }
        })
    }

    async fn after_mode_change(&self, transition: ModeTransition) -> Result<ModeChangeReport> {
        let drain = if transition.went_online() && !self.queue.is_empty() {
            Some(self.engine.drain(DrainTrigger::ModeEnabled).await?)
        } else {
            None
        };
        Ok(ModeChangeReport { transition, drain })
    }

    async fn run_drain(&self, trigger: DrainTrigger) {
        match self.engine.drain(trigger).await {
            Ok(outcome) => debug!("[OfflineSync] {:?} drain finished: {:?}", trigger, outcome),
            Err(err) => warn!("[OfflineSync] {:?} drain failed: {}", trigger, err),
        }
    }
}
