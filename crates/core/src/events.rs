//! Notification plumbing between the sync engine and whatever surfaces status
//! to the user.
//!
//! Components emit a typed [`SyncEvent`]; [`Notification::from_event`] renders
//! it into the `{ type, title, message }` shape a UI toast expects. Runtime
//! bridges implement [`NotificationSink`] to forward them (the server pushes
//! them over a server-sent event stream).

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::sync::SyncSummary;

/// Severity of a notification, serialized as the notification `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Everything the offline sync subsystem reports to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncEvent {
    MutationQueued {
        id: String,
        action_type: String,
    },
    ModeChanged {
        online: bool,
    },
    /// Online mode was requested while the network is absent.
    ModeChangeRejected,
    ConnectivityRestored,
    ConnectivityLost,
    DrainStarted {
        pending: usize,
    },
    DrainCompleted {
        summary: SyncSummary,
    },
    /// A drain was requested while another one was still running.
    DrainAlreadyRunning,
    NothingToSync,
    CannotSyncOffline,
    /// The store ran out of capacity. `discarded` lists the failed records
    /// dropped to make room; `recovered` is false when the write still failed.
    StorageQuotaExceeded {
        discarded: Vec<String>,
        recovered: bool,
    },
    StorageFailure {
        message: String,
    },
}

/// A user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "type")]
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    pub event: SyncEvent,
}

impl Notification {
    pub fn from_event(event: SyncEvent) -> Self {
        let (level, title, message) = match &event {
            SyncEvent::MutationQueued { action_type, .. } => (
                NotificationLevel::Info,
                "Saved offline".to_string(),
                format!("{} will be synced when you are back online", action_type),
            ),
            SyncEvent::ModeChanged { online: true } => (
                NotificationLevel::Success,
                "Online mode".to_string(),
                "Changes are sent to the server directly".to_string(),
            ),
            SyncEvent::ModeChanged { online: false } => (
                NotificationLevel::Info,
                "Offline mode".to_string(),
                "Changes are saved locally until you go back online".to_string(),
            ),
            SyncEvent::ModeChangeRejected => (
                NotificationLevel::Error,
                "Cannot go online".to_string(),
                "No network connection is available".to_string(),
            ),
            SyncEvent::ConnectivityRestored => (
                NotificationLevel::Success,
                "Connection restored".to_string(),
                "The network is available again".to_string(),
            ),
            SyncEvent::ConnectivityLost => (
                NotificationLevel::Warning,
                "Connection lost".to_string(),
                "Changes will be saved locally".to_string(),
            ),
            SyncEvent::DrainStarted { pending } => (
                NotificationLevel::Info,
                "Syncing".to_string(),
                format!("Sending {} pending change(s)", pending),
            ),
            SyncEvent::DrainCompleted { summary } => {
                let level = if summary.fail_count == 0 {
                    NotificationLevel::Success
                } else if summary.success_count > 0 {
                    NotificationLevel::Warning
                } else {
                    NotificationLevel::Error
                };
                let title = match level {
                    NotificationLevel::Success => "Sync complete",
                    NotificationLevel::Warning => "Sync partially complete",
                    _ => "Sync failed",
                };
                (
                    level,
                    title.to_string(),
                    format!(
                        "{} synced, {} failed",
                        summary.success_count, summary.fail_count
                    ),
                )
            }
            SyncEvent::DrainAlreadyRunning => (
                NotificationLevel::Info,
                "Sync in progress".to_string(),
                "A sync is already running".to_string(),
            ),
            SyncEvent::NothingToSync => (
                NotificationLevel::Info,
                "Nothing to sync".to_string(),
                "There are no pending changes".to_string(),
            ),
            SyncEvent::CannotSyncOffline => (
                NotificationLevel::Error,
                "Cannot sync".to_string(),
                "Cannot sync while offline".to_string(),
            ),
            SyncEvent::StorageQuotaExceeded {
                discarded,
                recovered,
            } => {
                let message = match (discarded.len(), recovered) {
                    (0, _) => "Local storage is full; the change could not be saved".to_string(),
                    (n, true) => format!("Local storage is full; discarded {} failed change(s)", n),
                    (n, false) => format!(
                        "Local storage is full; discarded {} failed change(s) but still out of space",
                        n
                    ),
                };
                (
                    NotificationLevel::Error,
                    "Storage full".to_string(),
                    message,
                )
            }
            SyncEvent::StorageFailure { message } => (
                NotificationLevel::Error,
                "Storage error".to_string(),
                message.clone(),
            ),
        };

        Self {
            level,
            title,
            message,
            event,
        }
    }
}

/// Receiver of user-facing notifications.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);

    fn emit(&self, event: SyncEvent) {
        self.notify(Notification::from_event(event));
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotificationSink;

impl NotificationSink for NoopNotificationSink {
    fn notify(&self, _notification: Notification) {}
}

/// Sink that keeps every notification in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.notifications().into_iter().map(|n| n.event).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.notifications.lock() {
            guard.clear();
        }
    }
}

impl NotificationSink for RecordingNotificationSink {
    fn notify(&self, notification: Notification) {
        if let Ok(mut guard) = self.notifications.lock() {
            guard.push(notification);
        }
    }
}
