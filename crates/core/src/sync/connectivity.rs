//! Raw network presence and its edge events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::events::{NotificationSink, SyncEvent};

const CONNECTIVITY_EVENT_CAPACITY: usize = 16;

/// Transition of the host's network-presence signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityEvent {
    WentOnline,
    WentOffline,
}

/// Tracks whether the network is present.
///
/// The host feeds the signal through [`ConnectivityMonitor::set_network_present`];
/// only transitions produce events, repeated reports of the same state are
/// ignored.
pub struct ConnectivityMonitor {
    online: AtomicBool,
    events: broadcast::Sender<ConnectivityEvent>,
    sink: Arc<dyn NotificationSink>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool, sink: Arc<dyn NotificationSink>) -> Self {
        let (events, _) = broadcast::channel(CONNECTIVITY_EVENT_CAPACITY);
        Self {
            online: AtomicBool::new(initially_online),
            events,
            sink,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Records the current signal; returns the edge event if it changed.
    pub fn set_network_present(&self, present: bool) -> Option<ConnectivityEvent> {
        let previous = self.online.swap(present, Ordering::SeqCst);
        if previous == present {
            return None;
        }

        let event = if present {
            info!("[OfflineSync] Network: ONLINE");
            self.sink.emit(SyncEvent::ConnectivityRestored);
            ConnectivityEvent::WentOnline
        } else {
            warn!("[OfflineSync] Network: OFFLINE");
            self.sink.emit(SyncEvent::ConnectivityLost);
            ConnectivityEvent::WentOffline
        };
        // No subscribers yet is fine.
        let _ = self.events.send(event);
        Some(event)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingNotificationSink;

    #[tokio::test]
    async fn only_transitions_raise_events() {
        let sink = Arc::new(RecordingNotificationSink::new());
        let monitor = ConnectivityMonitor::new(true, sink.clone());
        let mut rx = monitor.subscribe();

        assert_eq!(monitor.set_network_present(true), None);
        assert_eq!(
            monitor.set_network_present(false),
            Some(ConnectivityEvent::WentOffline)
        );
        assert_eq!(monitor.set_network_present(false), None);
        assert_eq!(
            monitor.set_network_present(true),
            Some(ConnectivityEvent::WentOnline)
        );

        assert_eq!(rx.recv().await.expect("event"), ConnectivityEvent::WentOffline);
        assert_eq!(rx.recv().await.expect("event"), ConnectivityEvent::WentOnline);
        assert!(monitor.is_online());
        assert_eq!(
            sink.events(),
            vec![SyncEvent::ConnectivityLost, SyncEvent::ConnectivityRestored]
        );
    }
}
