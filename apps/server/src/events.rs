//! Server-sent event bus carrying sync notifications to connected clients.

use std::convert::Infallible;

use axum::response::sse::Event;
use futures::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};

use marksync_core::events::{Notification, NotificationLevel, NotificationSink};

pub const SYNC_NOTIFICATION: &str = "sync:notification";
pub const SYNC_STATUS: &str = "sync:status";

const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct ServerEvent {
    pub name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ServerEvent {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            payload: None,
        }
    }

    pub fn with_payload(name: &'static str, payload: serde_json::Value) -> Self {
        Self {
            name,
            payload: Some(payload),
        }
    }

    fn to_sse(&self) -> Event {
        let data = self
            .payload
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "{}".to_string());
        Event::default().event(self.name).data(data)
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ServerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: ServerEvent) {
        // Dropped when nobody is listening.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// SSE stream over a fresh subscription. Lagging clients skip what they
    /// missed rather than disconnect.
    pub fn sse_stream(&self) -> impl Stream<Item = Result<Event, Infallible>> {
        stream::unfold(self.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((Ok(event.to_sse()), rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("SSE client lagged, skipped {} event(s)", skipped);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
    }
}

/// Forwards sync notifications to the event bus and the log.
pub struct EventBusNotificationSink {
    event_bus: EventBus,
}

impl EventBusNotificationSink {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }
}

impl NotificationSink for EventBusNotificationSink {
    fn notify(&self, notification: Notification) {
        match notification.level {
            NotificationLevel::Error => {
                tracing::warn!("[OfflineSync] {}: {}", notification.title, notification.message)
            }
            _ => tracing::info!("[OfflineSync] {}: {}", notification.title, notification.message),
        }
        match serde_json::to_value(&notification) {
            Ok(payload) => self
                .event_bus
                .publish(ServerEvent::with_payload(SYNC_NOTIFICATION, payload)),
            Err(err) => tracing::error!("Failed to serialize notification: {}", err),
        }
    }
}
