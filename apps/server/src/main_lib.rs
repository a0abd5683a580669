//! Application state and router assembly.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use marksync_core::events::NotificationSink;
use marksync_core::storage::{MemoryStore, PersistentStore};
use marksync_core::sync::OfflineSyncService;
use marksync_core::transport::Transport;
use marksync_http_transport::RestTransport;
use marksync_storage_sqlite::SqliteKeyValueStore;

use crate::api;
use crate::config::{Config, StoreKind};
use crate::events::{EventBus, EventBusNotificationSink};

pub struct AppState {
    pub sync: Arc<OfflineSyncService>,
    pub event_bus: EventBus,
}

impl AppState {
    /// Wires the service to an event bus so its notifications reach SSE clients.
    pub fn new(
        store: Arc<dyn PersistentStore>,
        transport: Arc<dyn Transport>,
        network_online: bool,
    ) -> anyhow::Result<Arc<Self>> {
        let event_bus = EventBus::new();
        let sink: Arc<dyn NotificationSink> =
            Arc::new(EventBusNotificationSink::new(event_bus.clone()));
        let sync = OfflineSyncService::init(store, transport, sink, network_online)
            .context("Failed to load the offline sync state")?;
        Ok(Arc::new(Self { sync, event_bus }))
    }
}

fn build_store(config: &Config) -> anyhow::Result<Arc<dyn PersistentStore>> {
    match config.store {
        StoreKind::Sqlite => {
            let mut store = SqliteKeyValueStore::open(&config.data_dir)
                .with_context(|| format!("Failed to open database in {}", config.data_dir))?;
            if let Some(quota) = config.store_quota_bytes {
                store = store.with_quota_bytes(quota);
            }
            Ok(Arc::new(store))
        }
        StoreKind::Memory => {
            tracing::warn!("Using the in-memory store; queued changes will not survive a restart");
            let store = match config.store_quota_bytes {
                Some(quota) => MemoryStore::with_capacity_bytes(
                    usize::try_from(quota).unwrap_or(usize::MAX),
                ),
                None => MemoryStore::new(),
            };
            Ok(Arc::new(store))
        }
    }
}

pub fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    let store = build_store(config)?;
    let transport = RestTransport::new(&config.api_url, config.request_timeout)
        .context("Failed to build HTTP client")?
        .with_token(config.api_token.clone())
        .with_max_attempts(config.transport_max_attempts);
    tracing::info!("Replaying queued changes against {}", config.api_url);
    AppState::new(store, Arc::new(transport), config.network_online)
}

pub fn app_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api::health::router())
        .nest("/api/v1/sync", api::sync::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
