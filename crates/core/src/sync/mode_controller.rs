//! The user's online/offline mode, independent of raw network presence.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::events::{NotificationSink, SyncEvent};
use crate::storage::{load_json, save_json, PersistentStore, ONLINE_MODE_KEY};

use super::ConnectivityMonitor;

/// Result of a mode change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ModeTransition {
    Changed { online: bool },
    Unchanged { online: bool },
    /// Online mode was requested without network presence.
    Rejected,
}

impl ModeTransition {
    /// True when this transition switched the mode to online.
    pub fn went_online(&self) -> bool {
        matches!(self, Self::Changed { online: true })
    }
}

/// Holds and persists the mode preference. Defaults to online on first run.
pub struct ModeController {
    store: Arc<dyn PersistentStore>,
    sink: Arc<dyn NotificationSink>,
    monitor: Arc<ConnectivityMonitor>,
    online_mode: Mutex<bool>,
}

impl ModeController {
    pub fn load(
        store: Arc<dyn PersistentStore>,
        sink: Arc<dyn NotificationSink>,
        monitor: Arc<ConnectivityMonitor>,
    ) -> Result<Self> {
        let online_mode = load_json::<bool>(store.as_ref(), ONLINE_MODE_KEY)?.unwrap_or(true);
        info!(
            "[OfflineSync] Mode preference loaded: {}",
            if online_mode { "online" } else { "offline" }
        );
        Ok(Self {
            store,
            sink,
            monitor,
            online_mode: Mutex::new(online_mode),
        })
    }

    pub fn is_online_mode(&self) -> bool {
        *self.lock_mode()
    }

    /// Sets the mode. Asking for online mode while the network is absent is
    /// refused with an error notification and leaves the mode unchanged.
    pub fn set_mode(&self, online: bool) -> Result<ModeTransition> {
        let mut current = self.lock_mode();
        self.apply(&mut current, online)
    }

    /// Flips the mode, under the same guard as [`ModeController::set_mode`].
    pub fn toggle(&self) -> Result<ModeTransition> {
        let mut current = self.lock_mode();
        let target = !*current;
        self.apply(&mut current, target)
    }

    fn apply(&self, current: &mut bool, online: bool) -> Result<ModeTransition> {
        if online && !self.monitor.is_online() {
            warn!("[OfflineSync] Online mode requested without network presence");
            self.sink.emit(SyncEvent::ModeChangeRejected);
            return Ok(ModeTransition::Rejected);
        }
        if *current == online {
            return Ok(ModeTransition::Unchanged { online });
        }

        // Durable before it takes effect.
        save_json(self.store.as_ref(), ONLINE_MODE_KEY, &online)?;
        *current = online;
        info!(
            "[OfflineSync] Mode switched to {}",
            if online { "online" } else { "offline" }
        );
        self.sink.emit(SyncEvent::ModeChanged { online });
        Ok(ModeTransition::Changed { online })
    }

    fn lock_mode(&self) -> MutexGuard<'_, bool> {
        self.online_mode
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
