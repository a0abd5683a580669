//! Offline mutation queue domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// HTTP methods a queued write can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("Unsupported mutation method '{}'", other)),
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a queued write.
///
/// `pending -> syncing -> (removed | failed)`, and `failed -> pending` only
/// through an explicit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Pending,
    Syncing,
    Success,
    Failed,
}

/// A write waiting to reach the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRecord {
    pub id: String,
    pub enqueued_at: DateTime<Utc>,
    /// Free-form tag such as `UPDATE_MARKS`.
    pub action_type: String,
    pub endpoint: String,
    pub method: HttpMethod,
    /// Forwarded verbatim to the transport.
    pub payload: serde_json::Value,
    pub status: MutationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl MutationRecord {
    pub(crate) fn from_action(action: MutationAction) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            enqueued_at: Utc::now(),
            action_type: action.action_type,
            endpoint: action.endpoint,
            method: action.method,
            payload: action.payload,
            status: MutationStatus::Pending,
            error: None,
            attempts: 0,
            last_attempt_at: None,
        }
    }

    /// Failed after at least one send; the only kind of record that may be
    /// dropped under storage pressure.
    pub fn is_attempted_failure(&self) -> bool {
        self.status == MutationStatus::Failed && self.attempts > 0
    }
}

/// Caller input for a new queued write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationAction {
    pub action_type: String,
    pub endpoint: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl MutationAction {
    pub fn new(
        action_type: impl Into<String>,
        endpoint: impl Into<String>,
        method: HttpMethod,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            action_type: action_type.into(),
            endpoint: endpoint.into(),
            method,
            payload,
        }
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.action_type.trim().is_empty() {
            return Err(crate::Error::invalid_input("actionType must not be empty"));
        }
        if self.endpoint.trim().is_empty() {
            return Err(crate::Error::invalid_input("endpoint must not be empty"));
        }
        Ok(())
    }
}

/// Aggregate result of one drain. Not persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub success_count: usize,
    pub fail_count: usize,
}

impl SyncSummary {
    pub fn new(success_count: usize, fail_count: usize) -> Self {
        Self {
            success_count,
            fail_count,
        }
    }

    pub fn total(&self) -> usize {
        self.success_count + self.fail_count
    }
}

/// What a call to `drain` ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DrainOutcome {
    Completed { summary: SyncSummary },
    NothingToSync,
    /// Effective connectivity is offline; no network call was made.
    Offline,
    /// Another drain was in flight; this call did nothing.
    AlreadyRunning,
}

impl DrainOutcome {
    /// Summary of the pass; zero for anything but a completed drain.
    pub fn summary(&self) -> SyncSummary {
        match self {
            Self::Completed { summary } => *summary,
            _ => SyncSummary::default(),
        }
    }
}

/// Why a drain was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainTrigger {
    Startup,
    Reconnect,
    ModeEnabled,
    LocalMutation,
    Periodic,
    Manual,
}

/// Per-status record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub pending: usize,
    pub syncing: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.pending + self.syncing + self.failed
    }
}

/// Last completed drain, kept for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub trigger: DrainTrigger,
    pub summary: SyncSummary,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

/// Point-in-time view of the sync subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusSnapshot {
    pub network_online: bool,
    pub online_mode: bool,
    pub effective_online: bool,
    pub is_draining: bool,
    pub counts: QueueCounts,
    pub last_drain: Option<DrainReport>,
}
