use std::sync::Arc;

use chrono::Utc;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};
use diesel::sqlite::SqliteConnection;
use log::{debug, warn};
use tokio::sync::broadcast;

use marksync_core::storage::{PersistentStore, StoreChange};

use super::model::KeyValueDB;
use crate::db::{create_pool, get_connection, init, run_migrations, DbPool};
use crate::errors::{Result, StorageError};
use crate::schema::kv_store;

const CHANGE_FEED_CAPACITY: usize = 64;

#[derive(QueryableByName)]
struct UsedBytesRow {
    #[diesel(sql_type = BigInt)]
    used: i64,
}

/// [`PersistentStore`] over the `kv_store` table.
///
/// Each `save` is one immediate transaction, so a failed write leaves the
/// previous value in place. An optional byte quota caps the summed size of
/// all values.
pub struct SqliteKeyValueStore {
    pool: Arc<DbPool>,
    quota_bytes: Option<u64>,
    changes: broadcast::Sender<StoreChange>,
}

impl SqliteKeyValueStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            pool,
            quota_bytes: None,
            changes,
        }
    }

    /// Opens (creating and migrating if needed) the database under `data_dir`.
    pub fn open(data_dir: &str) -> Result<Self> {
        let db_path = init(data_dir)?;
        run_migrations(&db_path)?;
        Ok(Self::new(create_pool(&db_path)?))
    }

    pub fn with_quota_bytes(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    pub fn used_bytes(&self) -> Result<u64> {
        let mut conn = get_connection(&self.pool)?;
        used_bytes_excluding(&mut conn, "")
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = get_connection(&self.pool)?;
        let row = kv_store::table
            .find(key)
            .select(KeyValueDB::as_select())
            .first::<KeyValueDB>(&mut conn)
            .optional()?;
        Ok(row.map(|r| r.value))
    }

    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = get_connection(&self.pool)?;
        let quota = self.quota_bytes;
        let row = KeyValueDB {
            key: key.to_string(),
            value: value.to_string(),
            updated_at: Utc::now().to_rfc3339(),
        };

        conn.immediate_transaction::<_, StorageError, _>(|tx| {
            if let Some(quota) = quota {
                let needed = used_bytes_excluding(tx, key)? + value.len() as u64;
                if needed > quota {
                    return Err(StorageError::QuotaExceeded(format!(
                        "{} bytes needed, {} allowed",
                        needed, quota
                    )));
                }
            }

            diesel::insert_into(kv_store::table)
                .values(&row)
                .on_conflict(kv_store::key)
                .do_update()
                .set((
                    kv_store::value.eq(&row.value),
                    kv_store::updated_at.eq(&row.updated_at),
                ))
                .execute(tx)?;
            Ok(())
        })?;

        debug!("[OfflineSync] Saved '{}' ({} bytes)", key, value.len());
        // No subscribers is fine.
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
        });
        Ok(())
    }
}

fn used_bytes_excluding(conn: &mut SqliteConnection, key: &str) -> Result<u64> {
    let row = diesel::sql_query(
        "SELECT COALESCE(SUM(LENGTH(CAST(value AS BLOB))), 0) AS used FROM kv_store WHERE key <> ?",
    )
    .bind::<Text, _>(key)
    .get_result::<UsedBytesRow>(conn)?;
    Ok(u64::try_from(row.used).unwrap_or(0))
}

impl PersistentStore for SqliteKeyValueStore {
    fn save(&self, key: &str, value: &str) -> std::result::Result<(), marksync_core::StorageError> {
        self.put(key, value).map_err(|err| {
            warn!("[OfflineSync] Failed to save '{}': {}", key, err);
            err.into()
        })
    }

    fn load(&self, key: &str) -> std::result::Result<Option<String>, marksync_core::StorageError> {
        self.get(key).map_err(Into::into)
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StoreChange>> {
        Some(self.changes.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marksync_core::events::NoopNotificationSink;
    use marksync_core::storage::MUTATION_QUEUE_KEY;
    use marksync_core::sync::{HttpMethod, MutationAction, MutationQueue, MutationStatus};
    use tempfile::{tempdir, TempDir};

    fn open_store() -> (TempDir, SqliteKeyValueStore) {
        let dir = tempdir().expect("tempdir");
        let store = SqliteKeyValueStore::open(&dir.path().to_string_lossy()).expect("open store");
        (dir, store)
    }

    #[test]
    fn missing_keys_load_as_none_and_saves_overwrite() {
        let (_dir, store) = open_store();
        assert_eq!(store.load("absent").expect("load"), None);

        store.save("mode", "true").expect("save");
        store.save("mode", "false").expect("overwrite");
        assert_eq!(store.load("mode").expect("load"), Some("false".to_string()));
    }

    #[test]
    fn values_survive_reopening_the_database() {
        let dir = tempdir().expect("tempdir");
        let data_dir = dir.path().to_string_lossy().to_string();
        {
            let store = SqliteKeyValueStore::open(&data_dir).expect("open");
            store.save(MUTATION_QUEUE_KEY, "[]").expect("save");
        }
        let reopened = SqliteKeyValueStore::open(&data_dir).expect("reopen");
        assert_eq!(
            reopened.load(MUTATION_QUEUE_KEY).expect("load"),
            Some("[]".to_string())
        );
    }

    #[test]
    fn quota_refusal_keeps_the_previous_value() {
        let (_dir, store) = open_store();
        let store = store.with_quota_bytes(16);
        store.save("queue", "0123456789").expect("fits");

        let err = store
            .save("queue", "0123456789abcdefXYZ")
            .expect_err("over quota");
        assert!(err.is_quota_exceeded());
        assert_eq!(
            store.load("queue").expect("load"),
            Some("0123456789".to_string())
        );

        // The replaced value does not count against the new one.
        store.save("queue", "0123456789abcdef").expect("exactly at quota");
        assert_eq!(store.used_bytes().expect("used"), 16);
    }

    #[tokio::test]
    async fn saves_are_published_on_the_change_feed() {
        let (_dir, store) = open_store();
        let mut changes = store.subscribe().expect("sqlite store has a change feed");

        store.save("mode", "true").expect("save");
        let change = changes.recv().await.expect("change");
        assert_eq!(change.key, "mode");
    }

    #[test]
    fn queue_reload_recovers_interrupted_records() {
        let (_dir, store) = open_store();
        let store = Arc::new(store);
        let sink = Arc::new(NoopNotificationSink);

        let queue = MutationQueue::load(store.clone(), sink.clone()).expect("load queue");
        let id = queue
            .enqueue(MutationAction::new(
                "UPDATE_MARKS",
                "/marks",
                HttpMethod::Post,
                serde_json::json!({ "studentId": 3, "score": 70 }),
            ))
            .expect("enqueue");
        drop(queue);

        // Simulate a crash in the middle of a send.
        let raw = store.load(MUTATION_QUEUE_KEY).expect("load").expect("queue");
        let interrupted = raw.replace("\"pending\"", "\"syncing\"");
        store.save(MUTATION_QUEUE_KEY, &interrupted).expect("save");

        let queue = MutationQueue::load(store, sink).expect("reload queue");
        let record = queue.get(&id).expect("record survived");
        assert_eq!(record.status, MutationStatus::Pending);
        assert_eq!(record.payload["score"], 70);
    }
}
