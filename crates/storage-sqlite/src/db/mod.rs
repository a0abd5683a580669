//! Connection pool, pragmas and migrations.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{debug, info};

use crate::errors::{Result, StorageError};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub const DB_FILE_NAME: &str = "marksync.db";

const POOL_MAX_SIZE: u32 = 8;
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    busy_timeout_ms: u32,
}

impl CustomizeConnection<SqliteConnection, r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA journal_mode = WAL; \
             PRAGMA synchronous = NORMAL; \
             PRAGMA foreign_keys = ON; \
             PRAGMA busy_timeout = {};",
            self.busy_timeout_ms
        ))
        .map_err(r2d2::Error::QueryError)
    }
}

/// Creates the data directory if needed and returns the database path.
pub fn init(data_dir: &str) -> Result<String> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = Path::new(data_dir).join(DB_FILE_NAME);
    let db_path = db_path.to_string_lossy().to_string();
    info!("[OfflineSync] Using database at {}", db_path);
    Ok(db_path)
}

pub fn create_pool(db_path: &str) -> Result<Arc<DbPool>> {
    let manager = ConnectionManager::<SqliteConnection>::new(db_path);
    let pool = Pool::builder()
        .max_size(POOL_MAX_SIZE)
        .connection_timeout(POOL_CONNECTION_TIMEOUT)
        .connection_customizer(Box::new(ConnectionOptions {
            busy_timeout_ms: 5_000,
        }))
        .build(manager)?;
    Ok(Arc::new(pool))
}

pub fn get_connection(pool: &DbPool) -> Result<DbConnection> {
    Ok(pool.get()?)
}

pub fn run_migrations(db_path: &str) -> Result<()> {
    use diesel::Connection;

    let mut conn = SqliteConnection::establish(db_path)
        .map_err(|e| StorageError::Migration(format!("Failed to open {}: {}", db_path, e)))?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| StorageError::Migration(e.to_string()))?;
    if applied.is_empty() {
        debug!("[OfflineSync] Database schema is up to date");
    } else {
        info!("[OfflineSync] Applied {} migration(s)", applied.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(diesel::QueryableByName)]
    struct CountRow {
        #[diesel(sql_type = diesel::sql_types::BigInt)]
        c: i64,
    }

    #[test]
    fn migrations_create_the_kv_table_and_are_idempotent() {
        use diesel::RunQueryDsl;

        let dir = tempdir().expect("tempdir");
        let db_path = init(&dir.path().to_string_lossy()).expect("init db");
        run_migrations(&db_path).expect("migrate");
        run_migrations(&db_path).expect("migrate again");

        let pool = create_pool(&db_path).expect("pool");
        let mut conn = get_connection(&pool).expect("conn");
        let row = diesel::sql_query(
            "SELECT COUNT(*) AS c FROM sqlite_master WHERE type='table' AND name='kv_store'",
        )
        .get_result::<CountRow>(&mut conn)
        .expect("count");
        assert_eq!(row.c, 1);
    }
}
