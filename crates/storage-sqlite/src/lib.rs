//! SQLite persistence for the offline sync subsystem.

pub mod db;
pub mod errors;
pub mod kv;
pub mod schema;

pub use db::{create_pool, get_connection, init, run_migrations, DbConnection, DbPool};
pub use errors::{Result, StorageError};
pub use kv::SqliteKeyValueStore;
