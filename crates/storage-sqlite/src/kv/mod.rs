//! Key/value table backing the persisted queue and mode preference.

mod model;
mod repository;

pub use model::KeyValueDB;
pub use repository::SqliteKeyValueStore;
