use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Failures of the SQLite layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage capacity exceeded: {0}")]
    QuotaExceeded(String),
}

impl StorageError {
    /// SQLite reports a full disk or a hit `max_page_count` as SQLITE_FULL.
    fn is_disk_full(&self) -> bool {
        matches!(
            self,
            Self::Query(diesel::result::Error::DatabaseError(_, info))
                if info.message().contains("database or disk is full")
        )
    }
}

impl From<StorageError> for marksync_core::StorageError {
    fn from(err: StorageError) -> Self {
        if err.is_disk_full() {
            return Self::quota_exceeded(err.to_string());
        }
        match err {
            StorageError::QuotaExceeded(message) => Self::quota_exceeded(message),
            StorageError::Pool(err) => Self::unavailable(err.to_string()),
            other => Self::backend(other.to_string()),
        }
    }
}

impl From<StorageError> for marksync_core::Error {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_failures_keep_their_kind_across_the_boundary() {
        let core: marksync_core::StorageError =
            StorageError::QuotaExceeded("64 bytes".to_string()).into();
        assert!(core.is_quota_exceeded());

        let core: marksync_core::StorageError =
            StorageError::Migration("bad sql".to_string()).into();
        assert!(matches!(core, marksync_core::StorageError::Backend(_)));
    }
}
