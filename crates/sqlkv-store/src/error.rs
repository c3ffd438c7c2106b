//! Error types for the sqlkv-store crate.
//!
//! Two layers of errors exist:
//!
//! - [`StorageError`] is what the SQLite backend reports. It knows nothing
//!   about keys or operations.
//! - [`KvError`] is what callers of [`KvStore`](crate::KvStore) see. Storage
//!   faults are wrapped with the operation, key and table they occurred in.

use thiserror::Error;

/// Alias for `Result<T, StorageError>`.
pub type StorageResult<T> = Result<T, StorageError>;

/// Alias for `Result<T, KvError>`.
pub type KvResult<T> = Result<T, KvError>;

/// Faults raised by the storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A schema migration failed.
    #[error("schema v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// The database handle has already been closed.
    #[error("database handle is closed")]
    Closed,

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

/// Errors returned by the public key-value operations.
#[derive(Debug, Error)]
pub enum KvError {
    /// The key does not exist or has logically expired.
    #[error("key not found or expired: {key:?}")]
    KeyNotFound { key: String },

    /// The key holds a value of a kind the operation does not accept.
    #[error("WRONGTYPE operation against key {key:?} holding a {kind:?} value")]
    WrongType { key: String, kind: String },

    /// The backend failed while serving a keyed operation.
    #[error("{op} failed for {key:?} in table {table:?}: {source}")]
    Storage {
        op: &'static str,
        key: String,
        table: String,
        #[source]
        source: StorageError,
    },

    /// The backend failed during an operation not tied to one key.
    #[error("{op} failed in table {table:?}: {source}")]
    Backend {
        op: &'static str,
        table: String,
        #[source]
        source: StorageError,
    },

    /// Invalid setup input (table name, sweep interval, config file).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A sweeper is already running for this store.
    #[error("expiry sweeper already running for table {table:?}")]
    SweeperRunning { table: String },

    /// The store has been closed.
    #[error("store for table {table:?} is closed")]
    Closed { table: String },
}

impl KvError {
    /// `true` for [`KvError::KeyNotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound { .. })
    }

    /// `true` for [`KvError::WrongType`].
    pub fn is_wrong_type(&self) -> bool {
        matches!(self, Self::WrongType { .. })
    }

    /// `true` when the error wraps a backend fault.
    pub fn is_storage_fault(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Backend { .. })
    }
}
