//! SQLite connection handle with WAL mode and tuned pragmas.
//!
//! The [`Database`] struct wraps a `rusqlite::Connection` behind an
//! `Arc<Mutex<>>` and exposes async methods that use
//! `tokio::task::spawn_blocking` to avoid blocking the async runtime.
//!
//! The connection slot is an `Option` so the handle can be closed explicitly
//! while clones are still held by background tasks; those clones then fail
//! with [`StorageError::Closed`].

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};

/// Path value that selects a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// Default time a statement waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Thread-safe handle to a SQLite database.
///
/// All statements go through [`Database::execute`] which dispatches onto the
/// blocking thread pool.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl Database {
    /// Open (or create) a database at `path` and apply pragmas.
    ///
    /// This call blocks briefly (file I/O), so call it from `spawn_blocking`
    /// when already inside the runtime.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> StorageResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        Self::apply_pragmas(&conn, busy_timeout)?;

        Ok(Self::from_connection(conn))
    }

    /// Create a private in-memory database, useful for tests.
    pub fn open_in_memory() -> StorageResult<Self> {
        debug!("opening in-memory database");

        let conn = Connection::open_in_memory()?;
        Self::apply_pragmas(&conn, DEFAULT_BUSY_TIMEOUT)?;

        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }

    /// Execute a closure against the connection on the blocking pool.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let rows: i64 = db.execute(|conn| {
    ///     let n = conn.query_row("SELECT count(*) FROM kv", [], |row| row.get(0))?;
    ///     Ok(n)
    /// }).await?;
    /// ```
    pub async fn execute<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| StorageError::TaskJoin(format!("mutex poisoned: {e}")))?;
            let conn = guard.as_ref().ok_or(StorageError::Closed)?;
            f(conn)
        })
        .await?
    }

    /// Execute a closure that needs `&mut Connection` (transactions) on the
    /// blocking pool.
    pub async fn execute_mut<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StorageError::TaskJoin(format!("mutex poisoned: {e}")))?;
            let conn = guard.as_mut().ok_or(StorageError::Closed)?;
            f(conn)
        })
        .await?
    }

    /// Close the connection. Closing twice is a no-op.
    pub async fn close(&self) -> StorageResult<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let taken = conn
                .lock()
                .map_err(|e| StorageError::TaskJoin(format!("mutex poisoned: {e}")))?
                .take();
            match taken {
                Some(conn) => {
                    conn.close().map_err(|(_, e)| StorageError::Sqlite(e))?;
                    info!("database closed");
                    Ok(())
                }
                None => Ok(()),
            }
        })
        .await?
    }

    // ── pragmas ──────────────────────────────────────────────────────

    fn apply_pragmas(conn: &Connection, busy_timeout: Duration) -> StorageResult<()> {
        debug!("applying SQLite pragmas");

        // Set first: switching to WAL needs a lock another opener may hold.
        conn.busy_timeout(busy_timeout)?;

        // WAL mode: concurrent readers, non-blocking writes.
        conn.pragma_update(None, "journal_mode", "WAL")?;

        // NORMAL sync is safe with WAL.
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.pragma_update(None, "temp_store", "MEMORY")?;

        // Key patterns are matched case-sensitively, like Redis globs.
        conn.pragma_update(None, "case_sensitive_like", true)?;

        let busy_ms = u64::try_from(busy_timeout.as_millis()).unwrap_or(u64::MAX);
        info!(busy_timeout_ms = busy_ms, "database pragmas applied");
        Ok(())
    }
}

// ── tests ────────────────────────────────────────────────────────────
