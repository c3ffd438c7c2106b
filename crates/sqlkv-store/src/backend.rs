//! Storage backend seam.
//!
//! [`KvBackend`] is the narrow interface the key-value layer needs from
//! durable storage: upsert, point lookups, deletes, a bulk expiry purge and a
//! pattern scan. [`SqliteBackend`] implements it over one table of a
//! [`Database`].
//!
//! Backend methods report raw [`StorageError`]s; adding key and operation
//! context is the caller's job.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::OptionalExtension;
use tracing::debug;

use crate::db::Database;
use crate::error::StorageResult;
use crate::pattern::{LIKE_ESCAPE, LikePattern};
use crate::record::{Record, RecordKind, RecordMeta};
use crate::schema::{self, TableName};

/// Durable key-value relation used by [`KvStore`](crate::KvStore).
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    /// Insert or fully replace the row for `record.key`.
    async fn upsert(&self, record: Record) -> StorageResult<()>;

    /// Fetch the full row.
    async fn fetch(&self, key: &str) -> StorageResult<Option<Record>>;

    /// Fetch kind and expiration only.
    async fn fetch_meta(&self, key: &str) -> StorageResult<Option<RecordMeta>>;

    /// Delete the row. Returns whether a row was removed.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Delete the row only if it is still expired relative to `now`.
    async fn delete_if_expired(&self, key: &str, now: i64) -> StorageResult<bool>;

    /// Delete every row whose expiration is strictly before `now`.
    async fn delete_expired(&self, now: i64) -> StorageResult<u64>;

    /// Rows whose key matches `pattern`, without values.
    async fn scan(&self, pattern: &LikePattern) -> StorageResult<Vec<RecordMeta>>;

    /// Physical row count, expired rows included.
    async fn count(&self) -> StorageResult<u64>;

    /// Release the underlying handle.
    async fn close(&self) -> StorageResult<()>;
}

// ── sqlite ───────────────────────────────────────────────────────────

/// SQL text for one table, rendered once from a validated [`TableName`].
#[derive(Debug)]
struct Statements {
    upsert: String,
    fetch: String,
    fetch_meta: String,
    delete: String,
    delete_if_expired: String,
    delete_expired: String,
    scan: String,
    count: String,
}

impl Statements {
    fn for_table(table: &TableName) -> Self {
        let t = table.quoted();
        Self {
            upsert: format!(
                "INSERT INTO {t} (key, value, kind, expires_at) VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(key) DO UPDATE SET \
                 value = excluded.value, kind = excluded.kind, expires_at = excluded.expires_at"
            ),
            fetch: format!("SELECT value, kind, expires_at FROM {t} WHERE key = ?1"),
            fetch_meta: format!("SELECT kind, expires_at FROM {t} WHERE key = ?1"),
            delete: format!("DELETE FROM {t} WHERE key = ?1"),
            delete_if_expired: format!(
                "DELETE FROM {t} WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at < ?2"
            ),
            delete_expired: format!(
                "DELETE FROM {t} WHERE expires_at IS NOT NULL AND expires_at < ?1"
            ),
            scan: format!(
                "SELECT key, kind, expires_at FROM {t} WHERE key LIKE ?1 ESCAPE '{LIKE_ESCAPE}'"
            ),
            count: format!("SELECT COUNT(*) FROM {t}"),
        }
    }
}

/// [`KvBackend`] over one table of a SQLite [`Database`].
///
/// Cheap to clone; clones share the connection and the rendered statements.
#[derive(Clone)]
pub struct SqliteBackend {
    db: Database,
    table: TableName,
    sql: Arc<Statements>,
}

impl SqliteBackend {
    /// Create or upgrade the table and return a backend bound to it.
    pub async fn attach(db: Database, table: TableName) -> StorageResult<Self> {
        let migrate_table = table.clone();
        db.execute_mut(move |conn| schema::run_all(conn, &migrate_table))
            .await?;

        let sql = Arc::new(Statements::for_table(&table));
        debug!(table = %table, "sqlite backend attached");
        Ok(Self { db, table, sql })
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// The shared database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl KvBackend for SqliteBackend {
    async fn upsert(&self, record: Record) -> StorageResult<()> {
        let sql = Arc::clone(&self.sql);
        self.db
            .execute(move |conn| {
                conn.prepare_cached(&sql.upsert)?.execute(rusqlite::params![
                    record.key,
                    record.value,
                    record.kind.as_str(),
                    record.expires_at,
                ])?;
                Ok(())
            })
            .await
    }

    async fn fetch(&self, key: &str) -> StorageResult<Option<Record>> {
        let sql = Arc::clone(&self.sql);
        let key = key.to_owned();
        self.db
            .execute(move |conn| {
                let row = conn
                    .prepare_cached(&sql.fetch)?
                    .query_row(rusqlite::params![key], |row| {
                        Ok((
                            row.get::<_, Option<String>>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<i64>>(2)?,
                        ))
                    })
                    .optional()?;
                Ok(row.map(|(value, kind, expires_at)| Record {
                    key,
                    value: value.unwrap_or_default(),
                    kind: RecordKind::parse(&kind),
                    expires_at,
                }))
            })
            .await
    }

    async fn fetch_meta(&self, key: &str) -> StorageResult<Option<RecordMeta>> {
        let sql = Arc::clone(&self.sql);
        let key = key.to_owned();
        self.db
            .execute(move |conn| {
                let row = conn
                    .prepare_cached(&sql.fetch_meta)?
                    .query_row(rusqlite::params![key], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?))
                    })
                    .optional()?;
                Ok(row.map(|(kind, expires_at)| RecordMeta {
                    key,
                    kind: RecordKind::parse(&kind),
                    expires_at,
                }))
            })
            .await
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let sql = Arc::clone(&self.sql);
        let key = key.to_owned();
        self.db
            .execute(move |conn| {
                let n = conn
                    .prepare_cached(&sql.delete)?
                    .execute(rusqlite::params![key])?;
                Ok(n > 0)
            })
            .await
    }

    async fn delete_if_expired(&self, key: &str, now: i64) -> StorageResult<bool> {
        let sql = Arc::clone(&self.sql);
        let key = key.to_owned();
        self.db
            .execute(move |conn| {
                let n = conn
                    .prepare_cached(&sql.delete_if_expired)?
                    .execute(rusqlite::params![key, now])?;
                Ok(n > 0)
            })
            .await
    }

    async fn delete_expired(&self, now: i64) -> StorageResult<u64> {
        let sql = Arc::clone(&self.sql);
        self.db
            .execute(move |conn| {
                let n = conn
                    .prepare_cached(&sql.delete_expired)?
                    .execute(rusqlite::params![now])?;
                Ok(n as u64)
            })
            .await
    }

    async fn scan(&self, pattern: &LikePattern) -> StorageResult<Vec<RecordMeta>> {
        let sql = Arc::clone(&self.sql);
        let pattern = pattern.as_str().to_owned();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare_cached(&sql.scan)?;
                let rows = stmt
                    .query_map(rusqlite::params![pattern], |row| {
                        Ok(RecordMeta {
                            key: row.get(0)?,
                            kind: RecordKind::parse(&row.get::<_, String>(1)?),
                            expires_at: row.get(2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    async fn count(&self) -> StorageResult<u64> {
        let sql = Arc::clone(&self.sql);
        self.db
            .execute(move |conn| {
                let n: i64 = conn.query_row(&sql.count, [], |row| row.get(0))?;
                Ok(u64::try_from(n).unwrap_or_default())
            })
            .await
    }

    async fn close(&self) -> StorageResult<()> {
        self.db.close().await
    }
}

// ── tests ────────────────────────────────────────────────────────────
