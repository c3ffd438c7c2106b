//! Per-table schema and versioned migrations.
//!
//! Every key-value store lives in its own table so several stores can share
//! one database file. Table names are validated against a strict identifier
//! allow-list before they are ever placed in SQL, and are always emitted
//! double-quoted.
//!
//! Applied versions are tracked per table in the `_sqlkv_schema` bookkeeping
//! table, so opening an existing store is idempotent and older tables are
//! upgraded in place.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};

/// Maximum accepted table-name length.
pub const MAX_TABLE_NAME_LEN: usize = 64;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

// ── table name ───────────────────────────────────────────────────────

/// A validated SQL identifier naming one store's table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName(String);

impl TableName {
    /// Validate `name`, returning a human-readable reason on rejection.
    pub fn new(name: impl Into<String>) -> Result<Self, String> {
        let name = name.into();
        if name.is_empty() {
            return Err("table name cannot be empty".into());
        }
        if name.len() > MAX_TABLE_NAME_LEN {
            return Err(format!(
                "table name {name:?} exceeds {MAX_TABLE_NAME_LEN} characters"
            ));
        }
        if !IDENTIFIER.is_match(&name) {
            return Err(format!(
                "table name {name:?} must start with a letter or '_' and contain only ASCII letters, digits and '_'"
            ));
        }
        let lower = name.to_ascii_lowercase();
        if lower.starts_with("sqlite_") || lower.starts_with(RESERVED_PREFIX) {
            return Err(format!("table name {name:?} is reserved"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name as a quoted SQL identifier.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }

    fn expires_index(&self) -> String {
        format!("\"{RESERVED_PREFIX}idx_{}_expires_at\"", self.0)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── migrations ───────────────────────────────────────────────────────

/// Prefix of every schema object the store creates besides user tables.
const RESERVED_PREFIX: &str = "_sqlkv_";

const BOOKKEEPING_TABLE: &str = "_sqlkv_schema";

/// A single schema step. `{table}` and `{index}` are replaced with quoted,
/// validated identifiers.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "key-value table",
        sql: r#"
            CREATE TABLE IF NOT EXISTS {table} (
                key        TEXT PRIMARY KEY,
                value      TEXT,
                kind       TEXT NOT NULL DEFAULT 'string',
                expires_at INTEGER NULL
            );
        "#,
    },
    Migration {
        version: 2,
        description: "partial index for expiry sweeps",
        sql: r#"
            CREATE INDEX IF NOT EXISTS {index}
                ON {table}(expires_at) WHERE expires_at IS NOT NULL;
        "#,
    },
];

/// The newest schema version.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Create or upgrade the table for `table`.
///
/// Each migration runs in its own `IMMEDIATE` transaction and re-reads the
/// applied version once the write lock is held, so concurrent openers of the
/// same table apply every step exactly once.
pub fn run_all(conn: &mut Connection, table: &TableName) -> StorageResult<()> {
    ensure_bookkeeping_table(conn)?;

    let current = current_version(conn, table)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        debug!(table = %table, version = current, "schema is up to date");
        return Ok(());
    }

    info!(
        table = %table,
        current_version = current,
        pending = pending.len(),
        "applying schema migrations"
    );

    for migration in pending {
        apply(conn, table, migration)?;
    }
    Ok(())
}

/// Latest applied version for `table`, or 0 if none.
pub fn current_version(conn: &Connection, table: &TableName) -> StorageResult<u32> {
    conn.query_row(
        &format!("SELECT COALESCE(MAX(version), 0) FROM {BOOKKEEPING_TABLE} WHERE table_name = ?1"),
        rusqlite::params![table.as_str()],
        |row| row.get(0),
    )
    .map_err(|e| StorageError::Migration {
        version: 0,
        message: format!("failed to read current version: {e}"),
    })
}

fn ensure_bookkeeping_table(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {BOOKKEEPING_TABLE} (
            table_name  TEXT NOT NULL,
            version     INTEGER NOT NULL,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL,
            PRIMARY KEY (table_name, version)
        );"
    ))
    .map_err(|e| StorageError::Migration {
        version: 0,
        message: format!("failed to create {BOOKKEEPING_TABLE}: {e}"),
    })
}

fn render(migration: &Migration, table: &TableName) -> String {
    migration
        .sql
        .replace("{index}", &table.expires_index())
        .replace("{table}", &table.quoted())
}

/// Apply one migration inside a transaction, unless another connection
/// applied it first.
fn apply(conn: &mut Connection, table: &TableName, migration: &Migration) -> StorageResult<()> {
    let failed = |message: String| StorageError::Migration {
        version: migration.version,
        message,
    };

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| failed(format!("failed to begin transaction: {e}")))?;

    if current_version(&tx, table)? >= migration.version {
        debug!(table = %table, version = migration.version, "migration already applied");
        return Ok(());
    }

    info!(
        table = %table,
        version = migration.version,
        description = migration.description,
        "applying migration"
    );

    tx.execute_batch(&render(migration, table))
        .map_err(|e| failed(format!("SQL execution failed: {e}")))?;

    let now = chrono::Utc::now().timestamp();
    tx.execute(
        &format!(
            "INSERT INTO {BOOKKEEPING_TABLE} (table_name, version, description, applied_at) \
             VALUES (?1, ?2, ?3, ?4)"
        ),
        rusqlite::params![table.as_str(), migration.version, migration.description, now],
    )
    .map_err(|e| failed(format!("failed to record migration: {e}")))?;

    tx.commit()
        .map_err(|e| failed(format!("failed to commit: {e}")))
}

// ── tests ────────────────────────────────────────────────────────────
