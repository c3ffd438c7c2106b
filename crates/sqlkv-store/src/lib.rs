//! # sqlkv-store
//!
//! A Redis-style string key-value store on top of SQLite.
//!
//! Keys carry an optional time-to-live. Expiry is enforced lazily on every
//! read (an expired key is invisible and its row is deleted in the
//! background) and eagerly by a periodic sweeper that purges every expired
//! row in one statement.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  KvStore   set/get/del/exists/ttl/keys  │
//! │            lifecycle + sweeper handle   │
//! ├──────────────────┬──────────────────────┤
//! │  expiry policy   │  glob → LIKE pattern │
//! ├──────────────────┴──────────────────────┤
//! │  KvBackend (SqliteBackend, one table)   │
//! │  schema (per-table versioned migrations)│
//! ├─────────────────────────────────────────┤
//! │  Database (rusqlite WAL, blocking pool) │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use std::time::Duration;
//! use sqlkv_store::KvStore;
//!
//! let store = KvStore::open("data/kv.db", "sessions").await?;
//! store.start_sweeper(Duration::from_secs(60))?;
//!
//! store.set("session:42", "alice", Duration::from_secs(3600)).await?;
//! assert_eq!(store.get("session:42").await?, "alice");
//! let live = store.keys("session:*").await?;
//!
//! store.close().await?;
//! ```

pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod expiry;
pub mod pattern;
pub mod record;
pub mod schema;
pub mod stats;
pub mod store;
pub mod sweeper;

// ── re-exports ───────────────────────────────────────────────────────

pub use backend::{KvBackend, SqliteBackend};
pub use config::StoreConfig;
pub use db::Database;
pub use error::{KvError, KvResult, StorageError, StorageResult};
pub use expiry::{Clock, Liveness, ManualClock, SystemClock};
pub use pattern::LikePattern;
pub use record::{Record, RecordKind, RecordMeta, Ttl};
pub use schema::TableName;
pub use stats::ExpiryStats;
pub use store::{KvStore, KvStoreBuilder};
