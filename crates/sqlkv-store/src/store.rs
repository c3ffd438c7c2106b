//! The expiry-aware key-value store.
//!
//! [`KvStore`] implements `SET`/`GET`/`DEL`/`EXISTS`/`TTL`/`KEYS` over a
//! [`KvBackend`], and owns the lifecycle of its connection and sweeper.
//!
//! # Expiry
//!
//! A record whose `expires_at` has passed is invisible to every read even if
//! its row still exists. A read that discovers such a row hands the key to a
//! detached task for deletion and returns immediately; the caller never
//! waits for or observes that deletion. The periodic sweeper removes expired
//! rows nobody reads.
//!
//! Detached deletions are conditional: the row is removed only if it is still
//! expired when the delete runs. A `SET` that lands between the expired read
//! and the delete therefore survives. Explicit [`KvStore::del`] is
//! unconditional.
//!
//! # Concurrency
//!
//! No locking happens here. Conflicting statements are serialized by the
//! backend. A `SET` racing with a sweep of the same expired key is resolved by
//! whichever statement reaches SQLite last.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::backend::{KvBackend, SqliteBackend};
use crate::config::StoreConfig;
use crate::db::Database;
use crate::error::{KvError, KvResult, StorageError};
use crate::expiry::{self, Clock, Liveness, SystemClock};
use crate::pattern::LikePattern;
use crate::record::{Record, Ttl};
use crate::schema::TableName;
use crate::stats::ExpiryStats;
use crate::sweeper::{self, Sweeper, SweeperHandle};

// ═══════════════════════════════════════════════════════════════════════
//  KvStore
// ═══════════════════════════════════════════════════════════════════════

/// A Redis-style string store backed by one SQLite table.
///
/// Cheap to clone; clones share the connection, the sweeper and the
/// shutdown signal.
#[derive(Clone)]
pub struct KvStore {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn KvBackend>,
    clock: Arc<dyn Clock>,
    table: TableName,
    stats: Arc<ExpiryStats>,
    /// Flipped to `true` exactly once, by [`KvStore::close`].
    shutdown: watch::Sender<bool>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl KvStore {
    /// Start building a store from `config`.
    pub fn builder(config: StoreConfig) -> KvStoreBuilder {
        KvStoreBuilder {
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Open (or create) `table` in the database file at `path`.
    pub async fn open(path: impl Into<std::path::PathBuf>, table: &str) -> KvResult<Self> {
        Self::builder(StoreConfig::new(path, table)).open().await
    }

    /// Open `table` in a private in-memory database.
    pub async fn open_in_memory(table: &str) -> KvResult<Self> {
        Self::builder(StoreConfig::new(crate::db::IN_MEMORY, table))
            .open()
            .await
    }

    /// Open using every setting in `config`, including the sweeper.
    pub async fn open_with_config(config: StoreConfig) -> KvResult<Self> {
        Self::builder(config).open().await
    }

    /// The table this store reads and writes.
    pub fn table(&self) -> &str {
        self.inner.table.as_str()
    }

    /// Counters for lazy deletions and sweeps.
    pub fn expiry_stats(&self) -> &ExpiryStats {
        &self.inner.stats
    }

    // ── operations ───────────────────────────────────────────────────

    /// Set `key` to `value`, replacing any previous record.
    ///
    /// A zero `ttl` stores the key without expiration.
    #[instrument(skip(self, value), fields(table = %self.inner.table))]
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()> {
        let expires_at = expiry::expires_at_after(self.inner.clock.now(), ttl);
        self.inner
            .backend
            .upsert(Record::string(key, value, expires_at))
            .await
            .map_err(|e| self.storage_fault("set", key, e))?;

        debug!(key, ?expires_at, "key set");
        Ok(())
    }

    /// Get the value of a live string key.
    #[instrument(skip(self), fields(table = %self.inner.table))]
    pub async fn get(&self, key: &str) -> KvResult<String> {
        let record = self
            .inner
            .backend
            .fetch(key)
            .await
            .map_err(|e| self.storage_fault("get", key, e))?
            .ok_or_else(|| not_found(key))?;

        if !record.kind.is_string() {
            return Err(KvError::WrongType {
                key: key.to_owned(),
                kind: record.kind.to_string(),
            });
        }

        if expiry::is_expired(record.expires_at, self.inner.clock.unix_seconds()) {
            self.expire_in_background(vec![record.key]);
            return Err(not_found(key));
        }

        Ok(record.value)
    }

    /// Delete `key`. Deleting a missing key is not an error.
    #[instrument(skip(self), fields(table = %self.inner.table))]
    pub async fn del(&self, key: &str) -> KvResult<()> {
        let removed = self
            .inner
            .backend
            .delete(key)
            .await
            .map_err(|e| self.storage_fault("del", key, e))?;

        debug!(key, removed, "key deleted");
        Ok(())
    }

    /// Whether `key` holds a live value of any kind.
    #[instrument(skip(self), fields(table = %self.inner.table))]
    pub async fn exists(&self, key: &str) -> KvResult<bool> {
        let Some(meta) = self
            .inner
            .backend
            .fetch_meta(key)
            .await
            .map_err(|e| self.storage_fault("exists", key, e))?
        else {
            return Ok(false);
        };

        if expiry::is_expired(meta.expires_at, self.inner.clock.unix_seconds()) {
            self.expire_in_background(vec![meta.key]);
            return Ok(false);
        }
        Ok(true)
    }

    /// Remaining time to live of a live string key.
    #[instrument(skip(self), fields(table = %self.inner.table))]
    pub async fn ttl(&self, key: &str) -> KvResult<Ttl> {
        let meta = self
            .inner
            .backend
            .fetch_meta(key)
            .await
            .map_err(|e| self.storage_fault("ttl", key, e))?
            .ok_or_else(|| not_found(key))?;

        if !meta.kind.is_string() {
            return Err(KvError::WrongType {
                key: key.to_owned(),
                kind: meta.kind.to_string(),
            });
        }

        let now = self.inner.clock.now();
        match Liveness::classify(meta.expires_at, now.timestamp()) {
            Liveness::Permanent => Ok(Ttl::Persistent),
            Liveness::Live { expires_at } => {
                Ok(Ttl::Expires(expiry::live_remaining(expires_at, now)))
            }
            Liveness::Expired => {
                self.expire_in_background(vec![meta.key]);
                Err(not_found(key))
            }
        }
    }

    /// Live string keys matching a glob (`*` and `?` wildcards).
    ///
    /// Order is unspecified. Expired matches are left out and deleted in the
    /// background once the scan has finished.
    #[instrument(skip(self), fields(table = %self.inner.table))]
    pub async fn keys(&self, pattern: &str) -> KvResult<Vec<String>> {
        let like = LikePattern::from_glob(pattern);
        let rows = self
            .inner
            .backend
            .scan(&like)
            .await
            .map_err(|e| self.storage_fault("keys", pattern, e))?;

        let now = self.inner.clock.unix_seconds();
        let mut live = Vec::with_capacity(rows.len());
        let mut expired = Vec::new();
        for row in rows {
            if !row.kind.is_string() {
                continue;
            }
            if expiry::is_expired(row.expires_at, now) {
                expired.push(row.key);
            } else {
                live.push(row.key);
            }
        }

        debug!(pattern, %like, matched = live.len(), expired = expired.len(), "keys scanned");
        self.expire_in_background(expired);
        Ok(live)
    }

    // ── lifecycle ────────────────────────────────────────────────────

    /// Start the background sweeper.
    ///
    /// An interval outside what [`sweeper::validate_interval`] accepts is
    /// rejected and the store keeps working without a sweeper. Called
    /// outside a tokio runtime it fails with [`KvError::Config`]. At most one sweeper runs per store; starting a second one
    /// fails with [`KvError::SweeperRunning`].
    pub fn start_sweeper(&self, interval: Duration) -> KvResult<()> {
        if let Err(reason) = sweeper::validate_interval(interval) {
            warn!(table = %self.inner.table, %reason, "expiry sweeper not started");
            return Err(KvError::Config(reason));
        }
        if self.is_closed() {
            return Err(self.closed());
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(KvError::Config(
                "expiry sweeper needs a running tokio runtime".into(),
            ));
        }

        let mut slot = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(KvError::SweeperRunning {
                table: self.inner.table.to_string(),
            });
        }

        *slot = Some(self.sweeper().spawn(interval, self.inner.shutdown.subscribe()));
        Ok(())
    }

    /// Stop the sweeper and wait for it to exit.
    ///
    /// Returns `false` if no sweeper was running. The store stays open.
    pub async fn stop_sweeper(&self) -> bool {
        match self.take_sweeper() {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    /// Whether a sweeper is currently running.
    pub fn sweeper_running(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Period of the running sweeper, if any.
    pub fn sweeper_interval(&self) -> Option<Duration> {
        self.inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|handle| !handle.is_finished())
            .map(|handle| handle.interval())
    }

    /// Run one bulk purge of expired rows now. Returns the rows removed.
    #[instrument(skip(self), fields(table = %self.inner.table))]
    pub async fn sweep_now(&self) -> KvResult<u64> {
        self.sweeper()
            .sweep()
            .await
            .map_err(|e| self.backend_fault("sweep", e))
    }

    /// Physical row count, including expired rows not yet deleted.
    pub async fn stored_len(&self) -> KvResult<u64> {
        self.inner
            .backend
            .count()
            .await
            .map_err(|e| self.backend_fault("count", e))
    }

    /// Whether [`KvStore::close`] has been called.
    pub fn is_closed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Stop the sweeper and close the connection.
    ///
    /// Detached deletions already in flight are not awaited and will fail
    /// against the closed handle. Closing twice is a no-op.
    pub async fn close(&self) -> KvResult<()> {
        if self.inner.shutdown.send_replace(true) {
            return Ok(());
        }

        if let Some(handle) = self.take_sweeper() {
            handle.join().await;
        }

        self.inner
            .backend
            .close()
            .await
            .map_err(|e| self.backend_fault("close", e))?;

        info!(table = %self.inner.table, stats = %self.inner.stats, "store closed");
        Ok(())
    }

    // ── internals ────────────────────────────────────────────────────

    fn sweeper(&self) -> Sweeper {
        Sweeper {
            backend: Arc::clone(&self.inner.backend),
            clock: Arc::clone(&self.inner.clock),
            stats: Arc::clone(&self.inner.stats),
            table: self.inner.table.clone(),
        }
    }

    fn take_sweeper(&self) -> Option<SweeperHandle> {
        self.inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Delete keys found expired, without making the caller wait.
    fn expire_in_background(&self, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }

        let backend = Arc::clone(&self.inner.backend);
        let clock = Arc::clone(&self.inner.clock);
        let stats = Arc::clone(&self.inner.stats);
        let table = self.inner.table.clone();

        tokio::spawn(async move {
            for key in keys {
                match backend.delete_if_expired(&key, clock.unix_seconds()).await {
                    Ok(removed) => {
                        stats.record_lazy_delete();
                        debug!(table = %table, key = %key, removed, "expired key deleted");
                    }
                    Err(err) => {
                        stats.record_lazy_delete_failure();
                        warn!(table = %table, key = %key, %err, "lazy expiry delete failed");
                    }
                }
            }
        });
    }

    fn storage_fault(&self, op: &'static str, key: &str, source: StorageError) -> KvError {
        KvError::Storage {
            op,
            key: key.to_owned(),
            table: self.inner.table.to_string(),
            source,
        }
    }

    fn backend_fault(&self, op: &'static str, source: StorageError) -> KvError {
        KvError::Backend {
            op,
            table: self.inner.table.to_string(),
            source,
        }
    }

    fn closed(&self) -> KvError {
        KvError::Closed {
            table: self.inner.table.to_string(),
        }
    }
}

fn not_found(key: &str) -> KvError {
    KvError::KeyNotFound {
        key: key.to_owned(),
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Builder
// ═══════════════════════════════════════════════════════════════════════

/// Builder for [`KvStore`].
pub struct KvStoreBuilder {
    config: StoreConfig,
    clock: Arc<dyn Clock>,
}

impl KvStoreBuilder {
    /// Use `clock` instead of the system clock for expiry decisions.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Open the SQLite database named by the config and attach the table.
    pub async fn open(self) -> KvResult<KvStore> {
        self.config.validate()?;
        let table = self.config.table_name()?;
        let path = self.config.path.clone();
        let busy_timeout = self.config.busy_timeout();

        let fault = |source: StorageError| KvError::Backend {
            op: "open",
            table: table.to_string(),
            source,
        };

        let db = tokio::task::spawn_blocking(move || Database::open(path, busy_timeout))
            .await
            .map_err(|e| fault(e.into()))?
            .map_err(fault)?;
        let backend = SqliteBackend::attach(db, table.clone())
            .await
            .map_err(fault)?;

        info!(table = %table, path = %self.config.path.display(), "store opened");
        self.finish(Arc::new(backend), table)
    }

    /// Build a store over a custom backend. Only the table name and sweep
    /// settings of the config are used.
    ///
    /// A configured sweeper only starts when this is called inside a tokio
    /// runtime; otherwise it is skipped with a warning and can be started
    /// later with [`KvStore::start_sweeper`].
    pub fn with_backend(self, backend: Arc<dyn KvBackend>) -> KvResult<KvStore> {
        let table = self.config.table_name()?;
        self.finish(backend, table)
    }

    fn finish(self, backend: Arc<dyn KvBackend>, table: TableName) -> KvResult<KvStore> {
        let (shutdown, _) = watch::channel(false);
        let store = KvStore {
            inner: Arc::new(Inner {
                backend,
                clock: self.clock,
                table,
                stats: Arc::new(ExpiryStats::new()),
                shutdown,
                sweeper: Mutex::new(None),
            }),
        };

        if let Some(interval) = self.config.sweep_interval() {
            // A rejected interval leaves the store usable; lazy expiry still applies.
            if let Err(err) = store.start_sweeper(interval) {
                warn!(table = %store.table(), %err, "continuing without expiry sweeper");
            }
        }
        Ok(store)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════
