//! Background expiry sweeper.
//!
//! Reads only enforce expiry lazily: a key that expires and is never read
//! again would stay in the table forever. The sweeper closes that gap by
//! issuing one bulk delete of every expired row on a fixed interval.
//!
//! # Cancellation
//!
//! The loop waits on three things at once: the next tick, the store-wide
//! shutdown signal, and the stop signal owned by its [`SweeperHandle`].
//! Either signal ends the loop before the next bulk delete. A delete already
//! in flight is allowed to finish.
//!
//! Tick failures are logged and counted, then the loop waits for the next
//! tick. There is no backoff.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::backend::KvBackend;
use crate::error::StorageResult;
use crate::expiry::Clock;
use crate::schema::TableName;
use crate::stats::ExpiryStats;

/// Shortest accepted sweep period.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Longest accepted sweep period.
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Reject intervals that cannot drive a ticker.
pub fn validate_interval(interval: Duration) -> Result<(), String> {
    if interval.is_zero() {
        return Err("sweep interval must be positive".into());
    }
    if interval < MIN_INTERVAL {
        return Err(format!("sweep interval {interval:?} is below {MIN_INTERVAL:?}"));
    }
    if interval > MAX_INTERVAL {
        return Err(format!("sweep interval {interval:?} exceeds {MAX_INTERVAL:?}"));
    }
    Ok(())
}

/// Everything a sweep needs; shared with the store for on-demand sweeps.
#[derive(Clone)]
pub(crate) struct Sweeper {
    pub(crate) backend: Arc<dyn KvBackend>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) stats: Arc<ExpiryStats>,
    pub(crate) table: TableName,
}

impl Sweeper {
    /// Delete every row expired at the current time.
    pub(crate) async fn sweep(&self) -> StorageResult<u64> {
        let now = self.clock.unix_seconds();
        let rows = self.backend.delete_expired(now).await?;
        self.stats.record_sweep(rows);
        if rows > 0 {
            info!(table = %self.table, rows, "expired keys swept");
        } else {
            debug!(table = %self.table, "sweep found nothing to delete");
        }
        Ok(rows)
    }

    /// Start the periodic loop on the current runtime.
    ///
    /// `interval` must already have passed [`validate_interval`].
    pub(crate) fn spawn(self, interval: Duration, shutdown: watch::Receiver<bool>) -> SweeperHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let table = self.table.clone();
        let task = tokio::spawn(self.run(interval, shutdown, stop_rx));
        let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        info!(table = %table, interval_ms, "expiry sweeper started");

        SweeperHandle {
            interval,
            stop: Some(stop_tx),
            task,
        }
    }

    async fn run(
        self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        mut stop: oneshot::Receiver<()>,
    ) {
        if *shutdown.borrow() {
            return;
        }

        // The first sweep happens one full interval after start.
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = &mut stop => break,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep().await {
                        self.stats.record_sweep_failure();
                        warn!(table = %self.table, %err, "expiry sweep failed, retrying next tick");
                    }
                }
            }
        }

        info!(table = %self.table, "expiry sweeper stopped");
    }
}

/// Owner of a running sweeper task.
///
/// Dropping the handle also stops the loop, since its stop channel closes.
#[derive(Debug)]
pub(crate) struct SweeperHandle {
    interval: Duration,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the loop has exited.
    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop to stop and wait for it to exit.
    pub(crate) async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(err) = self.task.await {
            warn!(%err, "expiry sweeper task ended abnormally");
        }
    }

    /// Wait for the loop to exit on its own (after store shutdown).
    pub(crate) async fn join(self) {
        if let Err(err) = self.task.await {
            warn!(%err, "expiry sweeper task ended abnormally");
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::backend::SqliteBackend;
    use crate::db::Database;
    use crate::error::StorageError;
    use crate::expiry::ManualClock;
    use crate::pattern::LikePattern;
    use crate::record::{Record, RecordMeta};

    /// Counts bulk deletes and can be told to fail them.
    #[derive(Default)]
    struct FlakyBackend {
        sweeps: AtomicU64,
        failing: AtomicBool,
    }

    #[async_trait]
    impl KvBackend for FlakyBackend {
        async fn upsert(&self, _record: Record) -> StorageResult<()> {
            Ok(())
        }
        async fn fetch(&self, _key: &str) -> StorageResult<Option<Record>> {
            Ok(None)
        }
        async fn fetch_meta(&self, _key: &str) -> StorageResult<Option<RecordMeta>> {
            Ok(None)
        }
        async fn delete(&self, _key: &str) -> StorageResult<bool> {
            Ok(false)
        }
        async fn delete_if_expired(&self, _key: &str, _now: i64) -> StorageResult<bool> {
            Ok(false)
        }
        async fn delete_expired(&self, _now: i64) -> StorageResult<u64> {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                Err(StorageError::Closed)
            } else {
                Ok(0)
            }
        }
        async fn scan(&self, _pattern: &LikePattern) -> StorageResult<Vec<RecordMeta>> {
            Ok(Vec::new())
        }
        async fn count(&self) -> StorageResult<u64> {
            Ok(0)
        }
        async fn close(&self) -> StorageResult<()> {
            Ok(())
        }
    }

    fn sweeper(backend: Arc<dyn KvBackend>, clock: Arc<dyn Clock>) -> Sweeper {
        Sweeper {
            backend,
            clock,
            stats: Arc::new(ExpiryStats::new()),
            table: TableName::new("kv").unwrap(),
        }
    }

    #[test]
    fn interval_bounds() {
        assert!(validate_interval(Duration::ZERO).is_err());
        assert!(validate_interval(Duration::from_micros(500)).is_err());
        assert!(validate_interval(MIN_INTERVAL).is_ok());
        assert!(validate_interval(MAX_INTERVAL).is_ok());
        assert!(validate_interval(MAX_INTERVAL + Duration::from_secs(1)).is_err());
        assert!(validate_interval(Duration::MAX).is_err());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_rows() {
        let db = Database::open_in_memory().unwrap();
        let backend = SqliteBackend::attach(db, TableName::new("kv").unwrap())
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::at(
            chrono::DateTime::from_timestamp(1_000, 0).unwrap(),
        ));

        backend.upsert(Record::string("old", "v", Some(999))).await.unwrap();
        backend.upsert(Record::string("edge", "v", Some(1_000))).await.unwrap();
        backend.upsert(Record::string("keep", "v", None)).await.unwrap();

        let s = sweeper(Arc::new(backend.clone()), clock);
        assert_eq!(s.sweep().await.unwrap(), 1);
        assert_eq!(backend.count().await.unwrap(), 2);
        assert_eq!(s.stats.swept_rows(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_stop_the_loop() {
        let backend = Arc::new(FlakyBackend::default());
        backend.failing.store(true, Ordering::SeqCst);
        let s = sweeper(backend.clone(), Arc::new(ManualClock::starting_now()));
        let stats = Arc::clone(&s.stats);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = s.spawn(Duration::from_secs(1), shutdown_rx);

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(backend.sweeps.load(Ordering::SeqCst), 3);
        assert_eq!(stats.sweep_failures(), 3);

        backend.failing.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(stats.sweeps(), 1);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_interval() {
        let backend = Arc::new(FlakyBackend::default());
        let s = sweeper(backend.clone(), Arc::new(ManualClock::starting_now()));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = s.spawn(Duration::from_secs(10), shutdown_rx);
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(backend.sweeps.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(backend.sweeps.load(Ordering::SeqCst), 1);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_signal_ends_the_loop() {
        let backend = Arc::new(FlakyBackend::default());
        let s = sweeper(backend.clone(), Arc::new(ManualClock::starting_now()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = s.spawn(Duration::from_secs(1), shutdown_rx);
        shutdown_tx.send(true).unwrap();
        handle.join().await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(backend.sweeps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_the_loop() {
        let backend = Arc::new(FlakyBackend::default());
        let s = sweeper(backend.clone(), Arc::new(ManualClock::starting_now()));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = s.spawn(Duration::from_secs(1), shutdown_rx);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        handle.stop().await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(backend.sweeps.load(Ordering::SeqCst), 1);
    }
}
