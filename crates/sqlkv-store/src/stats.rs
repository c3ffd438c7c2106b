//! Counters for background expiry work.
//!
//! Lazy deletions and sweeps never report back to a caller, so their
//! outcomes are only visible here and in the logs.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters tracking lazy deletions and sweeper ticks.
#[derive(Debug, Default)]
pub struct ExpiryStats {
    lazy_deletes: AtomicU64,
    lazy_delete_failures: AtomicU64,
    sweeps: AtomicU64,
    sweep_failures: AtomicU64,
    swept_rows: AtomicU64,
}

impl ExpiryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_lazy_delete(&self) {
        self.lazy_deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lazy_delete_failure(&self) {
        self.lazy_delete_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sweep(&self, rows: u64) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.swept_rows.fetch_add(rows, Ordering::Relaxed);
    }

    pub(crate) fn record_sweep_failure(&self) {
        self.sweep_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Detached deletions that completed without error.
    pub fn lazy_deletes(&self) -> u64 {
        self.lazy_deletes.load(Ordering::Relaxed)
    }

    /// Detached deletions that failed.
    pub fn lazy_delete_failures(&self) -> u64 {
        self.lazy_delete_failures.load(Ordering::Relaxed)
    }

    /// Successful sweeps, including ones that removed nothing.
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    /// Sweeps whose bulk delete failed.
    pub fn sweep_failures(&self) -> u64 {
        self.sweep_failures.load(Ordering::Relaxed)
    }

    /// Rows removed by all sweeps.
    pub fn swept_rows(&self) -> u64 {
        self.swept_rows.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.lazy_deletes.store(0, Ordering::Relaxed);
        self.lazy_delete_failures.store(0, Ordering::Relaxed);
        self.sweeps.store(0, Ordering::Relaxed);
        self.sweep_failures.store(0, Ordering::Relaxed);
        self.swept_rows.store(0, Ordering::Relaxed);
    }
}

impl fmt::Display for ExpiryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lazy_deletes={} lazy_failures={} sweeps={} sweep_failures={} swept_rows={}",
            self.lazy_deletes(),
            self.lazy_delete_failures(),
            self.sweeps(),
            self.sweep_failures(),
            self.swept_rows(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = ExpiryStats::new();
        stats.record_lazy_delete();
        stats.record_lazy_delete();
        stats.record_lazy_delete_failure();
        stats.record_sweep(3);
        stats.record_sweep(0);
        stats.record_sweep_failure();

        assert_eq!(stats.lazy_deletes(), 2);
        assert_eq!(stats.lazy_delete_failures(), 1);
        assert_eq!(stats.sweeps(), 2);
        assert_eq!(stats.swept_rows(), 3);
        assert_eq!(stats.sweep_failures(), 1);
    }

    #[test]
    fn display_and_reset() {
        let stats = ExpiryStats::new();
        stats.record_sweep(7);
        assert_eq!(
            stats.to_string(),
            "lazy_deletes=0 lazy_failures=0 sweeps=1 sweep_failures=0 swept_rows=7"
        );
        stats.reset();
        assert_eq!(stats.sweeps(), 0);
        assert_eq!(stats.swept_rows(), 0);
    }
}
