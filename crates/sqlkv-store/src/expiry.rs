//! Expiry policy and clocks.
//!
//! Expiration timestamps are whole Unix seconds. A record is expired only when
//! its timestamp is *strictly* less than the current second, so a key is still
//! alive at the exact boundary instant.
//!
//! Time is read through the [`Clock`] trait so the store can be driven by a
//! [`ManualClock`] in tests.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

// ── clocks ───────────────────────────────────────────────────────────

/// Source of wall-clock time for expiry decisions.
pub trait Clock: Send + Sync + fmt::Debug + 'static {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;

    /// Current time as whole Unix seconds.
    fn unix_seconds(&self) -> i64 {
        self.now().timestamp()
    }
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Wrap it in an `Arc` to hand the same clock to a store and to the test
/// driving it.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Start at the given instant.
    pub fn at(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// Start at the current system time.
    pub fn starting_now() -> Self {
        Self::at(Utc::now())
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }

    /// Jump to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        self.millis.store(to.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

// ── policy ───────────────────────────────────────────────────────────

/// Whether a record with the given expiration is expired at `now` (seconds).
///
/// `None` never expires. Equality is not expired.
pub fn is_expired(expires_at: Option<i64>, now: i64) -> bool {
    matches!(expires_at, Some(at) if at < now)
}

/// The state of a stored record relative to the current time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// No expiration timestamp.
    Permanent,
    /// Has an expiration that has not passed yet.
    Live { expires_at: i64 },
    /// Logically absent; the row may still exist physically.
    Expired,
}

impl Liveness {
    pub fn classify(expires_at: Option<i64>, now: i64) -> Self {
        match expires_at {
            None => Self::Permanent,
            Some(_) if is_expired(expires_at, now) => Self::Expired,
            Some(at) => Self::Live { expires_at: at },
        }
    }

    pub fn is_expired(self) -> bool {
        matches!(self, Self::Expired)
    }
}

/// Absolute expiration for a record written at `now` with `ttl`.
///
/// A zero ttl means the record never expires. Sub-second precision is
/// truncated to the containing second.
pub fn expires_at_after(now: DateTime<Utc>, ttl: Duration) -> Option<i64> {
    if ttl.is_zero() {
        return None;
    }
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    let at_ms = now.timestamp_millis().saturating_add(ttl_ms);
    Some(at_ms.div_euclid(1_000))
}

/// Smallest time to live reported for a key that is still live.
pub const MIN_LIVE_REMAINING: Duration = Duration::from_nanos(1);

/// Time left until `expires_at`, saturating at zero.
pub fn remaining(expires_at: i64, now: DateTime<Utc>) -> Duration {
    let left = expires_at
        .saturating_mul(1_000)
        .saturating_sub(now.timestamp_millis());
    u64::try_from(left)
        .map(Duration::from_millis)
        .unwrap_or(Duration::ZERO)
}

/// Time left for a key that is still live at `now`.
///
/// Expirations are stored in whole seconds, so a key can be live during its
/// final second with nothing left on the millisecond clock. It still reports
/// [`MIN_LIVE_REMAINING`], never zero.
pub fn live_remaining(expires_at: i64, now: DateTime<Utc>) -> Duration {
    remaining(expires_at, now).max(MIN_LIVE_REMAINING)
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn instant(secs: i64, millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(secs * 1_000 + millis).unwrap()
    }

    #[test]
    fn permanent_never_expires() {
        assert!(!is_expired(None, 0));
        assert!(!is_expired(None, i64::MAX));
        assert_eq!(Liveness::classify(None, 100), Liveness::Permanent);
    }

    #[test]
    fn boundary_is_not_expired() {
        assert!(!is_expired(Some(100), 100));
        assert_eq!(
            Liveness::classify(Some(100), 100),
            Liveness::Live { expires_at: 100 }
        );
    }

    #[test]
    fn strictly_past_is_expired() {
        assert!(is_expired(Some(99), 100));
        assert!(Liveness::classify(Some(99), 100).is_expired());
        assert!(!is_expired(Some(101), 100));
    }

    #[test]
    fn zero_ttl_is_permanent() {
        assert_eq!(expires_at_after(instant(1_000, 0), Duration::ZERO), None);
    }

    #[test]
    fn ttl_truncates_to_second() {
        let now = instant(1_000, 700);
        assert_eq!(expires_at_after(now, Duration::from_secs(10)), Some(1_010));
        assert_eq!(expires_at_after(now, Duration::from_millis(500)), Some(1_001));
        assert_eq!(expires_at_after(now, Duration::from_millis(200)), Some(1_000));
    }

    #[test]
    fn huge_ttl_saturates() {
        let at = expires_at_after(instant(1_000, 0), Duration::MAX).unwrap();
        assert!(at > 1_000);
    }

    #[test]
    fn remaining_is_millisecond_precise() {
        let now = instant(1_000, 250);
        assert_eq!(remaining(1_010, now), Duration::from_millis(9_750));
        assert_eq!(remaining(1_000, now), Duration::ZERO);
        assert_eq!(remaining(900, now), Duration::ZERO);
    }

    #[test]
    fn live_key_in_its_last_second_keeps_some_time() {
        let now = instant(1_000, 200);
        let ttl = Duration::from_millis(500);
        let at = expires_at_after(now, ttl).unwrap();
        assert_eq!(at, 1_000);
        assert!(!is_expired(Some(at), 1_000));

        let left = live_remaining(at, now);
        assert!(left > Duration::ZERO);
        assert!(left <= ttl);
        assert_eq!(live_remaining(1_010, now), Duration::from_millis(9_800));
    }

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::at(instant(50, 0));
        assert_eq!(clock.unix_seconds(), 50);
        clock.advance(Duration::from_millis(1_500));
        assert_eq!(clock.now(), instant(51, 500));
        clock.set(instant(10, 0));
        assert_eq!(clock.unix_seconds(), 10);
    }
}
