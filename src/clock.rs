//! Monotonic timestamps shared by events, loops and audit records.
//!
//! All timestamps are nanoseconds since a process-local steady epoch fixed
//! on first use. Sequence ids handed out by [`next_sequence`] are strictly
//! increasing and never zero, so `0` stays free as the rejection sentinel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();
static LAST_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Nanoseconds elapsed since the process-local steady epoch.
#[inline]
pub fn monotonic_nanos() -> u64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    // u64 nanoseconds cover ~584 years of uptime.
    epoch.elapsed().as_nanos() as u64
}

/// Milliseconds elapsed since the process-local steady epoch.
#[inline]
pub fn monotonic_millis() -> u64 {
    monotonic_nanos() / 1_000_000
}

/// A monotonic timestamp that is unique across the process.
///
/// Takes the current clock reading, bumped past the previously issued value
/// when two callers land on the same nanosecond.
pub fn next_sequence() -> u64 {
    let now = monotonic_nanos().max(1);
    let mut last = LAST_SEQUENCE.load(Ordering::Relaxed);
    loop {
        let candidate = if now > last { now } else { last + 1 };
        match LAST_SEQUENCE.compare_exchange_weak(
            last,
            candidate,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return candidate,
            Err(actual) => last = actual,
        }
    }
}

/// Convert a millisecond interval to nanoseconds and add it to `now`.
///
/// Returns `None` when the result leaves the `u64` clock range.
#[inline]
pub fn deadline_after(now: u64, interval_ms: u64) -> Option<u64> {
    interval_ms
        .checked_mul(1_000_000)
        .and_then(|ns| now.checked_add(ns))
}

/// Time remaining from `now` until `target`, saturating at zero.
#[inline]
pub fn until(now: u64, target: u64) -> Duration {
    Duration::from_nanos(target.saturating_sub(now))
}

/// Wall clock time in milliseconds since the Unix epoch.
pub fn wall_clock_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
