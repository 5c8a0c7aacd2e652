//! Small shared utilities: wall clock and thread identities.

use std::sync::atomic::{AtomicU64, Ordering};

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// A small, non-zero id unique to the calling thread for the process
/// lifetime. Used by the timer locks to record lock ownership and by the
/// callback-reentrancy check.
pub fn thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}
