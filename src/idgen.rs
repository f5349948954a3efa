//! Process-wide id generator (§3, §5).
//!
//! `SleepingPills-bushhammer` reaches for `lazy_static!` for its process-wide
//! registries; the modern stdlib replacement is `std::sync::OnceLock`, so
//! that's what backs the shared counter/id-set here instead. Ids are handed
//! out as strings because they're embedded directly in STOMP headers
//! (`subscription`, `transaction`, `receipt`).

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::error::{Result, StompError};

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn in_use() -> &'static Mutex<HashSet<u64>> {
    static IN_USE: OnceLock<Mutex<HashSet<u64>>> = OnceLock::new();
    IN_USE.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Generates a fresh, process-wide unique id with the given `prefix`
/// (e.g. `"sub"`, `"tx"`, `"receipt"`).
pub fn generate(prefix: &str) -> Result<String> {
    let mut guard = in_use().lock().expect("id generator mutex poisoned");
    for _ in 0..u64::MAX {
        let candidate = COUNTER.fetch_add(1, Ordering::Relaxed);
        if guard.insert(candidate) {
            return Ok(format!("{prefix}-{candidate}"));
        }
    }
    Err(StompError::IdSpaceExhausted)
}

/// Releases an id previously returned by [`generate`] so it can be reused.
/// No-op if `id` is not a recognized id of this process (e.g. it was never
/// generated, or has already been released).
pub fn release(id: &str) {
    if let Some(numeric) = id.rsplit('-').next().and_then(|s| s.parse::<u64>().ok()) {
        in_use()
            .lock()
            .expect("id generator mutex poisoned")
            .remove(&numeric);
    }
}
