use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Millisecond wall clock that never returns the same value twice.
///
/// LRU ordering is by `last_accessed`, so two accesses inside the same
/// millisecond would otherwise tie. When the wall clock has not advanced
/// past the last issued value, the clock issues `last + 1` instead.
#[derive(Debug, Default)]
pub struct AccessClock {
    last: AtomicI64,
}

impl AccessClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock whose first timestamp is greater than `latest`. Reopening a
    /// catalog seeds this with the newest stored value, since earlier bursts
    /// may have run ahead of the wall clock.
    pub fn starting_after(latest: i64) -> Self {
        Self {
            last: AtomicI64::new(latest),
        }
    }

    /// Next timestamp in unix milliseconds
    pub fn now_millis(&self) -> i64 {
        let wall = Utc::now().timestamp_millis();
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall.max(current + 1);
            match self
                .last
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}
