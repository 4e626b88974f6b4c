//! Aggregate statistics and change notification

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Capacity and catalog totals for a storage engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub is_running: bool,
    pub total_chunks: u64,
    pub total_size_bytes: u64,
    pub max_size_bytes: u64,
    /// `round(total / max * 100)`, or 0 when the capacity is 0
    pub usage_percent: u32,
    pub total_files: u64,
}

impl StorageStats {
    pub fn new(total_chunks: u64, total_size_bytes: u64, max_size_bytes: u64, total_files: u64) -> Self {
        Self {
            is_running: true,
            total_chunks,
            total_size_bytes,
            max_size_bytes,
            usage_percent: usage_percent(total_size_bytes, max_size_bytes),
            total_files,
        }
    }

    /// Stats reported while the engine is stopped
    pub fn stopped(max_size_bytes: u64) -> Self {
        Self {
            is_running: false,
            total_chunks: 0,
            total_size_bytes: 0,
            max_size_bytes,
            usage_percent: 0,
            total_files: 0,
        }
    }
}

pub fn usage_percent(total_size_bytes: u64, max_size_bytes: u64) -> u32 {
    if max_size_bytes == 0 {
        return 0;
    }
    (total_size_bytes as f64 / max_size_bytes as f64 * 100.0).round() as u32
}

type Listener = Arc<dyn Fn(&StorageStats) + Send + Sync>;
type ListenerMap = Mutex<HashMap<u64, Listener>>;

fn lock_listeners(listeners: &ListenerMap) -> MutexGuard<'_, HashMap<u64, Listener>> {
    // Callbacks never run under this lock, so a poisoned map is still consistent
    listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle returned by [`crate::ChunkEngine::on_change`].
///
/// Dropping the handle unsubscribes the callback.
#[must_use = "dropping a Subscription unsubscribes its callback"]
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerMap>,
}

impl Subscription {
    /// Stop receiving notifications. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if let Some(listeners) = self.listeners.upgrade() {
            if lock_listeners(&listeners).remove(&self.id).is_some() {
                trace!(id = self.id, "Listener unsubscribed");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Observer list plus a broadcast channel for async consumers.
pub(crate) struct ChangeNotifier {
    listeners: Arc<ListenerMap>,
    next_id: AtomicU64,
    events: broadcast::Sender<StorageStats>,
}

impl ChangeNotifier {
    pub(crate) fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            events,
        }
    }

    pub(crate) fn add<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StorageStats) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock_listeners(&self.listeners).insert(id, Arc::new(callback));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<StorageStats> {
        self.events.subscribe()
    }

    /// Whether computing fresh stats is worth it
    pub(crate) fn has_observers(&self) -> bool {
        self.events.receiver_count() > 0 || !lock_listeners(&self.listeners).is_empty()
    }

    /// Deliver `stats` to every callback and receiver. A panicking callback
    /// is logged and skipped; the others still run.
    pub(crate) fn notify(&self, stats: &StorageStats) {
        let listeners: Vec<(u64, Listener)> = lock_listeners(&self.listeners)
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| (*listener)(stats))).is_err() {
                warn!(listener = id, "Storage change listener panicked");
            }
        }

        // No receivers is fine
        let _ = self.events.send(stats.clone());
    }
}
