//! Per-path memo of classification results
//!
//! Entries expire `ttl` after they were written. Expiry is checked on every
//! read, so a stale status is never served even if the background sweep has
//! not run yet. The sweep only bounds memory.
//!
//! Keys are the path strings exactly as given. `/a/b.db` and `/a//b.db` are
//! different entries.

use super::ClassificationStatus;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub status: ClassificationStatus,
    pub cached_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.cached_at) > ttl
    }
}

#[derive(Debug)]
pub struct DetectionCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl DetectionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fresh status for `path`, evicting the entry if it has expired.
    pub fn get(&self, path: &str) -> Option<ClassificationStatus> {
        let now = Instant::now();
        let mut entries = self.lock();
        let entry = *entries.get(path)?;
        if entry.is_expired(now, self.ttl) {
            entries.remove(path);
            return None;
        }
        Some(entry.status)
    }

    /// Store a status. Errors and in-flight markers are never cached.
    pub fn insert(&self, path: &str, status: ClassificationStatus) -> bool {
        if !status.is_cacheable() {
            return false;
        }
        let entry = CacheEntry {
            status,
            cached_at: Instant::now(),
        };
        self.lock().insert(path.to_string(), entry);
        true
    }

    pub fn remove(&self, path: &str) -> Option<CacheEntry> {
        self.lock().remove(path)
    }

    /// Drop every expired entry; returns how many went.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now, ttl));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Start a task that evicts expired entries once per TTL.
    ///
    /// Must be called inside a tokio runtime. The task holds only a weak
    /// reference and ends when the cache is dropped or the handle is.
    pub fn spawn_sweeper(self: &Arc<Self>) -> Sweeper {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.ttl.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let evicted = cache.evict_expired();
                if evicted > 0 {
                    tracing::debug!(evicted, remaining = cache.len(), "swept detection cache");
                }
            }
        });

        Sweeper { task }
    }
}

/// Handle to the background sweep; aborts it on drop.
#[derive(Debug)]
pub struct Sweeper {
    task: JoinHandle<()>,
}

impl Sweeper {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.task.abort();
    }
}
