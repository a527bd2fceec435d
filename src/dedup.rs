use std::{
    collections::VecDeque,
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::confirmation::identity_key;

/// Key recorded when an item is resolved under the cursor. Built from the same normalized
/// identity confirmations use, so `/a/./b` and `/a/b` share one entry.
pub fn resolve_key(path: &Path) -> String {
    format!("{}::resolve", identity_key(path))
}

#[derive(Debug, Clone)]
struct Entry {
    key: String,
    recorded_at: Instant,
}

/// Bounded, time-windowed memory of recently processed keys.
///
/// Holds at most `capacity` entries; once full, recording overwrites the oldest. Expired
/// entries (older than `ttl` relative to the `now` passed in) are purged on every call.
/// All operations share one lock, so the cache can be hit from the resolution worker and the
/// UI side concurrently.
#[derive(Debug)]
pub struct DedupCache {
    ttl: Duration,
    capacity: usize,
    ring: Mutex<VecDeque<Entry>>,
}

impl DedupCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ttl,
            capacity,
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True if `key` was recorded within the TTL window ending at `now`.
    pub fn is_duplicate(&self, key: &str, now: Instant) -> bool {
        let mut ring = self.lock();
        self.purge_expired(&mut ring, now);
        ring.iter().any(|entry| entry.key == key)
    }

    pub fn record(&self, key: &str, now: Instant) {
        let mut ring = self.lock();
        self.purge_expired(&mut ring, now);
        if ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(Entry {
            key: key.to_string(),
            recorded_at: now,
        });
    }

    /// Forget `key` immediately so a failed action can be retried before the TTL runs out.
    pub fn remove(&self, key: &str) {
        self.lock().retain(|entry| entry.key != key);
    }

    /// Live entries as of `now`.
    pub fn len(&self, now: Instant) -> usize {
        let mut ring = self.lock();
        self.purge_expired(&mut ring, now);
        ring.len()
    }

    pub fn is_empty(&self, now: Instant) -> bool {
        self.len(now) == 0
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Entry>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn purge_expired(&self, ring: &mut VecDeque<Entry>, now: Instant) {
        ring.retain(|entry| now.saturating_duration_since(entry.recorded_at) <= self.ttl);
    }
}
