//! Dedup cache for flood suppression
//!
//! Remembers which alert ids this device has already seen so each alert is
//! forwarded at most once. Memory is bounded two ways:
//! - a retention window, after which an id counts as new again
//! - a capacity limit, evicting oldest-first when exceeded
//!
//! `observe` checks and records under one lock, so two receptions of the same
//! id racing from different peers yield exactly one `true`.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use crate::protocol::AlertId;

/// Configuration for the dedup cache
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// How long an id is remembered
    pub retention: Duration,
    /// Maximum number of remembered ids
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(3600),
            capacity: 4096,
        }
    }
}

#[derive(Debug, Default)]
struct DedupState {
    /// id -> first_seen_at
    entries: HashMap<AlertId, Instant>,
    /// Insertion order; may hold stale pairs for ids re-inserted after expiry
    order: VecDeque<(AlertId, Instant)>,
}

impl DedupState {
    /// Whether the queued pair is still the live entry for its id
    fn is_live(&self, id: &AlertId, first_seen: Instant) -> bool {
        self.entries.get(id) == Some(&first_seen)
    }

    fn evict_expired(&mut self, now: Instant, retention: Duration) -> usize {
        let mut evicted = 0;
        while let Some(&(id, first_seen)) = self.order.front() {
            if !self.is_live(&id, first_seen) {
                self.order.pop_front();
                continue;
            }
            if now.saturating_duration_since(first_seen) < retention {
                break;
            }
            self.order.pop_front();
            self.entries.remove(&id);
            evicted += 1;
        }
        evicted
    }

    fn evict_over_capacity(&mut self, capacity: usize) -> usize {
        let mut evicted = 0;
        while self.entries.len() > capacity {
            let Some((id, first_seen)) = self.order.pop_front() else {
                break;
            };
            if self.is_live(&id, first_seen) {
                self.entries.remove(&id);
                evicted += 1;
            }
        }
        evicted
    }
}

/// Bounded, time-windowed set of seen alert ids
#[derive(Debug)]
pub struct DedupCache {
    config: DedupConfig,
    state: Mutex<DedupState>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::with_config(DedupConfig::default())
    }

    pub fn with_config(config: DedupConfig) -> Self {
        Self {
            config: DedupConfig {
                retention: config.retention,
                capacity: config.capacity.max(1),
            },
            state: Mutex::new(DedupState::default()),
        }
    }

    /// Record `id` as seen at `now`
    ///
    /// Returns `true` if the id is new (never seen, or its previous sighting
    /// aged out of the retention window), `false` for a duplicate.
    pub fn observe(&self, id: AlertId, now: Instant) -> bool {
        let mut state = self.state.lock();
        state.evict_expired(now, self.config.retention);

        if let Some(&first_seen) = state.entries.get(&id) {
            if now.saturating_duration_since(first_seen) < self.config.retention {
                trace!(alert = %id.short(), "dedup: duplicate");
                return false;
            }
        }

        state.entries.insert(id, now);
        state.order.push_back((id, now));
        let evicted = state.evict_over_capacity(self.config.capacity);
        if evicted > 0 {
            trace!(evicted, "dedup: evicted oldest entries over capacity");
        }
        true
    }

    /// Whether `id` is currently remembered (does not record)
    pub fn contains(&self, id: &AlertId, now: Instant) -> bool {
        let state = self.state.lock();
        state
            .entries
            .get(id)
            .is_some_and(|&first_seen| now.saturating_duration_since(first_seen) < self.config.retention)
    }

    /// Purge entries older than the retention window; returns how many
    pub fn evict(&self, now: Instant) -> usize {
        self.state.lock().evict_expired(now, self.config.retention)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn id(n: u8) -> AlertId {
        AlertId::from_bytes([n; 16])
    }

    fn cache(retention_secs: u64, capacity: usize) -> DedupCache {
        DedupCache::with_config(DedupConfig {
            retention: Duration::from_secs(retention_secs),
            capacity,
        })
    }

    #[test]
    fn test_first_observe_is_new_then_duplicate() {
        let cache = cache(60, 16);
        let t0 = Instant::now();

        assert!(cache.observe(id(1), t0));
        assert!(!cache.observe(id(1), t0));
        assert!(!cache.observe(id(1), t0 + Duration::from_secs(59)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_entry_expires_after_window() {
        let cache = cache(60, 16);
        let t0 = Instant::now();

        assert!(cache.observe(id(1), t0));
        assert!(cache.observe(id(1), t0 + Duration::from_secs(60) + Duration::from_millis(1)));
        // Re-recorded with the new timestamp
        assert!(!cache.observe(id(1), t0 + Duration::from_secs(61)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let capacity = 4;
        let cache = cache(3600, capacity);
        let t0 = Instant::now();

        for n in 0..=capacity as u8 {
            assert!(cache.observe(id(n), t0 + Duration::from_millis(n as u64)));
        }
        assert_eq!(cache.len(), capacity);

        let later = t0 + Duration::from_secs(1);
        assert!(!cache.contains(&id(0), later));
        assert!(cache.contains(&id(capacity as u8), later));

        // The evicted id is new again
        assert!(cache.observe(id(0), later));
    }

    #[test]
    fn test_evict_purges_expired_only() {
        let cache = cache(10, 16);
        let t0 = Instant::now();
        cache.observe(id(1), t0);
        cache.observe(id(2), t0 + Duration::from_secs(5));

        assert_eq!(cache.evict(t0 + Duration::from_secs(9)), 0);
        assert_eq!(cache.evict(t0 + Duration::from_secs(12)), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&id(2), t0 + Duration::from_secs(12)));
        assert_eq!(cache.evict(t0 + Duration::from_secs(20)), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reinsert_after_expiry_ages_from_new_sighting() {
        let cache = cache(10, 2);
        let t0 = Instant::now();

        cache.observe(id(1), t0);
        cache.observe(id(1), t0 + Duration::from_secs(11));
        cache.observe(id(2), t0 + Duration::from_secs(12));
        cache.observe(id(3), t0 + Duration::from_secs(13));

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&id(1), t0 + Duration::from_secs(13)));
        assert!(cache.contains(&id(2), t0 + Duration::from_secs(13)));
        assert!(cache.contains(&id(3), t0 + Duration::from_secs(13)));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = cache(60, 0);
        let t0 = Instant::now();
        assert!(cache.observe(id(1), t0));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_observe_yields_single_winner() {
        let cache = Arc::new(cache(60, 1024));
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.observe(id(42), now))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&is_new| is_new)
            .count();
        assert_eq!(winners, 1);
    }
}
