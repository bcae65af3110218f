//! Optional read-through cache for bullet item listings.
//!
//! # Invariants
//! - The cache is never a source of truth: ordering decisions and
//!   authorization always read the store.
//! - Every committed mutation of a specification bumps its generation; a put
//!   carrying an older generation is dropped, so a read that raced a write
//!   cannot repopulate stale items.
//! - Deleted specifications are retired: their entry and generation are
//!   dropped, so tombstones do not accumulate.

use crate::model::entities::{BulletItem, SpecId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Default entry lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Cache collaborator contract.
pub trait ReadCache: Send + Sync {
    /// Current generation of `spec_id`; read before loading from the store.
    fn generation(&self, spec_id: SpecId) -> u64;
    fn get_items(&self, spec_id: SpecId) -> Option<Vec<BulletItem>>;
    /// Stores `items` unless `spec_id` was invalidated after `generation`.
    fn put_items(&self, spec_id: SpecId, generation: u64, items: Vec<BulletItem>);
    fn invalidate_specification(&self, spec_id: SpecId);
    /// Forgets a specification that was soft-deleted.
    fn retire_specification(&self, spec_id: SpecId) {
        self.invalidate_specification(spec_id);
    }
}

/// Cache that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl ReadCache for NoopCache {
    fn generation(&self, _spec_id: SpecId) -> u64 {
        0
    }

    fn get_items(&self, _spec_id: SpecId) -> Option<Vec<BulletItem>> {
        None
    }

    fn put_items(&self, _spec_id: SpecId, _generation: u64, _items: Vec<BulletItem>) {}

    fn invalidate_specification(&self, _spec_id: SpecId) {}
}

/// Hit/miss counters of an `InMemoryReadCache`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

struct CachedItems {
    generation: u64,
    stored_at: Instant,
    items: Vec<BulletItem>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<SpecId, CachedItems>,
    generations: HashMap<SpecId, u64>,
    stats: CacheStats,
}

/// Process-local TTL cache.
pub struct InMemoryReadCache {
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl InMemoryReadCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    /// Number of specifications with a cached listing or a generation.
    pub fn tracked_len(&self) -> usize {
        let state = self.state.lock();
        state
            .generations
            .keys()
            .chain(state.entries.keys())
            .collect::<HashSet<_>>()
            .len()
    }
}

impl Default for InMemoryReadCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl ReadCache for InMemoryReadCache {
    fn generation(&self, spec_id: SpecId) -> u64 {
        self.state
            .lock()
            .generations
            .get(&spec_id)
            .copied()
            .unwrap_or(0)
    }

    fn get_items(&self, spec_id: SpecId) -> Option<Vec<BulletItem>> {
        let mut state = self.state.lock();
        let current = state.generations.get(&spec_id).copied().unwrap_or(0);
        let fresh = state.entries.get(&spec_id).and_then(|entry| {
            (entry.generation == current && entry.stored_at.elapsed() < self.ttl)
                .then(|| entry.items.clone())
        });

        match fresh {
            Some(items) => {
                state.stats.hits += 1;
                Some(items)
            }
            None => {
                state.entries.remove(&spec_id);
                state.stats.misses += 1;
                None
            }
        }
    }

    fn put_items(&self, spec_id: SpecId, generation: u64, items: Vec<BulletItem>) {
        let mut state = self.state.lock();
        let current = state.generations.get(&spec_id).copied().unwrap_or(0);
        if generation != current {
            return;
        }
        let ttl = self.ttl;
        state
            .entries
            .retain(|_, entry| entry.stored_at.elapsed() < ttl);
        state.entries.insert(
            spec_id,
            CachedItems {
                generation,
                stored_at: Instant::now(),
                items,
            },
        );
    }

    fn invalidate_specification(&self, spec_id: SpecId) {
        let mut state = self.state.lock();
        *state.generations.entry(spec_id).or_insert(0) += 1;
        state.entries.remove(&spec_id);
    }

    fn retire_specification(&self, spec_id: SpecId) {
        let mut state = self.state.lock();
        state.generations.remove(&spec_id);
        state.entries.remove(&spec_id);
    }
}
