//! In-memory cache of decoded `ImageContainer`s.
//!
//! Eviction is strict LRU by last access, not an approximation: a
//! monotonic access counter orders every entry, and a `BTreeMap` keyed on
//! that counter lets eviction always pick the true least-recently-used
//! entry in `O(log n)`. This trades the throughput of an approximate
//! (W-TinyLFU-style) cache for the simpler, auditable eviction contract the
//! pipeline wants: given a fixed access sequence, the evicted entry is
//! always predictable.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::container::ImageContainer;
use crate::keys::MemoryCacheKey;

const DEFAULT_COST_LIMIT: u64 = 100 * 1024 * 1024;
const DEFAULT_COUNT_LIMIT: usize = 1000;
/// Fraction of both limits freed by `trim_for_memory_pressure`.
const PRESSURE_TRIM_FRACTION: f64 = 0.10;

struct Entry {
    container: Arc<ImageContainer>,
    cost: u64,
    inserted_at: Instant,
    ttl: Option<Duration>,
    tick: u64,
}

struct State {
    entries: HashMap<MemoryCacheKey, Entry>,
    recency: BTreeMap<u64, MemoryCacheKey>,
    next_tick: u64,
    total_cost: u64,
}

impl State {
    fn touch(&mut self, key: &MemoryCacheKey) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, key.clone());
        }
        tick
    }

    fn remove(&mut self, key: &MemoryCacheKey) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        self.total_cost = self.total_cost.saturating_sub(entry.cost);
        Some(entry)
    }

    fn evict_lru(&mut self) -> bool {
        let Some((&tick, _)) = self.recency.iter().next() else { return false };
        let key = self.recency.remove(&tick).expect("tick present");
        if let Some(entry) = self.entries.remove(&key) {
            self.total_cost = self.total_cost.saturating_sub(entry.cost);
        }
        true
    }
}

/// Builder-configured limits for a [`MemoryCache`].
#[derive(Debug, Clone, Copy)]
pub struct MemoryCacheLimits {
    pub cost_limit: u64,
    pub count_limit: usize,
    /// An entry larger than this is never cached (it would otherwise evict
    /// everything else just to hold itself).
    pub entry_cost_limit: u64,
    pub default_ttl: Option<Duration>,
}

impl Default for MemoryCacheLimits {
    fn default() -> Self {
        Self {
            cost_limit: DEFAULT_COST_LIMIT,
            count_limit: DEFAULT_COUNT_LIMIT,
            entry_cost_limit: DEFAULT_COST_LIMIT / 4,
            default_ttl: None,
        }
    }
}

pub struct MemoryCache {
    limits: MemoryCacheLimits,
    state: Mutex<State>,
}

impl MemoryCache {
    pub fn new(limits: MemoryCacheLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(State {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                next_tick: 0,
                total_cost: 0,
            }),
        }
    }

    /// Look up an entry, marking it as most-recently-used on hit. Entries
    /// past their TTL are treated as absent and evicted eagerly.
    pub fn get(&self, key: &MemoryCacheKey) -> Option<Arc<ImageContainer>> {
        let mut state = self.state.lock();
        let expired = match state.entries.get(key) {
            Some(entry) => match entry.ttl {
                Some(ttl) => entry.inserted_at.elapsed() > ttl,
                None => false,
            },
            None => return None,
        };
        if expired {
            state.remove(key);
            return None;
        }
        state.touch(key);
        state.entries.get(key).map(|e| e.container.clone())
    }

    /// Insert or overwrite an entry. Entries exceeding `entry_cost_limit`
    /// are silently not cached, matching a read-through caller's
    /// expectation that storing never fails loudly.
    pub fn set(&self, key: MemoryCacheKey, container: Arc<ImageContainer>) {
        self.set_with_ttl(key, container, self.limits.default_ttl);
    }

    pub fn set_with_ttl(&self, key: MemoryCacheKey, container: Arc<ImageContainer>, ttl: Option<Duration>) {
        let cost = container.cost();
        if cost > self.limits.entry_cost_limit {
            return;
        }
        let mut state = self.state.lock();
        state.remove(&key);
        let tick = state.touch(&key);
        state.entries.insert(
            key.clone(),
            Entry { container, cost, inserted_at: Instant::now(), ttl, tick },
        );
        state.recency.insert(tick, key);
        state.total_cost += cost;

        while state.total_cost > self.limits.cost_limit || state.entries.len() > self.limits.count_limit {
            if !state.evict_lru() {
                break;
            }
        }
    }

    pub fn remove(&self, key: &MemoryCacheKey) {
        self.state.lock().remove(key);
    }

    pub fn remove_all(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.recency.clear();
        state.total_cost = 0;
    }

    pub fn total_cost(&self) -> u64 {
        self.state.lock().total_cost
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict least-recently-used entries until both cost and count are at
    /// or below 90% of their configured limits.
    pub fn trim_for_memory_pressure(&self) {
        let cost_target = (self.limits.cost_limit as f64 * (1.0 - PRESSURE_TRIM_FRACTION)) as u64;
        let count_target = (self.limits.count_limit as f64 * (1.0 - PRESSURE_TRIM_FRACTION)) as usize;
        let mut state = self.state.lock();
        while state.total_cost > cost_target || state.entries.len() > count_target {
            if !state.evict_lru() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ImageFormat, ImageSize};

    fn key(s: &str) -> MemoryCacheKey {
        let req = crate::request::ImageRequest::new(url::Url::parse(&format!("https://e.com/{s}")).unwrap());
        MemoryCacheKey::for_request(&req)
    }

    fn container(cost_pixels: u32) -> Arc<ImageContainer> {
        Arc::new(ImageContainer::new(
            ImageSize { width: cost_pixels, height: 1 },
            ImageFormat::Png,
        ))
    }

    #[test]
    fn evicts_least_recently_used_first() {
        let cache = MemoryCache::new(MemoryCacheLimits {
            cost_limit: u64::MAX,
            count_limit: 2,
            entry_cost_limit: u64::MAX,
            default_ttl: None,
        });
        let a = key("a");
        let b = key("b");
        let c = key("c");
        cache.set(a.clone(), container(1));
        cache.set(b.clone(), container(1));
        // touch a so b becomes LRU
        cache.get(&a);
        cache.set(c.clone(), container(1));
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn oversized_entry_is_not_cached() {
        let cache = MemoryCache::new(MemoryCacheLimits {
            cost_limit: 1000,
            count_limit: 10,
            entry_cost_limit: 10,
            default_ttl: None,
        });
        let k = key("big");
        cache.set(k.clone(), container(100));
        assert!(cache.get(&k).is_none());
    }

    #[test]
    fn ttl_expiry_evicts_on_read() {
        let cache = MemoryCache::new(MemoryCacheLimits::default());
        let k = key("ttl");
        cache.set_with_ttl(k.clone(), container(1), Some(Duration::from_millis(0)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&k).is_none());
    }

    #[test]
    fn pressure_trim_frees_roughly_ten_percent() {
        let cache = MemoryCache::new(MemoryCacheLimits {
            cost_limit: 100,
            count_limit: 100,
            entry_cost_limit: u64::MAX,
            default_ttl: None,
        });
        for i in 0..10 {
            cache.set(key(&i.to_string()), container(10));
        }
        assert_eq!(cache.total_cost(), 100);
        cache.trim_for_memory_pressure();
        assert!(cache.total_cost() <= 90);
    }
}
