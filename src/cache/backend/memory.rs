//! In-process backend.
//!
//! Every value, version counters included, lives in one LRU map keyed by
//! `(group digest, sub id)`. Counters can be evicted like any other value.
//! A counter recreated after an integer left the map starts above every
//! value the store has handed out, so an evicted version never matches an
//! old signature again.

use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::Instant;

use lru::LruCache;
use metrics::counter;
use tracing::debug;

use crate::cache::error::{CacheError, CacheResult};
use crate::cache::keys::{CacheKey, group_digest};
use crate::cache::lock::{rw_read, rw_write};
use crate::cache::store::{KvStore, Toggle, Value, effective_lifetime};

const SOURCE: &str = "cache::backend::memory";
const METRIC_EVICT: &str = "nestcache_memory_evict_total";

type SlotKey = (String, String);

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

struct Slots {
    lru: LruCache<SlotKey, Slot>,
    /// Highest integer ever held.
    high_water: i64,
    /// Start value for counters created after an integer was dropped.
    floor: Option<i64>,
}

impl Slots {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            lru: LruCache::new(capacity),
            high_water: 0,
            floor: None,
        }
    }

    fn insert(&mut self, key: SlotKey, slot: Slot) {
        if let Some(value) = slot.value.as_integer() {
            self.high_water = self.high_water.max(value);
        }
        if let Some((evicted_key, evicted)) = self.lru.push(key.clone(), slot)
            && evicted_key != key
        {
            self.forget(&evicted);
            counter!(METRIC_EVICT).increment(1);
        }
    }

    fn remove(&mut self, key: &SlotKey) -> Option<Slot> {
        let slot = self.lru.pop(key)?;
        self.forget(&slot);
        Some(slot)
    }

    fn forget(&mut self, slot: &Slot) {
        if slot.value.as_integer().is_some() {
            let next = self.high_water.saturating_add(1);
            self.floor = Some(self.floor.map_or(next, |floor| floor.max(next)));
        }
    }

    /// First value of a counter that is not in the map.
    fn seed(&self, default: i64) -> i64 {
        match self.floor {
            Some(floor) => default.max(floor),
            None => default,
        }
    }
}

/// LRU-bounded in-memory store, scoped to one process.
pub struct MemoryStore {
    namespace: String,
    default_lifetime: u64,
    slots: RwLock<Slots>,
    enabled: Toggle,
}

impl MemoryStore {
    pub fn new(
        namespace: impl Into<String>,
        capacity: NonZeroUsize,
        default_lifetime: u64,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            default_lifetime,
            slots: RwLock::new(Slots::new(capacity)),
            enabled: Toggle::new(true),
        }
    }

    /// Number of live values, counters included.
    pub fn len(&self) -> usize {
        rw_read(&self.slots, SOURCE, "len").lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot_key(&self, key: &CacheKey) -> CacheResult<SlotKey> {
        key.validate()?;
        Ok((key.group_digest(&self.namespace), key.sub().storage_id()))
    }
}

impl KvStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &CacheKey) -> CacheResult<Value> {
        if !self.enabled.get() {
            return Err(CacheError::NotCached);
        }
        let slot_key = self.slot_key(key)?;

        let mut slots = rw_write(&self.slots, SOURCE, "get");
        let now = Instant::now();
        match slots
            .lru
            .get(&slot_key)
            .map(|slot| (slot.is_expired(now), slot.value.clone()))
        {
            Some((false, value)) => Ok(value),
            Some((true, _)) => {
                slots.remove(&slot_key);
                debug!(source = SOURCE, %key, "expired entry dropped");
                Err(CacheError::NotCached)
            }
            None => Err(CacheError::NotCached),
        }
    }

    fn store(&self, value: Value, key: &CacheKey, lifetime: u64) -> CacheResult<bool> {
        if !self.enabled.get() {
            return Ok(false);
        }
        let slot_key = self.slot_key(key)?;
        let expires_at = effective_lifetime(lifetime, self.default_lifetime)
            .and_then(|ttl| Instant::now().checked_add(ttl));

        rw_write(&self.slots, SOURCE, "store").insert(slot_key, Slot { value, expires_at });
        Ok(true)
    }

    fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
        let slot_key = self.slot_key(key)?;
        Ok(rw_write(&self.slots, SOURCE, "delete").remove(&slot_key).is_some())
    }

    fn clean(&self, base: &str, id: &str) -> CacheResult<bool> {
        let group = group_digest(&self.namespace, base, id);

        let mut slots = rw_write(&self.slots, SOURCE, "clean");
        let doomed: Vec<SlotKey> = slots
            .lru
            .iter()
            .filter(|((slot_group, _), _)| *slot_group == group)
            .map(|(slot_key, _)| slot_key.clone())
            .collect();
        for slot_key in &doomed {
            slots.remove(slot_key);
        }
        Ok(!doomed.is_empty())
    }

    fn clear(&self) -> CacheResult<bool> {
        // Every signed entry goes with the counters, so the floor can reset.
        let mut slots = rw_write(&self.slots, SOURCE, "clear");
        slots.lru.clear();
        slots.floor = None;
        Ok(true)
    }

    fn increment(&self, delta: i64, key: &CacheKey, default: i64) -> CacheResult<i64> {
        if !self.enabled.get() {
            return Ok(default);
        }
        let slot_key = self.slot_key(key)?;

        // Read and write happen under one guard so concurrent bumps serialize.
        let mut slots = rw_write(&self.slots, SOURCE, "increment");
        let now = Instant::now();
        let current = slots
            .lru
            .get(&slot_key)
            .filter(|slot| !slot.is_expired(now))
            .and_then(|slot| slot.value.as_integer());
        let next = match current {
            Some(value) => value.saturating_add(delta),
            None => slots.seed(default).saturating_add(delta),
        };
        slots.insert(
            slot_key,
            Slot {
                value: Value::Integer(next),
                expires_at: None,
            },
        );
        Ok(next)
    }

    fn enable(&self) {
        self.enabled.set(true);
    }

    fn disable(&self) {
        self.enabled.set(false);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn default_lifetime(&self) -> u64 {
        self.default_lifetime
    }
}
