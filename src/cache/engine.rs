//! Cache handle shared by scope stacks.
//!
//! [`Cache`] binds a backend to a callback registry and engine settings. It
//! is cheap to clone; every clone talks to the same backend. Scope stacks
//! are request-scoped and borrowed from it through [`Cache::scope`].

use std::fmt;
use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use super::backend::build_store;
use super::callback::{Callback, CallbackRegistry, CallbackToken};
use super::config::CacheConfig;
use super::deps;
use super::entry::{CacheEntry, EntrySource};
use super::error::{CacheError, CacheResult};
use super::keys::{CacheKey, Sub, composite_key};
use super::scope::ScopeStack;
use super::store::KvStore;

const METRIC_HIT: &str = "nestcache_hit_total";
const METRIC_MISS: &str = "nestcache_miss_total";
const METRIC_SAVED: &str = "nestcache_saved_total";
const METRIC_DELETED: &str = "nestcache_deleted_total";
const METRIC_CLEANED: &str = "nestcache_cleaned_total";
const METRIC_INVALIDATED: &str = "nestcache_invalidated_total";

/// Extra discriminator mixed into every scope key, e.g. a request variant.
pub type SubHook = Arc<dyn Fn() -> Sub + Send + Sync>;

#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn KvStore>,
    callbacks: Arc<CallbackRegistry>,
    default_lifetime: Option<u64>,
    strict_nested_hits: bool,
    sub_hook: Option<SubHook>,
}

impl Cache {
    /// Wrap a backend with default engine settings.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        let defaults = CacheConfig::default();
        Self {
            store,
            callbacks: Arc::new(CallbackRegistry::new(defaults.callback_capacity_non_zero())),
            default_lifetime: defaults.default_lifetime_secs,
            strict_nested_hits: defaults.strict_nested_hits,
            sub_hook: None,
        }
    }

    /// Build the configured backend and wrap it.
    pub fn from_config(config: &CacheConfig) -> CacheResult<Self> {
        let store = build_store(config)?;
        Ok(Self {
            store,
            callbacks: Arc::new(CallbackRegistry::new(config.callback_capacity_non_zero())),
            default_lifetime: config.default_lifetime_secs,
            strict_nested_hits: config.strict_nested_hits,
            sub_hook: None,
        })
    }

    /// Mix the value returned by `hook` into the sub of every scope key.
    pub fn with_sub_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> Sub + Send + Sync + 'static,
    {
        self.sub_hook = Some(Arc::new(hook));
        self
    }

    pub fn with_strict_nested_hits(mut self, strict: bool) -> Self {
        self.strict_nested_hits = strict;
        self
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    pub fn strict_nested_hits(&self) -> bool {
        self.strict_nested_hits
    }

    /// Lifetime given to scopes that do not set one.
    pub fn default_lifetime(&self) -> u64 {
        self.default_lifetime.unwrap_or_else(|| self.store.default_lifetime())
    }

    /// Open a new, empty scope stack.
    pub fn scope(&self) -> ScopeStack<'_> {
        ScopeStack::new(self)
    }

    /// `key` with the sub hook applied.
    pub fn scoped_key(&self, key: &CacheKey) -> CacheKey {
        match &self.sub_hook {
            Some(hook) => key.extended(&hook()),
            None => key.clone(),
        }
    }

    /// Fresh entry stored under `key`.
    ///
    /// Undecodable and stale entries are deleted and reported as `NotCached`.
    pub fn get_entry(&self, key: &CacheKey) -> CacheResult<CacheEntry> {
        let value = match self.store.get(key) {
            Ok(value) => value,
            Err(CacheError::NotCached) => {
                counter!(METRIC_MISS).increment(1);
                debug!(%key, op = "get", result = "miss", "cache miss");
                return Err(CacheError::NotCached);
            }
            Err(other) => return Err(other),
        };

        let entry = match CacheEntry::decode(&value) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(%key, error = %err, "dropping undecodable cache entry");
                self.drop_entry(key)?;
                counter!(METRIC_MISS).increment(1);
                return Err(CacheError::NotCached);
            }
        };

        if !entry.is_up_to_date(self.store.as_ref())? {
            debug!(%key, op = "get", result = "stale", "stale entry deleted");
            self.drop_entry(key)?;
            counter!(METRIC_MISS).increment(1);
            return Err(CacheError::NotCached);
        }

        counter!(METRIC_HIT).increment(1);
        debug!(%key, op = "get", result = "hit", "cache hit");
        Ok(entry)
    }

    /// Expanded text of the entry stored under `key`.
    pub fn get(&self, key: &CacheKey) -> CacheResult<String> {
        self.get_entry(key)?.expand(self, true)
    }

    /// Persist `entry` under its key and under its composite index key.
    ///
    /// Callback segments are registered first so the stored form carries
    /// tokens. Returns `Ok(false)` when the backend declined the write.
    pub fn store_entry(&self, entry: &mut CacheEntry) -> CacheResult<bool> {
        let Some(key) = entry.key().cloned() else {
            return Err(CacheError::invalid_data("can not store an entry without a key"));
        };
        if entry.lifetime() == 0 {
            entry.set_lifetime(self.default_lifetime());
        }
        entry.assign_callback_tokens(&self.callbacks);
        entry.update_signature(self.store.as_ref())?;

        let encoded = entry.encode()?;
        let lifetime = entry.lifetime();
        let index_key = composite_key(&key, entry.dependencies());
        let saved = self.store.store(encoded.clone(), &key, lifetime)?
            && self.store.store(encoded, &index_key, lifetime)?;

        if saved {
            counter!(METRIC_SAVED).increment(1);
            debug!(
                %key,
                op = "store",
                dependencies = entry.dependencies().len(),
                lifetime,
                "cache entry saved"
            );
        }
        Ok(saved)
    }

    /// Entry stored through the composite index of `(key, dependencies)`.
    pub fn get_composite(
        &self,
        key: &CacheKey,
        dependencies: &[CacheKey],
    ) -> CacheResult<CacheEntry> {
        self.get_entry(&composite_key(key, dependencies))
    }

    /// Bump the version of `key`, making every entry that depends on it stale.
    pub fn invalidate(&self, key: &CacheKey) -> CacheResult<i64> {
        let version = deps::invalidate(self.store.as_ref(), key)?;
        counter!(METRIC_INVALIDATED).increment(1);
        debug!(%key, version, op = "invalidate", "dependency invalidated");
        Ok(version)
    }

    pub fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
        self.drop_entry(key)
    }

    /// Remove every sub stored under `(base, id)`.
    pub fn clean(&self, base: &str, id: &str) -> CacheResult<bool> {
        let cleaned = self.store.clean(base, id)?;
        if cleaned {
            counter!(METRIC_CLEANED).increment(1);
        }
        debug!(base, id, op = "clean", cleaned, "cache group cleaned");
        Ok(cleaned)
    }

    pub fn clear(&self) -> CacheResult<bool> {
        let cleared = self.store.clear()?;
        debug!(op = "clear", cleared, "cache cleared");
        Ok(cleared)
    }

    fn drop_entry(&self, key: &CacheKey) -> CacheResult<bool> {
        let deleted = self.store.delete(key)?;
        if deleted {
            counter!(METRIC_DELETED).increment(1);
        }
        Ok(deleted)
    }
}

impl EntrySource for Cache {
    fn entry(&self, key: &CacheKey) -> CacheResult<CacheEntry> {
        self.get_entry(key)
    }

    fn callback(&self, token: &CallbackToken) -> Option<Callback> {
        self.callbacks.resolve(token)
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("backend", &self.store.name())
            .field("enabled", &self.store.is_enabled())
            .field("strict_nested_hits", &self.strict_nested_hits)
            .field("sub_hook", &self.sub_hook.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::cache::backend::MemoryStore;
    use crate::cache::store::Value;

    fn cache() -> Cache {
        Cache::new(Arc::new(MemoryStore::new(
            "engine",
            NonZeroUsize::new(64).expect("non-zero"),
            0,
        )))
    }

    #[test]
    fn stored_entry_round_trips_through_get() {
        let cache = cache();
        let key = CacheKey::new("page", 1);
        let mut entry = CacheEntry::new(key.clone());
        entry.append_literal("hello");
        assert!(cache.store_entry(&mut entry).expect("store"));
        assert_eq!(cache.get(&key).expect("get"), "hello");
    }

    #[test]
    fn stale_entry_is_deleted_on_read() {
        let cache = cache();
        let key = CacheKey::new("page", 1);
        let dep = CacheKey::new("user", 1);
        let mut entry = CacheEntry::new(key.clone());
        entry.append_literal("hello").add_dependency(dep.clone());
        cache.store_entry(&mut entry).expect("store");

        cache.invalidate(&dep).expect("invalidate");
        assert!(cache.get_entry(&key).expect_err("stale").is_not_cached());
        assert!(matches!(cache.store().get(&key), Err(CacheError::NotCached)));
    }

    #[test]
    fn undecodable_value_is_a_miss() {
        let cache = cache();
        let key = CacheKey::new("page", 1);
        cache
            .store()
            .store(Value::Integer(3), &key, 0)
            .expect("store raw");
        assert!(cache.get_entry(&key).expect_err("undecodable").is_not_cached());
        assert!(cache.store().get(&key).is_err());
    }

    #[test]
    fn composite_index_is_written_alongside() {
        let cache = cache();
        let key = CacheKey::new("page", 1);
        let dep = CacheKey::new("user", 1);
        let mut entry = CacheEntry::new(key.clone());
        entry.append_literal("hello").add_dependency(dep.clone());
        cache.store_entry(&mut entry).expect("store");

        let indexed = cache
            .get_composite(&key, std::slice::from_ref(&dep))
            .expect("composite");
        assert_eq!(indexed.first_literal(), Some("hello"));
        assert!(cache.get_composite(&key, &[]).is_err());
    }

    #[test]
    fn keyless_entry_can_not_be_stored() {
        let cache = cache();
        let err = cache
            .store_entry(&mut CacheEntry::default())
            .expect_err("keyless");
        assert!(matches!(err, CacheError::InvalidData(_)));
    }

    #[test]
    fn disabled_backend_declines_writes() {
        let cache = cache();
        cache.store().disable();
        let mut entry = CacheEntry::new(CacheKey::new("page", 1));
        entry.append_literal("x");
        assert!(!cache.store_entry(&mut entry).expect("store"));
    }

    #[test]
    fn sub_hook_extends_scope_keys() {
        let cache = cache().with_sub_hook(|| Sub::from("-en"));
        let key = CacheKey::new("page", 1).with_sub("body");
        assert_eq!(
            cache.scoped_key(&key),
            CacheKey::new("page", 1).with_sub("body-en")
        );
    }

    #[test]
    fn default_lifetime_prefers_config() {
        let cache = cache();
        assert_eq!(cache.default_lifetime(), 0);

        let config = CacheConfig {
            default_lifetime_secs: Some(90),
            ..Default::default()
        };
        assert_eq!(Cache::from_config(&config).expect("cache").default_lifetime(), 90);
    }
}
