//! Backend that never caches.

use crate::cache::error::{CacheError, CacheResult};
use crate::cache::keys::CacheKey;
use crate::cache::store::{KvStore, Value};

/// Permanently disabled store; every scope recomputes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

impl KvStore for NullStore {
    fn name(&self) -> &'static str {
        "null"
    }

    fn get(&self, _key: &CacheKey) -> CacheResult<Value> {
        Err(CacheError::NotCached)
    }

    fn store(&self, _value: Value, _key: &CacheKey, _lifetime: u64) -> CacheResult<bool> {
        Ok(false)
    }

    fn delete(&self, _key: &CacheKey) -> CacheResult<bool> {
        Ok(true)
    }

    fn clean(&self, _base: &str, _id: &str) -> CacheResult<bool> {
        Ok(true)
    }

    fn clear(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn increment(&self, _delta: i64, _key: &CacheKey, default: i64) -> CacheResult<i64> {
        Ok(default)
    }

    fn enable(&self) {}

    fn disable(&self) {}

    fn is_enabled(&self) -> bool {
        false
    }

    fn default_lifetime(&self) -> u64 {
        0
    }
}
