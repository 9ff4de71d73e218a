//! Key-value store contract implemented by every backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{CacheError, CacheResult};
use super::keys::CacheKey;

/// Payload held by a backend.
///
/// `Null` and empty text are legitimate values and are returned as stored,
/// never reported as a miss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Value {
    Null,
    Integer(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Text contributed by this value to a dependency signature.
    pub fn signature_component(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Integer(value) => value.to_string(),
            Self::Text(text) => text.clone(),
            Self::Bytes(bytes) => hex::encode(bytes),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

/// Handler invoked once per absent key by [`KvStore::get_multi`].
pub type MissingHandler<'a> = dyn FnMut(&CacheKey) -> CacheResult<Value> + 'a;

/// Narrow storage contract the engine relies on.
///
/// Lifetimes are in seconds; `0` means "backend default". Implementations
/// must be shareable across threads because independent scope stacks
/// share one store.
pub trait KvStore: Send + Sync {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Fetch a value. Absent, expired or disabled all yield `NotCached`.
    fn get(&self, key: &CacheKey) -> CacheResult<Value>;

    /// Persist a value. Returns `Ok(false)` without side effects when disabled.
    fn store(&self, value: Value, key: &CacheKey, lifetime: u64) -> CacheResult<bool>;

    fn delete(&self, key: &CacheKey) -> CacheResult<bool>;

    /// Remove every sub stored under `(base, id)`.
    fn clean(&self, base: &str, id: &str) -> CacheResult<bool>;

    /// Remove everything this backend owns.
    fn clear(&self) -> CacheResult<bool>;

    /// Add `delta` to an integer value. An absent or non-integer value
    /// counts as `default`. Returns `default` untouched when disabled.
    fn increment(&self, delta: i64, key: &CacheKey, default: i64) -> CacheResult<i64>;

    /// Fetch several keys in order, asking `on_missing` for each absent one.
    fn get_multi(
        &self,
        keys: &[CacheKey],
        on_missing: &mut MissingHandler<'_>,
    ) -> CacheResult<Vec<Value>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            match self.get(key) {
                Ok(value) => values.push(value),
                Err(CacheError::NotCached) => values.push(on_missing(key)?),
                Err(other) => return Err(other),
            }
        }
        Ok(values)
    }

    fn enable(&self);

    fn disable(&self);

    fn is_enabled(&self) -> bool;

    /// Lifetime applied when callers pass `0`. `0` here means "no expiry".
    fn default_lifetime(&self) -> u64;
}

/// Runtime on/off switch shared by the backends.
#[derive(Debug)]
pub(crate) struct Toggle(AtomicBool);

impl Toggle {
    pub(crate) fn new(enabled: bool) -> Self {
        Self(AtomicBool::new(enabled))
    }

    pub(crate) fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Release);
    }

    pub(crate) fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Resolve a caller lifetime against the backend default.
///
/// `None` means the value never expires.
pub(crate) fn effective_lifetime(lifetime: u64, default: u64) -> Option<Duration> {
    match if lifetime == 0 { default } else { lifetime } {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_lifetime_falls_back_to_default() {
        assert_eq!(effective_lifetime(0, 0), None);
        assert_eq!(effective_lifetime(0, 30), Some(Duration::from_secs(30)));
        assert_eq!(effective_lifetime(5, 30), Some(Duration::from_secs(5)));
    }

    #[test]
    fn signature_components_are_textual() {
        assert_eq!(Value::Integer(3).signature_component(), "3");
        assert_eq!(Value::Null.signature_component(), "");
        assert_eq!(Value::Bytes(vec![0xab]).signature_component(), "ab");
        assert_eq!(Value::from("v").signature_component(), "v");
    }

    #[test]
    fn value_wire_shape_is_tagged() {
        insta::assert_snapshot!(
            serde_json::to_string(&Value::Integer(4)).expect("encode"),
            @r#"{"type":"integer","data":4}"#
        );
        insta::assert_snapshot!(
            serde_json::to_string(&Value::Null).expect("encode"),
            @r#"{"type":"null"}"#
        );
    }
}
