//! Cached units of content.
//!
//! A [`CacheEntry`] is an ordered list of segments plus the set of keys it
//! depends on. Nested entries are never embedded: a parent only records the
//! child's key and re-reads the child through an [`EntrySource`] when it is
//! expanded.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::callback::{Callback, CallbackRegistry, CallbackToken};
use super::deps;
use super::error::{CacheError, CacheResult};
use super::keys::CacheKey;
use super::store::{KvStore, Value};

/// Nesting limit for expansion; deeper chains are treated as corrupt.
pub const MAX_EXPANSION_DEPTH: usize = 64;

/// Where expansion looks up nested entries and callbacks.
pub trait EntrySource {
    /// Fresh entry stored under `key`, or `NotCached`.
    fn entry(&self, key: &CacheKey) -> CacheResult<CacheEntry>;

    fn callback(&self, token: &CallbackToken) -> Option<Callback>;
}

/// Callback segment payload.
///
/// Only the token survives serialization; the closure itself stays in the
/// process that created it.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CallbackRef {
    token: Option<CallbackToken>,
    #[serde(skip)]
    func: Option<Callback>,
}

impl CallbackRef {
    pub fn new(func: Callback) -> Self {
        Self {
            token: None,
            func: Some(func),
        }
    }

    pub fn token(&self) -> Option<CallbackToken> {
        self.token
    }

    fn resolve(&self, source: &dyn EntrySource) -> Option<Callback> {
        self.func
            .clone()
            .or_else(|| self.token.and_then(|token| source.callback(&token)))
    }
}

impl fmt::Debug for CallbackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRef")
            .field("token", &self.token)
            .field("local", &self.func.is_some())
            .finish()
    }
}

impl PartialEq for CallbackRef {
    fn eq(&self, other: &Self) -> bool {
        match (self.token, other.token) {
            (Some(left), Some(right)) => left == right,
            (None, None) => match (&self.func, &other.func) {
                (Some(left), Some(right)) => Arc::ptr_eq(left, right),
                (None, None) => true,
                _ => false,
            },
            _ => false,
        }
    }
}

/// One piece of an entry's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Segment {
    Literal(String),
    Callback(CallbackRef),
    /// Pre-existing entry, re-read at expansion time.
    LinkByKey(CacheKey),
    /// Entry built by a nested scope during the same pass.
    LinkByEntry(CacheKey),
}

impl Segment {
    fn link_key(&self) -> Option<&CacheKey> {
        match self {
            Self::LinkByKey(key) | Self::LinkByEntry(key) => Some(key),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    key: Option<CacheKey>,
    #[serde(default)]
    lifetime: u64,
    #[serde(default)]
    segments: Vec<Segment>,
    #[serde(default)]
    dependencies: Vec<CacheKey>,
    #[serde(default)]
    dependency_signature: String,
}

impl CacheEntry {
    pub fn new(key: CacheKey) -> Self {
        Self {
            key: Some(key),
            ..Self::default()
        }
    }

    pub fn with_lifetime(mut self, lifetime: u64) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn key(&self) -> Option<&CacheKey> {
        self.key.as_ref()
    }

    pub fn set_key(&mut self, key: CacheKey) -> &mut Self {
        self.key = Some(key);
        self
    }

    pub fn lifetime(&self) -> u64 {
        self.lifetime
    }

    pub fn set_lifetime(&mut self, lifetime: u64) -> &mut Self {
        self.lifetime = lifetime;
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn dependencies(&self) -> &[CacheKey] {
        &self.dependencies
    }

    pub fn dependency_signature(&self) -> &str {
        &self.dependency_signature
    }

    /// Append text; empty text is ignored.
    pub fn append_literal(&mut self, text: impl Into<String>) -> &mut Self {
        let text = text.into();
        if !text.is_empty() {
            self.segments.push(Segment::Literal(text));
        }
        self
    }

    pub fn append_callback<F>(&mut self, func: F) -> &mut Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.append_callback_ref(CallbackRef::new(Arc::new(func)))
    }

    pub fn append_callback_ref(&mut self, callback: CallbackRef) -> &mut Self {
        self.segments.push(Segment::Callback(callback));
        self
    }

    pub fn add_dependency(&mut self, key: CacheKey) -> &mut Self {
        if !self.dependencies.contains(&key) {
            self.dependencies.push(key);
            self.dependency_signature.clear();
        }
        self
    }

    pub fn add_dependencies<I>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = CacheKey>,
    {
        for key in keys {
            self.add_dependency(key);
        }
        self
    }

    /// Take over every dependency of `other`.
    pub fn merge_dependencies(&mut self, other: &CacheEntry) -> &mut Self {
        self.add_dependencies(other.dependencies.iter().cloned())
    }

    /// Depend on `key` and expand it in place.
    pub fn append_recursion_by_key(&mut self, key: CacheKey) -> &mut Self {
        self.add_dependency(key.clone());
        self.segments.push(Segment::LinkByKey(key));
        self
    }

    /// Depend on a nested entry and expand it in place.
    pub fn append_recursion_by_entry(&mut self, child: &CacheEntry) -> CacheResult<&mut Self> {
        let Some(key) = child.key.clone() else {
            return Err(CacheError::invalid_data(
                "nested entry has no key and can not be linked",
            ));
        };
        self.add_dependency(key.clone());
        self.segments.push(Segment::LinkByEntry(key));
        Ok(self)
    }

    /// Drop a trailing link to `key`, returning whether one was removed.
    ///
    /// The dependency on `key` is kept.
    pub fn remove_trailing_link(&mut self, key: &CacheKey) -> bool {
        if self.segments.last().and_then(Segment::link_key) == Some(key) {
            self.segments.pop();
            return true;
        }
        false
    }

    /// Digest of the current versions of every dependency.
    pub fn compute_dependency_signature(&self, store: &dyn KvStore) -> CacheResult<String> {
        deps::signature(store, &self.dependencies)
    }

    /// Capture the current dependency versions.
    pub fn update_signature(&mut self, store: &dyn KvStore) -> CacheResult<&str> {
        self.dependency_signature = self.compute_dependency_signature(store)?;
        Ok(&self.dependency_signature)
    }

    pub fn is_up_to_date(&self, store: &dyn KvStore) -> CacheResult<bool> {
        if self.dependencies.is_empty() {
            return Ok(true);
        }
        Ok(self.compute_dependency_signature(store)? == self.dependency_signature)
    }

    /// Text of the first literal segment.
    pub fn first_literal(&self) -> Option<&str> {
        self.segments.iter().find_map(|segment| match segment {
            Segment::Literal(text) => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn has_callbacks(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Callback(_)))
    }

    /// Register every unregistered callback so the entry can be persisted.
    pub fn assign_callback_tokens(&mut self, registry: &CallbackRegistry) {
        for segment in &mut self.segments {
            if let Segment::Callback(callback) = segment
                && callback.token.is_none()
                && let Some(func) = callback.func.clone()
            {
                callback.token = Some(registry.register(func));
            }
        }
    }

    /// Render the entry to text.
    ///
    /// With `recurse` unset, link segments contribute nothing. A missing or
    /// stale nested entry fails the whole expansion with `NotCached`.
    pub fn expand(&self, source: &dyn EntrySource, recurse: bool) -> CacheResult<String> {
        let mut out = String::new();
        self.expand_into(source, recurse, 0, &mut out)?;
        Ok(out)
    }

    fn expand_into(
        &self,
        source: &dyn EntrySource,
        recurse: bool,
        depth: usize,
        out: &mut String,
    ) -> CacheResult<()> {
        if depth >= MAX_EXPANSION_DEPTH {
            return Err(CacheError::invalid_data(format!(
                "entry nesting exceeds {MAX_EXPANSION_DEPTH} levels"
            )));
        }
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Callback(callback) => {
                    let func = callback.resolve(source).ok_or(CacheError::NotCached)?;
                    out.push_str(&func());
                }
                Segment::LinkByKey(key) | Segment::LinkByEntry(key) => {
                    if recurse {
                        source.entry(key)?.expand_into(source, recurse, depth + 1, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn encode(&self) -> CacheResult<Value> {
        Ok(Value::Text(serde_json::to_string(self)?))
    }

    pub fn decode(value: &Value) -> CacheResult<Self> {
        match value {
            Value::Text(text) => Ok(serde_json::from_str(text)?),
            Value::Bytes(bytes) => Ok(serde_json::from_slice(bytes)?),
            other => Err(CacheError::invalid_data(format!(
                "stored value is not a cache entry: {other:?}"
            ))),
        }
    }
}
