//! Scope stack: the nested start/end caching protocol.
//!
//! A [`ScopeStack`] belongs to one logical thread of control (one request).
//! `start` either replays a fresh cached entry or opens a frame that captures
//! everything written until the matching `end`. Frames close in LIFO order;
//! every key opened inside a frame becomes a dependency of all frames below
//! it, so invalidating an inner key invalidates every enclosing entry.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use super::callback::{Callback, CallbackToken};
use super::engine::Cache;
use super::entry::{CacheEntry, EntrySource};
use super::error::{CacheError, CacheResult};
use super::keys::CacheKey;
use super::output::OutputBuffer;

/// Options for [`ScopeStack::start_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOptions {
    /// Lifetime in seconds; `None` uses the cache default.
    pub lifetime: Option<u64>,
    /// Write hit text (or the final text at the outermost `end`) to the output.
    pub emit: bool,
    /// Fail with `NotCached` instead of opening a frame on a miss.
    pub fail_on_miss: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            lifetime: None,
            emit: true,
            fail_on_miss: false,
        }
    }
}

impl StartOptions {
    pub fn lifetime(mut self, seconds: u64) -> Self {
        self.lifetime = Some(seconds);
        self
    }

    pub fn silent(mut self) -> Self {
        self.emit = false;
        self
    }

    pub fn fail_on_miss(mut self) -> Self {
        self.fail_on_miss = true;
        self
    }
}

/// Outcome of opening a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Fresh cached text; no frame was opened.
    Hit(String),
    /// A frame was opened; produce the content and call `end`.
    Miss,
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Hit(text) => Some(text),
            Self::Miss => None,
        }
    }
}

#[derive(Debug)]
struct Frame {
    key: CacheKey,
    entry: CacheEntry,
}

/// Stack of in-flight entry builds plus the capture buffer.
pub struct ScopeStack<'a> {
    cache: &'a Cache,
    frames: Vec<Frame>,
    output: OutputBuffer,
    /// Entries built or replayed during the current outermost scope.
    pass: HashMap<CacheKey, CacheEntry>,
}

impl<'a> ScopeStack<'a> {
    pub fn new(cache: &'a Cache) -> Self {
        Self {
            cache,
            frames: Vec::new(),
            output: OutputBuffer::new(),
            pass: HashMap::new(),
        }
    }

    pub fn cache(&self) -> &'a Cache {
        self.cache
    }

    /// Number of open scopes.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_idle(&self) -> bool {
        self.frames.is_empty()
    }

    /// Keys of the open scopes, outermost first.
    pub fn open_keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.frames.iter().map(|frame| &frame.key)
    }

    /// Append text to the innermost open scope (or to the root output).
    pub fn write(&mut self, text: &str) {
        self.output.write(text);
    }

    /// Drain text written outside every scope, including emitted results.
    pub fn take_output(&mut self) -> String {
        self.output.take_root()
    }

    pub fn start(&mut self, key: &CacheKey) -> CacheResult<Lookup> {
        self.start_with(key, StartOptions::default())
    }

    /// Replay the entry cached under `key`, or open a frame for it.
    pub fn start_with(&mut self, key: &CacheKey, options: StartOptions) -> CacheResult<Lookup> {
        let scoped = self.cache.scoped_key(key);
        let depth = self.frames.len();

        if self.frames.iter().any(|frame| frame.key.clashes_with(&scoped)) {
            warn!(key = %scoped, depth, op = "start", result = "clash", "cache key clash");
            return Err(CacheError::KeyClash {
                key: scoped.to_string(),
            });
        }

        if let Some(text) = self.replay(key, &scoped, options)? {
            return Ok(Lookup::Hit(text));
        }

        if options.fail_on_miss {
            return Err(CacheError::NotCached);
        }

        let mut entry =
            CacheEntry::new(scoped.clone()).with_lifetime(options.lifetime.unwrap_or(0));
        entry.add_dependency(scoped.clone());
        entry.add_dependency(key.clone());

        if let Some(parent) = self.frames.last_mut() {
            parent.entry.append_literal(self.output.take_since_mark());
            parent.entry.append_recursion_by_entry(&entry)?;
        }
        for frame in &mut self.frames {
            frame.entry.add_dependency(scoped.clone());
            frame.entry.add_dependency(key.clone());
        }

        self.output.push_mark();
        self.frames.push(Frame {
            key: scoped.clone(),
            entry,
        });
        debug!(key = %scoped, depth = depth + 1, op = "start", result = "miss", "scope opened");
        Ok(Lookup::Miss)
    }

    /// Close the innermost scope and persist its entry.
    ///
    /// Returns `None` for a nested scope. For the outermost scope returns
    /// the fully expanded text, writing it to the output when `emit` is set.
    /// A failed write is reported after the stack is consistent again; at
    /// the outermost level the error carries the rendered text.
    pub fn end(&mut self, emit: bool) -> CacheResult<Option<String>> {
        let Some(mut frame) = self.frames.pop() else {
            return Err(CacheError::invalid_data("end called with no open scope"));
        };
        frame.entry.append_literal(self.output.pop_mark());

        let persisted = self.cache.store_entry(&mut frame.entry);
        for ancestor in &mut self.frames {
            ancestor.entry.merge_dependencies(&frame.entry);
        }
        let key = frame.key;
        let failure = match persisted {
            Ok(true) => None,
            Ok(false) if !self.cache.store().is_enabled() => None,
            Ok(false) => Some(CacheError::store_failure(&key, "backend declined the write")),
            Err(err) => Some(err),
        };
        debug!(
            key = %key,
            depth = self.frames.len() + 1,
            op = "end",
            result = if failure.is_some() { "store_failed" } else { "stored" },
            "scope closed"
        );
        self.pass.insert(key.clone(), frame.entry);

        if !self.frames.is_empty() {
            return match failure {
                Some(err) => Err(with_rendered(err, &key, None)),
                None => Ok(None),
            };
        }

        let expanded = match self.pass.get(&key) {
            Some(entry) => entry.expand(&PassSource::new(self.cache, &self.pass), true),
            None => Err(CacheError::NotCached),
        };
        self.pass.clear();
        let text = expanded?;
        if emit {
            self.output.write(&text);
        }
        match failure {
            Some(err) => Err(with_rendered(err, &key, Some(text))),
            None => Ok(Some(text)),
        }
    }

    /// Drop the innermost scope without persisting anything.
    pub fn abort(&mut self) -> CacheResult<()> {
        let Some(frame) = self.frames.pop() else {
            return Err(CacheError::invalid_data("abort called with no open scope"));
        };
        let discarded = self.output.pop_mark();
        if let Some(parent) = self.frames.last_mut() {
            parent.entry.remove_trailing_link(&frame.key);
        } else {
            self.pass.clear();
        }
        debug!(
            key = %frame.key,
            depth = self.frames.len() + 1,
            op = "abort",
            discarded_bytes = discarded.len(),
            "scope aborted"
        );
        Ok(())
    }

    /// Append a callback segment to the innermost scope.
    ///
    /// Returns `false` when no scope is open. The callback runs whenever the
    /// entry is expanded in this process.
    pub fn append_callback<F>(&mut self, func: F) -> bool
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        let Some(frame) = self.frames.last_mut() else {
            return false;
        };
        frame.entry.append_literal(self.output.take_since_mark());
        frame.entry.append_callback(func);
        true
    }

    /// Make the innermost scope (and, once it closes, its ancestors) depend on `key`.
    pub fn add_dependency(&mut self, key: CacheKey) -> bool {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.entry.add_dependency(key);
                true
            }
            None => false,
        }
    }

    /// Run `produce` inside a scope for `key` unless a fresh entry exists.
    ///
    /// The scope is aborted when `produce` fails. Returns the text on a hit
    /// or at the outermost level, `None` for a nested miss.
    pub fn cached<F, E>(
        &mut self,
        key: &CacheKey,
        options: StartOptions,
        produce: F,
    ) -> Result<Option<String>, E>
    where
        F: FnOnce(&mut Self) -> Result<(), E>,
        E: From<CacheError>,
    {
        match self.start_with(key, options)? {
            Lookup::Hit(text) => Ok(Some(text)),
            Lookup::Miss => {
                if let Err(err) = produce(self) {
                    self.abort()?;
                    return Err(err);
                }
                Ok(self.end(options.emit)?)
            }
        }
    }

    fn replay(
        &mut self,
        key: &CacheKey,
        scoped: &CacheKey,
        options: StartOptions,
    ) -> CacheResult<Option<String>> {
        let entry = match self.cache.get_entry(scoped) {
            Ok(entry) => entry,
            Err(CacheError::NotCached) => return Ok(None),
            Err(err) => return Err(err),
        };

        let text = match entry.expand(self.cache, true) {
            Ok(text) => text,
            Err(CacheError::NotCached) => {
                self.cache.delete(scoped)?;
                let nested = !self.frames.is_empty();
                warn!(
                    key = %scoped,
                    depth = self.frames.len(),
                    op = "start",
                    result = "nested_miss",
                    "cached entry lost a nested part"
                );
                if nested && self.cache.strict_nested_hits() {
                    return Err(CacheError::NotCached);
                }
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        if self.frames.is_empty() {
            if options.emit {
                self.output.write(&text);
            }
        } else {
            for frame in &mut self.frames {
                frame.entry.add_dependency(scoped.clone());
                frame.entry.add_dependency(key.clone());
                frame.entry.merge_dependencies(&entry);
            }
            if options.emit
                && let Some(parent) = self.frames.last_mut()
            {
                parent.entry.append_literal(self.output.take_since_mark());
                parent.entry.append_recursion_by_key(scoped.clone());
            }
            self.pass.insert(scoped.clone(), entry);
        }
        debug!(
            key = %scoped,
            depth = self.frames.len(),
            op = "start",
            result = "hit",
            "scope replayed"
        );
        Ok(Some(text))
    }
}

impl fmt::Write for ScopeStack<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s);
        Ok(())
    }
}

impl Drop for ScopeStack<'_> {
    fn drop(&mut self) {
        if let Some(innermost) = self.frames.last() {
            warn!(
                open = self.frames.len(),
                innermost = %innermost.key,
                "scope stack dropped with open scopes; their content was not cached"
            );
        }
    }
}

impl fmt::Debug for ScopeStack<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeStack")
            .field("cache", self.cache)
            .field("frames", &self.frames)
            .finish()
    }
}

/// Resolves nested entries from the current pass before the backend.
struct PassSource<'p> {
    cache: &'p Cache,
    pass: &'p HashMap<CacheKey, CacheEntry>,
}

impl<'p> PassSource<'p> {
    fn new(cache: &'p Cache, pass: &'p HashMap<CacheKey, CacheEntry>) -> Self {
        Self { cache, pass }
    }
}

impl EntrySource for PassSource<'_> {
    fn entry(&self, key: &CacheKey) -> CacheResult<CacheEntry> {
        match self.pass.get(key) {
            Some(entry) => Ok(entry.clone()),
            None => self.cache.get_entry(key),
        }
    }

    fn callback(&self, token: &CallbackToken) -> Option<Callback> {
        self.cache.callbacks().resolve(token)
    }
}

fn with_rendered(err: CacheError, key: &CacheKey, rendered: Option<String>) -> CacheError {
    match err {
        CacheError::StoreFailure { key, reason, .. } => CacheError::StoreFailure {
            key,
            reason,
            rendered,
        },
        CacheError::Io(_) | CacheError::Serialization(_) => CacheError::StoreFailure {
            key: key.to_string(),
            reason: err.to_string(),
            rendered,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::Arc;

    use super::*;
    use crate::cache::backend::MemoryStore;

    fn cache() -> Cache {
        Cache::new(Arc::new(MemoryStore::new(
            "scope",
            NonZeroUsize::new(64).expect("non-zero"),
            0,
        )))
    }

    #[test]
    fn end_without_start_is_invalid() {
        let cache = cache();
        let mut scope = cache.scope();
        assert!(matches!(scope.end(true), Err(CacheError::InvalidData(_))));
        assert!(matches!(scope.abort(), Err(CacheError::InvalidData(_))));
    }

    #[test]
    fn frame_depends_on_its_own_key() {
        let cache = cache();
        let key = CacheKey::new("page", 1);
        let mut scope = cache.scope();
        assert!(scope.start(&key).expect("start").is_miss());
        assert!(scope.frames[0].entry.dependencies().contains(&key));
        scope.abort().expect("abort");
    }

    #[test]
    fn root_writes_bypass_scopes() {
        let cache = cache();
        let mut scope = cache.scope();
        scope.write("before ");
        scope.start(&CacheKey::new("page", 1)).expect("start");
        scope.write("inside");
        let text = scope.end(false).expect("end");
        assert_eq!(text.as_deref(), Some("inside"));
        assert_eq!(scope.take_output(), "before ");
    }

    #[test]
    fn append_callback_requires_open_scope() {
        let cache = cache();
        let mut scope = cache.scope();
        assert!(!scope.append_callback(|| "x".to_string()));
        assert!(!scope.add_dependency(CacheKey::new("user", 1)));
    }

    #[test]
    fn abort_removes_link_from_parent() {
        let cache = cache();
        let mut scope = cache.scope();
        scope.start(&CacheKey::new("page", 1)).expect("start");
        scope.write("A");
        scope.start(&CacheKey::new("widget", 1)).expect("start");
        scope.write("lost");
        scope.abort().expect("abort");
        scope.write("B");
        let text = scope.end(false).expect("end");
        assert_eq!(text.as_deref(), Some("AB"));
        assert!(cache.get(&CacheKey::new("widget", 1)).is_err());
    }

    #[test]
    fn with_rendered_wraps_io_but_not_logic_errors() {
        let key = CacheKey::new("page", 1);
        let io = CacheError::Io(std::io::Error::other("disk full"));
        let wrapped = with_rendered(io, &key, Some("text".to_string()));
        assert_eq!(wrapped.rendered(), Some("text"));

        let clash = CacheError::KeyClash {
            key: "page/1".to_string(),
        };
        assert!(matches!(
            with_rendered(clash, &key, Some("text".to_string())),
            CacheError::KeyClash { .. }
        ));
    }
}
