//! Same-process registry for callback segments.
//!
//! Closures can not be persisted, so a stored entry only carries a
//! [`CallbackToken`]. The token resolves back to the closure through the
//! registry of the process that stored it; a token minted elsewhere (or
//! evicted since) resolves to nothing and the entry is recomputed.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::callback";

/// Zero-argument producer of text, invoked at expansion time.
pub type Callback = Arc<dyn Fn() -> String + Send + Sync>;

/// Persistable handle to a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackToken {
    pub instance: Uuid,
    pub seq: u64,
}

impl fmt::Display for CallbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.instance, self.seq)
    }
}

/// Bounded map from token to closure.
pub struct CallbackRegistry {
    instance: Uuid,
    next_seq: AtomicU64,
    callbacks: Mutex<LruCache<u64, Callback>>,
}

impl CallbackRegistry {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            instance: Uuid::new_v4(),
            next_seq: AtomicU64::new(0),
            callbacks: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn instance(&self) -> Uuid {
        self.instance
    }

    pub fn register(&self, callback: Callback) -> CallbackToken {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        mutex_lock(&self.callbacks, SOURCE, "register").put(seq, callback);
        CallbackToken {
            instance: self.instance,
            seq,
        }
    }

    /// Closure behind `token`, if it was registered here and is still held.
    pub fn resolve(&self, token: &CallbackToken) -> Option<Callback> {
        if token.instance != self.instance {
            return None;
        }
        mutex_lock(&self.callbacks, SOURCE, "resolve")
            .get(&token.seq)
            .cloned()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.callbacks, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("instance", &self.instance)
            .field("len", &self.len())
            .finish()
    }
}
