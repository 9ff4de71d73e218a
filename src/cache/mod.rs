//! Russian-doll output cache.
//!
//! Content is cached in nested scopes. Each scope is stored as a
//! [`CacheEntry`] holding literal text, callbacks and links to the entries
//! of the scopes nested in it. Invalidating a key bumps its version
//! counter, and every entry whose dependencies include that key turns
//! stale on its next read, including every enclosing scope.
//!
//! ```no_run
//! use std::sync::Arc;
//! use nestcache::cache::{Cache, CacheKey, Lookup, MemoryStore};
//!
//! # fn main() -> Result<(), nestcache::cache::CacheError> {
//! let store = MemoryStore::new("site", std::num::NonZeroUsize::MIN, 0);
//! let cache = Cache::new(Arc::new(store));
//! let mut scope = cache.scope();
//!
//! if let Lookup::Miss = scope.start(&CacheKey::new("page", 1))? {
//!     scope.write("<h1>Hello</h1>");
//!     scope.end(true)?;
//! }
//! let html = scope.take_output();
//! # let _ = html;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! The binary reads the `[cache]` table of `nestcache.toml`:
//!
//! ```toml
//! [cache]
//! backend = "filesystem"
//! namespace = "site"
//! directory = "/var/cache/nestcache"
//! # ... see config.rs for all options
//! ```

pub mod backend;
mod callback;
mod config;
pub mod deps;
mod engine;
mod entry;
mod error;
mod keys;
mod lock;
mod output;
mod scope;
mod store;

pub use backend::{FilesystemStore, MemoryStore, NullStore, build_store};
pub use callback::{Callback, CallbackRegistry, CallbackToken};
pub use self::config::{BackendKind, CacheConfig, default_directory};
pub use engine::{Cache, SubHook};
pub use entry::{CacheEntry, CallbackRef, EntrySource, MAX_EXPANSION_DEPTH, Segment};
pub use error::{CacheError, CacheResult};
pub use keys::{COMPOSITE_BASE, CacheKey, Sub, composite_key, group_digest, sha256_hex};
pub use output::OutputBuffer;
pub use scope::{Lookup, ScopeStack, StartOptions};
pub use store::{KvStore, MissingHandler, Value};
