//! Dependency versioning.
//!
//! Every dependency key owns an integer version counter stored in the backend
//! through `increment`. Invalidating a key bumps its counter; entries compare
//! a digest of their dependencies' versions against the one captured when
//! they were stored.
//!
//! Counters live under a derived key in the [`VERSION_BASE`] group so a
//! version bump never overwrites the content cached under the key itself.

use sha2::{Digest, Sha256};
use tracing::debug;

use super::error::{CacheError, CacheResult};
use super::keys::CacheKey;
use super::store::{KvStore, Value};

/// Base of the keys holding version counters.
pub const VERSION_BASE: &str = "cacheversion";

const SEPARATOR: &[u8] = b"\x1f";

/// Key under which the version counter of `key` is stored.
pub fn version_key(key: &CacheKey) -> CacheKey {
    CacheKey::new(VERSION_BASE, key.digest())
}

/// Bump the version of `key`, creating it if needed.
///
/// This is the only invalidation primitive for dependency-tracked entries;
/// every entry depending on `key` turns stale on its next read.
pub fn invalidate(store: &dyn KvStore, key: &CacheKey) -> CacheResult<i64> {
    store.increment(1, &version_key(key), 0)
}

/// Current version of every dependency, in order.
///
/// Absent counters are created at zero. A backend that can not increment
/// reports them as zero without creating anything.
pub fn current_versions(store: &dyn KvStore, dependencies: &[CacheKey]) -> CacheResult<Vec<Value>> {
    let keys: Vec<CacheKey> = dependencies.iter().map(version_key).collect();
    store.get_multi(&keys, &mut |key| match store.increment(0, key, 0) {
        Ok(version) => Ok(Value::Integer(version)),
        Err(CacheError::UnsupportedOperation { backend, .. }) => {
            debug!(backend, %key, "backend has no counters, reading version as zero");
            Ok(Value::Integer(0))
        }
        Err(other) => Err(other),
    })
}

/// Digest over the current versions of `dependencies`.
///
/// Empty for an empty dependency list, which marks an entry as always fresh.
pub fn signature(store: &dyn KvStore, dependencies: &[CacheKey]) -> CacheResult<String> {
    if dependencies.is_empty() {
        return Ok(String::new());
    }
    let mut hasher = Sha256::new();
    for version in current_versions(store, dependencies)? {
        hasher.update(version.signature_component().as_bytes());
        hasher.update(SEPARATOR);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::cache::backend::{FilesystemStore, MemoryStore};

    fn memory() -> MemoryStore {
        MemoryStore::new("deps", NonZeroUsize::new(16).expect("non-zero"), 0)
    }

    #[test]
    fn empty_dependencies_have_empty_signature() {
        assert_eq!(signature(&memory(), &[]).expect("signature"), "");
    }

    #[test]
    fn absent_versions_are_created_at_zero() {
        let store = memory();
        let dep = CacheKey::new("widget", 1);
        let versions = current_versions(&store, std::slice::from_ref(&dep)).expect("versions");
        assert_eq!(versions, vec![Value::Integer(0)]);
        assert_eq!(
            store.get(&version_key(&dep)).expect("created"),
            Value::Integer(0)
        );
    }

    #[test]
    fn invalidate_changes_signature() {
        let store = memory();
        let deps = vec![CacheKey::new("widget", 1), CacheKey::new("widget", 2)];
        let before = signature(&store, &deps).expect("signature");
        assert_eq!(before, signature(&store, &deps).expect("stable"));

        assert_eq!(invalidate(&store, &deps[1]).expect("invalidate"), 1);
        let after = signature(&store, &deps).expect("signature");
        assert_ne!(before, after);
    }

    #[test]
    fn invalidating_unrelated_key_keeps_signature() {
        let store = memory();
        let deps = vec![CacheKey::new("widget", 1)];
        let before = signature(&store, &deps).expect("signature");
        invalidate(&store, &CacheKey::new("widget", 99)).expect("invalidate");
        assert_eq!(before, signature(&store, &deps).expect("signature"));
    }

    #[test]
    fn version_key_does_not_alias_content() {
        let key = CacheKey::new("widget", 1);
        assert_ne!(version_key(&key), key);
        assert_eq!(version_key(&key).base(), VERSION_BASE);
    }

    #[test]
    fn backend_without_counters_reads_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemStore::open(dir.path(), "deps", None).expect("open");
        let deps = vec![CacheKey::new("widget", 1)];
        let versions = current_versions(&store, &deps).expect("versions");
        assert_eq!(versions, vec![Value::Integer(0)]);

        let err = invalidate(&store, &deps[0]).expect_err("unsupported");
        assert!(matches!(err, CacheError::UnsupportedOperation { .. }));
    }
}
