//! Backend implementations of [`KvStore`](crate::cache::KvStore).

mod filesystem;
mod memory;
mod null;

use std::sync::Arc;

use tracing::info;

pub use filesystem::{FILESYSTEM_DEFAULT_LIFETIME, FilesystemStore};
pub use memory::MemoryStore;
pub use null::NullStore;

use super::config::{BackendKind, CacheConfig};
use super::error::CacheResult;
use super::store::KvStore;

/// Construct the backend named by `config`.
pub fn build_store(config: &CacheConfig) -> CacheResult<Arc<dyn KvStore>> {
    let store: Arc<dyn KvStore> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryStore::new(
            config.namespace.clone(),
            config.memory_capacity_non_zero(),
            config.default_lifetime_secs.unwrap_or(0),
        )),
        BackendKind::Filesystem => Arc::new(FilesystemStore::open(
            config.directory.clone(),
            config.namespace.clone(),
            config.default_lifetime_secs,
        )?),
        BackendKind::Null => Arc::new(NullStore),
    };

    if !config.enabled {
        store.disable();
    }

    info!(
        backend = store.name(),
        namespace = %config.namespace,
        enabled = store.is_enabled(),
        default_lifetime_secs = store.default_lifetime(),
        "cache backend ready"
    );
    Ok(store)
}
