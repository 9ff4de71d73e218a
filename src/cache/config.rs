//! Cache configuration.
//!
//! Selects the backend and tunes the engine. Loaded from the `[cache]`
//! table of `nestcache.toml` or built directly by library users.

use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

const DEFAULT_MEMORY_CAPACITY: usize = 10_000;
const DEFAULT_CALLBACK_CAPACITY: usize = 1024;
const DEFAULT_DIRECTORY_NAME: &str = "nestcache";

/// Storage backend selected at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Filesystem,
    Null,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "ram" => Ok(Self::Memory),
            "filesystem" | "fs" => Ok(Self::Filesystem),
            "null" | "none" => Ok(Self::Null),
            other => Err(format!(
                "unknown backend `{other}` (expected memory, filesystem or null)"
            )),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::Filesystem => "filesystem",
            Self::Null => "null",
        })
    }
}

/// Engine and backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Start the backend enabled. A disabled backend makes every scope recompute.
    pub enabled: bool,
    pub backend: BackendKind,
    /// Prefix mixed into every storage identity.
    pub namespace: String,
    /// Lifetime used when a scope does not set one. `None` keeps the backend default.
    pub default_lifetime_secs: Option<u64>,
    /// Maximum values held by the memory backend.
    pub memory_capacity: usize,
    /// Root directory of the filesystem backend.
    pub directory: PathBuf,
    /// Maximum callbacks remembered for same-process expansion.
    pub callback_capacity: usize,
    /// Propagate a failed expansion of a nested hit instead of recomputing it.
    pub strict_nested_hits: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: BackendKind::Memory,
            namespace: String::new(),
            default_lifetime_secs: None,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            directory: default_directory(),
            callback_capacity: DEFAULT_CALLBACK_CAPACITY,
            strict_nested_hits: true,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            backend: settings.backend,
            namespace: settings.namespace.clone(),
            default_lifetime_secs: settings.default_lifetime_secs,
            memory_capacity: settings.memory_capacity.get(),
            directory: settings.directory.clone(),
            callback_capacity: settings.callback_capacity.get(),
            strict_nested_hits: settings.strict_nested_hits,
        }
    }
}

impl CacheConfig {
    /// Memory capacity as `NonZeroUsize`, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    /// Callback capacity as `NonZeroUsize`, clamping to 1 if zero.
    pub fn callback_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.callback_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

/// `<tmp>/nestcache`.
pub fn default_directory() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_DIRECTORY_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.namespace, "");
        assert_eq!(config.default_lifetime_secs, None);
        assert_eq!(config.memory_capacity, 10_000);
        assert_eq!(config.callback_capacity, 1024);
        assert!(config.strict_nested_hits);
        assert!(config.directory.ends_with("nestcache"));
    }

    #[test]
    fn zero_capacities_clamp_to_one() {
        let config = CacheConfig {
            memory_capacity: 0,
            callback_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.memory_capacity_non_zero().get(), 1);
        assert_eq!(config.callback_capacity_non_zero().get(), 1);
    }

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!("RAM".parse::<BackendKind>(), Ok(BackendKind::Memory));
        assert_eq!("fs".parse::<BackendKind>(), Ok(BackendKind::Filesystem));
        assert_eq!(" null ".parse::<BackendKind>(), Ok(BackendKind::Null));
        assert!("memcached".parse::<BackendKind>().is_err());
    }

    #[test]
    fn deserializes_partial_table() {
        let config: CacheConfig = serde_json::from_value(serde_json::json!({
            "backend": "filesystem",
            "namespace": "site",
        }))
        .expect("deserialize");
        assert_eq!(config.backend, BackendKind::Filesystem);
        assert_eq!(config.namespace, "site");
        assert_eq!(config.memory_capacity, 10_000);
    }
}
