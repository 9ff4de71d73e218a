//! Filesystem backend.
//!
//! Layout: `<root>/<group digest>/<sub digest>.json`, where the group digest
//! covers `(namespace, base, id)`. Each file holds a JSON [`Record`] with an
//! absolute expiry in unix seconds. Writes go through a temporary file in the
//! same directory and are renamed into place.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::cache::error::{CacheError, CacheResult};
use crate::cache::keys::{CacheKey, group_digest, sha256_hex};
use crate::cache::store::{KvStore, Toggle, Value, effective_lifetime};

const SOURCE: &str = "cache::backend::filesystem";

/// Thirty days.
pub const FILESYSTEM_DEFAULT_LIFETIME: u64 = 3600 * 24 * 30;

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    expires_at: Option<i64>,
    value: Value,
}

/// Persistent store sharing entries between processes through a directory.
pub struct FilesystemStore {
    root: PathBuf,
    namespace: String,
    default_lifetime: u64,
    enabled: Toggle,
}

impl FilesystemStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(
        root: impl Into<PathBuf>,
        namespace: impl Into<String>,
        default_lifetime: Option<u64>,
    ) -> CacheResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            namespace: namespace.into(),
            default_lifetime: default_lifetime.unwrap_or(FILESYSTEM_DEFAULT_LIFETIME),
            enabled: Toggle::new(true),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn group_dir(&self, base: &str, id: &str) -> PathBuf {
        self.root.join(group_digest(&self.namespace, base, id))
    }

    fn entry_path(&self, key: &CacheKey) -> CacheResult<PathBuf> {
        key.validate()?;
        let file = format!("{}.json", sha256_hex(key.sub().storage_id().as_bytes()));
        Ok(self.group_dir(key.base(), key.id()).join(file))
    }

    fn remove_quietly(path: &Path) {
        if let Err(err) = fs::remove_file(path)
            && err.kind() != io::ErrorKind::NotFound
        {
            warn!(
                source = SOURCE,
                path = %path.display(),
                error = %err,
                "failed to remove cache file"
            );
        }
    }
}

impl KvStore for FilesystemStore {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn get(&self, key: &CacheKey) -> CacheResult<Value> {
        if !self.enabled.get() {
            return Err(CacheError::NotCached);
        }
        let path = self.entry_path(key)?;
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::NotCached);
            }
            Err(err) => return Err(err.into()),
        };

        let record: Record = match serde_json::from_slice(&raw) {
            Ok(record) => record,
            Err(err) => {
                warn!(source = SOURCE, %key, error = %err, "dropping unreadable cache file");
                Self::remove_quietly(&path);
                return Err(CacheError::NotCached);
            }
        };

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if record.expires_at.is_some_and(|deadline| deadline <= now) {
            debug!(source = SOURCE, %key, "expired entry dropped");
            Self::remove_quietly(&path);
            return Err(CacheError::NotCached);
        }
        Ok(record.value)
    }

    fn store(&self, value: Value, key: &CacheKey, lifetime: u64) -> CacheResult<bool> {
        if !self.enabled.get() {
            return Ok(false);
        }
        let path = self.entry_path(key)?;
        let Some(dir) = path.parent() else {
            return Err(CacheError::store_failure(key, "entry path has no parent"));
        };
        fs::create_dir_all(dir)?;

        let expires_at = effective_lifetime(lifetime, self.default_lifetime).map(|ttl| {
            OffsetDateTime::now_utc()
                .unix_timestamp()
                .saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))
        });
        let encoded = serde_json::to_vec(&Record { expires_at, value })?;

        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(&encoded)?;
        file.as_file().sync_all()?;
        file.persist(&path).map_err(|err| CacheError::Io(err.error))?;
        Ok(true)
    }

    fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
        let path = self.entry_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn clean(&self, base: &str, id: &str) -> CacheResult<bool> {
        if !self.enabled.get() {
            return Ok(false);
        }
        match fs::remove_dir_all(self.group_dir(base, id)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn clear(&self) -> CacheResult<bool> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
        Ok(true)
    }

    fn increment(&self, _delta: i64, _key: &CacheKey, _default: i64) -> CacheResult<i64> {
        Err(CacheError::unsupported(self.name(), "increment"))
    }

    fn enable(&self) {
        self.enabled.set(true);
    }

    fn disable(&self) {
        self.enabled.set(false);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn default_lifetime(&self) -> u64 {
        self.default_lifetime
    }
}
