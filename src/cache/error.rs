//! Error taxonomy shared by the engine and every backend.

use thiserror::Error;

/// Errors raised by the key-value contract and the scope engine.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Expected miss. Callers recover by recomputing.
    #[error("not cached")]
    NotCached,
    /// A scope tried to open a key that is already open further down the stack.
    #[error("cache key `{key}` is already open in an enclosing scope")]
    KeyClash { key: String },
    /// Malformed key or entry.
    #[error("invalid cache data: {0}")]
    InvalidData(String),
    /// The backend does not implement the requested operation.
    #[error("backend `{backend}` does not support `{operation}`")]
    UnsupportedOperation {
        backend: &'static str,
        operation: &'static str,
    },
    /// Persisting a closed scope failed.
    ///
    /// `rendered` carries the text produced by the outermost scope so the
    /// caller can still serve it uncached.
    #[error("failed to persist cache entry `{key}`: {reason}")]
    StoreFailure {
        key: String,
        reason: String,
        rendered: Option<String>,
    },
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData(message.into())
    }

    pub fn unsupported(backend: &'static str, operation: &'static str) -> Self {
        Self::UnsupportedOperation { backend, operation }
    }

    pub fn store_failure(key: impl ToString, reason: impl Into<String>) -> Self {
        Self::StoreFailure {
            key: key.to_string(),
            reason: reason.into(),
            rendered: None,
        }
    }

    /// True for the recoverable miss outcome.
    pub fn is_not_cached(&self) -> bool {
        matches!(self, Self::NotCached)
    }

    /// Text rendered before a [`CacheError::StoreFailure`] was raised, if any.
    pub fn rendered(&self) -> Option<&str> {
        match self {
            Self::StoreFailure { rendered, .. } => rendered.as_deref(),
            _ => None,
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
