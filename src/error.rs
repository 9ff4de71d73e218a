use thiserror::Error;

use crate::{cache::CacheError, config::LoadError, infra::error::InfraError};

/// Top-level error for the maintenance binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("no entry cached under `{0}`")]
    NotFound(String),
    #[error("validation failed: {0}")]
    Validation(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Process exit code; a plain miss is distinguishable from a failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::NotFound(_) => 2,
            _ => 1,
        }
    }
}
