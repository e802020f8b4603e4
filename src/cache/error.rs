use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Failures of the underlying cache storage.
///
/// Sources are shared behind `Arc` so one failure can be reported to every
/// caller waiting on the same fetch.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Failed to determine cache directory")]
    DirResolution,

    #[error("Failed to create cache directory '{0}'")]
    DirCreation(PathBuf, #[source] Arc<std::io::Error>),

    #[error("Failed to scan cache directory '{0}'")]
    Scan(PathBuf, #[source] Arc<std::io::Error>),

    #[error("Failed to read cache entry '{0}'")]
    Read(PathBuf, #[source] Arc<std::io::Error>),

    #[error("Failed to write cache entry '{0}'")]
    Write(PathBuf, #[source] Arc<std::io::Error>),

    #[error("Failed to persist cache entry '{0}'")]
    Persist(PathBuf, #[source] Arc<std::io::Error>),

    #[error("Failed to delete cache entry '{0}'")]
    Delete(PathBuf, #[source] Arc<std::io::Error>),

    #[error("Failed to decode cache data from '{0}'")]
    Decode(PathBuf, #[source] Arc<bincode::error::DecodeError>),

    #[error("Failed to encode cache data")]
    Encode(#[source] Arc<bincode::error::EncodeError>),

    #[error("Background cache task failed to complete: {0}")]
    TaskJoin(String),

    #[error("Cache backend unavailable: {0}")]
    Backend(String),
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(e: tokio::task::JoinError) -> Self {
        CacheError::TaskJoin(e.to_string())
    }
}
