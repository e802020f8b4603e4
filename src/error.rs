use crate::cache::error::CacheError;
use crate::config::ConfigError;
use crate::timezone::error::TimezoneError;
use crate::key::CacheKey;
use thiserror::Error;

/// Everything a query can fail with.
///
/// Cloneable so that a single fetch outcome can be delivered to every caller
/// waiting on the same [`CacheKey`].
#[derive(Debug, Clone, Error)]
pub enum MeteoError {
    #[error("Upstream unavailable for station '{station}' after {attempts} attempt(s): {message}")]
    UpstreamUnavailable {
        station: String,
        attempts: u32,
        message: String,
    },

    #[error("Upstream rejected request for station '{station}': {message}")]
    UpstreamRejected { station: String, message: String },

    #[error("Cache storage unavailable")]
    StorageUnavailable(#[from] CacheError),

    #[error(transparent)]
    Timezone(#[from] TimezoneError),

    #[error("Invalid aggregation request: {0}")]
    Aggregation(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Fetch for key {0} was cancelled before completing")]
    Cancelled(CacheKey),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Engine is shutting down")]
    ShuttingDown,
}

impl MeteoError {
    /// Whether this error came from the upstream giving up after retries.
    pub fn is_upstream_unavailable(&self) -> bool {
        matches!(self, MeteoError::UpstreamUnavailable { .. })
    }
}
