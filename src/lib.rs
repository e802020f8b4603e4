mod aggregate;
mod cache;
mod clock;
mod config;
mod coordinator;
mod engine;
mod error;
mod eviction;
mod key;
mod timezone;
mod types;
mod upstream;
mod utils;

pub use engine::*;
pub use error::MeteoError;

pub use aggregate::{Aggregator, FieldStatistics, ParseStatisticError, Statistic};
pub use cache::error::CacheError;
pub use cache::file::FileCacheStore;
pub use cache::memory::MemoryCacheStore;
pub use cache::{CacheEntry, CacheStore, Lookup};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use coordinator::RequestCoordinator;
pub use eviction::{EvictionHandle, EvictionReport, EvictionScheduler};
pub use key::{CacheKey, NormalizedRequest, RequestKeyBuilder};
pub use timezone::error::TimezoneError;
pub use timezone::{CanonicalZone, TargetZone, TimezoneNormalizer};
pub use upstream::aemet::AemetClient;
pub use upstream::retry::{fetch_with_retry, RetryPolicy};
pub use upstream::{UpstreamClient, UpstreamError};

pub use types::bucket::{Bucket, SeriesData, TimeSeries};
pub use types::field::{Field, FieldSelection, ParseFieldError};
pub use types::granularity::{Granularity, ParseGranularityError};
pub use types::observation::{LocalObservation, Observation};
pub use types::query::{Query, QueryParams};
pub use types::station::{Location, Station};
