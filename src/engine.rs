//! The engine façade: one explicitly constructed value that owns the cache,
//! the upstream client and the coordination state, and answers queries.

use crate::aggregate::Aggregator;
use crate::cache::error::CacheError;
use crate::cache::file::FileCacheStore;
use crate::cache::memory::MemoryCacheStore;
use crate::cache::{CacheStore, Lookup, BINCODE_CONFIG};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::coordinator::RequestCoordinator;
use crate::error::MeteoError;
use crate::eviction::{EvictionHandle, EvictionReport, EvictionScheduler};
use crate::key::{CacheKey, RequestKeyBuilder};
use crate::timezone::{CanonicalZone, TargetZone};
use crate::types::bucket::TimeSeries;
use crate::types::field::FieldSelection;
use crate::types::granularity::Granularity;
use crate::types::query::{Query, QueryParams};
use crate::types::station::Station;
use crate::upstream::retry::fetch_with_retry;
use crate::upstream::UpstreamClient;
use crate::utils::get_cache_dir;
use bon::bon;
use chrono::{DateTime, FixedOffset, Utc};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Where a query answer came from.
#[derive(Debug, Clone)]
pub enum ResultSource {
    /// A fresh cache entry.
    Cache,
    /// A new upstream fetch, now stored in the cache.
    Upstream,
    /// A new upstream fetch that could not be stored. The next identical
    /// query fetches again.
    UpstreamNotPersisted(MeteoError),
}

#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub series: Arc<TimeSeries>,
    pub source: ResultSource,
}

/// Liveness signal for an outer readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    /// The most recent upstream fetch gave up after exhausting its retries.
    Degraded,
}

/// Caching, de-duplicating front for the AEMET Antarctic observation service.
///
/// Queries are normalized into a [`CacheKey`]. A fresh cache entry answers
/// immediately; otherwise exactly one caller per key fetches from the
/// upstream (with retries), aggregates, and stores the result while any
/// concurrent callers for the same key wait for that outcome.
///
/// # Examples
///
/// ```rust,no_run
/// # use antarctic_meteo::{MeteoEngine, MeteoError, Granularity};
/// # use chrono::{TimeZone, Utc};
/// # async fn run() -> Result<(), MeteoError> {
/// let engine = MeteoEngine::from_env().await?;
/// engine.start_eviction()?;
///
/// let response = engine
///     .query()
///     .station("89064")
///     .start(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap())
///     .end(Utc.with_ymd_and_hms(2021, 1, 8, 0, 0, 0).unwrap())
///     .granularity(Granularity::Daily)
///     .call()
///     .await?;
/// println!("{} buckets", response.series.data.len());
///
/// engine.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct MeteoEngine {
    config: EngineConfig,
    store: Arc<dyn CacheStore>,
    upstream: Arc<dyn UpstreamClient>,
    clock: Arc<dyn Clock>,
    keys: RequestKeyBuilder,
    aggregator: Aggregator,
    coordinator: RequestCoordinator<QueryResponse>,
    degraded: AtomicBool,
    closed: AtomicBool,
    shutdown_token: CancellationToken,
    eviction: Mutex<Option<EvictionHandle>>,
}

#[bon]
impl MeteoEngine {
    /// Creates an engine backed by a file cache in `config.cache_dir`, or the
    /// platform cache directory when none is configured.
    ///
    /// # Errors
    ///
    /// Returns [`MeteoError::Config`] for an inconsistent configuration and
    /// [`MeteoError::StorageUnavailable`] if the cache directory cannot be
    /// determined or created.
    pub async fn with_cache_folder(
        config: EngineConfig,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Result<Self, MeteoError> {
        let dir = match &config.cache_dir {
            Some(dir) => dir.clone(),
            None => get_cache_dir()?,
        };
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = FileCacheStore::open(dir, clock.clone()).await?;
        info!("Using cache folder {}", store.dir().display());
        Self::from_parts(config, Arc::new(store), upstream, clock)
    }

    /// Creates an engine whose cache lives only in process memory.
    pub fn in_memory(config: EngineConfig, upstream: Arc<dyn UpstreamClient>) -> Result<Self, MeteoError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = MemoryCacheStore::new(clock.clone());
        Self::from_parts(config, Arc::new(store), upstream, clock)
    }

    /// Reads [`EngineConfig::from_env`] and builds a file-cached engine talking
    /// to AEMET over HTTP.
    pub async fn from_env() -> Result<Self, MeteoError> {
        let config = EngineConfig::from_env()?;
        let upstream = Arc::new(config.aemet_client()?);
        Self::with_cache_folder(config, upstream).await
    }

    /// Assembles an engine from explicit parts.
    pub fn from_parts(
        config: EngineConfig,
        store: Arc<dyn CacheStore>,
        upstream: Arc<dyn UpstreamClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, MeteoError> {
        config.validate()?;
        let sampling_interval = config.sampling_interval_chrono();
        let aggregator = Aggregator::builder()
            .sampling_interval(sampling_interval)
            .coverage_threshold(config.coverage_threshold)
            .statistics(config.statistics)
            .build();

        Ok(Self {
            keys: RequestKeyBuilder::new(sampling_interval),
            aggregator,
            config,
            store,
            upstream,
            clock,
            coordinator: RequestCoordinator::new(),
            degraded: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
            eviction: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Answers a query, building it from individual parts. Unset parts
    /// default to raw granularity, the configured zone and all fields.
    #[builder]
    pub async fn query(
        &self,
        #[builder(into)] station: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: Option<Granularity>,
        zone: Option<TargetZone>,
        fields: Option<FieldSelection>,
    ) -> Result<QueryResponse, MeteoError> {
        let query = Query {
            station,
            start,
            end,
            granularity: granularity.unwrap_or(Granularity::Raw),
            zone: zone.unwrap_or(self.config.default_zone),
            fields: fields.unwrap_or_default(),
        };
        self.timeseries(&query).await
    }

    /// Answers loosely typed parameters, as they arrive from a request layer.
    pub async fn query_params(&self, params: QueryParams) -> Result<QueryResponse, MeteoError> {
        let query = params.into_query(&self.config.default_zone)?;
        self.timeseries(&query).await
    }

    /// Answers `query` from the cache, or by fetching, aggregating and
    /// caching it.
    ///
    /// The range is widened to whole granules before fetching, so every query
    /// sharing a [`CacheKey`] receives an identical answer.
    ///
    /// # Errors
    ///
    /// * [`MeteoError::ShuttingDown`] after [`MeteoEngine::shutdown`] began.
    /// * [`MeteoError::UpstreamRejected`] for a station outside the catalogue,
    ///   or when the upstream refuses the request.
    /// * [`MeteoError::InvalidQuery`] for an empty, inverted or over-long range.
    /// * [`MeteoError::Aggregation`] for an empty field selection.
    /// * [`MeteoError::UpstreamUnavailable`] once retries are exhausted.
    /// * [`MeteoError::Cancelled`] if the caller fetching for this key went away.
    pub async fn timeseries(&self, query: &Query) -> Result<QueryResponse, MeteoError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MeteoError::ShuttingDown);
        }
        let station = Station::lookup(&query.station).ok_or_else(|| MeteoError::UpstreamRejected {
            station: Station::normalize_id(&query.station),
            message: "unknown station".to_string(),
        })?;
        self.validate_range(query)?;

        let normalized = self.keys.normalize(query);
        let effective = Query {
            station: normalized.station_id,
            start: normalized.start,
            end: normalized.end,
            ..query.clone()
        };
        self.aggregator.validate(&effective)?;
        let key = normalized.key;

        if let Some(series) = self.cached(&key).await {
            info!("Cache hit for station {} (key {})", station.id, key);
            return Ok(QueryResponse {
                series,
                source: ResultSource::Cache,
            });
        }
        info!("Cache miss for station {} (key {})", station.id, key);

        self.coordinator
            .fetch_or_wait(&key, || self.fetch_and_store(&key, &station, &effective))
            .await
    }

    /// Starts periodic eviction. Calling it again while the scheduler runs
    /// does nothing.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_eviction(&self) -> Result<(), MeteoError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MeteoError::ShuttingDown);
        }
        let mut slot = self.eviction.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            debug!("Cache eviction already running");
            return Ok(());
        }
        let handle = self
            .scheduler()
            .spawn(self.shutdown_token.child_token());
        *slot = Some(handle);
        Ok(())
    }

    /// Runs one eviction pass now, independently of the periodic scheduler.
    pub async fn evict_now(&self) -> EvictionReport {
        self.scheduler().run_once().await
    }

    /// Report of the most recent periodic eviction run, if any.
    pub fn last_eviction(&self) -> Option<EvictionReport> {
        self.eviction
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(EvictionHandle::last_report)
    }

    pub fn health(&self) -> Health {
        if self.degraded.load(Ordering::SeqCst) {
            Health::Degraded
        } else {
            Health::Healthy
        }
    }

    /// Refuses new queries, stops eviction, then waits for in-flight fetches
    /// to finish. Waiting callers receive their leader's outcome as usual.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Engine shutdown already requested");
        }
        info!("Shutting down, {} fetch(es) in flight", self.coordinator.in_flight());
        self.shutdown_token.cancel();

        let eviction = self
            .eviction
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = eviction {
            handle.shutdown().await;
        }

        self.coordinator.drain().await;
        info!("Engine shut down");
    }

    fn scheduler(&self) -> EvictionScheduler {
        EvictionScheduler::new(
            self.store.clone(),
            self.clock.clone(),
            self.config.eviction_interval,
            self.config.retention_horizon(),
        )
    }

    fn validate_range(&self, query: &Query) -> Result<(), MeteoError> {
        if query.start >= query.end {
            return Err(MeteoError::InvalidQuery(format!(
                "start {} must be before end {}",
                query.start, query.end
            )));
        }
        let max_range = chrono::TimeDelta::try_days(self.config.max_range_days).ok_or_else(|| {
            MeteoError::InvalidQuery(format!(
                "maximum range of {} days is not representable",
                self.config.max_range_days
            ))
        })?;
        if query.end - query.start > max_range {
            return Err(MeteoError::InvalidQuery(format!(
                "range of {} days exceeds the maximum of {} days",
                (query.end - query.start).num_days(),
                self.config.max_range_days
            )));
        }
        Ok(())
    }

    /// A fresh, decodable cache entry for `key`. Storage and decode failures
    /// count as a miss.
    async fn cached(&self, key: &CacheKey) -> Option<Arc<TimeSeries>> {
        let entry = match self.store.get(key).await {
            Ok(Lookup::Hit(entry)) => entry,
            Ok(Lookup::Miss) => return None,
            Err(e) => {
                warn!("Cache read for key {} failed, fetching instead: {}", key, e);
                return None;
            }
        };
        match bincode::serde::decode_from_slice::<TimeSeries, _>(&entry.payload, BINCODE_CONFIG) {
            Ok((series, _)) => Some(Arc::new(series)),
            Err(e) => {
                warn!("Cached payload for key {} is unreadable, fetching instead: {}", key, e);
                None
            }
        }
    }

    /// The leader's work for one key.
    async fn fetch_and_store(
        &self,
        key: &CacheKey,
        station: &Station,
        query: &Query,
    ) -> Result<QueryResponse, MeteoError> {
        // A previous leader for this key may have finished since our lookup.
        if let Some(series) = self.cached(key).await {
            return Ok(QueryResponse {
                series,
                source: ResultSource::Cache,
            });
        }

        let fetched = fetch_with_retry(
            self.upstream.as_ref(),
            &self.config.retry,
            station,
            query.start,
            query.end,
        )
        .await;
        self.degraded.store(
            fetched.as_ref().is_err_and(MeteoError::is_upstream_unavailable),
            Ordering::SeqCst,
        );
        let observations = fetched?;

        let data = self.aggregator.aggregate(&observations, query)?;
        let series = Arc::new(TimeSeries {
            station_id: station.id.clone(),
            station_name: station.name.clone(),
            granularity: query.granularity,
            zone: zone_label(&query.zone.canonical_for_range(query.start, query.end)),
            data,
        });

        let source = match self.persist(key, &series).await {
            Ok(()) => ResultSource::Upstream,
            Err(e) => {
                error!("Storing result for key {} failed, it will be fetched again: {}", key, e);
                ResultSource::UpstreamNotPersisted(e)
            }
        };
        Ok(QueryResponse { series, source })
    }

    async fn persist(&self, key: &CacheKey, series: &TimeSeries) -> Result<(), MeteoError> {
        let payload = bincode::serde::encode_to_vec(series, BINCODE_CONFIG)
            .map_err(|e| CacheError::Encode(Arc::new(e)))?;
        self.store.put(key, payload, self.config.cache_ttl).await?;
        debug!("Stored result for key {}", key);
        Ok(())
    }
}

/// The zone text reported in a [`TimeSeries`]: the IANA name when the offset
/// changes over the range, otherwise the offset itself.
fn zone_label(zone: &CanonicalZone) -> String {
    match zone {
        CanonicalZone::Name(name) => (*name).to_string(),
        CanonicalZone::OffsetMinutes(minutes) => FixedOffset::east_opt(minutes * 60)
            .map(|offset| offset.to_string())
            .unwrap_or_else(|| zone.to_string()),
    }
}
