//! Bucketing of raw observations into fixed-shape, timezone-aligned records.

use crate::error::MeteoError;
use crate::timezone::grid::BucketGrid;
use crate::timezone::TimezoneNormalizer;
use crate::types::bucket::{Bucket, SeriesData};
use crate::types::field::{Field, FieldSelection};
use crate::types::granularity::Granularity;
use crate::types::observation::{LocalObservation, Observation};
use crate::types::query::Query;
use bon::Builder;
use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_COVERAGE_THRESHOLD: f64 = 0.5;
pub const DEFAULT_SAMPLING_INTERVAL_MINUTES: i64 = 10;

/// How a bucket's samples for one field are reduced to a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Statistic {
    Mean,
    Min,
    Max,
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Statistic::Mean => "mean",
            Statistic::Min => "min",
            Statistic::Max => "max",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown statistic '{0}' (expected mean, min or max)")]
pub struct ParseStatisticError(String);

impl FromStr for Statistic {
    type Err = ParseStatisticError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" | "avg" | "average" => Ok(Statistic::Mean),
            "min" | "minimum" => Ok(Statistic::Min),
            "max" | "maximum" => Ok(Statistic::Max),
            _ => Err(ParseStatisticError(s.to_string())),
        }
    }
}

/// The statistic applied to each field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldStatistics {
    pub temperature: Statistic,
    pub pressure: Statistic,
    pub wind_speed: Statistic,
}

impl Default for FieldStatistics {
    /// Mean temperature, mean pressure, peak wind.
    fn default() -> Self {
        Self {
            temperature: Statistic::Mean,
            pressure: Statistic::Mean,
            wind_speed: Statistic::Max,
        }
    }
}

impl FieldStatistics {
    pub fn for_field(&self, field: Field) -> Statistic {
        match field {
            Field::Temperature => self.temperature,
            Field::Pressure => self.pressure,
            Field::WindSpeed => self.wind_speed,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Accumulator {
    sum: f64,
    count: usize,
    min: Option<f64>,
    max: Option<f64>,
}

impl Accumulator {
    fn push(&mut self, value: Option<f64>) {
        let Some(value) = value else {
            return;
        };
        self.sum += value;
        self.count += 1;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn finish(&self, statistic: Statistic) -> Option<f64> {
        match statistic {
            Statistic::Mean => (self.count > 0).then(|| self.sum / self.count as f64),
            Statistic::Min => self.min,
            Statistic::Max => self.max,
        }
    }
}

/// Turns raw observations into the rows of a [`crate::TimeSeries`].
///
/// # Examples
///
/// ```
/// use antarctic_meteo::{Aggregator, Granularity, Observation, Query};
/// use chrono::{Duration, TimeZone, Utc};
///
/// let aggregator = Aggregator::builder()
///     .sampling_interval(Duration::minutes(30))
///     .build();
/// let query = Query::builder()
///     .station("89064")
///     .start(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap())
///     .end(Utc.with_ymd_and_hms(2021, 1, 1, 1, 0, 0).unwrap())
///     .granularity(Granularity::Hourly)
///     .build();
/// let observations = vec![
///     Observation::new("89064", Utc.with_ymd_and_hms(2021, 1, 1, 0, 15, 0).unwrap()).with_temperature(2.0),
///     Observation::new("89064", Utc.with_ymd_and_hms(2021, 1, 1, 0, 45, 0).unwrap()).with_temperature(4.0),
/// ];
///
/// let data = aggregator.aggregate(&observations, &query).unwrap();
/// let bucket = &data.buckets().unwrap()[0];
/// assert_eq!(bucket.temperature, Some(3.0));
/// assert_eq!(bucket.sample_count, 2);
/// assert!(!bucket.partial);
/// ```
#[derive(Debug, Clone, Builder)]
pub struct Aggregator {
    /// The upstream's nominal sampling interval.
    #[builder(default = Duration::minutes(DEFAULT_SAMPLING_INTERVAL_MINUTES))]
    sampling_interval: Duration,
    /// Buckets whose coverage falls below this fraction are flagged partial.
    #[builder(default = DEFAULT_COVERAGE_THRESHOLD)]
    coverage_threshold: f64,
    #[builder(default)]
    statistics: FieldStatistics,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Aggregator {
    pub fn sampling_interval(&self) -> Duration {
        self.sampling_interval
    }

    /// Aggregates `observations` for `query`. Observations outside
    /// `[query.start, query.end)` are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`MeteoError::Aggregation`] for an empty field selection, an
    /// empty or inverted range, a non-positive sampling interval, or a
    /// coverage threshold outside `0..=1`.
    pub fn aggregate(&self, observations: &[Observation], query: &Query) -> Result<SeriesData, MeteoError> {
        self.validate(query)?;
        let mut in_range: Vec<&Observation> = observations
            .iter()
            .filter(|o| o.instant >= query.start && o.instant < query.end)
            .collect();
        in_range.sort_by_key(|o| o.instant);

        Ok(match query.granularity {
            Granularity::Raw => SeriesData::Raw(self.localize(&in_range, query)),
            _ => SeriesData::Buckets(self.bucketize(&in_range, query)),
        })
    }

    pub(crate) fn validate(&self, query: &Query) -> Result<(), MeteoError> {
        if query.fields.is_empty() {
            return Err(MeteoError::Aggregation("no fields selected".to_string()));
        }
        if query.start >= query.end {
            return Err(MeteoError::Aggregation(format!(
                "empty range: start {} is not before end {}",
                query.start, query.end
            )));
        }
        if self.sampling_interval <= Duration::zero() {
            return Err(MeteoError::Aggregation(format!(
                "sampling interval must be positive, got {}",
                self.sampling_interval
            )));
        }
        if !(0.0..=1.0).contains(&self.coverage_threshold) {
            return Err(MeteoError::Aggregation(format!(
                "coverage threshold must be within 0..=1, got {}",
                self.coverage_threshold
            )));
        }
        Ok(())
    }

    fn localize(&self, observations: &[&Observation], query: &Query) -> Vec<LocalObservation> {
        let fields = &query.fields;
        observations
            .iter()
            .map(|o| LocalObservation {
                instant: TimezoneNormalizer::to_zone(o.instant, &query.zone),
                temperature: o.temperature.filter(|_| fields.contains(Field::Temperature)),
                pressure: o.pressure.filter(|_| fields.contains(Field::Pressure)),
                wind_speed: o.wind_speed.filter(|_| fields.contains(Field::WindSpeed)),
            })
            .collect()
    }

    /// `observations` must be sorted by instant.
    fn bucketize(&self, observations: &[&Observation], query: &Query) -> Vec<Bucket> {
        let grid = BucketGrid::new(query.granularity, query.zone, self.sampling_interval);
        let windows = grid.windows(query.start, query.end);
        let fields = &query.fields;
        let mut buckets = Vec::with_capacity(windows.len());
        let mut next = 0;

        for (start, end) in windows {
            // Skip anything before this window (only possible for the first one).
            while next < observations.len() && observations[next].instant < start {
                next += 1;
            }
            let mut temperature = Accumulator::default();
            let mut pressure = Accumulator::default();
            let mut wind_speed = Accumulator::default();
            let mut sample_count = 0;

            while next < observations.len() && observations[next].instant < end {
                let o = observations[next];
                let t = o.temperature.filter(|_| fields.contains(Field::Temperature));
                let p = o.pressure.filter(|_| fields.contains(Field::Pressure));
                let w = o.wind_speed.filter(|_| fields.contains(Field::WindSpeed));
                if t.is_some() || p.is_some() || w.is_some() {
                    sample_count += 1;
                }
                temperature.push(t);
                pressure.push(p);
                wind_speed.push(w);
                next += 1;
            }

            let expected_samples = self.expected_samples(start, end);
            let partial = sample_count == 0
                || expected_samples == 0
                || (sample_count as f64 / expected_samples as f64) < self.coverage_threshold;

            buckets.push(Bucket {
                start: TimezoneNormalizer::to_zone(start, &query.zone),
                end: TimezoneNormalizer::to_zone(end, &query.zone),
                temperature: temperature.finish(self.statistics.temperature),
                pressure: pressure.finish(self.statistics.pressure),
                wind_speed: wind_speed.finish(self.statistics.wind_speed),
                sample_count,
                expected_samples,
                partial,
            });
        }

        debug!(
            "Aggregated {} observations into {} {} buckets",
            observations.len(),
            buckets.len(),
            query.granularity
        );
        buckets
    }

    fn expected_samples(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> usize {
        let step = self.sampling_interval.num_seconds().max(1);
        usize::try_from((end - start).num_seconds() / step).unwrap_or(0)
    }
}
