//! Fixed-shape aggregation output and the cached time-series payload.

use crate::types::granularity::Granularity;
use crate::types::observation::LocalObservation;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// One aggregation bucket `[start, end)` expressed in the target timezone.
///
/// Every granularity produces this same record. Buckets without samples are
/// still emitted (all values `None`, `partial = true`) so the time axis stays
/// regular.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub temperature: Option<f64>,
    pub pressure: Option<f64>,
    pub wind_speed: Option<f64>,
    /// Number of observations that contributed at least one requested value.
    pub sample_count: usize,
    /// Number of observations the upstream's nominal sampling interval implies.
    pub expected_samples: usize,
    /// `true` when `sample_count / expected_samples` is below the coverage threshold.
    pub partial: bool,
}

impl Bucket {
    /// The fraction of expected samples present, in `0.0..=1.0` (can exceed 1
    /// if the upstream over-delivers).
    pub fn coverage(&self) -> f64 {
        if self.expected_samples == 0 {
            return 0.0;
        }
        self.sample_count as f64 / self.expected_samples as f64
    }
}

/// The rows of a time series: raw observations or aggregated buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SeriesData {
    Raw(Vec<LocalObservation>),
    Buckets(Vec<Bucket>),
}

impl SeriesData {
    pub fn len(&self) -> usize {
        match self {
            SeriesData::Raw(rows) => rows.len(),
            SeriesData::Buckets(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn buckets(&self) -> Option<&[Bucket]> {
        match self {
            SeriesData::Buckets(rows) => Some(rows),
            SeriesData::Raw(_) => None,
        }
    }

    pub fn observations(&self) -> Option<&[LocalObservation]> {
        match self {
            SeriesData::Raw(rows) => Some(rows),
            SeriesData::Buckets(_) => None,
        }
    }
}

/// A complete query answer. This is the payload stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub station_id: String,
    pub station_name: String,
    pub granularity: Granularity,
    /// Canonical text of the zone the timestamps are expressed in.
    pub zone: String,
    pub data: SeriesData,
}
