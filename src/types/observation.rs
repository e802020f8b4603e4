use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// A single ten-minute observation as fetched from the upstream, in UTC.
///
/// Observations are immutable once fetched. Each quantity may be absent when
/// the station did not report it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub station_id: String,
    pub instant: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub pressure: Option<f64>,
    pub wind_speed: Option<f64>,
}

impl Observation {
    pub fn new(station_id: impl Into<String>, instant: DateTime<Utc>) -> Self {
        Self {
            station_id: station_id.into(),
            instant,
            temperature: None,
            pressure: None,
            wind_speed: None,
        }
    }

    pub fn with_temperature(mut self, value: f64) -> Self {
        self.temperature = Some(value);
        self
    }

    pub fn with_pressure(mut self, value: f64) -> Self {
        self.pressure = Some(value);
        self
    }

    pub fn with_wind_speed(mut self, value: f64) -> Self {
        self.wind_speed = Some(value);
        self
    }
}

/// An observation converted to the caller's timezone, as returned for
/// [`crate::Granularity::Raw`] queries. Fields the query did not select are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalObservation {
    pub instant: DateTime<FixedOffset>,
    pub temperature: Option<f64>,
    pub pressure: Option<f64>,
    pub wind_speed: Option<f64>,
}
