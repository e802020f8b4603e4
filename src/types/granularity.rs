//! Defines the temporal granularity a caller can request for a time series.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The bucket width requested for a time series.
///
/// `Raw` returns the upstream's ten-minute observations untouched (apart from
/// timezone conversion); the other variants aggregate them into buckets aligned
/// to the boundaries of the requested timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Granularity {
    /// Individual observations as delivered by the upstream.
    Raw,
    /// One bucket per local hour.
    Hourly,
    /// One bucket per local calendar day.
    Daily,
    /// One bucket per local calendar month.
    Monthly,
}

impl Granularity {
    pub(crate) fn key_segment(&self) -> &'static str {
        match self {
            Granularity::Raw => "raw",
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
            Granularity::Monthly => "monthly",
        }
    }

    pub fn is_aggregated(&self) -> bool {
        !matches!(self, Granularity::Raw)
    }
}

/// Formats a `Granularity` using its lowercase name.
///
/// # Examples
///
/// ```
/// use antarctic_meteo::Granularity;
///
/// assert_eq!(Granularity::Hourly.to_string(), "hourly");
/// assert_eq!(format!("{}", Granularity::Raw), "raw");
/// ```
impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key_segment())
    }
}

/// Returned when a granularity name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown granularity '{0}', expected one of raw, hourly, daily, monthly")]
pub struct ParseGranularityError(pub String);

/// Parses a granularity case-insensitively. `"none"` is accepted as an alias
/// for [`Granularity::Raw`].
///
/// # Examples
///
/// ```
/// use antarctic_meteo::Granularity;
///
/// assert_eq!("Daily".parse::<Granularity>().unwrap(), Granularity::Daily);
/// assert_eq!("None".parse::<Granularity>().unwrap(), Granularity::Raw);
/// assert!("weekly".parse::<Granularity>().is_err());
/// ```
impl FromStr for Granularity {
    type Err = ParseGranularityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" | "none" => Ok(Granularity::Raw),
            "hourly" | "hour" => Ok(Granularity::Hourly),
            "daily" | "day" => Ok(Granularity::Daily),
            "monthly" | "month" => Ok(Granularity::Monthly),
            _ => Err(ParseGranularityError(s.to_string())),
        }
    }
}
