//! The per-request query value, and its construction from loosely typed
//! parameters such as those arriving from an HTTP layer.

use crate::error::MeteoError;
use crate::timezone::{TargetZone, TimezoneNormalizer};
use crate::types::field::FieldSelection;
use crate::types::granularity::Granularity;
use bon::Builder;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// A request for one station's time series over `[start, end)`.
///
/// Queries are constructed per request and never persisted; the cache is
/// keyed by the [`crate::CacheKey`] derived from them.
///
/// # Examples
///
/// ```
/// use antarctic_meteo::{FieldSelection, Granularity, Query, TargetZone};
/// use chrono::{TimeZone, Utc};
///
/// let query = Query::builder()
///     .station("89064")
///     .start(Utc.with_ymd_and_hms(2020, 12, 1, 0, 0, 0).unwrap())
///     .end(Utc.with_ymd_and_hms(2020, 12, 2, 0, 0, 0).unwrap())
///     .granularity(Granularity::Hourly)
///     .zone(TargetZone::parse("Europe/Madrid").unwrap())
///     .fields(FieldSelection::parse(&["temperature"]).unwrap())
///     .build();
/// assert_eq!(query.granularity, Granularity::Hourly);
/// ```
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct Query {
    #[builder(into)]
    pub station: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[builder(default = Granularity::Raw)]
    pub granularity: Granularity,
    #[builder(default = TargetZone::utc())]
    pub zone: TargetZone,
    #[builder(default)]
    pub fields: FieldSelection,
}

/// Unvalidated query parameters, all as text.
///
/// Datetimes without an offset are interpreted as wall-clock time in the
/// requested zone (or the default zone when none is given). Datetimes with an
/// offset (`2020-12-01T00:00:00+01:00`, `...Z`) are taken as absolute instants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pub station: String,
    pub start: String,
    pub end: String,
    pub granularity: Option<String>,
    pub zone: Option<String>,
    pub fields: Vec<String>,
}

impl QueryParams {
    /// Validates the parameters and turns them into a [`Query`].
    ///
    /// # Errors
    ///
    /// * [`MeteoError::Timezone`] when the zone cannot be parsed.
    /// * [`MeteoError::InvalidQuery`] when a datetime cannot be parsed.
    /// * [`MeteoError::Aggregation`] for an unknown granularity or field name.
    pub fn into_query(self, default_zone: &TargetZone) -> Result<Query, MeteoError> {
        let zone = match self.zone.as_deref() {
            Some(text) if !text.trim().is_empty() => TargetZone::parse(text)?,
            _ => *default_zone,
        };
        let granularity = match self.granularity.as_deref() {
            Some(text) => text
                .parse::<Granularity>()
                .map_err(|e| MeteoError::Aggregation(e.to_string()))?,
            None => Granularity::Raw,
        };
        let fields = if self.fields.is_empty() {
            FieldSelection::All
        } else {
            FieldSelection::parse(self.fields.as_slice()).map_err(|e| MeteoError::Aggregation(e.to_string()))?
        };

        Ok(Query {
            start: parse_instant(&self.start, &zone)?,
            end: parse_instant(&self.end, &zone)?,
            station: self.station,
            granularity,
            zone,
            fields,
        })
    }
}

fn parse_instant(text: &str, zone: &TargetZone) -> Result<DateTime<Utc>, MeteoError> {
    let text = text.trim();
    if let Ok(dt) = DateTime::<FixedOffset>::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
        .ok_or_else(|| MeteoError::InvalidQuery(format!("Unparseable datetime '{}'", text)))?;
    Ok(TimezoneNormalizer::from_zone(naive, zone))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::field::Field;
    use chrono::TimeZone;

    fn params(start: &str, end: &str) -> QueryParams {
        QueryParams {
            station: "89064".to_string(),
            start: start.to_string(),
            end: end.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_naive_datetimes_are_local_to_the_zone() -> Result<(), MeteoError> {
        let mut p = params("2020-12-01T00:00:00", "2020-12-02");
        p.zone = Some("Europe/Madrid".to_string());
        let query = p.into_query(&TargetZone::utc())?;
        assert_eq!(query.start, Utc.with_ymd_and_hms(2020, 11, 30, 23, 0, 0).unwrap());
        assert_eq!(query.end, Utc.with_ymd_and_hms(2020, 12, 1, 23, 0, 0).unwrap());
        Ok(())
    }

    #[test]
    fn test_offset_datetimes_are_absolute() -> Result<(), MeteoError> {
        let query = params("2020-12-01T00:00:00Z", "2020-12-01T06:00:00+02:00")
            .into_query(&TargetZone::parse("Europe/Madrid")?)?;
        assert_eq!(query.start, Utc.with_ymd_and_hms(2020, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(query.end, Utc.with_ymd_and_hms(2020, 12, 1, 4, 0, 0).unwrap());
        assert_eq!(query.zone, TargetZone::parse("Europe/Madrid")?);
        Ok(())
    }

    #[test]
    fn test_granularity_and_fields() -> Result<(), MeteoError> {
        let mut p = params("2020-12-01", "2020-12-02");
        p.granularity = Some("Hourly".to_string());
        p.fields = vec!["speed".to_string(), "temperature".to_string()];
        let query = p.into_query(&TargetZone::utc())?;
        assert_eq!(query.granularity, Granularity::Hourly);
        assert_eq!(
            query.fields,
            FieldSelection::from_fields([Field::Temperature, Field::WindSpeed])
        );
        Ok(())
    }

    #[test]
    fn test_invalid_params() {
        let mut p = params("2020-12-01", "2020-12-02");
        p.granularity = Some("weekly".to_string());
        assert!(matches!(
            p.into_query(&TargetZone::utc()),
            Err(MeteoError::Aggregation(_))
        ));

        let mut p = params("2020-12-01", "2020-12-02");
        p.zone = Some("Atlantis/Capital".to_string());
        assert!(matches!(
            p.into_query(&TargetZone::utc()),
            Err(MeteoError::Timezone(_))
        ));

        assert!(matches!(
            params("yesterday", "2020-12-02").into_query(&TargetZone::utc()),
            Err(MeteoError::InvalidQuery(_))
        ));
    }
}
