//! Canonicalization of queries into deterministic cache keys.
//!
//! Two queries describing the same logical request (station id casing or
//! whitespace, field order, duplicate fields, sub-granule differences in the
//! time range, a named zone versus the literal offset it has over the range)
//! always produce the same [`CacheKey`].

use crate::timezone::grid::BucketGrid;
use crate::types::query::Query;
use crate::types::station::Station;
use crate::types::field::FieldSelection;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const KEY_VERSION: &str = "v1";

/// Hex-encoded SHA-256 digest of a query's canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rebuilds a key from its textual form, e.g. a cache file name.
    pub(crate) fn from_hex(text: &str) -> Option<Self> {
        (text.len() == 64 && text.chars().all(|c| c.is_ascii_hexdigit()))
            .then(|| CacheKey(text.to_ascii_lowercase()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A query after normalization: its key and the granule-aligned UTC range
/// that a cache entry for this key covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRequest {
    pub key: CacheKey,
    pub station_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub canonical: String,
}

/// Builds cache keys. Pure and total.
#[derive(Debug, Clone, Copy)]
pub struct RequestKeyBuilder {
    sampling_interval: Duration,
}

impl RequestKeyBuilder {
    /// `sampling_interval` is the raw-granularity granule (the upstream's
    /// nominal sampling interval).
    pub fn new(sampling_interval: Duration) -> Self {
        Self { sampling_interval }
    }

    pub fn build(&self, query: &Query) -> CacheKey {
        self.normalize(query).key
    }

    pub fn normalize(&self, query: &Query) -> NormalizedRequest {
        let station_id = Station::normalize_id(&query.station);
        let grid = BucketGrid::new(query.granularity, query.zone, self.sampling_interval);
        let start = grid.floor(query.start);
        let end = grid.ceil(query.end);

        let fields = match &query.fields {
            FieldSelection::All => "all".to_string(),
            selection => selection
                .fields()
                .iter()
                .map(|f| f.key_segment())
                .collect::<Vec<_>>()
                .join(","),
        };

        let canonical = format!(
            "{}|station={}|gran={}|start={}|end={}|fields={}|tz={}",
            KEY_VERSION,
            station_id,
            query.granularity.key_segment(),
            start.to_rfc3339_opts(SecondsFormat::Secs, true),
            end.to_rfc3339_opts(SecondsFormat::Secs, true),
            fields,
            query.zone.canonical_for_range(start, end),
        );
        let key = CacheKey(hex::encode(Sha256::digest(canonical.as_bytes())));
        debug!("Built cache key {} from '{}'", key, canonical);

        NormalizedRequest {
            key,
            station_id,
            start,
            end,
            canonical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timezone::TargetZone;
    use crate::types::granularity::Granularity;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn builder() -> RequestKeyBuilder {
        RequestKeyBuilder::new(Duration::minutes(10))
    }

    fn base_query() -> Query {
        Query::builder()
            .station("89064")
            .start(utc(2021, 1, 10, 0, 0))
            .end(utc(2021, 1, 12, 0, 0))
            .granularity(Granularity::Hourly)
            .zone(TargetZone::parse("Europe/Madrid").unwrap())
            .fields(FieldSelection::parse(&["temperature", "pressure"]).unwrap())
            .build()
    }

    #[test]
    fn test_key_is_a_sha256_hex_digest() {
        let key = builder().build(&base_query());
        assert_eq!(key.as_str().len(), 64);
        assert_eq!(CacheKey::from_hex(key.as_str()), Some(key));
        assert_eq!(CacheKey::from_hex("not-a-key"), None);
    }

    #[test]
    fn test_equivalent_queries_share_a_key() {
        let reference = builder().build(&base_query());

        let mut reordered = base_query();
        reordered.station = "  89064 ".to_string();
        reordered.fields = FieldSelection::parse(&["PRES", "Temp", "pressure"]).unwrap();
        assert_eq!(builder().build(&reordered), reference);

        let mut literal_offset = base_query();
        literal_offset.zone = TargetZone::parse("+01:00").unwrap();
        assert_eq!(builder().build(&literal_offset), reference);
    }

    #[test]
    fn test_station_casing_is_ignored() {
        let mut lower = base_query();
        lower.station = "89064r".to_string();
        let mut upper = base_query();
        upper.station = "89064R".to_string();
        assert_eq!(builder().build(&lower), builder().build(&upper));
    }

    #[test]
    fn test_overlapping_sub_hour_queries_collapse() {
        let mut a = base_query();
        a.start = utc(2021, 1, 10, 0, 5);
        a.end = utc(2021, 1, 11, 23, 20);
        let mut b = base_query();
        b.start = utc(2021, 1, 10, 0, 40);
        b.end = utc(2021, 1, 11, 23, 59);
        assert_eq!(builder().build(&a), builder().build(&b));
        let normalized = builder().normalize(&a);
        assert_eq!(normalized.start, utc(2021, 1, 10, 0, 0));
        assert_eq!(normalized.end, utc(2021, 1, 12, 0, 0));
    }

    #[test]
    fn test_distinct_requests_get_distinct_keys() {
        let reference = builder().build(&base_query());

        let mut daily = base_query();
        daily.granularity = Granularity::Daily;
        assert_ne!(builder().build(&daily), reference);

        let mut full = base_query();
        full.fields = FieldSelection::All;
        assert_ne!(builder().build(&full), reference);

        let mut other_station = base_query();
        other_station.station = "89070".to_string();
        assert_ne!(builder().build(&other_station), reference);

        let mut other_zone = base_query();
        other_zone.zone = TargetZone::parse("+02:00").unwrap();
        assert_ne!(builder().build(&other_zone), reference);
    }

    #[test]
    fn test_named_zone_spanning_transition_keeps_its_name() {
        let mut query = base_query();
        query.start = utc(2021, 3, 20, 0, 0);
        query.end = utc(2021, 4, 5, 0, 0);
        let normalized = builder().normalize(&query);
        assert!(normalized.canonical.ends_with("tz=name:Europe/Madrid"));
    }
}
