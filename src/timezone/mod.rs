//! Conversion between UTC instants and the caller's timezone.
//!
//! A [`TargetZone`] is either an IANA zone (full transition rules through
//! `chrono-tz`) or a literal fixed offset. Local times that are ambiguous or
//! that do not exist because of a transition are resolved by one fixed rule:
//! **the earlier of the possible UTC instants wins**.
//!
//! * Ambiguous (clocks go back): the first occurrence of the local time.
//! * Non-existent (clocks go forward): the local time is interpreted with the
//!   offset in force before and after the gap, and the earlier of the two
//!   resulting instants is used.

pub mod error;
pub mod grid;

use chrono::{DateTime, Duration, FixedOffset, LocalResult, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use error::TimezoneError;
use std::fmt;
use std::str::FromStr;

const OFFSET_SCAN_STEP: Duration = Duration::hours(1);

/// The timezone a query's output (and its bucket boundaries) is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetZone {
    /// An IANA zone such as `Europe/Madrid` or `Antarctica/Palmer`.
    Named(Tz),
    /// A literal offset such as `+02:00`. `UTC` parses to a zero offset.
    Fixed(FixedOffset),
}

/// How a zone is represented inside a cache key: an IANA name or a fixed
/// offset in minutes, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CanonicalZone {
    Name(&'static str),
    OffsetMinutes(i32),
}

impl fmt::Display for CanonicalZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalZone::Name(name) => write!(f, "name:{}", name),
            CanonicalZone::OffsetMinutes(minutes) => write!(f, "offset:{}", minutes),
        }
    }
}

impl TargetZone {
    pub fn utc() -> Self {
        TargetZone::Fixed(Utc.fix())
    }

    /// Parses a zone name or offset.
    ///
    /// Accepted forms: `UTC`/`Z`, `+HH:MM`, `-HH:MM`, `+HHMM`, `+HH` and any
    /// IANA zone name known to `chrono-tz`.
    ///
    /// # Examples
    ///
    /// ```
    /// use antarctic_meteo::TargetZone;
    ///
    /// assert!(TargetZone::parse("Europe/Madrid").is_ok());
    /// assert!(TargetZone::parse("+02:00").is_ok());
    /// assert!(TargetZone::parse("-03").is_ok());
    /// assert!(TargetZone::parse("Mars/Olympus").is_err());
    /// ```
    pub fn parse(text: &str) -> Result<Self, TimezoneError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(TimezoneError::Empty);
        }
        if trimmed.eq_ignore_ascii_case("utc") || trimmed.eq_ignore_ascii_case("z") {
            return Ok(Self::utc());
        }
        if trimmed.starts_with('+') || trimmed.starts_with('-') {
            return parse_offset(trimmed).map(TargetZone::Fixed);
        }
        trimmed
            .parse::<Tz>()
            .map(TargetZone::Named)
            .map_err(|_| TimezoneError::UnknownZone(trimmed.to_string()))
    }

    /// The offset from UTC in force at `instant`.
    pub fn offset_at(&self, instant: DateTime<Utc>) -> FixedOffset {
        match self {
            TargetZone::Named(tz) => tz.offset_from_utc_datetime(&instant.naive_utc()).fix(),
            TargetZone::Fixed(offset) => *offset,
        }
    }

    /// The representation used in cache keys for a query covering
    /// `[start, end]`.
    ///
    /// A named zone whose offset does not change over the range is
    /// represented by that offset, so `Europe/Madrid` in January and `+01:00`
    /// produce the same key.
    pub fn canonical_for_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> CanonicalZone {
        let tz = match self {
            TargetZone::Fixed(offset) => {
                return CanonicalZone::OffsetMinutes(offset.local_minus_utc() / 60)
            }
            TargetZone::Named(tz) => tz,
        };

        // No tz database rule keeps an offset for less than an hour, so an
        // hourly walk sees every transition inside the range.
        let first = self.offset_at(start);
        let mut instant = start;
        let mut constant = self.offset_at(end) == first;
        while constant && instant < end {
            instant += OFFSET_SCAN_STEP;
            constant = self.offset_at(instant.min(end)) == first;
        }

        if constant {
            CanonicalZone::OffsetMinutes(first.local_minus_utc() / 60)
        } else {
            CanonicalZone::Name(tz.name())
        }
    }
}

impl FromStr for TargetZone {
    type Err = TimezoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TargetZone::parse(s)
    }
}

impl fmt::Display for TargetZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetZone::Named(tz) => write!(f, "{}", tz.name()),
            TargetZone::Fixed(offset) => write!(f, "{}", offset),
        }
    }
}

fn parse_offset(text: &str) -> Result<FixedOffset, TimezoneError> {
    let malformed = || TimezoneError::MalformedOffset(text.to_string());
    let (sign, digits) = text.split_at(1);
    let sign = if sign == "-" { -1 } else { 1 };

    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h, m),
        None if digits.len() == 4 => digits.split_at(2),
        None => (digits, "0"),
    };
    if hours.is_empty()
        || hours.len() > 2
        || minutes.len() > 2
        || !hours.chars().chain(minutes.chars()).all(|c| c.is_ascii_digit())
    {
        return Err(malformed());
    }

    let hours: i32 = hours.parse().map_err(|_| malformed())?;
    let minutes: i32 = minutes.parse().map_err(|_| malformed())?;
    if hours > 23 || minutes > 59 {
        return Err(TimezoneError::OffsetOutOfRange(text.to_string()));
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| TimezoneError::OffsetOutOfRange(text.to_string()))
}

/// Pure conversions between UTC and a [`TargetZone`].
pub struct TimezoneNormalizer;

impl TimezoneNormalizer {
    /// Converts a UTC instant to local time in `zone`.
    pub fn to_zone(instant: DateTime<Utc>, zone: &TargetZone) -> DateTime<FixedOffset> {
        instant.with_timezone(&zone.offset_at(instant))
    }

    /// Converts a local wall-clock time in `zone` back to UTC.
    ///
    /// Never fails: ambiguous and non-existent local times are resolved to the
    /// earlier candidate instant (see the module documentation).
    pub fn from_zone(local: NaiveDateTime, zone: &TargetZone) -> DateTime<Utc> {
        let tz = match zone {
            TargetZone::Fixed(offset) => return shift_to_utc(local, *offset),
            TargetZone::Named(tz) => tz,
        };

        match tz.from_local_datetime(&local) {
            LocalResult::Single(dt) => dt.with_timezone(&Utc),
            LocalResult::Ambiguous(a, b) => a.with_timezone(&Utc).min(b.with_timezone(&Utc)),
            LocalResult::None => {
                // No zone has two transitions within a day, so the offsets a
                // day either side are the ones bracketing the gap.
                let before = tz
                    .offset_from_utc_datetime(&(local - Duration::days(1)))
                    .fix();
                let after = tz
                    .offset_from_utc_datetime(&(local + Duration::days(1)))
                    .fix();
                shift_to_utc(local, before).min(shift_to_utc(local, after))
            }
        }
    }
}

fn shift_to_utc(local: NaiveDateTime, offset: FixedOffset) -> DateTime<Utc> {
    Utc.from_utc_datetime(&(local - Duration::seconds(offset.local_minus_utc() as i64)))
}
