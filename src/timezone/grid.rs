//! Bucket boundaries for a granularity, aligned to a target timezone.
//!
//! Raw and hourly grids step in absolute time; daily and monthly grids step
//! the local calendar and map each local midnight back to UTC through
//! [`TimezoneNormalizer::from_zone`], so a DST day is 23 or 25 hours long.

use crate::timezone::{TargetZone, TimezoneNormalizer};
use crate::types::granularity::Granularity;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Instant(DateTime<Utc>),
    Day(NaiveDate),
    Month(i32, u32),
}

/// Computes bucket boundaries for one granularity in one zone.
#[derive(Debug, Clone, Copy)]
pub struct BucketGrid {
    granularity: Granularity,
    zone: TargetZone,
    raw_step: Duration,
}

impl BucketGrid {
    /// `raw_step` is the upstream sampling interval; it is the granule used for
    /// [`Granularity::Raw`].
    pub fn new(granularity: Granularity, zone: TargetZone, raw_step: Duration) -> Self {
        let raw_step = if raw_step <= Duration::zero() {
            Duration::minutes(10)
        } else {
            raw_step
        };
        Self {
            granularity,
            zone,
            raw_step,
        }
    }

    fn anchor_of(&self, instant: DateTime<Utc>) -> Anchor {
        match self.granularity {
            Granularity::Raw => {
                let step = self.raw_step.num_seconds().max(1);
                let secs = instant.timestamp();
                let floored = secs - secs.rem_euclid(step);
                Anchor::Instant(DateTime::from_timestamp(floored, 0).unwrap_or(instant))
            }
            Granularity::Hourly => {
                let local = TimezoneNormalizer::to_zone(instant, &self.zone);
                let excess = Duration::seconds(i64::from(local.minute() * 60 + local.second()))
                    + Duration::nanoseconds(i64::from(local.nanosecond()));
                Anchor::Instant(instant - excess)
            }
            Granularity::Daily => {
                Anchor::Day(TimezoneNormalizer::to_zone(instant, &self.zone).date_naive())
            }
            Granularity::Monthly => {
                let local = TimezoneNormalizer::to_zone(instant, &self.zone);
                Anchor::Month(local.year(), local.month())
            }
        }
    }

    fn next(&self, anchor: Anchor) -> Option<Anchor> {
        match anchor {
            Anchor::Instant(t) => {
                let step = match self.granularity {
                    Granularity::Raw => self.raw_step,
                    _ => Duration::hours(1),
                };
                t.checked_add_signed(step).map(Anchor::Instant)
            }
            Anchor::Day(date) => date.succ_opt().map(Anchor::Day),
            Anchor::Month(year, 12) => Some(Anchor::Month(year.checked_add(1)?, 1)),
            Anchor::Month(year, month) => Some(Anchor::Month(year, month + 1)),
        }
    }

    fn boundary(&self, anchor: Anchor) -> Option<DateTime<Utc>> {
        let date = match anchor {
            Anchor::Instant(t) => return Some(t),
            Anchor::Day(date) => date,
            Anchor::Month(year, month) => NaiveDate::from_ymd_opt(year, month, 1)?,
        };
        Some(TimezoneNormalizer::from_zone(
            date.and_time(NaiveTime::MIN),
            &self.zone,
        ))
    }

    /// The start of the bucket containing `instant`.
    pub fn floor(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        self.boundary(self.anchor_of(instant)).unwrap_or(instant)
    }

    /// `instant` itself when it lies on a boundary, otherwise the next boundary.
    pub fn ceil(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let anchor = self.anchor_of(instant);
        match self.boundary(anchor) {
            Some(start) if start >= instant => start,
            _ => self
                .next(anchor)
                .and_then(|next| self.boundary(next))
                .unwrap_or(instant),
        }
    }

    /// Consecutive `[start, end)` windows covering `[start, end)`, the first
    /// beginning at the bucket containing `start`.
    pub fn windows(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        let mut windows = Vec::new();
        let mut anchor = self.anchor_of(start);
        while let Some(window_start) = self.boundary(anchor) {
            if window_start >= end {
                break;
            }
            let Some(next) = self.next(anchor) else {
                break;
            };
            let Some(window_end) = self.boundary(next) else {
                break;
            };
            if window_end <= window_start {
                break;
            }
            windows.push((window_start, window_end));
            anchor = next;
        }
        windows
    }
}
