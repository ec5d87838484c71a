//! Whole-day date ranges to half-open instants and back.
//!
//! Both systems exchange validities as calendar dates whose `to` date is
//! inclusive; the source marks an open end with `9999-12-31`, the destination
//! with no `to` date at all. Timelines use half-open instants, so the
//! exclusive end is `to + 1 day` at midnight UTC. These functions are the only
//! place that one-day shift happens.

use chrono::{Datelike, Duration, NaiveDate};

use orgsync_types::{Instant, Validity};

use crate::error::{TimelineError, TimelineResult};

/// Returns `true` for the source system's open-ended `to` date.
pub fn is_open_end_sentinel(date: NaiveDate) -> bool {
    date.year() == 9999 && date.month() == 12 && date.day() == 31
}

/// Start of a validity: midnight UTC on `from`.
pub fn date_to_instant(from: NaiveDate) -> Instant {
    Instant::from_date(from)
}

/// Inclusive `to` date to an exclusive end instant.
///
/// `None` and the `9999-12-31` sentinel both mean open-ended.
pub fn inclusive_end_to_instant(to: Option<NaiveDate>) -> TimelineResult<Instant> {
    match to {
        None => Ok(Instant::PositiveInfinity),
        Some(date) if is_open_end_sentinel(date) => Ok(Instant::PositiveInfinity),
        Some(date) => date
            .succ_opt()
            .map(Instant::from_date)
            .ok_or(TimelineError::DateOutOfRange(date)),
    }
}

/// Exclusive end instant to the inclusive `to` date the destination stores.
///
/// The last covered day is the day of the final nanosecond before `end`, so a
/// midnight end maps to the previous day. Open-ended maps to `None`.
pub fn instant_to_inclusive_end(end: Instant) -> Option<NaiveDate> {
    end.as_datetime()
        .map(|dt| (dt - Duration::nanoseconds(1)).date_naive())
}

/// A source `[from_date, to_date]` range as a half-open validity.
pub fn source_range_to_validity(
    from: NaiveDate,
    to: Option<NaiveDate>,
) -> TimelineResult<Validity> {
    let start = date_to_instant(from);
    let end = inclusive_end_to_instant(to)?;
    Validity::new(start, end).map_err(|_| TimelineError::InvalidInterval { start, end })
}

/// A validity as the destination's `(from, inclusive to)` date pair.
pub fn validity_to_date_range(validity: &Validity) -> (Option<NaiveDate>, Option<NaiveDate>) {
    (validity.from.date(), instant_to_inclusive_end(validity.to))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn inclusive_end_adds_one_day() {
        assert_eq!(
            inclusive_end_to_instant(Some(d(2024, 1, 31))).unwrap(),
            Instant::from_date(d(2024, 2, 1))
        );
        assert_eq!(
            inclusive_end_to_instant(Some(d(2023, 12, 31))).unwrap(),
            Instant::from_date(d(2024, 1, 1))
        );
    }

    #[test]
    fn open_end_markers_map_to_infinity() {
        assert!(inclusive_end_to_instant(None).unwrap().is_infinite());
        assert!(inclusive_end_to_instant(Some(d(9999, 12, 31))).unwrap().is_infinite());
        assert!(!inclusive_end_to_instant(Some(d(9999, 12, 30))).unwrap().is_infinite());
    }

    #[test]
    fn last_representable_date_is_rejected() {
        assert!(matches!(
            inclusive_end_to_instant(Some(NaiveDate::MAX)),
            Err(TimelineError::DateOutOfRange(_))
        ));
    }

    #[test]
    fn exclusive_end_subtracts_one_day() {
        assert_eq!(
            instant_to_inclusive_end(Instant::from_date(d(2024, 3, 1))),
            Some(d(2024, 2, 29))
        );
        assert_eq!(instant_to_inclusive_end(Instant::PositiveInfinity), None);
    }

    #[test]
    fn non_midnight_end_keeps_its_day() {
        let noon: Instant = "2024-03-01T12:00:00Z".parse().unwrap();
        assert_eq!(instant_to_inclusive_end(noon), Some(d(2024, 3, 1)));
    }

    #[test]
    fn round_trip_through_both_conversions() {
        for to in [d(2020, 2, 28), d(2020, 2, 29), d(2024, 12, 31), d(2001, 1, 1)] {
            let end = inclusive_end_to_instant(Some(to)).unwrap();
            assert_eq!(instant_to_inclusive_end(end), Some(to));
        }
        let open = inclusive_end_to_instant(None).unwrap();
        assert_eq!(instant_to_inclusive_end(open), None);
    }

    #[test]
    fn single_day_range_is_one_day_long() {
        let v = source_range_to_validity(d(2024, 5, 1), Some(d(2024, 5, 1))).unwrap();
        assert_eq!(v.from, Instant::from_date(d(2024, 5, 1)));
        assert_eq!(v.to, Instant::from_date(d(2024, 5, 2)));
        assert_eq!(validity_to_date_range(&v), (Some(d(2024, 5, 1)), Some(d(2024, 5, 1))));
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(source_range_to_validity(d(2024, 5, 2), Some(d(2024, 4, 30))).is_err());
    }
}
