use serde::{Deserialize, Deserializer, Serialize};

use orgsync_types::{Instant, Validity};

use crate::error::{TimelineError, TimelineResult};

/// A single value valid on the half-open span `[start, end)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Interval<T> {
    start: Instant,
    end: Instant,
    value: T,
}

impl<T> Interval<T> {
    /// Create an interval; fails unless `start < end`.
    pub fn new(start: Instant, end: Instant, value: T) -> TimelineResult<Self> {
        if start >= end {
            return Err(TimelineError::InvalidInterval { start, end });
        }
        Ok(Self { start, end, value })
    }

    /// Create an interval covering a validity window.
    pub fn over(validity: Validity, value: T) -> Self {
        Self {
            start: validity.from,
            end: validity.to,
            value,
        }
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn end(&self) -> Instant {
        self.end
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn validity(&self) -> Validity {
        Validity {
            from: self.start,
            to: self.end,
        }
    }

    /// Returns `true` if `t` lies in `[start, end)`.
    pub fn contains(&self, t: Instant) -> bool {
        self.start <= t && t < self.end
    }

    /// The same value restricted to `window`, or `None` if disjoint.
    pub fn clipped(&self, window: &Validity) -> Option<Self>
    where
        T: Clone,
    {
        self.validity().intersect(window).map(|v| Self::over(v, self.value.clone()))
    }
}

#[derive(Deserialize)]
struct RawInterval<T> {
    start: Instant,
    end: Instant,
    value: T,
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Interval<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawInterval::<T>::deserialize(deserializer)?;
        Interval::new(raw.start, raw.end, raw.value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> Instant {
        Instant::from_date(NaiveDate::from_ymd_opt(2024, 1, d).unwrap())
    }

    #[test]
    fn rejects_empty_and_inverted() {
        assert!(Interval::new(day(2), day(2), ()).is_err());
        assert!(matches!(
            Interval::new(day(3), day(2), ()),
            Err(TimelineError::InvalidInterval { .. })
        ));
        assert!(Interval::new(day(2), Instant::PositiveInfinity, ()).is_ok());
    }

    #[test]
    fn contains_is_half_open() {
        let iv = Interval::new(day(1), day(5), "x").unwrap();
        assert!(iv.contains(day(1)));
        assert!(iv.contains(day(4)));
        assert!(!iv.contains(day(5)));
    }

    #[test]
    fn clipped_to_window() {
        let iv = Interval::new(day(1), Instant::PositiveInfinity, 7).unwrap();
        let window = Validity::new(day(3), day(9)).unwrap();
        let cut = iv.clipped(&window).unwrap();
        assert_eq!(cut.start(), day(3));
        assert_eq!(cut.end(), day(9));
        assert_eq!(*cut.value(), 7);

        let far = Validity::new(day(20), day(21)).unwrap();
        assert!(Interval::new(day(1), day(2), 7).unwrap().clipped(&far).is_none());
    }

    #[test]
    fn deserialize_validates_bounds() {
        let ok: Interval<String> = serde_json::from_str(
            r#"{"start":"2024-01-01","end":"infinity","value":"Finance"}"#,
        )
        .unwrap();
        assert!(ok.end().is_infinite());

        let bad = serde_json::from_str::<Interval<String>>(
            r#"{"start":"2024-01-05","end":"2024-01-01","value":"Finance"}"#,
        );
        assert!(bad.is_err());
    }
}
