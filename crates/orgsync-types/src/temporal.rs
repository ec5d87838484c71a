use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{TypeError, TypeResult};

/// A point in continuous time, or the open-ended sentinel.
///
/// Ordering: every finite instant sorts before [`Instant::PositiveInfinity`].
/// The textual form is RFC 3339 for finite instants and `"infinity"` for the
/// sentinel; serde uses the same form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Instant {
    /// A concrete point in time.
    At(DateTime<Utc>),
    /// Open-ended: later than every finite instant.
    PositiveInfinity,
}

impl Instant {
    /// Midnight UTC at the start of `date`.
    pub fn from_date(date: NaiveDate) -> Self {
        Self::At(date.and_time(chrono::NaiveTime::MIN).and_utc())
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self::At(Utc::now())
    }

    /// Returns `true` for the open-ended sentinel.
    pub fn is_infinite(&self) -> bool {
        matches!(self, Self::PositiveInfinity)
    }

    /// The finite timestamp, if any.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::At(dt) => Some(*dt),
            Self::PositiveInfinity => None,
        }
    }

    /// The calendar date (UTC) of a finite instant.
    pub fn date(&self) -> Option<NaiveDate> {
        self.as_datetime().map(|dt| dt.date_naive())
    }
}

impl From<DateTime<Utc>> for Instant {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::At(dt)
    }
}

impl fmt::Debug for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instant({self})")
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::At(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Self::PositiveInfinity => write!(f, "infinity"),
        }
    }
}

impl FromStr for Instant {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "infinity" {
            return Ok(Self::PositiveInfinity);
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(Self::At(dt.with_timezone(&Utc)));
        }
        // Plain calendar dates are accepted as midnight UTC.
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Self::from_date)
            .map_err(|_| TypeError::InvalidInstant(s.to_string()))
    }
}

impl Serialize for Instant {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Instant {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A half-open validity window `[from, to)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawValidity")]
pub struct Validity {
    pub from: Instant,
    pub to: Instant,
}

/// Unchecked wire form; deserialization goes through [`Validity::new`].
#[derive(Deserialize)]
struct RawValidity {
    from: Instant,
    to: Instant,
}

impl TryFrom<RawValidity> for Validity {
    type Error = TypeError;

    fn try_from(raw: RawValidity) -> TypeResult<Self> {
        Self::new(raw.from, raw.to)
    }
}

impl Validity {
    /// Create a validity window; `from` must be strictly before `to`.
    pub fn new(from: Instant, to: Instant) -> TypeResult<Self> {
        if from >= to {
            return Err(TypeError::EmptyValidity {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(Self { from, to })
    }

    /// An open-ended window starting at `from`.
    pub fn starting(from: Instant) -> TypeResult<Self> {
        Self::new(from, Instant::PositiveInfinity)
    }

    /// Returns `true` if `t` lies inside `[from, to)`.
    pub fn contains(&self, t: Instant) -> bool {
        self.from <= t && t < self.to
    }

    /// Returns `true` if the window has no finite end.
    pub fn is_open_ended(&self) -> bool {
        self.to.is_infinite()
    }

    /// Intersection with another window, `None` when they do not overlap.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let from = self.from.max(other.from);
        let to = self.to.min(other.to);
        (from < to).then_some(Self { from, to })
    }
}

impl fmt::Debug for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validity[{}, {})", self.from, self.to)
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> Instant {
        Instant::from_date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn infinity_sorts_last() {
        assert!(day(9999, 12, 31) < Instant::PositiveInfinity);
        assert!(day(2020, 1, 1) < day(2020, 1, 2));
    }

    #[test]
    fn parse_and_display() {
        let t: Instant = "2024-03-01".parse().unwrap();
        assert_eq!(t, day(2024, 3, 1));
        assert_eq!(t.to_string(), "2024-03-01T00:00:00Z");
        let inf: Instant = "infinity".parse().unwrap();
        assert!(inf.is_infinite());
        assert!("yesterday".parse::<Instant>().is_err());
    }

    #[test]
    fn serde_uses_text_form() {
        let json = serde_json::to_string(&Instant::PositiveInfinity).unwrap();
        assert_eq!(json, "\"infinity\"");
        let parsed: Instant = serde_json::from_str("\"2024-03-01T00:00:00Z\"").unwrap();
        assert_eq!(parsed, day(2024, 3, 1));
    }

    #[test]
    fn validity_rejects_empty_window() {
        assert!(Validity::new(day(2024, 1, 2), day(2024, 1, 1)).is_err());
        assert!(Validity::new(day(2024, 1, 1), day(2024, 1, 1)).is_err());
    }

    #[test]
    fn inverted_validity_does_not_deserialize() {
        let ok: Validity =
            serde_json::from_str(r#"{"from": "2024-01-01", "to": "infinity"}"#).unwrap();
        assert!(ok.is_open_ended());

        let inverted = serde_json::from_str::<Validity>(r#"{"from": "2024-02-01", "to": "2024-01-01"}"#);
        assert!(inverted.unwrap_err().to_string().contains("empty validity window"));
    }

    #[test]
    fn validity_contains_is_half_open() {
        let v = Validity::new(day(2024, 1, 1), day(2024, 2, 1)).unwrap();
        assert!(v.contains(day(2024, 1, 1)));
        assert!(v.contains(day(2024, 1, 31)));
        assert!(!v.contains(day(2024, 2, 1)));
    }

    #[test]
    fn validity_intersection() {
        let a = Validity::new(day(2024, 1, 1), day(2024, 3, 1)).unwrap();
        let b = Validity::starting(day(2024, 2, 1)).unwrap();
        let both = a.intersect(&b).unwrap();
        assert_eq!(both.from, day(2024, 2, 1));
        assert_eq!(both.to, day(2024, 3, 1));

        let c = Validity::new(day(2024, 3, 1), day(2024, 4, 1)).unwrap();
        assert!(a.intersect(&c).is_none());
    }
}
