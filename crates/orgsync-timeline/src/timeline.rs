//! Canonical half-open interval timelines.
//!
//! A [`Timeline`] is sorted by start, never overlaps, and never holds two
//! touching intervals with equal values. Every operation returns a new
//! timeline in that canonical form.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use orgsync_types::{Instant, Validity};

use crate::error::{TimelineError, TimelineResult};
use crate::interval::Interval;

/// The value of one attribute over time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timeline<T> {
    intervals: Vec<Interval<T>>,
}

impl<T> Default for Timeline<T> {
    fn default() -> Self {
        Self {
            intervals: Vec::new(),
        }
    }
}

/// Normalize an arbitrary interval list into a canonical timeline.
///
/// Sorts by start, rejects overlaps, and merges touching intervals that carry
/// equal values. Gaps are kept even between equal values.
pub fn combine_intervals<T: PartialEq>(
    intervals: impl IntoIterator<Item = Interval<T>>,
) -> TimelineResult<Timeline<T>> {
    let mut sorted: Vec<Interval<T>> = intervals.into_iter().collect();
    sorted.sort_by_key(|iv| iv.start());

    for pair in sorted.windows(2) {
        if pair[1].start() < pair[0].end() {
            return Err(TimelineError::Overlap {
                previous_end: pair[0].end(),
                next_start: pair[1].start(),
            });
        }
    }

    Ok(Timeline {
        intervals: merge_touching(sorted),
    })
}

/// Merge touching equal-value neighbours of a sorted, non-overlapping list.
fn merge_touching<T: PartialEq>(sorted: Vec<Interval<T>>) -> Vec<Interval<T>> {
    let mut merged: Vec<Interval<T>> = Vec::with_capacity(sorted.len());
    for next in sorted {
        match merged.last_mut() {
            Some(last) if last.end() == next.start() && last.value() == next.value() => {
                *last = Interval::over(
                    Validity {
                        from: last.start(),
                        to: next.end(),
                    },
                    next.into_value(),
                );
            }
            _ => merged.push(next),
        }
    }
    merged
}

impl<T> Timeline<T> {
    /// An empty timeline: no historical data.
    pub fn new() -> Self {
        Self::default()
    }

    /// A timeline holding one value over `[start, end)`.
    pub fn single(start: Instant, end: Instant, value: T) -> TimelineResult<Self> {
        Ok(Self {
            intervals: vec![Interval::new(start, end, value)?],
        })
    }

    pub fn intervals(&self) -> &[Interval<T>] {
        &self.intervals
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Interval<T>> {
        self.intervals.iter()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// The interval covering `t`, if any.
    pub fn interval_at(&self, t: Instant) -> Option<&Interval<T>> {
        let idx = self.intervals.partition_point(|iv| iv.start() <= t);
        let candidate = self.intervals.get(idx.checked_sub(1)?)?;
        candidate.contains(t).then_some(candidate)
    }

    /// The value valid at `t`.
    ///
    /// Fails with [`TimelineError::NoValue`] inside a gap or outside all
    /// coverage.
    pub fn entity_at(&self, t: Instant) -> TimelineResult<&T> {
        self.interval_at(t)
            .map(Interval::value)
            .ok_or(TimelineError::NoValue { at: t })
    }

    /// Returns `true` iff some interval covers `t`.
    pub fn has_value(&self, t: Instant) -> bool {
        self.interval_at(t).is_some()
    }

    /// Every interval start and end.
    pub fn get_interval_endpoints(&self) -> BTreeSet<Instant> {
        self.intervals
            .iter()
            .flat_map(|iv| [iv.start(), iv.end()])
            .collect()
    }

    /// First start and last end, `None` for an empty timeline.
    pub fn coverage(&self) -> Option<Validity> {
        let first = self.intervals.first()?;
        let last = self.intervals.last()?;
        Some(Validity {
            from: first.start(),
            to: last.end(),
        })
    }

    /// Compare the values of two timelines at `t`.
    ///
    /// The comparison is undefined when either side has no value at `t`, and
    /// fails with [`TimelineError::NoValue`]; check [`has_value`](Self::has_value)
    /// first.
    pub fn equal_at(&self, t: Instant, other: &Self) -> TimelineResult<bool>
    where
        T: PartialEq,
    {
        Ok(self.entity_at(t)? == other.entity_at(t)?)
    }

    /// Compare at `t`, treating "both uncovered" as equal.
    ///
    /// Only meaningful for attributes where absence is itself a state, such
    /// as `active`.
    pub fn equal_or_both_absent_at(&self, t: Instant, other: &Self) -> bool
    where
        T: PartialEq,
    {
        match (self.interval_at(t), other.interval_at(t)) {
            (None, None) => true,
            (Some(a), Some(b)) => a.value() == b.value(),
            _ => false,
        }
    }

    /// Restrict the timeline to `window`.
    pub fn clip(&self, window: &Validity) -> Self
    where
        T: Clone,
    {
        Self {
            intervals: self
                .intervals
                .iter()
                .filter_map(|iv| iv.clipped(window))
                .collect(),
        }
    }

    /// Remove all coverage inside `window`.
    pub fn erase(&self, window: &Validity) -> Self
    where
        T: Clone,
    {
        let mut kept = Vec::with_capacity(self.intervals.len() + 1);
        for iv in &self.intervals {
            if iv.validity().intersect(window).is_none() {
                kept.push(iv.clone());
                continue;
            }
            if iv.start() < window.from {
                kept.push(Interval::over(
                    Validity {
                        from: iv.start(),
                        to: window.from,
                    },
                    iv.value().clone(),
                ));
            }
            if window.to < iv.end() {
                kept.push(Interval::over(
                    Validity {
                        from: window.to,
                        to: iv.end(),
                    },
                    iv.value().clone(),
                ));
            }
        }
        Self { intervals: kept }
    }

    /// Set `value` over `window`, replacing whatever was there.
    pub fn paint(&self, window: &Validity, value: T) -> Self
    where
        T: Clone + PartialEq,
    {
        let mut intervals = self.erase(window).intervals;
        intervals.push(Interval::over(*window, value));
        intervals.sort_by_key(|iv| iv.start());
        Self {
            intervals: merge_touching(intervals),
        }
    }
}

impl<T> IntoIterator for Timeline<T> {
    type Item = Interval<T>;
    type IntoIter = std::vec::IntoIter<Interval<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.intervals.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Timeline<T> {
    type Item = &'a Interval<T>;
    type IntoIter = std::slice::Iter<'a, Interval<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.intervals.iter()
    }
}

/// Anything that contributes decision points to a reconciliation.
pub trait Endpoints {
    fn endpoints(&self) -> BTreeSet<Instant>;
}

impl<T> Endpoints for Timeline<T> {
    fn endpoints(&self) -> BTreeSet<Instant> {
        self.get_interval_endpoints()
    }
}

/// Union of the endpoints of several timelines, whatever their value types.
pub fn interval_endpoints<'a>(
    timelines: impl IntoIterator<Item = &'a dyn Endpoints>,
) -> BTreeSet<Instant> {
    timelines
        .into_iter()
        .flat_map(|tl| tl.endpoints())
        .collect()
}

impl<T: Serialize> Serialize for Timeline<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.intervals.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de> + PartialEq> Deserialize<'de> for Timeline<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let intervals = Vec::<Interval<T>>::deserialize(deserializer)?;
        combine_intervals(intervals).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    const INF: Instant = Instant::PositiveInfinity;

    fn t(d: u32) -> Instant {
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        Instant::from_date(base + chrono::Days::new(u64::from(d)))
    }

    fn iv<T>(start: Instant, end: Instant, value: T) -> Interval<T> {
        Interval::new(start, end, value).unwrap()
    }

    fn window(from: Instant, to: Instant) -> Validity {
        Validity::new(from, to).unwrap()
    }

    #[test]
    fn merges_touching_equal_values() {
        let tl = combine_intervals([iv(t(1), t(2), "v"), iv(t(2), t(3), "v")]).unwrap();
        assert_eq!(tl.intervals(), &[iv(t(1), t(3), "v")]);
    }

    #[test]
    fn keeps_touching_different_values() {
        let tl = combine_intervals([iv(t(1), t(2), "v1"), iv(t(2), t(3), "v2")]).unwrap();
        assert_eq!(tl.len(), 2);
    }

    #[test]
    fn rejects_overlap() {
        let err = combine_intervals([iv(t(1), t(3), "v"), iv(t(2), t(4), "v")]).unwrap_err();
        assert_eq!(
            err,
            TimelineError::Overlap {
                previous_end: t(3),
                next_start: t(2)
            }
        );
    }

    #[test]
    fn gap_is_never_bridged() {
        let tl = combine_intervals([iv(t(1), t(2), "v"), iv(t(3), t(4), "v")]).unwrap();
        assert_eq!(tl.len(), 2);
    }

    #[test]
    fn sorts_unordered_input() {
        let tl = combine_intervals([iv(t(5), INF, 2), iv(t(1), t(5), 1)]).unwrap();
        assert_eq!(tl.intervals()[0].start(), t(1));
        assert_eq!(tl.coverage(), Some(window(t(1), INF)));
    }

    #[test]
    fn entity_at_contract() {
        let tl = combine_intervals([iv(t(1), t(2), "a"), iv(t(3), t(4), "b")]).unwrap();
        assert_eq!(*tl.entity_at(t(1)).unwrap(), "a");
        assert_eq!(*tl.entity_at(t(3)).unwrap(), "b");
        // gap
        assert_eq!(tl.entity_at(t(2)), Err(TimelineError::NoValue { at: t(2) }));
        // before and after all coverage
        assert!(tl.entity_at(Instant::from_date(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap())).is_err());
        assert!(tl.entity_at(t(4)).is_err());
        assert!(tl.entity_at(INF).is_err());
        assert!(!tl.has_value(t(2)));
        assert!(tl.has_value(t(1)));
    }

    #[test]
    fn empty_timeline_has_no_values() {
        let tl: Timeline<bool> = Timeline::new();
        assert!(tl.is_empty());
        assert!(!tl.has_value(t(1)));
        assert!(tl.get_interval_endpoints().is_empty());
        assert!(tl.coverage().is_none());
    }

    #[test]
    fn equal_at_requires_both_sides() {
        let a = Timeline::single(t(1), t(3), "x").unwrap();
        let b = combine_intervals([iv(t(1), t(2), "x"), iv(t(2), t(3), "y")]).unwrap();
        assert_eq!(a.equal_at(t(1), &b), Ok(true));
        assert_eq!(a.equal_at(t(2), &b), Ok(false));
        assert!(a.equal_at(t(5), &b).is_err());
    }

    #[test]
    fn both_absent_counts_as_equal_for_presence() {
        let a = Timeline::single(t(1), t(3), true).unwrap();
        let b = Timeline::single(t(1), t(2), true).unwrap();
        assert!(a.equal_or_both_absent_at(t(1), &b));
        assert!(!a.equal_or_both_absent_at(t(2), &b));
        assert!(a.equal_or_both_absent_at(t(9), &b));
    }

    #[test]
    fn endpoints_union_across_value_types() {
        let active = Timeline::single(t(1), INF, true).unwrap();
        let name = combine_intervals([iv(t(1), t(2), "X".to_string()), iv(t(2), INF, "Y".to_string())]).unwrap();
        let all = interval_endpoints([&active as &dyn Endpoints, &name as &dyn Endpoints]);
        assert_eq!(all.into_iter().collect::<Vec<_>>(), vec![t(1), t(2), INF]);
    }

    #[test]
    fn clip_cuts_boundary_intervals() {
        let tl = combine_intervals([iv(t(1), t(4), 'a'), iv(t(4), INF, 'b')]).unwrap();
        let clipped = tl.clip(&window(t(2), t(6)));
        assert_eq!(clipped.intervals(), &[iv(t(2), t(4), 'a'), iv(t(4), t(6), 'b')]);
    }

    #[test]
    fn erase_splits_interval() {
        let tl = Timeline::single(t(1), INF, 1).unwrap();
        let erased = tl.erase(&window(t(3), t(5)));
        assert_eq!(erased.intervals(), &[iv(t(1), t(3), 1), iv(t(5), INF, 1)]);
        assert!(!erased.has_value(t(4)));
    }

    #[test]
    fn paint_overwrites_and_remerges() {
        let tl = combine_intervals([iv(t(1), t(3), 'x'), iv(t(3), t(6), 'y')]).unwrap();
        let painted = tl.paint(&window(t(3), t(6)), 'x');
        assert_eq!(painted.intervals(), &[iv(t(1), t(6), 'x')]);

        let extended = tl.paint(&window(t(8), INF), 'y');
        assert_eq!(extended.len(), 3);
        assert!(!extended.has_value(t(7)));
    }

    #[test]
    fn serde_rejects_overlapping_input() {
        let ok: Timeline<bool> = serde_json::from_str(
            r#"[{"start":"2024-01-01","end":"2024-01-02","value":true},
                {"start":"2024-01-02","end":"infinity","value":true}]"#,
        )
        .unwrap();
        assert_eq!(ok.len(), 1);

        let bad = serde_json::from_str::<Timeline<bool>>(
            r#"[{"start":"2024-01-01","end":"2024-01-03","value":true},
                {"start":"2024-01-02","end":"infinity","value":false}]"#,
        );
        assert!(bad.is_err());
    }

    fn arb_intervals() -> impl Strategy<Value = Vec<Interval<u8>>> {
        // Disjoint intervals built from sorted cut points, with small values so
        // touching equal neighbours are common.
        prop::collection::vec((1u32..4, 0u32..3, 0u8..3), 0..12).prop_map(|steps| {
            let mut cursor = 1u32;
            let mut out = Vec::new();
            for (len, gap, value) in steps {
                let start = cursor + gap;
                let end = start + len;
                out.push(iv(t(start), t(end), value));
                cursor = end;
            }
            out.reverse();
            out
        })
    }

    proptest! {
        #[test]
        fn prop_combine_is_canonical(intervals in arb_intervals()) {
            let tl = combine_intervals(intervals.clone()).unwrap();
            for pair in tl.intervals().windows(2) {
                prop_assert!(pair[0].end() <= pair[1].start());
                prop_assert!(!(pair[0].end() == pair[1].start() && pair[0].value() == pair[1].value()));
            }
            // Same value everywhere the input had one.
            for input in &intervals {
                prop_assert_eq!(tl.entity_at(input.start()).unwrap(), input.value());
            }
        }

        #[test]
        fn prop_combine_is_idempotent(intervals in arb_intervals()) {
            let once = combine_intervals(intervals).unwrap();
            let twice = combine_intervals(once.clone()).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
