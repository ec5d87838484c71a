//! Half-open interval timelines for orgsync.
//!
//! Represents any attribute's value over time and provides the algebra the
//! reconciler works with.
//!
//! # Key Types
//!
//! - [`Interval`] -- One value valid on `[start, end)`
//! - [`Timeline`] -- Canonical sorted, non-overlapping, pre-merged intervals
//! - [`combine_intervals`] -- Normalize an arbitrary interval list
//! - [`dates`] -- Inclusive whole-day ranges to half-open instants and back

pub mod dates;
pub mod error;
pub mod interval;
pub mod timeline;

pub use dates::{
    date_to_instant, inclusive_end_to_instant, instant_to_inclusive_end,
    source_range_to_validity, validity_to_date_range,
};
pub use error::{TimelineError, TimelineResult};
pub use interval::Interval;
pub use timeline::{combine_intervals, interval_endpoints, Endpoints, Timeline};
