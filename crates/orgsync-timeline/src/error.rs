//! Error types for the timeline crate.

use chrono::NaiveDate;
use orgsync_types::Instant;

/// Errors produced by timeline construction and queries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimelineError {
    /// Two intervals of the same timeline overlap.
    #[error("overlapping intervals: next interval starts at {next_start} before previous ends at {previous_end}")]
    Overlap {
        previous_end: Instant,
        next_start: Instant,
    },

    /// The queried instant is not covered by any interval.
    #[error("no value at {at}")]
    NoValue { at: Instant },

    /// An interval whose start is not strictly before its end.
    #[error("invalid interval: start {start} is not before end {end}")]
    InvalidInterval { start: Instant, end: Instant },

    /// A calendar date that cannot be shifted by one day.
    #[error("date out of range: {0}")]
    DateOutOfRange(NaiveDate),
}

/// Convenience alias for timeline results.
pub type TimelineResult<T> = Result<T, TimelineError>;
