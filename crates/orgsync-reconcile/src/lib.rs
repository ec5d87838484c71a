//! Interval reconciliation for orgsync.
//!
//! Compares a desired (source) and observed (destination) timeline bundle
//! for one entity and produces the minimal ordered list of operations that
//! makes the destination match.
//!
//! # Key Types
//!
//! - [`TimelineBundle`] -- Every attribute timeline of one entity
//! - [`UnitTimeline`] / [`EmploymentTimeline`] -- The two entity kinds
//! - [`reconcile`] -- Desired vs observed to operations
//! - [`Reconciliation`] -- Actions plus spans that could not be written

pub mod bundle;
pub mod error;
pub mod reconciler;

pub use bundle::{EmploymentTimeline, TimelineBundle, UnitTimeline};
pub use error::{ReconcileError, ReconcileResult};
pub use reconciler::{reconcile, ReconcilePolicy, Reconciliation, SkippedSpan};
