//! Foundation types for orgsync.
//!
//! Every other orgsync crate depends on `orgsync-types`.
//!
//! # Key Types
//!
//! - [`Instant`] -- Continuous point in time with a positive-infinity sentinel
//! - [`Validity`] -- Half-open `[from, to)` window
//! - [`UnitId`] / [`EmploymentKey`] / [`EntityKey`] -- Stable entity keys
//! - [`Operation`] -- Corrective action against the destination system

pub mod error;
pub mod identity;
pub mod operation;
pub mod temporal;

pub use error::{TypeError, TypeResult};
pub use identity::{EmploymentKey, EntityKey, UnitId};
pub use operation::{EmploymentSnapshot, EntitySnapshot, Operation, UnitSnapshot};
pub use temporal::{Instant, Validity};
