//! Organization trees for orgsync.
//!
//! Holds units in an id-keyed arena and compares a source forest against a
//! destination forest, producing structural operations.
//!
//! # Key Types
//!
//! - [`Forest`] / [`TreeNode`] -- Arena of units with explicit parent ids
//! - [`diff_forests`] / [`TreeDiff`] -- Add / Update / Retire operations plus alerts
//! - [`SubtreeEngagementCheck`] -- Memoized live-engagement protection

pub mod diff;
pub mod engagement;
pub mod error;
pub mod node;

pub use diff::{diff_forests, ManualAlert, NodeFailure, TreeDiff, TreeDiffPolicy};
pub use engagement::SubtreeEngagementCheck;
pub use error::{TreeError, TreeResult};
pub use node::{Forest, TreeNode};
