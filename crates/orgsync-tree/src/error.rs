//! Error types for the tree crate.

use orgsync_types::UnitId;

/// Errors produced while building forests or classifying nodes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// A destination node used in the managed-level test carries no level.
    #[error("unit {0} has no org unit level; cannot decide whether it is managed")]
    UnknownLevel(UnitId),

    /// The same node appears twice with different parents.
    #[error("unit {unit} listed with conflicting parents {first:?} and {second:?}")]
    ConflictingParent {
        unit: UnitId,
        first: Option<UnitId>,
        second: Option<UnitId>,
    },

    /// Following parent pointers revisits a node.
    #[error("parent chain of unit {0} contains a cycle")]
    Cycle(UnitId),

    /// The node is not part of the forest.
    #[error("unit {0} not found in tree")]
    UnknownNode(UnitId),

    /// A node without a parent cannot be created or moved.
    #[error("unit {0} has no parent in the source tree")]
    Unparented(UnitId),
}

/// Convenience alias for tree results.
pub type TreeResult<T> = Result<T, TreeError>;
