//! Error types for the reconcile crate.

use orgsync_timeline::TimelineError;
use orgsync_types::{EntityKey, Instant};

/// Errors produced while reconciling an entity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    /// The desired entity lacks an attribute it cannot be written without.
    #[error("{key}: missing required attribute `{attribute}` at {at}")]
    MissingRequiredAttribute {
        key: EntityKey,
        attribute: &'static str,
        at: Instant,
    },

    /// Desired and observed bundles describe different entities.
    #[error("bundle key mismatch: desired {desired}, observed {observed}")]
    KeyMismatch {
        desired: EntityKey,
        observed: EntityKey,
    },

    /// An operation cannot be applied to this kind of bundle.
    #[error("{key}: cannot apply {operation} operation")]
    UnsupportedOperation {
        key: EntityKey,
        operation: &'static str,
    },

    /// Malformed timeline input.
    #[error("timeline error: {0}")]
    Timeline(#[from] TimelineError),
}

/// Convenience alias for reconcile results.
pub type ReconcileResult<T> = Result<T, ReconcileError>;
