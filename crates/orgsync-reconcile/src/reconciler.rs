//! Desired vs observed bundles to the minimal ordered operation list.
//!
//! The union of both bundles' endpoints cuts time into sub-intervals on
//! which every attribute of both sides is constant. Each sub-interval is
//! decided on its own, then adjacent actions with the same snapshot are
//! merged.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use orgsync_types::{EntityKey, Instant, Operation, UnitId, Validity};

use crate::bundle::TimelineBundle;
use crate::error::{ReconcileError, ReconcileResult};

/// Knobs that change what the reconciler writes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilePolicy {
    /// Placeholder unit used when a desired parent or employment unit is
    /// missing. Without it such spans are skipped.
    #[serde(default)]
    pub unknown_unit: Option<UnitId>,
}

/// A sub-interval the reconciler could not write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedSpan {
    pub validity: Validity,
    pub error: ReconcileError,
}

/// Result of reconciling one entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reconciliation {
    pub key: EntityKey,
    /// Ordered by effective start.
    pub actions: Vec<Operation>,
    pub skipped: Vec<SkippedSpan>,
}

impl Reconciliation {
    /// Returns `true` if the destination already matches.
    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Compute the operations that make `observed` equal `desired`.
///
/// Reconciling a bundle against itself yields no actions. A `Terminate`
/// ends everything from its instant onward, so after one is emitted the
/// observed side counts as absent for the rest of the run.
pub fn reconcile<B: TimelineBundle>(
    desired: &B,
    observed: &B,
    policy: &ReconcilePolicy,
) -> ReconcileResult<Reconciliation> {
    let key = desired.key();
    if key != observed.key() {
        return Err(ReconcileError::KeyMismatch {
            desired: key,
            observed: observed.key(),
        });
    }

    let mut points = desired.endpoints();
    points.extend(observed.endpoints());
    let points: Vec<Instant> = points.into_iter().collect();

    let mut actions = Vec::new();
    let mut skipped = Vec::new();
    let mut terminated_from: Option<Instant> = None;

    for pair in points.windows(2) {
        let span = Validity {
            from: pair[0],
            to: pair[1],
        };
        let start = span.from;
        let cleared = terminated_from.is_some();

        if !cleared && desired.equal_at(start, observed, policy) {
            continue;
        }

        let desired_active = desired.is_active_at(start);
        let observed_active = !cleared && observed.is_active_at(start);

        if !desired_active {
            if observed_active {
                debug!(key = %key, from = %start, "terminate");
                actions.push(Operation::Terminate {
                    key: key.clone(),
                    validity_end: start,
                });
                terminated_from = Some(start);
            }
            continue;
        }

        let snapshot = match desired.snapshot_at(start, policy) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(key = %key, window = %span, error = %error, "skipping span");
                skipped.push(SkippedSpan {
                    validity: span,
                    error,
                });
                continue;
            }
        };

        if observed_active {
            let changed = desired.changed_attributes_at(start, observed, policy);
            let validity = observed
                .active()
                .interval_at(start)
                .and_then(|iv| iv.validity().intersect(&span))
                .unwrap_or(span);
            debug!(key = %key, window = %validity, changed = ?changed, "update");
            actions.push(Operation::Update {
                key: key.clone(),
                changed,
                snapshot,
                validity,
            });
        } else {
            debug!(key = %key, window = %span, "add");
            actions.push(Operation::Add {
                key: key.clone(),
                snapshot,
                validity: span,
            });
        }
    }

    Ok(Reconciliation {
        key,
        actions: coalesce(actions),
        skipped,
    })
}

/// Merge touching adds or updates that carry the same snapshot.
fn coalesce(actions: Vec<Operation>) -> Vec<Operation> {
    let mut out: Vec<Operation> = Vec::with_capacity(actions.len());
    for op in actions {
        if let Some(last) = out.last_mut() {
            if extend(last, &op) {
                continue;
            }
        }
        out.push(op);
    }
    out
}

fn extend(last: &mut Operation, next: &Operation) -> bool {
    match (last, next) {
        (
            Operation::Add {
                snapshot: a,
                validity: va,
                ..
            },
            Operation::Add {
                snapshot: b,
                validity: vb,
                ..
            },
        ) if *a == *b && va.to == vb.from => {
            va.to = vb.to;
            true
        }
        (
            Operation::Update {
                snapshot: a,
                validity: va,
                changed: ca,
                ..
            },
            Operation::Update {
                snapshot: b,
                validity: vb,
                changed: cb,
                ..
            },
        ) if *a == *b && va.to == vb.from => {
            va.to = vb.to;
            for attr in cb {
                if !ca.contains(attr) {
                    ca.push(attr.clone());
                }
            }
            true
        }
        _ => false,
    }
}
