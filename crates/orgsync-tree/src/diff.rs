//! Source vs destination tree diff.
//!
//! Emits `Add` for units the destination lacks, `Update` for units whose
//! parent or name changed, and `Retire` for units that should move into the
//! obsolete branch. Units are never removed: absence from the source never
//! deletes destination data.

use std::collections::HashSet;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use orgsync_types::{EntityKey, Instant, Operation, UnitId, UnitSnapshot, Validity};

use crate::engagement::SubtreeEngagementCheck;
use crate::error::{TreeError, TreeResult};
use crate::node::{Forest, TreeNode};

/// Policy knobs for the diff.
#[derive(Clone, Debug)]
pub struct TreeDiffPolicy {
    /// Roots of the obsolete branches in the destination.
    pub obsolete_roots: HashSet<UnitId>,
    /// Where destination-only units are retired to.
    pub obsolete_root: UnitId,
    /// Destination levels the sync manages (eligible for retirement).
    pub managed_level: Regex,
    /// Updates take effect from this instant.
    pub as_of: Instant,
}

impl TreeDiffPolicy {
    /// Returns `true` if `level` is a managed destination level.
    pub fn is_managed(&self, level: &str) -> bool {
        self.managed_level.is_match(level)
    }
}

/// A unit kept out of retirement because its subtree holds a live
/// engagement. Needs manual attention.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ManualAlert {
    pub unit: UnitId,
    pub name: String,
    /// The parent the unit would have been moved under.
    pub intended_parent: UnitId,
}

/// A node the diff could not classify.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeFailure {
    pub unit: UnitId,
    pub error: TreeError,
}

/// The result of comparing a source forest with a destination forest.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TreeDiff {
    /// Adds (parents first), then updates, then retirements.
    pub operations: Vec<Operation>,
    /// Retirement candidates protected by live engagements.
    pub alerts: Vec<ManualAlert>,
    /// Nodes skipped because they could not be classified.
    pub failures: Vec<NodeFailure>,
}

impl TreeDiff {
    /// Returns `true` if there is nothing to do and nothing to report.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.alerts.is_empty() && self.failures.is_empty()
    }

    pub fn additions(&self) -> usize {
        self.count(|op| matches!(op, Operation::Add { .. }))
    }

    pub fn updates(&self) -> usize {
        self.count(|op| matches!(op, Operation::Update { .. }))
    }

    pub fn retirements(&self) -> usize {
        self.count(|op| matches!(op, Operation::Retire { .. }))
    }

    /// Units touched by `Add` or `Update`, in emission order.
    pub fn structural_units(&self) -> Vec<UnitId> {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Add { .. } | Operation::Update { .. }))
            .filter_map(|op| op.key().as_unit())
            .collect()
    }

    fn count(&self, pred: impl Fn(&Operation) -> bool) -> usize {
        self.operations.iter().filter(|op| pred(op)).count()
    }

    fn fail(&mut self, unit: UnitId, error: TreeError) {
        warn!(unit = %unit, error = %error, "tree node skipped");
        self.failures.push(NodeFailure { unit, error });
    }
}

/// A unit headed for the obsolete branch, pending the engagement check.
struct Candidate {
    unit: UnitId,
    name: String,
    new_parent: UnitId,
    depth: usize,
}

/// Compare `source` against `destination`.
///
/// `live` holds the destination units with a current or future engagement.
/// Per-node classification problems are collected in
/// [`TreeDiff::failures`]; they never abort the diff.
pub fn diff_forests(
    source: &Forest,
    destination: &Forest,
    live: &HashSet<UnitId>,
    policy: &TreeDiffPolicy,
) -> TreeDiff {
    let mut diff = TreeDiff::default();
    let mut candidates = Vec::new();

    collect_additions(source, destination, &mut diff);
    collect_updates(source, destination, policy, &mut diff, &mut candidates);
    collect_destination_only(source, destination, policy, &mut diff, &mut candidates);
    resolve_candidates(destination, live, candidates, &mut diff);

    info!(
        adds = diff.additions(),
        updates = diff.updates(),
        retirements = diff.retirements(),
        alerts = diff.alerts.len(),
        failures = diff.failures.len(),
        "tree diff complete"
    );
    diff
}

fn snapshot(node: &TreeNode) -> TreeResult<UnitSnapshot> {
    Ok(UnitSnapshot {
        name: node.name.clone(),
        parent: node.parent_id.ok_or(TreeError::Unparented(node.id))?,
        level: node.level.clone(),
    })
}

fn collect_additions(source: &Forest, destination: &Forest, diff: &mut TreeDiff) {
    let mut missing = Vec::new();
    for node in source.nodes().filter(|n| !destination.contains(n.id)) {
        match source.depth(node.id) {
            Ok(depth) => missing.push((depth, node)),
            Err(e) => diff.fail(node.id, e),
        }
    }
    // Parents before children.
    missing.sort_by_key(|(depth, node)| (*depth, node.id));

    for (_, node) in missing {
        match snapshot(node) {
            Ok(snapshot) => {
                debug!(unit = %node.id, name = %node.name, "unit missing in destination");
                diff.operations.push(Operation::Add {
                    key: EntityKey::unit(node.id),
                    snapshot: snapshot.into(),
                    validity: node.validity,
                });
            }
            Err(e) => diff.fail(node.id, e),
        }
    }
}

fn collect_updates(
    source: &Forest,
    destination: &Forest,
    policy: &TreeDiffPolicy,
    diff: &mut TreeDiff,
    candidates: &mut Vec<Candidate>,
) {
    for src in source.nodes() {
        let Some(dst) = destination.get(src.id) else {
            continue;
        };
        let mut changed = Vec::new();
        if src.parent_id != dst.parent_id {
            changed.push("parent".to_string());
        }
        if src.name != dst.name {
            changed.push("name".to_string());
        }
        if changed.is_empty() {
            continue;
        }

        let buried_in_source = match source.has_ancestor_in(src.id, &policy.obsolete_roots) {
            Ok(v) => v,
            Err(e) => {
                diff.fail(src.id, e);
                continue;
            }
        };
        let already_obsolete = match destination.has_ancestor_in(dst.id, &policy.obsolete_roots) {
            Ok(v) => v,
            Err(e) => {
                diff.fail(src.id, e);
                continue;
            }
        };

        if buried_in_source && !already_obsolete {
            let (Some(new_parent), Ok(depth)) = (src.parent_id, destination.depth(dst.id)) else {
                diff.fail(src.id, TreeError::Unparented(src.id));
                continue;
            };
            candidates.push(Candidate {
                unit: src.id,
                name: dst.name.clone(),
                new_parent,
                depth,
            });

            // The move waits for the engagement check; other changes do not.
            changed.retain(|attr| attr != "parent");
            if changed.is_empty() {
                continue;
            }
            let Some(parent) = dst.parent_id else {
                diff.fail(src.id, TreeError::Unparented(src.id));
                continue;
            };
            let snapshot = UnitSnapshot {
                name: src.name.clone(),
                parent,
                level: src.level.clone(),
            };
            push_update(diff, policy, src, changed, snapshot);
            continue;
        }

        match snapshot(src) {
            Ok(snapshot) => push_update(diff, policy, src, changed, snapshot),
            Err(e) => diff.fail(src.id, e),
        }
    }
}

fn push_update(
    diff: &mut TreeDiff,
    policy: &TreeDiffPolicy,
    src: &TreeNode,
    changed: Vec<String>,
    snapshot: UnitSnapshot,
) {
    let from = policy.as_of.max(src.validity.from);
    let Ok(validity) = Validity::new(from, src.validity.to) else {
        debug!(unit = %src.id, "source unit ended before diff instant; no update");
        return;
    };
    diff.operations.push(Operation::Update {
        key: EntityKey::unit(src.id),
        changed,
        snapshot: snapshot.into(),
        validity,
    });
}

fn collect_destination_only(
    source: &Forest,
    destination: &Forest,
    policy: &TreeDiffPolicy,
    diff: &mut TreeDiff,
    candidates: &mut Vec<Candidate>,
) {
    for dst in destination.nodes().filter(|n| !source.contains(n.id)) {
        if policy.obsolete_roots.contains(&dst.id) {
            continue;
        }
        let ancestors = match destination.ancestors(dst.id) {
            Ok(a) => a,
            Err(e) => {
                diff.fail(dst.id, e);
                continue;
            }
        };
        if ancestors.iter().any(|a| policy.obsolete_roots.contains(a)) {
            continue;
        }
        let Some(level) = dst.level.as_deref() else {
            diff.fail(dst.id, TreeError::UnknownLevel(dst.id));
            continue;
        };
        if !policy.is_managed(level) {
            continue;
        }
        candidates.push(Candidate {
            unit: dst.id,
            name: dst.name.clone(),
            new_parent: policy.obsolete_root,
            depth: ancestors.len(),
        });
    }
}

fn resolve_candidates(
    destination: &Forest,
    live: &HashSet<UnitId>,
    mut candidates: Vec<Candidate>,
    diff: &mut TreeDiff,
) {
    // Top-down, so a retired ancestor carries its descendants along.
    candidates.sort_by_key(|c| (c.depth, c.unit));

    let mut check = SubtreeEngagementCheck::new(destination, live);
    let mut retired: HashSet<UnitId> = HashSet::new();

    for candidate in candidates {
        let moves_with_ancestor = destination
            .ancestors(candidate.unit)
            .map(|chain| chain.iter().any(|a| retired.contains(a)))
            .unwrap_or(false);
        if moves_with_ancestor {
            debug!(unit = %candidate.unit, "retired together with an ancestor");
            continue;
        }

        if check.subtree_has_live_engagement(candidate.unit) {
            warn!(
                unit = %candidate.unit,
                name = %candidate.name,
                "live engagement below unit; not retiring"
            );
            diff.alerts.push(ManualAlert {
                unit: candidate.unit,
                name: candidate.name,
                intended_parent: candidate.new_parent,
            });
            continue;
        }

        retired.insert(candidate.unit);
        diff.operations.push(Operation::Retire {
            unit: candidate.unit,
            new_parent: candidate.new_parent,
        });
    }
}
