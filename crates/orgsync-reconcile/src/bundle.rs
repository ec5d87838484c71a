//! Entity timeline bundles: every attribute timeline of one entity.
//!
//! Each entity kind has a fixed struct of named timelines. All attribute
//! timelines are independent; nothing orders one against another.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use orgsync_timeline::{interval_endpoints, Endpoints, Timeline};
use orgsync_types::{
    EmploymentKey, EmploymentSnapshot, EntityKey, EntitySnapshot, Instant, Operation, UnitId,
    UnitSnapshot, Validity,
};

use crate::error::{ReconcileError, ReconcileResult};
use crate::reconciler::ReconcilePolicy;

/// The reconciler's view of an entity kind.
pub trait TimelineBundle {
    fn key(&self) -> EntityKey;

    fn active(&self) -> &Timeline<bool>;

    /// Decision points of every attribute timeline.
    fn endpoints(&self) -> BTreeSet<Instant>;

    /// Non-`active` attributes whose desired value at `t` differs from
    /// `observed`. Both sides absent counts as equal.
    fn changed_attributes_at(
        &self,
        t: Instant,
        observed: &Self,
        policy: &ReconcilePolicy,
    ) -> Vec<String>;

    /// Every desired attribute value at `t`, patched by `policy`.
    fn snapshot_at(&self, t: Instant, policy: &ReconcilePolicy) -> ReconcileResult<EntitySnapshot>;

    /// Apply an operation the way the destination stores it.
    fn apply(&mut self, op: &Operation, now: Instant) -> ReconcileResult<()>;

    /// Absent and `false` both mean inactive.
    fn is_active_at(&self, t: Instant) -> bool {
        self.active().entity_at(t).copied().unwrap_or(false)
    }

    /// `active` compared with the both-absent policy; when active, every
    /// other attribute compared too.
    fn equal_at(&self, t: Instant, observed: &Self, policy: &ReconcilePolicy) -> bool {
        self.active().equal_or_both_absent_at(t, observed.active())
            && (!self.is_active_at(t) || self.changed_attributes_at(t, observed, policy).is_empty())
    }
}

/// Desired vs observed presence of an attribute at `t`.
fn differs_at<T: PartialEq>(desired: Option<&T>, observed: &Timeline<T>, t: Instant) -> bool {
    match (desired, observed.interval_at(t)) {
        (Some(d), Some(o)) => d != o.value(),
        (None, None) => false,
        _ => true,
    }
}

fn check_key(mine: EntityKey, op: &Operation) -> ReconcileResult<()> {
    let theirs = op.key();
    if mine != theirs {
        return Err(ReconcileError::KeyMismatch {
            desired: theirs,
            observed: mine,
        });
    }
    Ok(())
}

/// Every attribute timeline of one organization unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitTimeline {
    pub id: UnitId,
    #[serde(default)]
    pub active: Timeline<bool>,
    #[serde(default)]
    pub name: Timeline<String>,
    #[serde(default)]
    pub parent: Timeline<UnitId>,
    #[serde(default)]
    pub level: Timeline<String>,
}

impl UnitTimeline {
    /// A unit with no history.
    pub fn empty(id: UnitId) -> Self {
        Self {
            id,
            active: Timeline::new(),
            name: Timeline::new(),
            parent: Timeline::new(),
            level: Timeline::new(),
        }
    }

    /// Take `observed`'s parent wherever it has one, keeping every other
    /// attribute. Used for units held out of retirement.
    pub fn hold_parent(&mut self, observed: &UnitTimeline) {
        for iv in observed.parent.iter() {
            self.parent = self.parent.paint(&iv.validity(), *iv.value());
        }
    }

    fn effective_parent(&self, t: Instant, policy: &ReconcilePolicy) -> Option<UnitId> {
        self.parent.entity_at(t).ok().copied().or(policy.unknown_unit)
    }

    fn paint(&mut self, window: &Validity, snapshot: &UnitSnapshot) {
        self.active = self.active.paint(window, true);
        self.name = self.name.paint(window, snapshot.name.clone());
        self.parent = self.parent.paint(window, snapshot.parent);
        self.level = match &snapshot.level {
            Some(level) => self.level.paint(window, level.clone()),
            None => self.level.erase(window),
        };
    }

    fn erase(&mut self, window: &Validity) {
        self.active = self.active.erase(window);
        self.name = self.name.erase(window);
        self.parent = self.parent.erase(window);
        self.level = self.level.erase(window);
    }
}

impl TimelineBundle for UnitTimeline {
    fn key(&self) -> EntityKey {
        EntityKey::unit(self.id)
    }

    fn active(&self) -> &Timeline<bool> {
        &self.active
    }

    fn endpoints(&self) -> BTreeSet<Instant> {
        interval_endpoints([
            &self.active as &dyn Endpoints,
            &self.name as &dyn Endpoints,
            &self.parent as &dyn Endpoints,
            &self.level as &dyn Endpoints,
        ])
    }

    fn changed_attributes_at(
        &self,
        t: Instant,
        observed: &Self,
        policy: &ReconcilePolicy,
    ) -> Vec<String> {
        let mut changed = Vec::new();
        if differs_at(self.name.entity_at(t).ok(), &observed.name, t) {
            changed.push("name".to_string());
        }
        if differs_at(self.effective_parent(t, policy).as_ref(), &observed.parent, t) {
            changed.push("parent".to_string());
        }
        if differs_at(self.level.entity_at(t).ok(), &observed.level, t) {
            changed.push("level".to_string());
        }
        changed
    }

    fn snapshot_at(&self, t: Instant, policy: &ReconcilePolicy) -> ReconcileResult<EntitySnapshot> {
        let missing = |attribute| ReconcileError::MissingRequiredAttribute {
            key: self.key(),
            attribute,
            at: t,
        };
        let name = self.name.entity_at(t).map_err(|_| missing("name"))?;
        let parent = self.effective_parent(t, policy).ok_or_else(|| missing("parent"))?;
        Ok(UnitSnapshot {
            name: name.clone(),
            parent,
            level: self.level.entity_at(t).ok().cloned(),
        }
        .into())
    }

    fn apply(&mut self, op: &Operation, now: Instant) -> ReconcileResult<()> {
        check_key(self.key(), op)?;
        match op {
            Operation::Add {
                snapshot: EntitySnapshot::Unit(snapshot),
                validity,
                ..
            }
            | Operation::Update {
                snapshot: EntitySnapshot::Unit(snapshot),
                validity,
                ..
            } => self.paint(validity, snapshot),
            Operation::Terminate { validity_end, .. } => {
                if let Ok(rest) = Validity::starting(*validity_end) {
                    self.erase(&rest);
                }
            }
            Operation::Retire { new_parent, .. } => {
                if let Ok(rest) = Validity::starting(now) {
                    let covered = self.active.clip(&rest);
                    for iv in covered.iter().filter(|iv| *iv.value()) {
                        self.parent = self.parent.paint(&iv.validity(), *new_parent);
                    }
                }
            }
            other => {
                return Err(ReconcileError::UnsupportedOperation {
                    key: self.key(),
                    operation: other.label(),
                })
            }
        }
        Ok(())
    }
}

/// Every attribute timeline of one employment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmploymentTimeline {
    pub key: EmploymentKey,
    #[serde(default)]
    pub active: Timeline<bool>,
    #[serde(default)]
    pub unit_id: Timeline<UnitId>,
    #[serde(default)]
    pub job_function: Timeline<String>,
}

impl EmploymentTimeline {
    /// An employment with no history.
    pub fn empty(key: EmploymentKey) -> Self {
        Self {
            key,
            active: Timeline::new(),
            unit_id: Timeline::new(),
            job_function: Timeline::new(),
        }
    }

    fn effective_unit(&self, t: Instant, policy: &ReconcilePolicy) -> Option<UnitId> {
        self.unit_id.entity_at(t).ok().copied().or(policy.unknown_unit)
    }

    /// Returns `true` if the employment is active at `t` or any time after.
    pub fn is_live_from(&self, t: Instant) -> bool {
        self.active.iter().any(|iv| *iv.value() && iv.end() > t)
    }

    /// Units the employment is placed in at `t` or later.
    pub fn live_units_from(&self, t: Instant) -> BTreeSet<UnitId> {
        let Ok(rest) = Validity::starting(t) else {
            return BTreeSet::new();
        };
        let active = self.active.clip(&rest);
        self.unit_id
            .clip(&rest)
            .iter()
            .filter(|iv| {
                active
                    .iter()
                    .any(|a| *a.value() && a.validity().intersect(&iv.validity()).is_some())
            })
            .map(|iv| *iv.value())
            .collect()
    }
}

impl TimelineBundle for EmploymentTimeline {
    fn key(&self) -> EntityKey {
        EntityKey::Employment(self.key.clone())
    }

    fn active(&self) -> &Timeline<bool> {
        &self.active
    }

    fn endpoints(&self) -> BTreeSet<Instant> {
        interval_endpoints([
            &self.active as &dyn Endpoints,
            &self.unit_id as &dyn Endpoints,
            &self.job_function as &dyn Endpoints,
        ])
    }

    fn changed_attributes_at(
        &self,
        t: Instant,
        observed: &Self,
        policy: &ReconcilePolicy,
    ) -> Vec<String> {
        let mut changed = Vec::new();
        if differs_at(self.effective_unit(t, policy).as_ref(), &observed.unit_id, t) {
            changed.push("unit_id".to_string());
        }
        if differs_at(self.job_function.entity_at(t).ok(), &observed.job_function, t) {
            changed.push("job_function".to_string());
        }
        changed
    }

    fn snapshot_at(&self, t: Instant, policy: &ReconcilePolicy) -> ReconcileResult<EntitySnapshot> {
        let missing = |attribute| ReconcileError::MissingRequiredAttribute {
            key: self.key(),
            attribute,
            at: t,
        };
        let unit_id = self.effective_unit(t, policy).ok_or_else(|| missing("unit_id"))?;
        let job_function = self
            .job_function
            .entity_at(t)
            .map_err(|_| missing("job_function"))?;
        Ok(EmploymentSnapshot {
            unit_id,
            job_function: job_function.clone(),
        }
        .into())
    }

    fn apply(&mut self, op: &Operation, _now: Instant) -> ReconcileResult<()> {
        check_key(self.key(), op)?;
        match op {
            Operation::Add {
                snapshot: EntitySnapshot::Employment(snapshot),
                validity,
                ..
            }
            | Operation::Update {
                snapshot: EntitySnapshot::Employment(snapshot),
                validity,
                ..
            } => {
                self.active = self.active.paint(validity, true);
                self.unit_id = self.unit_id.paint(validity, snapshot.unit_id);
                self.job_function = self.job_function.paint(validity, snapshot.job_function.clone());
            }
            Operation::Terminate { validity_end, .. } => {
                if let Ok(rest) = Validity::starting(*validity_end) {
                    self.active = self.active.erase(&rest);
                    self.unit_id = self.unit_id.erase(&rest);
                    self.job_function = self.job_function.erase(&rest);
                }
            }
            other => {
                return Err(ReconcileError::UnsupportedOperation {
                    key: self.key(),
                    operation: other.label(),
                })
            }
        }
        Ok(())
    }
}
