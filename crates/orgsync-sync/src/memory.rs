//! In-memory source and destination systems backed by JSON fixtures.
//!
//! Used by tests, local dry runs, and the CLI. The destination stores
//! operations with the same timeline algebra the reconciler reasons with, so
//! a second sync against it converges to no work.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use orgsync_reconcile::{EmploymentTimeline, TimelineBundle, UnitTimeline};
use orgsync_tree::{Forest, TreeNode, TreeResult};
use orgsync_types::{EmploymentKey, EntityKey, Instant, Operation, UnitId};

use crate::adapter::{DestinationAdapter, SourceAdapter};
use crate::error::{SyncError, SyncResult};
use crate::status::RunStatus;

/// The org tree as it stands at `as_of`.
///
/// A unit is included if it is active at `as_of` or becomes active later;
/// its attributes are read where that active span begins. Units without a
/// name there are left out.
pub fn forest_at<'a>(
    units: impl IntoIterator<Item = &'a UnitTimeline>,
    as_of: Instant,
) -> TreeResult<Forest> {
    Forest::from_nodes(units.into_iter().filter_map(|unit| node_at(unit, as_of)))
}

fn node_at(unit: &UnitTimeline, as_of: Instant) -> Option<TreeNode> {
    let span = unit
        .active
        .iter()
        .find(|iv| *iv.value() && iv.end() > as_of)?;
    let at = span.start().max(as_of);
    let Ok(name) = unit.name.entity_at(at) else {
        warn!(unit = %unit.id, "unit without a name left out of tree");
        return None;
    };
    Some(TreeNode {
        id: unit.id,
        parent_id: unit.parent.entity_at(at).ok().copied(),
        name: name.clone(),
        level: unit.level.entity_at(at).ok().cloned(),
        validity: span.validity(),
    })
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFixture {
    pub institution: String,
    #[serde(default)]
    pub units: Vec<UnitTimeline>,
    #[serde(default)]
    pub employments: Vec<EmploymentTimeline>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationFixture {
    #[serde(default)]
    pub units: Vec<UnitTimeline>,
    #[serde(default)]
    pub employments: Vec<EmploymentTimeline>,
}

/// Both systems plus the run-status record, as one JSON document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFixture {
    pub source: SourceFixture,
    #[serde(default)]
    pub destination: DestinationFixture,
    /// Reference instant for trees and retirements; defaults to now.
    #[serde(default)]
    pub as_of: Option<Instant>,
    #[serde(default)]
    pub run_status: Option<RunStatus>,
}

impl SyncFixture {
    pub fn from_json_str(text: &str) -> SyncResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn as_of(&self) -> Instant {
        self.as_of.unwrap_or_else(Instant::now)
    }
}

/// Source system serving a fixed fixture.
pub struct InMemorySource {
    institution: String,
    as_of: Instant,
    units: HashMap<UnitId, UnitTimeline>,
    employments: BTreeMap<EmploymentKey, EmploymentTimeline>,
}

impl InMemorySource {
    pub fn new(fixture: SourceFixture, as_of: Instant) -> Self {
        Self {
            institution: fixture.institution,
            as_of,
            units: fixture.units.into_iter().map(|u| (u.id, u)).collect(),
            employments: fixture
                .employments
                .into_iter()
                .map(|e| (e.key.clone(), e))
                .collect(),
        }
    }
}

#[async_trait]
impl SourceAdapter for InMemorySource {
    async fn fetch_tree(&self, institution: &str) -> SyncResult<Forest> {
        if institution != self.institution {
            return Err(SyncError::NotFound(format!("institution {institution}")));
        }
        Ok(forest_at(self.units.values(), self.as_of)?)
    }

    async fn fetch_unit_timeline(&self, unit: UnitId) -> SyncResult<UnitTimeline> {
        self.units
            .get(&unit)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("unit {unit} in source")))
    }

    async fn fetch_employment_timeline(&self, key: &EmploymentKey) -> SyncResult<EmploymentTimeline> {
        self.employments
            .get(key)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("employment {key} in source")))
    }

    async fn list_employments(
        &self,
        institution: &str,
        cpr: Option<&str>,
    ) -> SyncResult<Vec<EmploymentKey>> {
        Ok(self
            .employments
            .keys()
            .filter(|k| k.institution == institution)
            .filter(|k| cpr.map_or(true, |cpr| k.cpr == cpr))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct DestinationState {
    units: HashMap<UnitId, UnitTimeline>,
    employments: HashMap<EmploymentKey, EmploymentTimeline>,
    engagement_ids: HashMap<EmploymentKey, Uuid>,
    /// Idempotency key → result id.
    applied: HashMap<Uuid, Uuid>,
    log: Vec<Operation>,
    rejected: HashSet<EntityKey>,
    transient_failures: u32,
    authentication_failed: bool,
}

/// Destination system that stores operations as timelines.
pub struct InMemoryDestination {
    as_of: Instant,
    state: RwLock<DestinationState>,
}

impl InMemoryDestination {
    pub fn new(fixture: DestinationFixture, as_of: Instant) -> Self {
        let state = DestinationState {
            units: fixture.units.into_iter().map(|u| (u.id, u)).collect(),
            employments: fixture
                .employments
                .into_iter()
                .map(|e| (e.key.clone(), e))
                .collect(),
            ..Default::default()
        };
        Self {
            as_of,
            state: RwLock::new(state),
        }
    }

    /// Reject every mutation for `key`.
    pub fn reject(&self, key: EntityKey) -> SyncResult<()> {
        self.write()?.rejected.insert(key);
        Ok(())
    }

    /// Fail the next `times` fetches with a transient error.
    pub fn fail_fetches(&self, times: u32) -> SyncResult<()> {
        self.write()?.transient_failures = times;
        Ok(())
    }

    /// Fail every call as unauthenticated.
    pub fn fail_authentication(&self) -> SyncResult<()> {
        self.write()?.authentication_failed = true;
        Ok(())
    }

    /// Operations applied so far, replays excluded.
    pub fn applied_operations(&self) -> SyncResult<Vec<Operation>> {
        Ok(self.read()?.log.clone())
    }

    pub fn unit(&self, id: UnitId) -> SyncResult<Option<UnitTimeline>> {
        Ok(self.read()?.units.get(&id).cloned())
    }

    pub fn employment(&self, key: &EmploymentKey) -> SyncResult<Option<EmploymentTimeline>> {
        Ok(self.read()?.employments.get(key).cloned())
    }

    /// Current contents, sorted by key.
    pub fn snapshot(&self) -> SyncResult<DestinationFixture> {
        let state = self.read()?;
        let mut units: Vec<_> = state.units.values().cloned().collect();
        units.sort_by_key(|u| u.id);
        let mut employments: Vec<_> = state.employments.values().cloned().collect();
        employments.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(DestinationFixture { units, employments })
    }

    fn read(&self) -> SyncResult<RwLockReadGuard<'_, DestinationState>> {
        self.state.read().map_err(|_| poisoned())
    }

    fn write(&self) -> SyncResult<RwLockWriteGuard<'_, DestinationState>> {
        self.state.write().map_err(|_| poisoned())
    }

    /// Shared failure injection for every fetch.
    fn check_fetch(&self) -> SyncResult<()> {
        let mut state = self.write()?;
        if state.authentication_failed {
            return Err(SyncError::Authentication("destination token rejected".into()));
        }
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(SyncError::TransientAdapter("destination unavailable".into()));
        }
        Ok(())
    }
}

fn poisoned() -> SyncError {
    SyncError::Adapter("destination state lock poisoned".into())
}

fn rejected(op: &Operation, reason: impl ToString) -> SyncError {
    SyncError::MutationRejected {
        operation: op.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl DestinationAdapter for InMemoryDestination {
    async fn fetch_tree(&self) -> SyncResult<Forest> {
        self.check_fetch()?;
        let state = self.read()?;
        Ok(forest_at(state.units.values(), self.as_of)?)
    }

    async fn fetch_unit_timeline(&self, unit: UnitId) -> SyncResult<UnitTimeline> {
        self.check_fetch()?;
        let state = self.read()?;
        Ok(state
            .units
            .get(&unit)
            .cloned()
            .unwrap_or_else(|| UnitTimeline::empty(unit)))
    }

    async fn fetch_employment_timeline(&self, key: &EmploymentKey) -> SyncResult<EmploymentTimeline> {
        self.check_fetch()?;
        let state = self.read()?;
        Ok(state
            .employments
            .get(key)
            .cloned()
            .unwrap_or_else(|| EmploymentTimeline::empty(key.clone())))
    }

    async fn live_engagement_units(&self, as_of: Instant) -> SyncResult<HashSet<UnitId>> {
        self.check_fetch()?;
        let state = self.read()?;
        Ok(state
            .employments
            .values()
            .flat_map(|e| e.live_units_from(as_of))
            .collect())
    }

    async fn apply(&self, op: &Operation, idempotency_key: Uuid) -> SyncResult<Uuid> {
        let mut state = self.write()?;
        if state.authentication_failed {
            return Err(SyncError::Authentication("destination token rejected".into()));
        }

        if let Some(id) = state.applied.get(&idempotency_key) {
            debug!(operation = %op, "replayed operation");
            return Ok(*id);
        }

        let key = op.key();
        if state.rejected.contains(&key) {
            return Err(rejected(op, "refused by destination"));
        }

        let id = match &key {
            EntityKey::Unit { id } => {
                if matches!(op, Operation::Retire { .. }) && !state.units.contains_key(id) {
                    return Err(rejected(op, "unknown unit"));
                }
                let unit = state
                    .units
                    .entry(*id)
                    .or_insert_with(|| UnitTimeline::empty(*id));
                unit.apply(op, self.as_of).map_err(|e| rejected(op, e))?;
                *id.as_uuid()
            }
            EntityKey::Employment(employment) => {
                let bundle = state
                    .employments
                    .entry(employment.clone())
                    .or_insert_with(|| EmploymentTimeline::empty(employment.clone()));
                bundle.apply(op, self.as_of).map_err(|e| rejected(op, e))?;
                *state
                    .engagement_ids
                    .entry(employment.clone())
                    .or_insert_with(Uuid::new_v4)
            }
        };

        state.applied.insert(idempotency_key, id);
        state.log.push(op.clone());
        debug!(operation = %op, id = %id, "applied operation");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgsync_timeline::Timeline;
    use orgsync_types::{EmploymentSnapshot, Validity};

    fn at(date: &str) -> Instant {
        date.parse().unwrap()
    }

    fn uid(n: u128) -> UnitId {
        UnitId::from_uuid(Uuid::from_u128(n))
    }

    fn unit(id: u128, parent: Option<u128>, name: &str, from: &str, to: &str) -> UnitTimeline {
        let mut u = UnitTimeline::empty(uid(id));
        u.active = Timeline::single(at(from), at(to), true).unwrap();
        u.name = Timeline::single(at(from), at(to), name.to_string()).unwrap();
        if let Some(p) = parent {
            u.parent = Timeline::single(at(from), at(to), uid(p)).unwrap();
        }
        u
    }

    fn key(cpr: &str) -> EmploymentKey {
        EmploymentKey::new("AB", cpr, "00001")
    }

    fn add_employment(cpr: &str, unit: u128) -> Operation {
        Operation::Add {
            key: EntityKey::Employment(key(cpr)),
            snapshot: EmploymentSnapshot {
                unit_id: uid(unit),
                job_function: "Nurse".into(),
            }
            .into(),
            validity: Validity::starting(at("2024-01-01")).unwrap(),
        }
    }

    /// Apply `op` as the only operation of a fresh run.
    async fn send(dest: &InMemoryDestination, op: &Operation) -> SyncResult<Uuid> {
        dest.apply(op, op.idempotency_key(Uuid::new_v4())).await
    }

    #[tokio::test]
    async fn equal_operation_in_a_later_run_is_applied_again() {
        let dest = InMemoryDestination::new(DestinationFixture::default(), at("2024-06-01"));
        let terminate = Operation::Terminate {
            key: EntityKey::Employment(key("0101901234")),
            validity_end: at("2024-03-01"),
        };
        let add_back = Operation::Add {
            key: EntityKey::Employment(key("0101901234")),
            snapshot: EmploymentSnapshot {
                unit_id: uid(1),
                job_function: "Nurse".into(),
            }
            .into(),
            validity: Validity::starting(at("2024-03-01")).unwrap(),
        };

        send(&dest, &add_employment("0101901234", 1)).await.unwrap();
        send(&dest, &terminate).await.unwrap();
        send(&dest, &add_back).await.unwrap();
        send(&dest, &terminate).await.unwrap();

        let stored = dest.employment(&key("0101901234")).unwrap().unwrap();
        assert!(stored.is_active_at(at("2024-02-01")));
        assert!(!stored.is_active_at(at("2024-06-01")));
        assert_eq!(dest.applied_operations().unwrap().len(), 4);
    }

    #[test]
    fn forest_keeps_current_and_future_units() {
        let units = [
            unit(1, None, "Root", "2020-01-01", "infinity"),
            unit(2, Some(1), "Closed", "2020-01-01", "2023-01-01"),
            unit(3, Some(1), "Planned", "2025-01-01", "infinity"),
        ];
        let forest = forest_at(units.iter(), at("2024-06-01")).unwrap();
        assert!(forest.contains(uid(1)));
        assert!(!forest.contains(uid(2)));
        assert_eq!(forest.get(uid(3)).unwrap().parent_id, Some(uid(1)));
    }

    #[tokio::test]
    async fn replay_returns_original_id() {
        let dest = InMemoryDestination::new(DestinationFixture::default(), at("2024-06-01"));
        let op = add_employment("0101901234", 1);
        let run = Uuid::new_v4();
        let first = dest.apply(&op, op.idempotency_key(run)).await.unwrap();
        let second = dest.apply(&op, op.idempotency_key(run)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(dest.applied_operations().unwrap().len(), 1);

        let stored = dest.employment(&key("0101901234")).unwrap().unwrap();
        assert!(stored.is_active_at(at("2024-06-01")));
    }

    #[tokio::test]
    async fn rejected_keys_are_refused() {
        let dest = InMemoryDestination::new(DestinationFixture::default(), at("2024-06-01"));
        dest.reject(EntityKey::Employment(key("0101901234"))).unwrap();
        let err = send(&dest, &add_employment("0101901234", 1)).await.unwrap_err();
        assert!(matches!(err, SyncError::MutationRejected { .. }));
        assert!(send(&dest, &add_employment("0202902345", 1)).await.is_ok());
    }

    #[tokio::test]
    async fn retire_of_unknown_unit_is_rejected() {
        let dest = InMemoryDestination::new(DestinationFixture::default(), at("2024-06-01"));
        let op = Operation::Retire {
            unit: uid(5),
            new_parent: uid(9),
        };
        assert!(matches!(
            send(&dest, &op).await,
            Err(SyncError::MutationRejected { .. })
        ));
    }

    #[tokio::test]
    async fn injected_fetch_failures_run_out() {
        let dest = InMemoryDestination::new(DestinationFixture::default(), at("2024-06-01"));
        dest.fail_fetches(2).unwrap();
        assert!(matches!(dest.fetch_tree().await, Err(SyncError::TransientAdapter(_))));
        assert!(matches!(dest.fetch_tree().await, Err(SyncError::TransientAdapter(_))));
        assert!(dest.fetch_tree().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn live_engagements_by_unit() {
        let dest = InMemoryDestination::new(DestinationFixture::default(), at("2024-06-01"));
        send(&dest, &add_employment("0101901234", 7)).await.unwrap();
        let live = dest.live_engagement_units(at("2024-06-01")).await.unwrap();
        assert_eq!(live, HashSet::from([uid(7)]));
    }

    #[tokio::test]
    async fn snapshot_reflects_applied_operations() {
        let fixture = DestinationFixture {
            units: vec![unit(2, None, "B", "2020-01-01", "infinity")],
            employments: vec![],
        };
        let dest = InMemoryDestination::new(fixture, at("2024-06-01"));
        send(&dest, &add_employment("0101901234", 2)).await.unwrap();

        let snapshot = dest.snapshot().unwrap();
        assert_eq!(snapshot.units.len(), 1);
        assert_eq!(snapshot.employments.len(), 1);
        assert_eq!(snapshot.employments[0].key, key("0101901234"));
    }

    #[tokio::test]
    async fn source_lists_employments_by_person() {
        let mut a = EmploymentTimeline::empty(key("0101901234"));
        a.active = Timeline::single(at("2024-01-01"), at("infinity"), true).unwrap();
        let b = EmploymentTimeline::empty(key("0202902345"));
        let source = InMemorySource::new(
            SourceFixture {
                institution: "AB".into(),
                units: vec![],
                employments: vec![a, b],
            },
            at("2024-06-01"),
        );
        assert_eq!(source.list_employments("AB", None).await.unwrap().len(), 2);
        assert_eq!(
            source.list_employments("AB", Some("0202902345")).await.unwrap(),
            vec![key("0202902345")]
        );
        assert!(source.list_employments("XY", None).await.unwrap().is_empty());
        assert!(matches!(
            source.fetch_tree("XY").await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[test]
    fn fixture_parses_from_json() {
        let json = r#"{
            "source": {
                "institution": "AB",
                "units": [{
                    "id": "00000000-0000-0000-0000-000000000001",
                    "active": [{"start": "2020-01-01", "end": "infinity", "value": true}],
                    "name": [{"start": "2020-01-01", "end": "infinity", "value": "Root"}]
                }]
            },
            "as_of": "2024-06-01",
            "run_status": "completed"
        }"#;
        let fixture = SyncFixture::from_json_str(json).unwrap();
        assert_eq!(fixture.source.units.len(), 1);
        assert!(fixture.destination.units.is_empty());
        assert_eq!(fixture.as_of(), at("2024-06-01"));
        assert_eq!(fixture.run_status, Some(RunStatus::Completed));
    }
}
