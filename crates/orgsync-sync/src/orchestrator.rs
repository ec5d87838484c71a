//! Drives the tree diff and the interval reconciler against the adapters.
//!
//! A full cycle is gated by the run-status record, diffs the two trees,
//! reconciles the units the diff touched (parents first), applies the
//! retirements, then reconciles every employment of the institution with
//! bounded concurrency. Per-entity failures are reported, never raised;
//! only fatal errors abort the cycle.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use orgsync_reconcile::{reconcile, ReconcilePolicy, SkippedSpan, TimelineBundle};
use orgsync_tree::{diff_forests, Forest, ManualAlert, NodeFailure, TreeDiff, TreeDiffPolicy};
use orgsync_types::{EmploymentKey, EntityKey, Instant, Operation, UnitId, Validity};

use crate::adapter::{DestinationAdapter, SourceAdapter};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::lock::KeyedLock;
use crate::status::{RunStatus, RunStatusStore};

/// What a reconciliation run covers.
#[derive(Clone, PartialEq, Eq)]
pub enum Scope {
    /// Full cycle: tree diff, units, retirements, every employment.
    Institution,
    /// One unit's timelines.
    Unit(UnitId),
    /// Every employment of one person, by CPR.
    Person(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Institution => write!(f, "institution"),
            Self::Unit(id) => write!(f, "unit:{id}"),
            Self::Person(cpr) => {
                let visible = cpr.get(..6).unwrap_or(cpr);
                write!(f, "person:{visible}-****")
            }
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scope({self})")
    }
}

/// What happened to one operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionStatus {
    Applied { id: Uuid },
    /// Dry run: computed, never sent.
    Planned,
    Rejected { reason: String },
    /// Not sent because an earlier operation for the entity was rejected.
    Abandoned,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OperationRecord {
    pub operation: Operation,
    pub status: ActionStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkipRecord {
    pub validity: Validity,
    pub reason: String,
}

impl From<&SkippedSpan> for SkipRecord {
    fn from(span: &SkippedSpan) -> Self {
        Self {
            validity: span.validity,
            reason: span.error.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntityError {
    pub kind: &'static str,
    pub message: String,
}

/// Result of one entity's run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntityOutcome {
    pub key: EntityKey,
    pub actions: Vec<OperationRecord>,
    pub skipped: Vec<SkipRecord>,
    pub error: Option<EntityError>,
}

impl EntityOutcome {
    fn failed(key: EntityKey, err: &SyncError) -> Self {
        Self {
            key,
            actions: Vec::new(),
            skipped: Vec::new(),
            error: Some(EntityError {
                kind: err.kind(),
                message: err.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub unit: UnitId,
    pub error: String,
}

impl From<&NodeFailure> for FailureRecord {
    fn from(failure: &NodeFailure) -> Self {
        Self {
            unit: failure.unit,
            error: failure.error.to_string(),
        }
    }
}

/// Counts by outcome.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub applied: usize,
    pub planned: usize,
    /// Spans not written because required data was missing.
    pub skipped_missing_data: usize,
    /// Retirements held back by live engagements.
    pub skipped_live_engagement: usize,
    pub mutation_rejected: usize,
    pub abandoned: usize,
    /// Entities and tree nodes that failed outright.
    pub failed: usize,
}

/// Everything one reconciliation run did.
#[derive(Clone, Debug, Serialize)]
pub struct SyncReport {
    /// Namespace of this run's idempotency keys.
    pub run_id: Uuid,
    pub scope: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entities: Vec<EntityOutcome>,
    pub retirements: Vec<OperationRecord>,
    pub alerts: Vec<ManualAlert>,
    pub tree_failures: Vec<FailureRecord>,
}

impl SyncReport {
    fn new(scope: &Scope, dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            scope: scope.to_string(),
            dry_run,
            started_at: now,
            finished_at: now,
            entities: Vec::new(),
            retirements: Vec::new(),
            alerts: Vec::new(),
            tree_failures: Vec::new(),
        }
    }

    /// Every operation with its status: entity runs first, then retirements.
    pub fn operations(&self) -> impl Iterator<Item = (&Operation, &ActionStatus)> {
        self.entities
            .iter()
            .flat_map(|e| e.actions.iter())
            .chain(self.retirements.iter())
            .map(|r| (&r.operation, &r.status))
    }

    pub fn entity(&self, key: &EntityKey) -> Option<&EntityOutcome> {
        self.entities.iter().find(|e| &e.key == key)
    }

    pub fn summary(&self) -> SyncSummary {
        let mut summary = SyncSummary::default();
        for (_, status) in self.operations() {
            match status {
                ActionStatus::Applied { .. } => summary.applied += 1,
                ActionStatus::Planned => summary.planned += 1,
                ActionStatus::Rejected { .. } => summary.mutation_rejected += 1,
                ActionStatus::Abandoned => summary.abandoned += 1,
            }
        }
        summary.skipped_missing_data = self.entities.iter().map(|e| e.skipped.len()).sum();
        summary.skipped_live_engagement = self.alerts.len();
        summary.failed = self.entities.iter().filter(|e| e.error.is_some()).count()
            + self.tree_failures.len();
        summary
    }
}

/// Keeps per-entity failures in the report; fatal errors abort.
fn settle(key: EntityKey, result: SyncResult<EntityOutcome>) -> SyncResult<EntityOutcome> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            warn!(key = %key, error = %err, "entity failed");
            Ok(EntityOutcome::failed(key, &err))
        }
    }
}

/// Sync engine over a source, a destination and a run-status store.
#[derive(Clone)]
pub struct Orchestrator {
    source: Arc<dyn SourceAdapter>,
    destination: Arc<dyn DestinationAdapter>,
    status: Arc<dyn RunStatusStore>,
    config: Arc<SyncConfig>,
    policy: ReconcilePolicy,
    locks: KeyedLock<EntityKey>,
    as_of: Option<Instant>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn SourceAdapter>,
        destination: Arc<dyn DestinationAdapter>,
        status: Arc<dyn RunStatusStore>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            source,
            destination,
            status,
            policy: config.reconcile_policy(),
            config: Arc::new(config),
            locks: KeyedLock::new(),
            as_of: None,
        })
    }

    /// Pin the diff instant instead of using the current time.
    pub fn with_as_of(mut self, as_of: Instant) -> Self {
        self.as_of = Some(as_of);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn as_of(&self) -> Instant {
        self.as_of.unwrap_or_else(Instant::now)
    }

    /// Run one reconciliation over `scope`.
    #[instrument(skip_all, fields(scope = %scope, dry_run = self.config.dry_run))]
    pub async fn reconcile(&self, scope: Scope) -> SyncResult<SyncReport> {
        let mut report = SyncReport::new(&scope, self.config.dry_run);
        match &scope {
            Scope::Institution => self.full_cycle(&mut report).await?,
            Scope::Unit(id) => {
                let outcomes = self
                    .reconcile_units(&[*id], &HashSet::new(), report.run_id)
                    .await?;
                report.entities.extend(outcomes);
            }
            Scope::Person(cpr) => {
                let source = &self.source;
                let institution = self.config.institution.as_str();
                let cpr = cpr.as_str();
                let keys = self
                    .config
                    .retry
                    .run("list_employments", move || {
                        source.list_employments(institution, Some(cpr))
                    })
                    .await?;
                report
                    .entities
                    .extend(self.reconcile_employments(keys, report.run_id).await?);
            }
        }
        report.finished_at = Utc::now();

        let summary = report.summary();
        info!(
            applied = summary.applied,
            planned = summary.planned,
            rejected = summary.mutation_rejected,
            skipped = summary.skipped_missing_data,
            failed = summary.failed,
            "reconciliation finished"
        );
        Ok(report)
    }

    /// Compare the two trees without changing anything.
    pub async fn tree_diff(&self) -> SyncResult<TreeDiff> {
        let policy = self.config.tree_policy(self.as_of())?;
        Ok(self.fetch_and_diff(&policy).await?.1)
    }

    async fn fetch_and_diff(&self, policy: &TreeDiffPolicy) -> SyncResult<(Forest, TreeDiff)> {
        let as_of = policy.as_of;
        let retry = &self.config.retry;
        let source = &self.source;
        let destination = &self.destination;
        let institution = self.config.institution.as_str();

        let source_tree = retry
            .run("fetch_tree", move || source.fetch_tree(institution))
            .await?;
        let destination_tree = retry
            .run("fetch_tree", move || destination.fetch_tree())
            .await?;
        let live = retry
            .run("live_engagement_units", move || {
                destination.live_engagement_units(as_of)
            })
            .await?;

        let diff = diff_forests(&source_tree, &destination_tree, &live, policy);
        Ok((source_tree, diff))
    }

    async fn full_cycle(&self, report: &mut SyncReport) -> SyncResult<()> {
        let policy = self.config.tree_policy(self.as_of())?;
        if self.status.get_status().await? == RunStatus::Running {
            error!("previous run is still marked as running");
            return Err(SyncError::PreviousRunStillRunning);
        }
        if self.config.dry_run {
            return self.cycle(report, &policy).await;
        }

        self.status.persist_status(RunStatus::Running).await?;
        info!(institution = %self.config.institution, "sync cycle started");
        let result = self.cycle(report, &policy).await;
        match &result {
            Ok(()) => self.status.persist_status(RunStatus::Completed).await?,
            Err(err) if err.is_fatal() => {
                error!(error = %err, "sync cycle aborted; run status left as running");
            }
            Err(err) => {
                warn!(error = %err, "sync cycle failed");
                self.status.persist_status(RunStatus::Failed).await?;
            }
        }
        result
    }

    async fn cycle(&self, report: &mut SyncReport, policy: &TreeDiffPolicy) -> SyncResult<()> {
        let (source_tree, diff) = self.fetch_and_diff(policy).await?;
        report.alerts = diff.alerts.clone();
        report.tree_failures = diff.failures.iter().map(FailureRecord::from).collect();
        let held: HashSet<UnitId> = diff.alerts.iter().map(|a| a.unit).collect();

        let units = if self.config.reconcile_all_units {
            let mut ids: Vec<UnitId> = source_tree.ids().collect();
            ids.sort_by_key(|id| source_tree.depth(*id).unwrap_or(0));
            ids
        } else {
            let mut seen = HashSet::new();
            diff.structural_units()
                .into_iter()
                .filter(|id| seen.insert(*id))
                .collect()
        };
        report
            .entities
            .extend(self.reconcile_units(&units, &held, report.run_id).await?);

        for op in diff.operations {
            if matches!(op, Operation::Retire { .. }) {
                let records = self.apply_operations(vec![op], report.run_id).await?;
                report.retirements.extend(records);
            }
        }

        let source = &self.source;
        let institution = self.config.institution.as_str();
        let keys = self
            .config
            .retry
            .run("list_employments", move || {
                source.list_employments(institution, None)
            })
            .await?;
        report
            .entities
            .extend(self.reconcile_employments(keys, report.run_id).await?);
        Ok(())
    }

    /// Units run one after another, in the given order. Units in `held`
    /// keep their destination parent.
    async fn reconcile_units(
        &self,
        ids: &[UnitId],
        held: &HashSet<UnitId>,
        run: Uuid,
    ) -> SyncResult<Vec<EntityOutcome>> {
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let result = self.run_unit(*id, held.contains(id), run).await;
            outcomes.push(settle(EntityKey::unit(*id), result)?);
        }
        Ok(outcomes)
    }

    /// Employments run concurrently, at most `concurrency` at once.
    async fn reconcile_employments(
        &self,
        keys: Vec<EmploymentKey>,
        run: Uuid,
    ) -> SyncResult<Vec<EntityOutcome>> {
        let permits = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();
        for key in keys {
            let this = self.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| SyncError::Task(e.to_string()))?;
                let entity = EntityKey::Employment(key.clone());
                settle(entity, this.run_employment(key, run).await)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|e| SyncError::Task(e.to_string()))??;
            outcomes.push(outcome);
        }
        outcomes.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(outcomes)
    }

    #[instrument(skip_all, fields(unit = %id, held = held))]
    async fn run_unit(&self, id: UnitId, held: bool, run: Uuid) -> SyncResult<EntityOutcome> {
        let key = EntityKey::unit(id);
        let _guard = self.locks.lock(key.clone()).await;
        self.within_timeout(&key, async {
            let retry = &self.config.retry;
            let source = &self.source;
            let destination = &self.destination;
            let mut desired = retry
                .run("fetch_unit_timeline", move || source.fetch_unit_timeline(id))
                .await?;
            let observed = retry
                .run("fetch_unit_timeline", move || destination.fetch_unit_timeline(id))
                .await?;
            if held {
                debug!("live engagements below unit; keeping destination parent");
                desired.hold_parent(&observed);
            }
            self.settle_bundles(&desired, &observed, run).await
        })
        .await
    }

    #[instrument(skip_all, fields(employment = %key))]
    async fn run_employment(&self, key: EmploymentKey, run: Uuid) -> SyncResult<EntityOutcome> {
        let entity = EntityKey::Employment(key.clone());
        let _guard = self.locks.lock(entity.clone()).await;
        self.within_timeout(&entity, async {
            let retry = &self.config.retry;
            let source = &self.source;
            let destination = &self.destination;
            let key = &key;
            let desired = retry
                .run("fetch_employment_timeline", move || {
                    source.fetch_employment_timeline(key)
                })
                .await?;
            let observed = retry
                .run("fetch_employment_timeline", move || {
                    destination.fetch_employment_timeline(key)
                })
                .await?;
            self.settle_bundles(&desired, &observed, run).await
        })
        .await
    }

    async fn within_timeout<T>(
        &self,
        key: &EntityKey,
        run: impl Future<Output = SyncResult<T>>,
    ) -> SyncResult<T> {
        match tokio::time::timeout(self.config.entity_timeout(), run).await {
            Ok(result) => result,
            Err(_) => {
                warn!(key = %key, "entity run timed out; remaining actions abandoned");
                Err(SyncError::Timeout {
                    key: key.to_string(),
                    secs: self.config.entity_timeout_secs,
                })
            }
        }
    }

    async fn settle_bundles<B: TimelineBundle + Sync>(
        &self,
        desired: &B,
        observed: &B,
        run: Uuid,
    ) -> SyncResult<EntityOutcome> {
        let reconciliation = reconcile(desired, observed, &self.policy)?;
        let skipped = reconciliation.skipped.iter().map(SkipRecord::from).collect();
        let actions = self.apply_operations(reconciliation.actions, run).await?;
        Ok(EntityOutcome {
            key: reconciliation.key,
            actions,
            skipped,
            error: None,
        })
    }

    /// Apply in order. After the first rejection the rest are abandoned.
    async fn apply_operations(
        &self,
        ops: Vec<Operation>,
        run: Uuid,
    ) -> SyncResult<Vec<OperationRecord>> {
        let mut records = Vec::with_capacity(ops.len());
        let mut halted = false;
        for operation in ops {
            let status = if halted {
                ActionStatus::Abandoned
            } else if self.config.dry_run {
                debug!(operation = %operation, "planned");
                ActionStatus::Planned
            } else {
                match self
                    .destination
                    .apply(&operation, operation.idempotency_key(run))
                    .await
                {
                    Ok(id) => ActionStatus::Applied { id },
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        warn!(operation = %operation, error = %err, "mutation rejected");
                        halted = true;
                        ActionStatus::Rejected {
                            reason: err.to_string(),
                        }
                    }
                }
            };
            records.push(OperationRecord { operation, status });
        }
        Ok(records)
    }
}
