//! Collaborator interfaces for the source and destination systems.

use std::collections::HashSet;

use async_trait::async_trait;
use uuid::Uuid;

use orgsync_reconcile::{EmploymentTimeline, UnitTimeline};
use orgsync_tree::Forest;
use orgsync_types::{EmploymentKey, Instant, Operation, UnitId};

use crate::error::SyncResult;

/// The authoritative system.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch_tree(&self, institution: &str) -> SyncResult<Forest>;
    async fn fetch_unit_timeline(&self, unit: UnitId) -> SyncResult<UnitTimeline>;
    async fn fetch_employment_timeline(&self, key: &EmploymentKey) -> SyncResult<EmploymentTimeline>;
    /// Employment keys of an institution, optionally narrowed to one person.
    async fn list_employments(
        &self,
        institution: &str,
        cpr: Option<&str>,
    ) -> SyncResult<Vec<EmploymentKey>>;
}

/// The system being kept in sync.
///
/// Timeline fetches for entities the destination does not know return an
/// empty bundle.
#[async_trait]
pub trait DestinationAdapter: Send + Sync {
    async fn fetch_tree(&self) -> SyncResult<Forest>;
    async fn fetch_unit_timeline(&self, unit: UnitId) -> SyncResult<UnitTimeline>;
    async fn fetch_employment_timeline(&self, key: &EmploymentKey) -> SyncResult<EmploymentTimeline>;
    /// Units holding an engagement active at `as_of` or later.
    async fn live_engagement_units(&self, as_of: Instant) -> SyncResult<HashSet<UnitId>>;
    /// Apply one operation. A second call with the same `idempotency_key`
    /// returns the original result without applying again.
    async fn apply(&self, op: &Operation, idempotency_key: Uuid) -> SyncResult<Uuid>;
}
