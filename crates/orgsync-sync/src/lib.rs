//! Sync orchestration for orgsync.
//!
//! Runs the tree diff and the interval reconciler against a source and a
//! destination system, with retries for transient failures, per-entity
//! exclusive handling, a run-status gate, and a dry-run mode.
//!
//! # Key Types
//!
//! - [`Orchestrator`] -- Entry point: `reconcile(scope)` to a [`SyncReport`]
//! - [`SourceAdapter`] / [`DestinationAdapter`] -- The two external systems
//! - [`RunStatusStore`] -- Guards against overlapping full cycles
//! - [`SyncConfig`] -- TOML-loadable settings
//! - [`InMemorySource`] / [`InMemoryDestination`] -- Fixture-backed systems

pub mod adapter;
pub mod config;
pub mod error;
pub mod lock;
pub mod memory;
pub mod orchestrator;
pub mod retry;
pub mod status;

pub use adapter::{DestinationAdapter, SourceAdapter};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use lock::{KeyedGuard, KeyedLock};
pub use memory::{
    forest_at, DestinationFixture, InMemoryDestination, InMemorySource, SourceFixture,
    SyncFixture,
};
pub use orchestrator::{
    ActionStatus, EntityError, EntityOutcome, FailureRecord, OperationRecord, Orchestrator,
    Scope, SkipRecord, SyncReport, SyncSummary,
};
pub use retry::RetryPolicy;
pub use status::{InMemoryRunStatusStore, RunStatus, RunStatusStore, StatusRow};
