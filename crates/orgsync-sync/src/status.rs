//! Run-status record gating full sync cycles.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Running,
    /// Ended early on a non-fatal error. Does not block the next cycle.
    Failed,
}

/// One appended status row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRow {
    pub status: RunStatus,
    pub recorded_at: DateTime<Utc>,
}

/// Persisted run status. The most recent row wins.
#[async_trait]
pub trait RunStatusStore: Send + Sync {
    async fn get_status(&self) -> SyncResult<RunStatus>;
    async fn persist_status(&self, status: RunStatus) -> SyncResult<()>;
}

/// Append-only in-memory status table.
#[derive(Default)]
pub struct InMemoryRunStatusStore {
    rows: RwLock<Vec<StatusRow>>,
}

impl InMemoryRunStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose latest row is `status`.
    pub fn with_status(status: RunStatus) -> Self {
        Self {
            rows: RwLock::new(vec![StatusRow {
                status,
                recorded_at: Utc::now(),
            }]),
        }
    }

    /// All rows, oldest first.
    pub fn rows(&self) -> SyncResult<Vec<StatusRow>> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows.clone())
    }
}

fn poisoned() -> SyncError {
    SyncError::Adapter("run-status table lock poisoned".into())
}

#[async_trait]
impl RunStatusStore for InMemoryRunStatusStore {
    async fn get_status(&self) -> SyncResult<RunStatus> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows.last().map_or(RunStatus::Completed, |row| row.status))
    }

    async fn persist_status(&self, status: RunStatus) -> SyncResult<()> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        rows.push(StatusRow {
            status,
            recorded_at: Utc::now(),
        });
        Ok(())
    }
}
