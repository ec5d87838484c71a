use thiserror::Error;

/// Errors surfaced by adapters and the orchestrator.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A collaborator call failed in a way that may succeed on retry.
    #[error("transient adapter error: {0}")]
    TransientAdapter(String),

    /// A collaborator call failed permanently.
    #[error("adapter error: {0}")]
    Adapter(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("mutation rejected: {operation}: {reason}")]
    MutationRejected { operation: String, reason: String },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("previous run is still marked as running")]
    PreviousRunStillRunning,

    #[error("{key}: gave up after {secs}s")]
    Timeout { key: String, secs: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("worker task failed: {0}")]
    Task(String),

    #[error("tree error: {0}")]
    Tree(#[from] orgsync_tree::TreeError),

    #[error("reconcile error: {0}")]
    Reconcile(#[from] orgsync_reconcile::ReconcileError),

    #[error("timeline error: {0}")]
    Timeline(#[from] orgsync_timeline::TimelineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl SyncError {
    /// Worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientAdapter(_))
    }

    /// Aborts the whole cycle rather than one entity.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PreviousRunStillRunning | Self::Authentication(_))
    }

    /// Short, stable error kind for reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransientAdapter(_) => "transient_adapter",
            Self::Adapter(_) => "adapter",
            Self::NotFound(_) => "not_found",
            Self::MutationRejected { .. } => "mutation_rejected",
            Self::Authentication(_) => "authentication",
            Self::PreviousRunStillRunning => "previous_run_still_running",
            Self::Timeout { .. } => "timeout",
            Self::Config(_) => "config",
            Self::Task(_) => "task",
            Self::Tree(_) => "tree",
            Self::Reconcile(_) => "reconcile",
            Self::Timeline(_) => "timeline",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Toml(_) => "toml",
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
