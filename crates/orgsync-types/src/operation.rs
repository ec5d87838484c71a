use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::{EntityKey, UnitId};
use crate::temporal::{Instant, Validity};

/// Namespace for deterministic operation idempotency keys.
const OPERATION_NAMESPACE: Uuid = Uuid::from_u128(0x6f72_6773_796e_6300_8000_0000_0000_0001);

/// Full attribute values of a unit over one span.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub name: String,
    pub parent: UnitId,
    pub level: Option<String>,
}

/// Full attribute values of an employment over one span.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmploymentSnapshot {
    pub unit_id: UnitId,
    pub job_function: String,
}

/// Desired attribute values carried by `Add` and `Update`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntitySnapshot {
    Unit(UnitSnapshot),
    Employment(EmploymentSnapshot),
}

impl From<UnitSnapshot> for EntitySnapshot {
    fn from(s: UnitSnapshot) -> Self {
        Self::Unit(s)
    }
}

impl From<EmploymentSnapshot> for EntitySnapshot {
    fn from(s: EmploymentSnapshot) -> Self {
        Self::Employment(s)
    }
}

/// A corrective action against the destination system.
///
/// Produced by the tree diff and the interval reconciler, consumed once by
/// the orchestrator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Create the entity over `validity`.
    Add {
        key: EntityKey,
        snapshot: EntitySnapshot,
        validity: Validity,
    },
    /// Overwrite the entity's attributes over `validity`.
    Update {
        key: EntityKey,
        /// Attributes whose value differs from the destination.
        changed: Vec<String>,
        snapshot: EntitySnapshot,
        validity: Validity,
    },
    /// End the entity: it is not valid from `validity_end` onward.
    Terminate { key: EntityKey, validity_end: Instant },
    /// Move a unit into an obsolete branch.
    Retire { unit: UnitId, new_parent: UnitId },
}

impl Operation {
    /// The entity this operation targets.
    pub fn key(&self) -> EntityKey {
        match self {
            Self::Add { key, .. } | Self::Update { key, .. } | Self::Terminate { key, .. } => {
                key.clone()
            }
            Self::Retire { unit, .. } => EntityKey::unit(*unit),
        }
    }

    /// Short operation label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Update { .. } => "update",
            Self::Terminate { .. } => "terminate",
            Self::Retire { .. } => "retire",
        }
    }

    /// Instant at which the operation takes effect. `Retire` has none.
    pub fn effective_from(&self) -> Option<Instant> {
        match self {
            Self::Add { validity, .. } | Self::Update { validity, .. } => Some(validity.from),
            Self::Terminate { validity_end, .. } => Some(*validity_end),
            Self::Retire { .. } => None,
        }
    }

    /// Idempotency key of this operation within run `run`: UUID v5 of the
    /// run id followed by the canonical JSON form.
    ///
    /// Resending the same operation in the same run shares the key. A later
    /// run issuing an equal operation gets a fresh key, since the destination
    /// may have changed in between.
    pub fn idempotency_key(&self, run: Uuid) -> Uuid {
        let mut name = run.as_bytes().to_vec();
        name.extend(serde_json::to_vec(self).unwrap_or_default());
        Uuid::new_v5(&OPERATION_NAMESPACE, &name)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add { key, validity, .. } => write!(f, "add {key} {validity}"),
            Self::Update {
                key,
                changed,
                validity,
                ..
            } => write!(f, "update {key} [{}] {validity}", changed.join(",")),
            Self::Terminate { key, validity_end } => {
                write!(f, "terminate {key} from {validity_end}")
            }
            Self::Retire { unit, new_parent } => write!(f, "retire unit:{unit} under {new_parent}"),
        }
    }
}
