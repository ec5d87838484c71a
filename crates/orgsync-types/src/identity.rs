use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;

/// Identifier of an organization unit. Shared by source and destination.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(Uuid);

impl UnitId {
    /// Wrap an existing UUID.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a random unit id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitId({})", self.0)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UnitId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| TypeError::InvalidUnitId(format!("{s}: {e}")))
    }
}

/// Identity of one employment: institution, person (CPR), employment number.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EmploymentKey {
    pub institution: String,
    pub cpr: String,
    pub employment_id: String,
}

impl EmploymentKey {
    pub fn new(
        institution: impl Into<String>,
        cpr: impl Into<String>,
        employment_id: impl Into<String>,
    ) -> Self {
        Self {
            institution: institution.into(),
            cpr: cpr.into(),
            employment_id: employment_id.into(),
        }
    }
}

impl fmt::Debug for EmploymentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EmploymentKey({self})")
    }
}

impl fmt::Display for EmploymentKey {
    // The CPR is masked so log lines never carry a full personal number.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible = self.cpr.get(..6).unwrap_or(&self.cpr);
        write!(f, "{}/{}-****/{}", self.institution, visible, self.employment_id)
    }
}

/// Stable key of any reconciled entity.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityKey {
    Unit { id: UnitId },
    Employment(EmploymentKey),
}

impl EntityKey {
    pub fn unit(id: UnitId) -> Self {
        Self::Unit { id }
    }

    /// Entity kind label used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unit { .. } => "unit",
            Self::Employment(_) => "employment",
        }
    }

    pub fn as_unit(&self) -> Option<UnitId> {
        match self {
            Self::Unit { id } => Some(*id),
            Self::Employment(_) => None,
        }
    }
}

impl From<UnitId> for EntityKey {
    fn from(id: UnitId) -> Self {
        Self::Unit { id }
    }
}

impl From<EmploymentKey> for EntityKey {
    fn from(key: EmploymentKey) -> Self {
        Self::Employment(key)
    }
}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityKey({self})")
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit { id } => write!(f, "unit:{id}"),
            Self::Employment(key) => write!(f, "employment:{key}"),
        }
    }
}
