use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use orgsync_reconcile::ReconcilePolicy;
use orgsync_tree::TreeDiffPolicy;
use orgsync_types::{Instant, UnitId};

use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;

/// Settings for one sync deployment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Source institution identifier.
    pub institution: String,
    /// Roots of the destination's obsolete branches.
    pub obsolete_roots: Vec<UnitId>,
    /// Where destination-only units are retired to. Required for full cycles.
    pub obsolete_root: Option<UnitId>,
    /// Destination unit levels the sync manages.
    pub managed_level_regex: String,
    /// Placeholder for units with a missing parent or employment unit.
    pub unknown_unit: Option<UnitId>,
    /// Employments reconciled at once.
    pub concurrency: usize,
    pub entity_timeout_secs: u64,
    /// Compute operations without applying them.
    pub dry_run: bool,
    /// Reconcile every source unit, not only those the tree diff touches.
    pub reconcile_all_units: bool,
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            institution: String::new(),
            obsolete_roots: Vec::new(),
            obsolete_root: None,
            managed_level_regex: r"^NY\d-niveau$".to_string(),
            unknown_unit: None,
            concurrency: 8,
            entity_timeout_secs: 60,
            dry_run: false,
            reconcile_all_units: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(text: &str) -> SyncResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.institution.trim().is_empty() {
            return Err(SyncError::Config("institution must be set".into()));
        }
        if self.concurrency == 0 {
            return Err(SyncError::Config("concurrency must be at least 1".into()));
        }
        if self.entity_timeout_secs == 0 {
            return Err(SyncError::Config("entity_timeout_secs must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(SyncError::Config("retry.max_attempts must be at least 1".into()));
        }
        self.managed_level()?;
        if let Some(root) = self.obsolete_root {
            if !self.obsolete_roots.contains(&root) {
                return Err(SyncError::Config(format!(
                    "obsolete_root {root} is not one of obsolete_roots"
                )));
            }
        }
        Ok(())
    }

    pub fn managed_level(&self) -> SyncResult<Regex> {
        Regex::new(&self.managed_level_regex).map_err(|e| {
            SyncError::Config(format!("managed_level_regex does not compile: {e}"))
        })
    }

    pub fn entity_timeout(&self) -> Duration {
        Duration::from_secs(self.entity_timeout_secs)
    }

    pub fn reconcile_policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            unknown_unit: self.unknown_unit,
        }
    }

    /// Tree diff settings for a full cycle as of `as_of`.
    pub fn tree_policy(&self, as_of: Instant) -> SyncResult<TreeDiffPolicy> {
        let obsolete_root = self.obsolete_root.ok_or_else(|| {
            SyncError::Config("obsolete_root is required for a full sync".into())
        })?;
        Ok(TreeDiffPolicy {
            obsolete_roots: self.obsolete_roots.iter().copied().collect::<HashSet<_>>(),
            obsolete_root,
            managed_level: self.managed_level()?,
            as_of,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const OBSOLETE: &str = "11111111-1111-1111-1111-111111111111";

    fn sample() -> String {
        format!(
            r#"
institution = "AB"
obsolete_roots = ["{OBSOLETE}"]
obsolete_root = "{OBSOLETE}"
concurrency = 4
dry_run = true

[retry]
max_attempts = 5
"#
        )
    }

    #[test]
    fn defaults() {
        let c = SyncConfig::default();
        assert_eq!(c.concurrency, 8);
        assert_eq!(c.entity_timeout(), Duration::from_secs(60));
        assert_eq!(c.retry, RetryPolicy::default());
        assert!(c.managed_level().unwrap().is_match("NY3-niveau"));
        assert!(!c.managed_level().unwrap().is_match("Afdelings-niveau"));
        // No institution yet.
        assert!(matches!(c.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn parses_partial_toml() {
        let c = SyncConfig::from_toml_str(&sample()).unwrap();
        assert_eq!(c.institution, "AB");
        assert_eq!(c.concurrency, 4);
        assert!(c.dry_run);
        assert_eq!(c.retry.max_attempts, 5);
        assert_eq!(c.retry.backoff_ms, 500);
        assert_eq!(c.obsolete_root, Some(OBSOLETE.parse().unwrap()));
        c.validate().unwrap();
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample().as_bytes()).unwrap();
        let c = SyncConfig::load(file.path()).unwrap();
        assert_eq!(c.institution, "AB");
    }

    #[test]
    fn rejects_retirement_target_outside_obsolete_roots() {
        let mut c = SyncConfig::from_toml_str(&sample()).unwrap();
        c.obsolete_roots.clear();
        assert!(matches!(c.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn rejects_bad_regex_and_zero_concurrency() {
        let mut c = SyncConfig::from_toml_str(&sample()).unwrap();
        c.managed_level_regex = "(".into();
        assert!(c.validate().is_err());

        let mut c = SyncConfig::from_toml_str(&sample()).unwrap();
        c.concurrency = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn tree_policy_requires_obsolete_root() {
        let mut c = SyncConfig::from_toml_str(&sample()).unwrap();
        assert!(c.tree_policy(Instant::now()).is_ok());
        c.obsolete_root = None;
        assert!(matches!(
            c.tree_policy(Instant::now()),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn mistyped_field_is_a_toml_error() {
        assert!(matches!(
            SyncConfig::from_toml_str("concurrency = \"many\""),
            Err(SyncError::Toml(_))
        ));
    }
}
