use crate::core::{PersistenceError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What `persist` does with a DETACHED object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetachedPersistPolicy {
    /// Fail with an illegal-argument error.
    #[default]
    Reject,
    /// Merge the object into the context instead.
    Merge,
}

/// Entity manager configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceConfig {
    /// Longest a transaction may stay open before its commit is refused
    pub transaction_timeout: Option<Duration>,

    /// Handling of `persist` on a detached object
    pub detached_persist: DetachedPersistPolicy,

    /// Whether `refresh` needs an active transaction
    pub require_transaction_for_refresh: bool,

    /// Whether flush and merge compare version attributes
    pub check_versions: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            transaction_timeout: None,
            detached_persist: DetachedPersistPolicy::Reject,
            require_transaction_for_refresh: false,
            check_versions: true,
        }
    }
}

/// On-disk form; durations are given in milliseconds.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    transaction_timeout_ms: Option<u64>,
    detached_persist: DetachedPersistPolicy,
    require_transaction_for_refresh: bool,
    check_versions: Option<bool>,
}

impl PersistenceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set transaction timeout
    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = Some(timeout);
        self
    }

    pub fn detached_persist(mut self, policy: DetachedPersistPolicy) -> Self {
        self.detached_persist = policy;
        self
    }

    pub fn require_transaction_for_refresh(mut self, required: bool) -> Self {
        self.require_transaction_for_refresh = required;
        self
    }

    pub fn check_versions(mut self, enabled: bool) -> Self {
        self.check_versions = enabled;
        self
    }

    /// Parse from JSON
    ///
    /// ```
    /// use managedb::{DetachedPersistPolicy, PersistenceConfig};
    ///
    /// let config = PersistenceConfig::from_json_str(
    ///     r#"{ "transaction_timeout_ms": 500, "detached_persist": "merge" }"#,
    /// ).unwrap();
    /// assert_eq!(config.detached_persist, DetachedPersistPolicy::Merge);
    /// assert!(config.check_versions);
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(json)
            .map_err(|e| PersistenceError::IllegalArgument(format!("Invalid configuration: {}", e)))?;

        let defaults = Self::default();
        Ok(Self {
            transaction_timeout: file.transaction_timeout_ms.map(Duration::from_millis),
            detached_persist: file.detached_persist,
            require_transaction_for_refresh: file.require_transaction_for_refresh,
            check_versions: file.check_versions.unwrap_or(defaults.check_versions),
        })
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            PersistenceError::IllegalArgument(format!(
                "Cannot read configuration {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PersistenceConfig::new();
        assert_eq!(config.transaction_timeout, None);
        assert_eq!(config.detached_persist, DetachedPersistPolicy::Reject);
        assert!(!config.require_transaction_for_refresh);
        assert!(config.check_versions);
    }

    #[test]
    fn test_builder() {
        let config = PersistenceConfig::new()
            .transaction_timeout(Duration::from_secs(5))
            .detached_persist(DetachedPersistPolicy::Merge)
            .check_versions(false);
        assert_eq!(config.transaction_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.detached_persist, DetachedPersistPolicy::Merge);
        assert!(!config.check_versions);
    }

    #[test]
    fn test_from_json() {
        let config = PersistenceConfig::from_json_str(
            r#"{ "transaction_timeout_ms": 250, "require_transaction_for_refresh": true }"#,
        )
        .unwrap();
        assert_eq!(config.transaction_timeout, Some(Duration::from_millis(250)));
        assert!(config.require_transaction_for_refresh);
        assert!(config.check_versions);

        assert_eq!(PersistenceConfig::from_json_str("{}").unwrap(), PersistenceConfig::default());
        assert!(PersistenceConfig::from_json_str(r#"{ "pool_size": 3 }"#).is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("managedb.json");
        std::fs::write(&path, r#"{ "check_versions": false }"#).unwrap();

        let config = PersistenceConfig::from_json_file(&path).unwrap();
        assert!(!config.check_versions);
        assert!(PersistenceConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }
}
