//! Session configuration.
//!
//! Serializable so a host can keep it in its own settings file; every field
//! has a default, so partial documents deserialize.

use crate::logging::default_log_level;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_DB_FILE: &str = "scistash.db";

/// How a stash session opens its storage and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StashConfig {
    /// Stash database file. Ignored when `dry_run` is set.
    pub db_path: PathBuf,
    /// Create the database file if it does not exist yet.
    pub create: bool,
    /// Work on an in-memory database; nothing is written to disk.
    pub dry_run: bool,
    /// Upper bound for staged file content, in bytes. `None` means unlimited.
    pub memory_quota_bytes: Option<u64>,
    pub log_level: String,
    /// Absolute directory for rolling log files. `None` disables file logging.
    pub log_dir: Option<PathBuf>,
}

impl Default for StashConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE),
            create: false,
            dry_run: false,
            memory_quota_bytes: None,
            log_level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

impl StashConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    /// In-memory configuration, used by tests and `--dry-run`.
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }

    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn with_memory_quota(mut self, bytes: u64) -> Self {
        self.memory_quota_bytes = Some(bytes);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::StashConfig;
    use std::path::PathBuf;

    #[test]
    fn partial_document_falls_back_to_defaults() {
        let config: StashConfig =
            serde_json::from_str(r#"{"db_path": "/tmp/refs.db", "create": true}"#).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/refs.db"));
        assert!(config.create);
        assert!(!config.dry_run);
        assert_eq!(config.memory_quota_bytes, None);
        assert_eq!(config.log_level, StashConfig::default().log_level);
    }

    #[test]
    fn builders_compose() {
        let config = StashConfig::new("refs.db")
            .with_create(true)
            .with_memory_quota(1024);
        assert!(config.create);
        assert_eq!(config.memory_quota_bytes, Some(1024));
    }
}
