//! Session configuration.
//!
//! Configuration is read from a JSON file; every field is optional.
//!
//! ```json
//! {
//!   "track_bindings": true,
//!   "default_strategy": "ref[main]",
//!   "library_dirs": ["./libraries"],
//!   "tie_policy": "latest_first",
//!   "repository": { "owner": "jotter-rs", "name": "jotter-libraries" }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::library::RepositoryConfig;
use crate::registry::TiePolicy;

/// Version reported to libraries declaring a minimum kernel version.
pub const KERNEL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default strategy for bare library names.
pub const DEFAULT_STRATEGY: &str = "ref[main]";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SessionConfig {
    /// Capture immutable bindings after each snippet.
    pub track_bindings: bool,
    /// Strategy text used for references without an explicit `@strategy`.
    pub default_strategy: String,
    /// Directories searched for `<name>.json` before the default strategy.
    pub library_dirs: Vec<PathBuf>,
    /// Descriptor cache location; defaults to the kernel cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Order of handlers registered with equal priority.
    pub tie_policy: TiePolicy,
    pub repository: RepositoryConfig,
    pub kernel_version: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            track_bindings: true,
            default_strategy: DEFAULT_STRATEGY.to_string(),
            library_dirs: Vec::new(),
            cache_dir: None,
            tie_policy: TiePolicy::default(),
            repository: RepositoryConfig::default(),
            kernel_version: KERNEL_VERSION.to_string(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
            .map_err(|e| Error::Descriptor(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Offline configuration: no repository, bundled libraries only.
    pub fn offline() -> Self {
        let mut config = Self {
            default_strategy: "embedded".to_string(),
            ..Self::default()
        };
        config.repository.enabled = false;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = SessionConfig::from_json(r#"{"tie_policy": "earliest_first"}"#).unwrap();
        assert_eq!(config.tie_policy, TiePolicy::EarliestFirst);
        assert!(config.track_bindings);
        assert_eq!(config.default_strategy, DEFAULT_STRATEGY);
        assert!(config.repository.enabled);
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("jotter.json");
        fs::write(&path, "{ not json").unwrap();

        let err = SessionConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("jotter.json"));
    }

    #[test]
    fn test_offline() {
        let config = SessionConfig::offline();
        assert!(!config.repository.enabled);
        assert_eq!(config.default_strategy, "embedded");
    }
}
