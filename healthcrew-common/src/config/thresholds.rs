//! Per-check and per-category threshold overrides loaded from TOML.
//!
//! ```toml
//! [categories.performance]
//! warning = 80.0
//!
//! [checks.node_cpu]
//! warning = 70.0
//! critical = 90.0
//! ```
//!
//! A check-level bound wins over a category-level bound, which wins over the
//! check's built-in default.

use crate::types::{Category, Thresholds};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOverrides {
    #[serde(default)]
    pub categories: BTreeMap<Category, Thresholds>,
    #[serde(default)]
    pub checks: BTreeMap<String, Thresholds>,
}

impl ThresholdOverrides {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.checks.is_empty()
    }

    /// Effective thresholds for a check.
    pub fn resolve(&self, check_id: &str, category: Category, base: Thresholds) -> Thresholds {
        let mut effective = base;
        if let Some(by_category) = self.categories.get(&category) {
            effective = effective.overridden_by(by_category);
        }
        if let Some(by_check) = self.checks.get(check_id) {
            effective = effective.overridden_by(by_check);
        }
        effective
    }

    /// Check ids named by the overrides that `known` does not contain.
    pub fn unknown_checks<'a>(&'a self, known: &[&str]) -> Vec<&'a str> {
        self.checks
            .keys()
            .map(String::as_str)
            .filter(|id| !known.contains(id))
            .collect()
    }

    /// Set a check-level override.
    pub fn set_check(&mut self, check_id: impl Into<String>, thresholds: Thresholds) {
        self.checks.insert(check_id.into(), thresholds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[categories.performance]
warning = 80.0

[checks.node_cpu]
critical = 90.0
"#;

    #[test]
    fn test_parse_and_resolve_precedence() {
        let overrides = ThresholdOverrides::parse(SAMPLE).unwrap();
        let effective = overrides.resolve(
            "node_cpu",
            Category::Performance,
            Thresholds::new(85.0, 95.0),
        );
        assert_eq!(effective, Thresholds::new(80.0, 90.0));
    }

    #[test]
    fn test_resolve_untouched_check_keeps_base() {
        let overrides = ThresholdOverrides::parse(SAMPLE).unwrap();
        let base = Thresholds::new(0.0, 2.0);
        assert_eq!(overrides.resolve("node_health", Category::Infrastructure, base), base);
    }

    #[test]
    fn test_parse_rejects_unknown_category() {
        let err = ThresholdOverrides::parse("[categories.network]\nwarning = 1.0\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_unknown_checks() {
        let overrides = ThresholdOverrides::parse(SAMPLE).unwrap();
        assert!(overrides.unknown_checks(&["node_cpu"]).is_empty());
        assert_eq!(overrides.unknown_checks(&["node_memory"]), vec!["node_cpu"]);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thresholds.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let overrides = ThresholdOverrides::load(&path).unwrap();
        assert!(!overrides.is_empty());

        let missing = ThresholdOverrides::load(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
