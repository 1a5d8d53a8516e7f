//! Check registry.
//!
//! An ordered list of check definitions. Registration order is execution
//! order; ids are unique.

use healthcrew_common::{Category, CheckStatus, ErrorCode, ThresholdOverrides, Thresholds};
use serde::Serialize;
use std::fmt;

/// Parsed view of a check's raw output.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub metric: Option<f64>,
    pub status: CheckStatus,
    pub summary: String,
    pub findings: Vec<String>,
}

impl Evaluation {
    pub fn new(status: CheckStatus, summary: impl Into<String>) -> Self {
        Self {
            metric: None,
            status,
            summary: summary.into(),
            findings: Vec::new(),
        }
    }

    /// Status from `metric` against `thresholds`.
    pub fn measured(metric: f64, thresholds: &Thresholds, summary: impl Into<String>) -> Self {
        Self {
            metric: Some(metric),
            status: thresholds.classify(metric),
            summary: summary.into(),
            findings: Vec::new(),
        }
    }

    pub fn unknown(summary: impl Into<String>) -> Self {
        Self::new(CheckStatus::Unknown, summary)
    }

    pub fn with_findings(mut self, findings: Vec<String>) -> Self {
        self.findings = findings;
        self
    }

    /// Raise the status to at least `floor`.
    pub fn at_least(mut self, floor: CheckStatus) -> Self {
        self.status = self.status.max(floor);
        self
    }
}

/// Pure function from raw command output to an evaluation.
pub type Evaluator = fn(&str, &Thresholds) -> Evaluation;

#[derive(Clone, Serialize)]
pub struct CheckDefinition {
    pub id: String,
    pub name: String,
    pub category: Category,
    pub command: String,
    #[serde(skip)]
    pub evaluator: Evaluator,
    pub thresholds: Thresholds,
    pub enabled: bool,
    pub description: String,
}

impl fmt::Debug for CheckDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckDefinition")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("command", &self.command)
            .field("thresholds", &self.thresholds)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl CheckDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: Category,
        command: impl Into<String>,
        evaluator: Evaluator,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category,
            command: command.into(),
            evaluator,
            thresholds: Thresholds::none(),
            enabled: true,
            description: String::new(),
        }
    }

    pub fn thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("check '{0}' is already registered")]
    DuplicateId(String),

    #[error("unknown check '{0}'")]
    UnknownId(String),
}

impl RegistryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::DuplicateId(_) => ErrorCode::CheckDuplicateId,
            Self::UnknownId(_) => ErrorCode::CheckUnknownId,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CheckRegistry {
    checks: Vec<CheckDefinition>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in catalogue.
    pub fn with_builtin_checks() -> Self {
        let mut registry = Self::new();
        for check in crate::evaluators::builtin_checks() {
            // Built-in ids are unique.
            let _ = registry.register(check);
        }
        registry
    }

    pub fn register(&mut self, check: CheckDefinition) -> Result<(), RegistryError> {
        if self.get(&check.id).is_some() {
            return Err(RegistryError::DuplicateId(check.id));
        }
        self.checks.push(check);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&CheckDefinition> {
        self.checks.iter().find(|c| c.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CheckDefinition> {
        self.checks.iter()
    }

    /// Enabled checks in registration order.
    pub fn enabled(&self) -> impl Iterator<Item = &CheckDefinition> {
        self.checks.iter().filter(|c| c.enabled)
    }

    pub fn by_category(&self, category: Category) -> impl Iterator<Item = &CheckDefinition> {
        self.checks.iter().filter(move |c| c.category == category)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<(), RegistryError> {
        let check = self
            .checks
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| RegistryError::UnknownId(id.to_string()))?;
        check.enabled = enabled;
        Ok(())
    }

    /// Narrow to the requested ids, keeping registry order. An empty request
    /// keeps every check.
    pub fn select(&self, ids: &[String]) -> Result<CheckRegistry, RegistryError> {
        if ids.is_empty() {
            return Ok(self.clone());
        }
        if let Some(missing) = ids.iter().find(|id| self.get(id).is_none()) {
            return Err(RegistryError::UnknownId(missing.clone()));
        }
        Ok(CheckRegistry {
            checks: self
                .checks
                .iter()
                .filter(|c| ids.contains(&c.id))
                .cloned()
                .collect(),
        })
    }

    pub fn apply_overrides(&mut self, overrides: &ThresholdOverrides) {
        for check in &mut self.checks {
            check.thresholds = overrides.resolve(&check.id, check.category, check.thresholds);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &str, _: &Thresholds) -> Evaluation {
        Evaluation::new(CheckStatus::Ok, "fine")
    }

    fn def(id: &str, category: Category) -> CheckDefinition {
        CheckDefinition::new(id, id, category, "oc get nodes", noop)
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut registry = CheckRegistry::new();
        registry.register(def("a", Category::Storage)).unwrap();
        let err = registry.register(def("a", Category::Security)).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateId("a".into()));
        assert_eq!(err.code(), ErrorCode::CheckDuplicateId);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_order_is_registration_order() {
        let mut registry = CheckRegistry::new();
        for id in ["c", "a", "b"] {
            registry.register(def(id, Category::Workloads)).unwrap();
        }
        assert_eq!(registry.ids(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_select_keeps_registry_order_and_rejects_unknown() {
        let registry = CheckRegistry::with_builtin_checks();
        let picked = registry
            .select(&["node_memory".to_string(), "node_health".to_string()])
            .unwrap();
        assert_eq!(picked.ids(), vec!["node_health", "node_memory"]);

        let err = registry.select(&["nope".to_string()]).unwrap_err();
        assert_eq!(err, RegistryError::UnknownId("nope".into()));
        assert_eq!(registry.select(&[]).unwrap().len(), registry.len());
    }

    #[test]
    fn test_disabled_checks_skipped() {
        let mut registry = CheckRegistry::new();
        registry.register(def("a", Category::Storage)).unwrap();
        registry.register(def("b", Category::Storage).disabled()).unwrap();
        assert_eq!(registry.enabled().count(), 1);
        registry.set_enabled("b", true).unwrap();
        assert_eq!(registry.enabled().count(), 2);
        assert!(registry.set_enabled("zz", false).is_err());
    }

    #[test]
    fn test_builtin_catalogue_covers_every_category() {
        let registry = CheckRegistry::with_builtin_checks();
        for category in Category::ALL {
            assert!(
                registry.by_category(category).count() > 0,
                "no checks for {category}"
            );
        }
    }

    #[test]
    fn test_builtin_commands_pass_validator() {
        for check in CheckRegistry::with_builtin_checks().iter() {
            assert_eq!(
                healthcrew_common::validate_command(&check.command),
                Ok(()),
                "{}",
                check.id
            );
        }
    }

    #[test]
    fn test_apply_overrides() {
        let mut registry = CheckRegistry::with_builtin_checks();
        let mut overrides = ThresholdOverrides::default();
        overrides.set_check("node_cpu", Thresholds::new(70.0, 90.0));
        registry.apply_overrides(&overrides);
        assert_eq!(
            registry.get("node_cpu").unwrap().thresholds,
            Thresholds::new(70.0, 90.0)
        );
        assert_eq!(
            registry.get("node_memory").unwrap().thresholds,
            Thresholds::new(80.0, 90.0)
        );
    }

    #[test]
    fn test_at_least_only_raises() {
        let eval = Evaluation::new(CheckStatus::Critical, "x").at_least(CheckStatus::Warning);
        assert_eq!(eval.status, CheckStatus::Critical);
        let eval = Evaluation::new(CheckStatus::Ok, "x").at_least(CheckStatus::Warning);
        assert_eq!(eval.status, CheckStatus::Warning);
    }
}
