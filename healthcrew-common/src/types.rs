//! Core vocabulary shared across HealthCrew crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Grouping of health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Nodes, operators, etcd, machine config.
    Infrastructure,
    /// Pods and controllers.
    Workloads,
    /// KubeVirt, VMIs, migrations.
    Virtualization,
    /// PVCs, CSI drivers, ODF.
    Storage,
    /// CPU and memory pressure.
    Performance,
    /// Certificates and secrets.
    Security,
    /// Prometheus alerting.
    Monitoring,
}

impl Category {
    /// All categories in report order.
    pub const ALL: [Category; 7] = [
        Category::Infrastructure,
        Category::Workloads,
        Category::Virtualization,
        Category::Storage,
        Category::Performance,
        Category::Security,
        Category::Monitoring,
    ];

    /// Human-readable name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Infrastructure => "Infrastructure",
            Self::Workloads => "Workloads",
            Self::Virtualization => "Virtualization",
            Self::Storage => "Storage",
            Self::Performance => "Performance",
            Self::Security => "Security",
            Self::Monitoring => "Monitoring",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown category '{}'", s))
    }
}

/// Outcome of a single check.
///
/// Variant order is the severity order used to aggregate a build status:
/// `Ok < Unknown < Warning < Critical < Error`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    #[default]
    Ok,
    /// Output could not be parsed.
    Unknown,
    Warning,
    Critical,
    /// The command itself failed or was rejected.
    Error,
}

impl CheckStatus {
    /// Worst status of the iterator, `None` if it is empty.
    pub fn worst<I>(statuses: I) -> Option<CheckStatus>
    where
        I: IntoIterator<Item = CheckStatus>,
    {
        statuses.into_iter().max()
    }

    /// Whether this status should be treated as a failure worth analysing.
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Ok)
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Unknown => "unknown",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Severity of an alert raised by a threshold crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl From<AlertSeverity> for CheckStatus {
    fn from(severity: AlertSeverity) -> Self {
        match severity {
            AlertSeverity::Warning => CheckStatus::Warning,
            AlertSeverity::Critical => CheckStatus::Critical,
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => f.write_str("warning"),
            Self::Critical => f.write_str("critical"),
        }
    }
}

/// Warning and critical thresholds for a check metric.
///
/// A threshold is crossed when `metric > threshold`. Either bound may be
/// absent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical: Option<f64>,
}

impl Thresholds {
    pub const fn new(warning: f64, critical: f64) -> Self {
        Self {
            warning: Some(warning),
            critical: Some(critical),
        }
    }

    pub const fn none() -> Self {
        Self {
            warning: None,
            critical: None,
        }
    }

    /// The highest severity crossed by `metric`, with the crossed bound.
    pub fn crossing(&self, metric: f64) -> Option<(AlertSeverity, f64)> {
        if let Some(critical) = self.critical
            && metric > critical
        {
            return Some((AlertSeverity::Critical, critical));
        }
        if let Some(warning) = self.warning
            && metric > warning
        {
            return Some((AlertSeverity::Warning, warning));
        }
        None
    }

    /// Map a metric onto the `Ok < Warning < Critical` lattice.
    pub fn classify(&self, metric: f64) -> CheckStatus {
        self.crossing(metric)
            .map(|(severity, _)| severity.into())
            .unwrap_or(CheckStatus::Ok)
    }

    /// Apply the bounds that `other` sets, keeping ours elsewhere.
    pub fn overridden_by(&self, other: &Thresholds) -> Thresholds {
        Thresholds {
            warning: other.warning.or(self.warning),
            critical: other.critical.or(self.critical),
        }
    }
}

/// Result of running one check in one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check_id: String,
    pub name: String,
    pub category: Category,
    /// Command as submitted (before environment injection).
    pub command: String,
    pub raw_output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<f64>,
    pub status: CheckStatus,
    /// One-line summary produced by the evaluator or the failure path.
    pub summary: String,
    /// Offending lines picked out of the output.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

impl CheckResult {
    /// Text used to match this result against known issues.
    pub fn failure_text(&self) -> String {
        let mut text = format!("{} {} {}", self.check_id, self.status, self.summary);
        for finding in &self.findings {
            text.push(' ');
            text.push_str(finding);
        }
        if !self.stderr.is_empty() {
            text.push(' ');
            text.push_str(&self.stderr);
        }
        text
    }
}

/// Alert derived from a check result crossing a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub check_id: String,
    pub category: Category,
    pub severity: AlertSeverity,
    pub metric: f64,
    pub threshold: f64,
    pub message: String,
}

/// Where a piece of knowledge came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeSource {
    Bug,
    Email,
    Web,
    /// Derived from failures observed in previous builds.
    Learned,
}

impl KnowledgeSource {
    /// Confidence assigned to a brand new entry from this source.
    pub const fn initial_confidence(&self) -> f64 {
        match self {
            Self::Bug => 0.6,
            Self::Email => 0.4,
            Self::Web => 0.3,
            Self::Learned => 0.5,
        }
    }
}

impl fmt::Display for KnowledgeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bug => f.write_str("bug"),
            Self::Email => f.write_str("email"),
            Self::Web => f.write_str("web"),
            Self::Learned => f.write_str("learned"),
        }
    }
}
