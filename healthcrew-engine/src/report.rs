//! Report delivery.
//!
//! The orchestrator hands the finished build record to a [`ReportSink`] and
//! stores the returned reference on the build.

use crate::build::Build;
use crate::error::BuildError;
use async_trait::async_trait;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Deliver `build` and return a reference to the artifact.
    async fn deliver(&self, build: &Build) -> Result<String, BuildError>;
}

/// Writes `build-<id>.json` and `build-<id>.md` into a directory.
#[derive(Debug, Clone)]
pub struct FileReportSink {
    dir: PathBuf,
}

impl FileReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn paths(&self, build: &Build) -> (PathBuf, PathBuf) {
        let stem = format!("build-{}", build.id);
        (
            self.dir.join(format!("{stem}.json")),
            self.dir.join(format!("{stem}.md")),
        )
    }
}

#[async_trait]
impl ReportSink for FileReportSink {
    async fn deliver(&self, build: &Build) -> Result<String, BuildError> {
        let report_err = |e: std::io::Error| BuildError::Report(format!("{}: {e}", self.dir.display()));
        tokio::fs::create_dir_all(&self.dir).await.map_err(report_err)?;

        let (json_path, md_path) = self.paths(build);
        let json = serde_json::to_vec_pretty(build).map_err(|e| BuildError::Report(e.to_string()))?;
        tokio::fs::write(&json_path, json).await.map_err(report_err)?;
        tokio::fs::write(&md_path, render_markdown(build))
            .await
            .map_err(report_err)?;

        info!(build = %build.short_id(), path = %json_path.display(), "Report written");
        Ok(json_path.display().to_string())
    }
}

/// Keeps delivered builds in memory.
#[derive(Debug, Default)]
pub struct MemoryReportSink {
    delivered: Mutex<Vec<Build>>,
}

impl MemoryReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Build> {
        self.delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ReportSink for MemoryReportSink {
    async fn deliver(&self, build: &Build) -> Result<String, BuildError> {
        self.delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(build.clone());
        Ok(format!("memory:{}", build.id))
    }
}

/// Human-readable summary of a build.
pub fn render_markdown(build: &Build) -> String {
    let mut out = String::new();
    let status = build
        .overall_status
        .or_else(|| build.current_status())
        .map(|s| s.label().to_uppercase())
        .unwrap_or_else(|| "NO RESULTS".to_string());

    // Writing into a String cannot fail.
    let _ = writeln!(out, "# Health build {}\n", build.short_id());
    let _ = writeln!(out, "- Host: `{}`", build.host);
    let _ = writeln!(out, "- Phase: {}", build.phase);
    let _ = writeln!(out, "- Overall status: **{status}**");
    if let Some(version) = &build.cluster_version {
        let _ = writeln!(out, "- Cluster version: {version}");
    }
    let _ = writeln!(out, "- Started: {}", build.started_at.to_rfc3339());
    if let Some(ms) = build.duration_ms() {
        let _ = writeln!(out, "- Duration: {:.1}s", ms as f64 / 1000.0);
    }
    if build.cancelled {
        let _ = writeln!(out, "- Cancelled before all checks ran");
    }

    if let Some(diag) = &build.diagnostic {
        let _ = writeln!(out, "\n## Failure [{}]\n", diag.code);
        let _ = writeln!(out, "{} during {}.\n", diag.what, diag.phase);
        let _ = writeln!(out, "Cause: {}\n", diag.why);
        for step in &diag.remediation {
            let _ = writeln!(out, "- {step}");
        }
    }

    if !build.results.is_empty() {
        let _ = writeln!(out, "\n## Checks\n");
        let _ = writeln!(out, "| Check | Category | Status | Metric | Summary |");
        let _ = writeln!(out, "|---|---|---|---|---|");
        for r in &build.results {
            let metric = r.metric.map(|m| format!("{m}")).unwrap_or_default();
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                r.name,
                r.category,
                r.status,
                metric,
                r.summary.replace('|', "\\|")
            );
        }
    }

    if !build.alerts.is_empty() {
        let _ = writeln!(out, "\n## Alerts\n");
        for alert in &build.alerts {
            let _ = writeln!(out, "- [{}] {}", alert.severity, alert.message);
        }
    }

    if !build.rca.is_empty() {
        let _ = writeln!(out, "\n## Root cause candidates\n");
        for report in &build.rca {
            let _ = writeln!(out, "### {}\n", report.check_id);
            for c in &report.candidates {
                let _ = write!(out, "- ({:.2}) {} [{}]: {}", c.score, c.title, c.source, c.explanation);
                if let Some(reference) = &c.reference {
                    let _ = write!(out, " ({reference})");
                }
                out.push('\n');
            }
            for miss in &report.unavailable {
                let _ = writeln!(out, "- source unavailable: {} ({})", miss.source, miss.reason);
            }
        }
    }

    if !build.investigations.is_empty() {
        let _ = writeln!(out, "\n## Investigations\n");
        for inv in &build.investigations {
            let _ = writeln!(out, "### {} `{}` ({})\n", inv.kind, inv.subject, inv.check_id);
            let _ = writeln!(
                out,
                "Root cause: **{}** ({} confidence). {}\n",
                inv.root_cause.title, inv.root_cause.confidence, inv.root_cause.explanation
            );
            if !inv.shared_with.is_empty() {
                let _ = writeln!(out, "Also affects: {}\n", inv.shared_with.join(", "));
            }
            for s in &inv.steps {
                let _ = writeln!(out, "- {}: `{}`\n\n```\n{}\n```", s.description, s.command, s.output);
            }
            if let Some(reason) = &inv.interrupted {
                let _ = writeln!(out, "- stopped early: {reason}");
            }
        }
    }

    if !build.knowledge_matches.is_empty() {
        let _ = writeln!(out, "\n## Known issues\n");
        for m in &build.knowledge_matches {
            let _ = writeln!(
                out,
                "- {} ({}, score {:.2}, confidence {:.2}): {}",
                m.signature, m.source, m.score, m.confidence, m.description
            );
            if let Some(fix) = &m.fix {
                let _ = writeln!(
                    out,
                    "  - fix: {} ({:.0}% of {} attempts worked)",
                    fix.fix,
                    fix.success_rate * 100.0,
                    fix.times_tried
                );
            }
        }
    }

    if !build.suggestions.is_empty() {
        let _ = writeln!(out, "\n## Suggested checks (needs approval)\n");
        for s in &build.suggestions {
            let _ = writeln!(out, "- `{}`: {}", s.id, s.rationale);
        }
    }

    if !build.recovery_events.is_empty() {
        let _ = writeln!(out, "\n## Session recoveries\n");
        for e in &build.recovery_events {
            let _ = writeln!(out, "- {} `{}`: {}", e.at.to_rfc3339(), e.command, e.trigger);
        }
    }
    out
}
