//! Subcommand handlers. Each returns the process exit code.

use crate::{KnowledgeCommand, RunArgs, wiring};
use anyhow::{Context, Result, bail};
use healthcrew_common::{CheckStatus, ErrorCode, Settings};
use healthcrew_engine::history::DEFAULT_CAPACITY;
use healthcrew_engine::knowledge::{IssueTrends, KnowledgeStats};
use healthcrew_engine::{
    Build, BuildHistory, BuildPhase, BuildRecord, BuildRequest, RawItem,
};
use serde::Serialize;
use tracing::{info, warn};

/// Exit codes for `run`.
pub const EXIT_HEALTHY: i32 = 0;
pub const EXIT_UNHEALTHY: i32 = 1;
pub const EXIT_BUILD_FAILED: i32 = 2;

pub fn exit_code(build: &Build) -> i32 {
    if build.phase == BuildPhase::Failed {
        return EXIT_BUILD_FAILED;
    }
    match build.overall_status {
        Some(status) if status >= CheckStatus::Critical => EXIT_UNHEALTHY,
        _ => EXIT_HEALTHY,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── run ──────────────────────────────────────────────────────────────────

impl RunArgs {
    fn request(&self, host: &str) -> BuildRequest {
        BuildRequest {
            checks: self.checks.clone(),
            enable_deep_analysis: self.deep,
            bug_matching_only: self.bug_matching_only,
            search_external_bugs: self.search_bugs,
            enable_knowledge_scan: self.knowledge_scan,
            target_host: Some(host.to_string()),
        }
    }
}

#[cfg(unix)]
pub async fn run(settings: &Settings, args: RunArgs, json: bool) -> Result<i32> {
    use healthcrew_engine::{
        BuildRunner, FileReportSink, Orchestrator, SessionFactory, SshSessionFactory,
    };
    use std::sync::Arc;

    let Some(host) = args.host.clone().or_else(|| settings.host.value.clone()) else {
        bail!("{}: pass --host or set HEALTHCREW_HOST", ErrorCode::ConfigMissingHost);
    };

    let registry = Arc::new(wiring::registry(settings)?);
    let knowledge = Arc::new(wiring::knowledge(settings)?);
    let rca = wiring::correlator(settings, &knowledge)?;
    let sink = Arc::new(FileReportSink::new(settings.reports_dir.value.clone()));
    let orchestrator = Arc::new(Orchestrator::new(registry, knowledge, rca, sink));

    let sessions: Arc<dyn SessionFactory> =
        Arc::new(SshSessionFactory::new(wiring::session_config(settings, &host)?));
    let history_path = &settings.history_file.value;
    let history = BuildHistory::open(history_path, DEFAULT_CAPACITY)
        .with_context(|| format!("opening build history {}", history_path.display()))?;
    let runner = BuildRunner::new(
        orchestrator,
        sessions,
        host.clone(),
        settings.max_concurrent_builds.value as usize,
    )
    .with_history(Arc::new(history));

    let handle = runner.submit(args.request(&host));
    let id = handle.id;
    let wait = handle.wait();
    tokio::pin!(wait);
    let build = tokio::select! {
        finished = &mut wait => finished?,
        _ = tokio::signal::ctrl_c() => {
            warn!(build = %id, "Interrupted, cancelling build after the current check");
            runner.cancel(id);
            wait.await?
        }
    };

    info!(build = %build.short_id(), phase = %build.phase, "Build complete");
    if json {
        print_json(&build)?;
    } else {
        print_build(&build);
    }
    Ok(exit_code(&build))
}

#[cfg(not(unix))]
pub async fn run(_settings: &Settings, _args: RunArgs, _json: bool) -> Result<i32> {
    bail!("the SSH transport is only available on Unix hosts")
}

fn print_build(build: &Build) {
    let status = build
        .overall_status
        .map(|s| s.label().to_uppercase())
        .unwrap_or_else(|| "NO RESULTS".to_string());
    println!("Build {} on {}: {} ({})", build.short_id(), build.host, build.phase, status);

    for r in &build.results {
        println!("  {:<8} {:<20} {}", r.status.label(), r.check_id, r.summary);
    }
    for alert in &build.alerts {
        println!("  alert [{}] {}", alert.severity, alert.message);
    }
    for report in &build.rca {
        if let Some(best) = report.best() {
            println!("  rca {}: {} ({:.2}, {})", report.check_id, best.title, best.score, best.source);
        }
    }
    for inv in &build.investigations {
        println!(
            "  investigated {} {}: {} ({})",
            inv.kind, inv.subject, inv.root_cause.title, inv.root_cause.confidence
        );
    }
    for s in &build.suggestions {
        println!("  suggested check {}: {}", s.id, s.proposed_command.as_deref().unwrap_or_default());
    }
    if let Some(diag) = &build.diagnostic {
        println!("\n[{}] {} during {}: {}", diag.code, diag.what, diag.phase, diag.why);
        for step in &diag.remediation {
            println!("  - {step}");
        }
    }
    if let Some(reference) = &build.report_ref {
        println!("\nReport: {reference}");
    }
}

// ── checks ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct CheckRow<'a> {
    id: &'a str,
    name: &'a str,
    category: String,
    enabled: bool,
    warning: Option<f64>,
    critical: Option<f64>,
    command: &'a str,
}

pub fn checks(settings: &Settings, json: bool) -> Result<i32> {
    let registry = wiring::registry(settings)?;
    let rows: Vec<CheckRow<'_>> = registry
        .iter()
        .map(|c| CheckRow {
            id: &c.id,
            name: &c.name,
            category: c.category.to_string(),
            enabled: c.enabled,
            warning: c.thresholds.warning,
            critical: c.thresholds.critical,
            command: &c.command,
        })
        .collect();

    if json {
        print_json(&rows)?;
        return Ok(0);
    }
    let bound = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_else(|| "-".into());
    for row in &rows {
        println!(
            "{:<18} {:<15} warn {:>5} crit {:>5}{}",
            row.id,
            row.category,
            bound(row.warning),
            bound(row.critical),
            if row.enabled { "" } else { "  (disabled)" }
        );
    }
    Ok(0)
}

// ── knowledge ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct StatsView<'a> {
    #[serde(flatten)]
    stats: &'a KnowledgeStats,
    trends: &'a IssueTrends,
}

pub fn knowledge(settings: &Settings, action: KnowledgeCommand, json: bool) -> Result<i32> {
    let kb = wiring::knowledge(settings)?;
    match action {
        KnowledgeCommand::Suggest {
            min_occurrences,
            min_confidence,
            mark,
        } => {
            let candidates = kb.suggest_checks(min_occurrences, min_confidence);
            if mark {
                for c in candidates.iter().filter(|c| !c.already_suggested) {
                    kb.mark_suggested(&c.signature)?;
                }
            }
            if json {
                print_json(&candidates)?;
            } else if candidates.is_empty() {
                println!("No recurring issues above the thresholds.");
            } else {
                for c in &candidates {
                    let flag = if c.already_suggested { " (proposed)" } else { "" };
                    println!("{}{flag}\n  {}\n  $ {}", c.id, c.rationale, c.proposed_command.as_deref().unwrap_or_default());
                }
            }
        }
        KnowledgeCommand::Stats { days } => {
            let stats = kb.stats();
            let trends = kb.issue_trends(days);
            if json {
                print_json(&StatsView {
                    stats: &stats,
                    trends: &trends,
                })?;
            } else {
                println!(
                    "{} entries, {} recurring, {} proposed, {} fixes recorded, mean confidence {:.2}",
                    stats.entries,
                    stats.recurring,
                    stats.suggested,
                    stats.fixes_recorded,
                    stats.mean_confidence
                );
                for (source, count) in &stats.by_source {
                    println!("  {source:<8} {count}");
                }
                println!("\nLast {} days: {} sightings", trends.period_days, trends.total);
                for (component, count) in &trends.by_component {
                    println!("  {component:<16} {count}");
                }
                for (signature, count) in &trends.top_signatures {
                    println!("  {count:>4}  {signature}");
                }
            }
        }
        KnowledgeCommand::Fix {
            signature,
            description,
            failed,
        } => {
            if !kb.record_fix(&signature, &description, !failed)? {
                bail!("no knowledge entry with signature '{signature}'");
            }
            match kb.suggested_fix(&signature) {
                Some(best) if json => print_json(&best)?,
                Some(best) => println!(
                    "Recorded. Best fix for {signature}: {} ({:.0}% of {} attempts worked)",
                    best.fix,
                    best.success_rate * 100.0,
                    best.times_tried
                ),
                None => println!("Recorded."),
            }
        }
        KnowledgeCommand::Ingest { file, source } => {
            let items = read_items(&file)?;
            let summary = kb.ingest(source.into(), &items)?;
            if json {
                print_json(&summary)?;
            } else {
                println!(
                    "{} created, {} reinforced, {} skipped (no error keywords)",
                    summary.created, summary.reinforced, summary.skipped
                );
            }
        }
        KnowledgeCommand::Compact => {
            kb.compact()?;
            println!("Compacted {} entries", kb.len());
        }
    }
    Ok(0)
}

/// A JSON array of items, or of plain strings.
pub fn read_items(path: &std::path::Path) -> Result<Vec<RawItem>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    if let Ok(items) = serde_json::from_str::<Vec<RawItem>>(&raw) {
        return Ok(items);
    }
    let texts: Vec<String> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of items", path.display()))?;
    Ok(texts.into_iter().map(RawItem::new).collect())
}

// ── history ──────────────────────────────────────────────────────────────

pub fn history(
    settings: &Settings,
    limit: usize,
    host: Option<&str>,
    stats: bool,
    json: bool,
) -> Result<i32> {
    let path = &settings.history_file.value;
    let history = BuildHistory::open(path, DEFAULT_CAPACITY)
        .with_context(|| format!("opening build history {}", path.display()))?;

    if stats {
        let stats = history.stats();
        if json {
            print_json(&stats)?;
        } else {
            println!(
                "{} builds: {} done, {} failed, avg {:.1}s",
                stats.total_builds,
                stats.done_count,
                stats.failed_count,
                stats.avg_duration_ms as f64 / 1000.0
            );
            for (status, count) in &stats.by_status {
                println!("  {status:<8} {count}");
            }
        }
        return Ok(0);
    }

    let records: Vec<BuildRecord> = history.recent(limit, host);
    if json {
        print_json(&records)?;
    } else if records.is_empty() {
        println!("No builds recorded.");
    } else {
        for r in &records {
            let status = r.overall_status.map(|s| s.label()).unwrap_or("-");
            println!(
                "{} {} {:<16} {:<7} {:<8} {} checks{}",
                r.started_at.format("%Y-%m-%d %H:%M"),
                &r.id.to_string()[..8],
                r.host,
                r.phase,
                status,
                r.checks_run,
                r.error_code
                    .as_deref()
                    .map(|c| format!("  [{c}]"))
                    .unwrap_or_default()
            );
        }
    }
    Ok(0)
}

// ── config ───────────────────────────────────────────────────────────────

pub fn config(settings: &Settings, json: bool) -> Result<i32> {
    let rows = settings.describe();
    if json {
        let map: serde_json::Map<String, serde_json::Value> = rows
            .iter()
            .map(|(name, value, source)| {
                (
                    name.to_string(),
                    serde_json::json!({ "value": value, "source": source }),
                )
            })
            .collect();
        print_json(&map)?;
    } else {
        for (name, value, source) in rows {
            println!("{name:<22} {value:<45} ({source})");
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthcrew_engine::Diagnostic;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_exit_codes() {
        let mut failed = Build::new(BuildRequest::default(), "h");
        failed.fail(Diagnostic::from_code(
            ErrorCode::SessionConnectFailed,
            BuildPhase::Connecting,
            "refused",
        ));
        assert_eq!(exit_code(&failed), EXIT_BUILD_FAILED);

        let mut done = Build::new(BuildRequest::default(), "h");
        done.phase = BuildPhase::Done;
        done.overall_status = Some(CheckStatus::Warning);
        assert_eq!(exit_code(&done), EXIT_HEALTHY);
        done.overall_status = Some(CheckStatus::Error);
        assert_eq!(exit_code(&done), EXIT_UNHEALTHY);
    }

    #[test]
    fn test_read_items_accepts_objects_and_strings() {
        let mut objects = NamedTempFile::new().unwrap();
        write!(
            objects,
            r#"[{{"text": "etcd leader lost", "reference": "BZ-1"}}]"#
        )
        .unwrap();
        let items = read_items(objects.path()).unwrap();
        assert_eq!(items[0].reference.as_deref(), Some("BZ-1"));

        let mut strings = NamedTempFile::new().unwrap();
        write!(strings, r#"["pod CrashLoopBackOff", "pvc Pending"]"#).unwrap();
        assert_eq!(read_items(strings.path()).unwrap().len(), 2);

        let mut bad = NamedTempFile::new().unwrap();
        write!(bad, "{{}}").unwrap();
        assert!(read_items(bad.path()).is_err());
    }

    #[test]
    fn test_request_carries_flags() {
        let args = RunArgs {
            checks: vec!["etcd_health".into()],
            deep: true,
            knowledge_scan: true,
            ..RunArgs::default()
        };
        let request = args.request("bastion.lab");
        assert!(request.enable_deep_analysis && request.enable_knowledge_scan);
        assert!(!request.search_external_bugs);
        assert_eq!(request.target_host.as_deref(), Some("bastion.lab"));
    }
}
