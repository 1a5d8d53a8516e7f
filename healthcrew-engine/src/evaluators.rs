//! Built-in checks and their output evaluators.
//!
//! Every evaluator parses `--no-headers` table output (or JSON for alerts)
//! and never panics on malformed input; anything it cannot read becomes
//! `Unknown`.

use crate::registry::{CheckDefinition, Evaluation};
use healthcrew_common::{Category, CheckStatus, Thresholds};
use serde::Deserialize;

/// Findings listed per check before the rest are summarised.
const MAX_FINDINGS: usize = 10;

pub fn builtin_checks() -> Vec<CheckDefinition> {
    vec![
        // Infrastructure
        CheckDefinition::new(
            "node_health",
            "Node readiness",
            Category::Infrastructure,
            "oc get nodes --no-headers",
            eval_node_health,
        )
        .thresholds(Thresholds::new(0.0, 1.0))
        .describe("Nodes not in Ready state"),
        CheckDefinition::new(
            "cluster_operators",
            "Cluster operators",
            Category::Infrastructure,
            "oc get clusteroperators --no-headers",
            eval_cluster_operators,
        )
        .thresholds(Thresholds::new(0.0, 2.0))
        .describe("Operators unavailable or degraded"),
        CheckDefinition::new(
            "machine_config",
            "Machine config pools",
            Category::Infrastructure,
            "oc get mcp --no-headers",
            eval_machine_config,
        )
        .thresholds(Thresholds::new(0.0, 1.0))
        .describe("Degraded machine config pools"),
        CheckDefinition::new(
            "etcd_health",
            "etcd members",
            Category::Infrastructure,
            "oc get pods -n openshift-etcd -l app=etcd --no-headers",
            eval_etcd,
        )
        .thresholds(Thresholds::new(0.0, 1.0))
        .describe("etcd member pods not running and ready"),
        // Workloads
        CheckDefinition::new(
            "pod_health",
            "Pod health",
            Category::Workloads,
            "oc get pods -A --no-headers --field-selector=status.phase!=Running,status.phase!=Succeeded",
            eval_pod_health,
        )
        .thresholds(Thresholds::new(0.0, 10.0))
        .describe("Pods outside Running/Succeeded"),
        // Virtualization
        CheckDefinition::new(
            "kubevirt",
            "KubeVirt deployment",
            Category::Virtualization,
            "oc get kubevirt -A --no-headers",
            eval_kubevirt,
        )
        .describe("KubeVirt CR phase"),
        CheckDefinition::new(
            "vmi_health",
            "VM instances",
            Category::Virtualization,
            "oc get vmi -A --no-headers",
            eval_vmi,
        )
        .thresholds(Thresholds::new(0.0, 5.0))
        .describe("VMIs not Running"),
        CheckDefinition::new(
            "vm_migrations",
            "VM migrations",
            Category::Virtualization,
            "oc get vmim -A --no-headers",
            eval_migrations,
        )
        .thresholds(Thresholds::new(0.0, 3.0))
        .describe("Failed live migrations"),
        // Storage
        CheckDefinition::new(
            "pvc_health",
            "PVC binding",
            Category::Storage,
            "oc get pvc -A --no-headers",
            eval_pvc,
        )
        .thresholds(Thresholds::new(0.0, 5.0))
        .describe("PVCs not Bound"),
        CheckDefinition::new(
            "odf_health",
            "ODF pods",
            Category::Storage,
            "oc get pods -n openshift-storage --no-headers",
            eval_odf,
        )
        .thresholds(Thresholds::new(0.0, 3.0))
        .describe("openshift-storage pods not Running/Completed"),
        // Performance
        CheckDefinition::new(
            "node_cpu",
            "Node CPU",
            Category::Performance,
            "oc adm top nodes --no-headers",
            eval_node_cpu,
        )
        .thresholds(Thresholds::new(85.0, 95.0))
        .describe("Highest node CPU utilisation (%)"),
        CheckDefinition::new(
            "node_memory",
            "Node memory",
            Category::Performance,
            "oc adm top nodes --no-headers",
            eval_node_memory,
        )
        .thresholds(Thresholds::new(80.0, 90.0))
        .describe("Highest node memory utilisation (%)"),
        // Security
        CheckDefinition::new(
            "certificates",
            "Pending CSRs",
            Category::Security,
            "oc get csr --no-headers",
            eval_certificates,
        )
        .thresholds(Thresholds::new(0.0, 10.0))
        .describe("Certificate signing requests awaiting approval"),
        // Monitoring
        CheckDefinition::new(
            "alerts",
            "Firing alerts",
            Category::Monitoring,
            "oc -n openshift-monitoring exec -c prometheus prometheus-k8s-0 -- curl -s http://localhost:9090/api/v1/alerts",
            eval_alerts,
        )
        .thresholds(Thresholds::new(0.0, 5.0))
        .describe("Firing Prometheus alerts (Watchdog excluded)"),
    ]
}

/// Non-empty table rows split on whitespace.
pub(crate) fn rows(raw: &str) -> Vec<Vec<&str>> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("No resources found"))
        .map(|l| l.split_whitespace().collect())
        .collect()
}

fn percent(cell: &str) -> Option<f64> {
    cell.strip_suffix('%')?.parse().ok()
}

/// Evaluation for "count the bad rows" checks.
fn count_bad(
    thresholds: &Thresholds,
    total: usize,
    bad: Vec<String>,
    noun: &str,
) -> Evaluation {
    let count = bad.len();
    let summary = if count == 0 {
        format!("{total} {noun} healthy")
    } else {
        format!("{count} of {total} {noun} unhealthy")
    };
    let mut findings: Vec<String> = bad.into_iter().take(MAX_FINDINGS).collect();
    if count > MAX_FINDINGS {
        findings.push(format!("... and {} more", count - MAX_FINDINGS));
    }
    Evaluation::measured(count as f64, thresholds, summary).with_findings(findings)
}

fn short_rows(rows: &[Vec<&str>], min_cols: usize) -> bool {
    rows.iter().any(|r| r.len() < min_cols)
}

// NAME STATUS ROLES AGE VERSION
pub fn eval_node_health(raw: &str, thresholds: &Thresholds) -> Evaluation {
    let rows = rows(raw);
    if rows.is_empty() {
        return Evaluation::unknown("no nodes returned");
    }
    if short_rows(&rows, 2) {
        return Evaluation::unknown("unrecognised node listing");
    }
    let bad = rows
        .iter()
        .filter(|r| r[1].split(',').next() != Some("Ready"))
        .map(|r| format!("{}: {}", r[0], r[1]))
        .collect();
    let mut eval = count_bad(thresholds, rows.len(), bad, "nodes");
    let cordoned: Vec<String> = rows
        .iter()
        .filter(|r| r[1].contains("SchedulingDisabled"))
        .map(|r| format!("{}: scheduling disabled", r[0]))
        .collect();
    eval.findings.extend(cordoned);
    eval
}

// NAME VERSION AVAILABLE PROGRESSING DEGRADED SINCE [MESSAGE]
pub fn eval_cluster_operators(raw: &str, thresholds: &Thresholds) -> Evaluation {
    let rows = rows(raw);
    if rows.is_empty() {
        return Evaluation::unknown("no cluster operators returned");
    }
    let mut unavailable = false;
    let mut bad = Vec::new();
    for row in &rows {
        let Some((available, degraded)) = parse_operator_row(row) else {
            return Evaluation::unknown("unrecognised operator listing");
        };
        if available != "True" {
            unavailable = true;
            bad.push(format!("{}: unavailable", row[0]));
        } else if degraded == "True" {
            bad.push(format!("{}: degraded", row[0]));
        }
    }
    let eval = count_bad(thresholds, rows.len(), bad, "operators");
    if unavailable {
        eval.at_least(CheckStatus::Critical)
    } else {
        eval
    }
}

/// Locate AVAILABLE/DEGRADED by the first run of three condition cells;
/// VERSION may be blank while an operator installs.
fn parse_operator_row(row: &[&str]) -> Option<(String, String)> {
    let is_bool = |s: &str| s == "True" || s == "False" || s == "Unknown";
    row.windows(3)
        .position(|w| w.iter().all(|c| is_bool(c)))
        .map(|i| (row[i].to_string(), row[i + 2].to_string()))
}

// NAME CONFIG UPDATED UPDATING DEGRADED MACHINECOUNT ...
pub fn eval_machine_config(raw: &str, thresholds: &Thresholds) -> Evaluation {
    let rows = rows(raw);
    if rows.is_empty() {
        return Evaluation::unknown("no machine config pools returned");
    }
    if short_rows(&rows, 5) {
        return Evaluation::unknown("unrecognised machine config pool listing");
    }
    let bad = rows
        .iter()
        .filter(|r| r[4] == "True")
        .map(|r| format!("{}: degraded", r[0]))
        .collect();
    let mut eval = count_bad(thresholds, rows.len(), bad, "pools");
    eval.findings.extend(
        rows.iter()
            .filter(|r| r[3] == "True")
            .map(|r| format!("{}: updating", r[0])),
    );
    eval
}

/// `READY` column `x/y` with x == y.
pub(crate) fn fully_ready(cell: &str) -> bool {
    match cell.split_once('/') {
        Some((ready, total)) => ready == total && ready != "0",
        None => false,
    }
}

// NAME READY STATUS RESTARTS AGE
fn pods_not_running(raw: &str, thresholds: &Thresholds, noun: &str, empty: Option<&str>) -> Evaluation {
    let rows = rows(raw);
    if rows.is_empty()
        && let Some(message) = empty
    {
        return Evaluation::unknown(message);
    }
    if short_rows(&rows, 3) {
        return Evaluation::unknown(format!("unrecognised {noun} listing"));
    }
    let bad = rows
        .iter()
        .filter(|r| !(r[2] == "Completed" || (r[2] == "Running" && fully_ready(r[1]))))
        .map(|r| format!("{}: {} ({})", r[0], r[2], r[1]))
        .collect();
    count_bad(thresholds, rows.len(), bad, noun)
}

pub fn eval_etcd(raw: &str, thresholds: &Thresholds) -> Evaluation {
    pods_not_running(raw, thresholds, "etcd members", Some("no etcd pods found"))
}

pub fn eval_odf(raw: &str, thresholds: &Thresholds) -> Evaluation {
    pods_not_running(
        raw,
        thresholds,
        "storage pods",
        Some("ODF not installed (no openshift-storage pods)"),
    )
}

// NAMESPACE NAME READY STATUS RESTARTS AGE, pre-filtered to non-running pods
pub fn eval_pod_health(raw: &str, thresholds: &Thresholds) -> Evaluation {
    let rows = rows(raw);
    if short_rows(&rows, 4) {
        return Evaluation::unknown("unrecognised pod listing");
    }
    let bad: Vec<String> = rows
        .iter()
        .map(|r| format!("{}/{}: {}", r[0], r[1], r[3]))
        .collect();
    let total = bad.len();
    let mut eval = count_bad(thresholds, total, bad, "problem pods");
    if total == 0 {
        eval.summary = "all pods running or completed".to_string();
    }
    eval
}

// NAMESPACE NAME AGE PHASE
pub fn eval_kubevirt(raw: &str, _thresholds: &Thresholds) -> Evaluation {
    let rows = rows(raw);
    let Some(row) = rows.first() else {
        return Evaluation::unknown("KubeVirt not installed");
    };
    let Some(phase) = row.get(3) else {
        return Evaluation::unknown("unrecognised KubeVirt listing");
    };
    if *phase == "Deployed" {
        Evaluation::new(CheckStatus::Ok, "KubeVirt deployed")
    } else {
        Evaluation::new(CheckStatus::Critical, format!("KubeVirt phase {phase}"))
            .with_findings(vec![format!("{}/{}: {}", row[0], row[1], phase)])
    }
}

// NAMESPACE NAME AGE PHASE IP NODENAME READY
pub fn eval_vmi(raw: &str, thresholds: &Thresholds) -> Evaluation {
    let rows = rows(raw);
    if short_rows(&rows, 4) {
        return Evaluation::unknown("unrecognised VMI listing");
    }
    let bad = rows
        .iter()
        .filter(|r| r[3] != "Running")
        .map(|r| format!("{}/{}: {}", r[0], r[1], r[3]))
        .collect();
    count_bad(thresholds, rows.len(), bad, "VMIs")
}

// NAMESPACE NAME PHASE VMI
pub fn eval_migrations(raw: &str, thresholds: &Thresholds) -> Evaluation {
    let rows = rows(raw);
    if short_rows(&rows, 3) {
        return Evaluation::unknown("unrecognised migration listing");
    }
    let bad = rows
        .iter()
        .filter(|r| r[2] == "Failed")
        .map(|r| format!("{}/{}: {}", r[0], r[1], r.get(3).unwrap_or(&"-")))
        .collect();
    count_bad(thresholds, rows.len(), bad, "migrations")
}

// NAMESPACE NAME STATUS VOLUME ...
pub fn eval_pvc(raw: &str, thresholds: &Thresholds) -> Evaluation {
    let rows = rows(raw);
    if short_rows(&rows, 3) {
        return Evaluation::unknown("unrecognised PVC listing");
    }
    let bad = rows
        .iter()
        .filter(|r| r[2] != "Bound")
        .map(|r| format!("{}/{}: {}", r[0], r[1], r[2]))
        .collect();
    count_bad(thresholds, rows.len(), bad, "PVCs")
}

// NAME CPU(cores) CPU% MEMORY(bytes) MEMORY%
fn max_percent(raw: &str, thresholds: &Thresholds, column: usize, what: &str) -> Evaluation {
    let rows = rows(raw);
    if rows.is_empty() {
        return Evaluation::unknown("no node metrics returned");
    }
    let mut samples = Vec::with_capacity(rows.len());
    for row in &rows {
        match row.get(column).and_then(|c| percent(c)) {
            Some(value) => samples.push((row[0], value)),
            None => return Evaluation::unknown(format!("unparseable {what} value on {}", row[0])),
        }
    }
    let (hottest, peak) = samples
        .iter()
        .copied()
        .fold(("", f64::MIN), |acc, s| if s.1 > acc.1 { s } else { acc });
    let findings = samples
        .iter()
        .filter(|(_, v)| thresholds.crossing(*v).is_some())
        .map(|(node, v)| format!("{node}: {what} {v:.0}%"))
        .collect();
    Evaluation::measured(peak, thresholds, format!("peak {what} {peak:.0}% on {hottest}"))
        .with_findings(findings)
}

pub fn eval_node_cpu(raw: &str, thresholds: &Thresholds) -> Evaluation {
    max_percent(raw, thresholds, 2, "CPU")
}

pub fn eval_node_memory(raw: &str, thresholds: &Thresholds) -> Evaluation {
    max_percent(raw, thresholds, 4, "memory")
}

// NAME AGE SIGNERNAME REQUESTOR [REQUESTEDDURATION] CONDITION
pub fn eval_certificates(raw: &str, thresholds: &Thresholds) -> Evaluation {
    let rows = rows(raw);
    let bad = rows
        .iter()
        .filter(|r| r.last() == Some(&"Pending"))
        .map(|r| format!("{}: pending approval", r[0]))
        .collect();
    count_bad(thresholds, rows.len(), bad, "CSRs")
}

#[derive(Debug, Deserialize)]
struct AlertsResponse {
    data: AlertsData,
}

#[derive(Debug, Deserialize)]
struct AlertsData {
    #[serde(default)]
    alerts: Vec<PromAlert>,
}

#[derive(Debug, Deserialize)]
struct PromAlert {
    #[serde(default)]
    labels: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    state: String,
}

const IGNORED_ALERTS: &[&str] = &["Watchdog", "AlertmanagerReceiversNotConfigured"];

pub fn eval_alerts(raw: &str, thresholds: &Thresholds) -> Evaluation {
    let Ok(response) = serde_json::from_str::<AlertsResponse>(raw.trim()) else {
        return Evaluation::unknown("alerts endpoint did not return JSON");
    };
    let firing: Vec<&PromAlert> = response
        .data
        .alerts
        .iter()
        .filter(|a| a.state == "firing")
        .filter(|a| {
            a.labels
                .get("alertname")
                .is_none_or(|n| !IGNORED_ALERTS.contains(&n.as_str()))
        })
        .collect();

    let critical = firing
        .iter()
        .any(|a| a.labels.get("severity").map(String::as_str) == Some("critical"));
    let mut findings: Vec<String> = firing
        .iter()
        .map(|a| {
            format!(
                "{} ({})",
                a.labels.get("alertname").map(String::as_str).unwrap_or("unnamed"),
                a.labels.get("severity").map(String::as_str).unwrap_or("none")
            )
        })
        .collect();
    findings.sort();
    findings.dedup();

    let eval = Evaluation::measured(
        firing.len() as f64,
        thresholds,
        format!("{} alerts firing", firing.len()),
    )
    .with_findings(findings);
    if critical {
        eval.at_least(CheckStatus::Critical)
    } else {
        eval
    }
}
