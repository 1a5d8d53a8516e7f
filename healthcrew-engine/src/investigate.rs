//! Follow-up diagnostics for failing checks.
//!
//! Failing results are broken down into symptoms (a crash-looping pod, a
//! failed migration, an unhealthy etcd member). One representative per
//! symptom kind gets a short list of read-only commands run against it, and
//! the collected output is matched against root-cause rules.
//!
//! Every command still goes through the session's validator. Names lifted
//! from cluster output are only substituted when they are valid Kubernetes
//! names; a command whose placeholder cannot be filled is skipped.

use crate::build::CancelToken;
use crate::evaluators::{fully_ready, rows};
use crate::session::{CommandEnv, SessionManager};
use healthcrew_common::{CheckResult, truncate_output};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_KINDS: usize = 10;
const MAX_STEP_OUTPUT: usize = 500;
const MAX_STEP_ERROR: usize = 100;
const MAX_NAME_LEN: usize = 253;

// ── Symptoms ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    PodCrashloop,
    PodUnknown,
    VirtHandlerMemory,
    Noobaa,
    Metal3,
    Etcd,
    Migration,
    Csi,
    Oom,
}

impl IssueKind {
    pub const ALL: [IssueKind; 9] = [
        Self::PodCrashloop,
        Self::PodUnknown,
        Self::VirtHandlerMemory,
        Self::Noobaa,
        Self::Metal3,
        Self::Etcd,
        Self::Migration,
        Self::Csi,
        Self::Oom,
    ];

    /// `(description, command template)` pairs run for this kind.
    pub fn commands(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::PodCrashloop => &[
                ("Pod details", "oc describe pod {pod} -n {ns} | tail -30"),
                ("Previous container logs", "oc logs {pod} -n {ns} --previous --tail=50 2>&1"),
                ("Recent namespace events", "oc get events -n {ns} --sort-by=.lastTimestamp | tail -20"),
            ],
            Self::PodUnknown => &[
                ("Pod status", "oc get pod {pod} -n {ns} -o wide"),
                ("Scheduled node", "oc get pod {pod} -n {ns} -o jsonpath='{.spec.nodeName}'"),
                ("Node readiness", "oc get nodes --no-headers | grep -v ' Ready '"),
            ],
            Self::VirtHandlerMemory => &[
                (
                    "virt-handler memory usage",
                    "oc adm top pods -n openshift-cnv --no-headers | grep virt-handler | sort -k3 -h -r | head -5",
                ),
                ("VMI count", "oc get vmi -A --no-headers | wc -l"),
                (
                    "Node memory",
                    "oc exec -n openshift-cnv {pod} -- cat /proc/meminfo | grep -E 'MemTotal|MemFree|MemAvailable' | head -3",
                ),
            ],
            Self::Noobaa => &[
                ("NooBaa status", "oc get noobaa -n openshift-storage"),
                ("NooBaa pods", "oc get pods -n openshift-storage --no-headers | grep noobaa"),
                (
                    "NooBaa events",
                    "oc get events -n openshift-storage --sort-by=.lastTimestamp | grep -i noobaa | tail -10",
                ),
            ],
            Self::Metal3 => &[
                ("metal3 pods", "oc get pods -n openshift-machine-api --no-headers | grep metal3"),
                ("Pod details", "oc describe pod {pod} -n openshift-machine-api | tail -30"),
                (
                    "Container logs",
                    "oc logs {pod} -n openshift-machine-api --all-containers --tail=30 2>&1",
                ),
            ],
            Self::Etcd => &[
                ("etcd pods", "oc get pods -n openshift-etcd -l app=etcd -o wide"),
                (
                    "Endpoint health",
                    "oc exec -n openshift-etcd -c etcdctl {pod} -- etcdctl endpoint health",
                ),
                (
                    "Member list",
                    "oc exec -n openshift-etcd -c etcdctl {pod} -- etcdctl member list -w table",
                ),
            ],
            Self::Migration => &[
                ("Migration details", "oc get vmim {name} -n {ns} -o yaml | tail -40"),
                ("VM status", "oc get vmi {vm} -n {ns} -o wide"),
                (
                    "Migration events",
                    "oc get events -n {ns} --sort-by=.lastTimestamp | grep -i migrat | tail -10",
                ),
            ],
            Self::Csi => &[
                ("CSI pods", "oc get pods -A --no-headers | grep -i csi | grep -v Running"),
                ("CSI drivers", "oc get csidrivers"),
                ("Pod logs", "oc logs {pod} -n {ns} --all-containers --tail=30 2>&1"),
            ],
            Self::Oom => &[
                (
                    "Last termination reason",
                    "oc get pod {pod} -n {ns} -o jsonpath='{.status.containerStatuses[*].lastState.terminated.reason}'",
                ),
                (
                    "Memory limits",
                    "oc get pod {pod} -n {ns} -o jsonpath='{.spec.containers[*].resources.limits.memory}'",
                ),
                ("OOM events", "oc get events -n {ns} | grep -i oom | tail -10"),
            ],
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PodCrashloop => "pod_crashloop",
            Self::PodUnknown => "pod_unknown",
            Self::VirtHandlerMemory => "virt_handler_memory",
            Self::Noobaa => "noobaa",
            Self::Metal3 => "metal3",
            Self::Etcd => "etcd",
            Self::Migration => "migration",
            Self::Csi => "csi",
            Self::Oom => "oom",
        };
        f.write_str(s)
    }
}

/// One concrete problem lifted from a failing result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symptom {
    pub check_id: String,
    pub kind: IssueKind,
    /// `ns/name` of the affected object.
    pub subject: String,
    /// Placeholder values (`pod`, `ns`, `name`, `vm`); only valid names.
    pub context: BTreeMap<&'static str, String>,
}

impl Symptom {
    fn new(check_id: &str, kind: IssueKind, subject: String) -> Self {
        Self {
            check_id: check_id.to_string(),
            kind,
            subject,
            context: BTreeMap::new(),
        }
    }

    fn bind(mut self, key: &'static str, value: &str) -> Self {
        if is_k8s_name(value) {
            self.context.insert(key, value.to_string());
        }
        self
    }

    /// Fill the template, or `None` if a placeholder stays unresolved.
    pub fn render(&self, template: &str) -> Option<String> {
        let mut command = template.to_string();
        for key in ["pod", "ns", "name", "vm"] {
            let placeholder = format!("{{{key}}}");
            if !command.contains(&placeholder) {
                continue;
            }
            command = command.replace(&placeholder, self.context.get(key)?);
        }
        Some(command)
    }
}

fn is_k8s_name(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_NAME_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
        && !value.starts_with(['-', '.'])
}

fn classify_pod(name: &str, status: &str) -> IssueKind {
    if name.contains("noobaa") {
        IssueKind::Noobaa
    } else if name.contains("metal3") {
        IssueKind::Metal3
    } else if name.contains("virt-handler") {
        IssueKind::VirtHandlerMemory
    } else if name.contains("csi") {
        IssueKind::Csi
    } else if status.contains("OOMKilled") {
        IssueKind::Oom
    } else if status.contains("CrashLoop") || status.contains("Error") || status.starts_with("Init:") {
        IssueKind::PodCrashloop
    } else {
        IssueKind::PodUnknown
    }
}

/// Symptoms in result order. Checks with no follow-up recipe yield none.
pub fn symptoms(results: &[CheckResult]) -> Vec<Symptom> {
    let mut found = Vec::new();
    for result in results.iter().filter(|r| r.status.is_failure()) {
        let id = result.check_id.as_str();
        let rows = rows(&result.raw_output);
        match id {
            // NAMESPACE NAME READY STATUS ...
            "pod_health" => {
                for r in rows.iter().filter(|r| r.len() >= 4) {
                    let kind = classify_pod(r[1], r[3]);
                    found.push(
                        Symptom::new(id, kind, format!("{}/{}", r[0], r[1]))
                            .bind("ns", r[0])
                            .bind("pod", r[1]),
                    );
                }
            }
            // NAME READY STATUS ...
            "etcd_health" => {
                let healthy = rows
                    .iter()
                    .find(|r| r.len() >= 3 && r[2] == "Running" && fully_ready(r[1]));
                for r in rows.iter().filter(|r| r.len() >= 3 && !is_pod_healthy(r)) {
                    let exec_into = healthy.map_or(r[0], |h| h[0]);
                    found.push(
                        Symptom::new(id, IssueKind::Etcd, format!("openshift-etcd/{}", r[0]))
                            .bind("ns", "openshift-etcd")
                            .bind("pod", exec_into),
                    );
                }
            }
            "odf_health" => {
                for r in rows.iter().filter(|r| r.len() >= 3 && !is_pod_healthy(r)) {
                    let kind = classify_pod(r[0], r[2]);
                    found.push(
                        Symptom::new(id, kind, format!("openshift-storage/{}", r[0]))
                            .bind("ns", "openshift-storage")
                            .bind("pod", r[0]),
                    );
                }
            }
            // NAMESPACE NAME PHASE VMI
            "vm_migrations" => {
                for r in rows.iter().filter(|r| r.len() >= 3 && r[2] == "Failed") {
                    let mut symptom = Symptom::new(id, IssueKind::Migration, format!("{}/{}", r[0], r[1]))
                        .bind("ns", r[0])
                        .bind("name", r[1]);
                    if let Some(vm) = r.get(3) {
                        symptom = symptom.bind("vm", vm);
                    }
                    found.push(symptom);
                }
            }
            _ => {}
        }
    }
    found
}

fn is_pod_healthy(row: &[&str]) -> bool {
    row[2] == "Completed" || (row[2] == "Running" && fully_ready(row[1]))
}

// ── Root cause ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootCause {
    pub title: String,
    pub confidence: Confidence,
    pub explanation: String,
}

impl RootCause {
    fn new(title: &str, confidence: Confidence, explanation: &str) -> Self {
        Self {
            title: title.to_string(),
            confidence,
            explanation: explanation.to_string(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(
            "Unknown",
            Confidence::Low,
            "Further manual investigation required",
        )
    }
}

struct CauseRule {
    kind: IssueKind,
    /// Any of these in the lowercased output fires the rule.
    needles: &'static [&'static str],
    title: &'static str,
    confidence: Confidence,
    explanation: &'static str,
}

const CAUSE_RULES: &[CauseRule] = &[
    CauseRule {
        kind: IssueKind::PodCrashloop,
        needles: &["oomkilled", "out of memory"],
        title: "Container exceeded its memory limit",
        confidence: Confidence::High,
        explanation: "The container was killed for memory; raise the limit or find the leak.",
    },
    CauseRule {
        kind: IssueKind::PodCrashloop,
        needles: &["errimagepull", "imagepullbackoff"],
        title: "Image pull failure",
        confidence: Confidence::High,
        explanation: "The image cannot be pulled; check the reference and pull secret.",
    },
    CauseRule {
        kind: IssueKind::PodCrashloop,
        needles: &["permission denied"],
        title: "Permission error",
        confidence: Confidence::High,
        explanation: "The process lacks access to a file or device; check SCC and volume ownership.",
    },
    CauseRule {
        kind: IssueKind::PodCrashloop,
        needles: &["connection refused", "no such host", "i/o timeout"],
        title: "Dependency unreachable",
        confidence: Confidence::Medium,
        explanation: "The container exits because a service it depends on is unreachable.",
    },
    CauseRule {
        kind: IssueKind::PodUnknown,
        needles: &["notready", "unknown"],
        title: "Node lost contact",
        confidence: Confidence::High,
        explanation: "The pod's node stopped reporting status; check kubelet and node health.",
    },
    CauseRule {
        kind: IssueKind::Noobaa,
        needles: &["containerstatusunknown"],
        title: "NooBaa endpoint lost contact with its node",
        confidence: Confidence::Medium,
        explanation: "Endpoint pods go unknown when their node restarts; delete the stale pods once the node is back.",
    },
    CauseRule {
        kind: IssueKind::Noobaa,
        needles: &["rejected", "connecting"],
        title: "NooBaa system not ready",
        confidence: Confidence::Medium,
        explanation: "The NooBaa system is not in Ready phase; check backing store health.",
    },
    CauseRule {
        kind: IssueKind::Metal3,
        needles: &["crashloopbackoff", "init:"],
        title: "metal3 image customization failing to start",
        confidence: Confidence::Medium,
        explanation: "The image customization container keeps failing; check the provisioning network config.",
    },
    CauseRule {
        kind: IssueKind::Etcd,
        needles: &["unhealthy", "failed to commit", "context deadline exceeded"],
        title: "etcd member unhealthy",
        confidence: Confidence::High,
        explanation: "At least one etcd endpoint fails its health check; quorum is at risk.",
    },
    CauseRule {
        kind: IssueKind::Etcd,
        needles: &["took too long", "slow"],
        title: "etcd latency",
        confidence: Confidence::Medium,
        explanation: "etcd is responding slowly; check disk latency on the control plane nodes.",
    },
    CauseRule {
        kind: IssueKind::Migration,
        needles: &["insufficient", "unschedulable"],
        title: "Migration target lacks resources",
        confidence: Confidence::High,
        explanation: "No node can host the migrating VM; free capacity or relax placement rules.",
    },
    CauseRule {
        kind: IssueKind::Migration,
        needles: &["timeout", "progress"],
        title: "Migration did not converge",
        confidence: Confidence::Medium,
        explanation: "Memory is dirtied faster than it is copied; consider post-copy or a bandwidth increase.",
    },
    CauseRule {
        kind: IssueKind::Csi,
        needles: &["error", "failed"],
        title: "CSI driver errors",
        confidence: Confidence::Medium,
        explanation: "The CSI driver pods log errors; volume attach and provisioning may fail.",
    },
    CauseRule {
        kind: IssueKind::Oom,
        needles: &["oomkilled"],
        title: "Container memory limit exceeded",
        confidence: Confidence::High,
        explanation: "The last termination was OOMKilled; raise the memory limit or reduce usage.",
    },
];

/// Highest-confidence cause whose rule fires, first listed on ties.
pub fn determine_root_cause(kind: IssueKind, steps: &[InvestigationStep]) -> RootCause {
    let text = steps
        .iter()
        .map(|s| s.output.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("\n");

    let mut best: Option<RootCause> = None;
    let mut consider = |cause: RootCause| {
        if best.as_ref().is_none_or(|b| cause.confidence > b.confidence) {
            best = Some(cause);
        }
    };

    if kind == IssueKind::VirtHandlerMemory {
        consider(virt_handler_cause(vmi_count(steps)));
    }
    for rule in CAUSE_RULES.iter().filter(|r| r.kind == kind) {
        if rule.needles.iter().any(|n| text.contains(n)) {
            consider(RootCause::new(rule.title, rule.confidence, rule.explanation));
        }
    }
    best.unwrap_or_else(RootCause::unknown)
}

fn vmi_count(steps: &[InvestigationStep]) -> Option<u64> {
    steps
        .iter()
        .find(|s| s.command.ends_with("wc -l"))
        .and_then(|s| s.output.trim().parse().ok())
}

fn virt_handler_cause(vmis: Option<u64>) -> RootCause {
    match vmis {
        Some(n) if n > 1000 => RootCause::new(
            "virt-handler memory pressure from VMI density",
            Confidence::High,
            &format!("{n} VMIs are running; virt-handler memory grows with VMIs per node."),
        ),
        Some(n) if n > 500 => RootCause::new(
            "virt-handler memory pressure from VMI density",
            Confidence::Medium,
            &format!("{n} VMIs are running; virt-handler memory grows with VMIs per node."),
        ),
        _ => RootCause::new(
            "virt-handler memory growth",
            Confidence::Low,
            "virt-handler memory is high without unusual VMI density; compare against known leaks.",
        ),
    }
}

// ── Investigation ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestigationStep {
    pub description: String,
    pub command: String,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Investigation {
    pub check_id: String,
    pub kind: IssueKind,
    pub subject: String,
    pub steps: Vec<InvestigationStep>,
    pub root_cause: RootCause,
    /// Other subjects with the same kind, covered by this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_with: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Investigator {
    command_timeout: Duration,
    max_kinds: usize,
}

impl Default for Investigator {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_kinds: DEFAULT_MAX_KINDS,
        }
    }
}

impl Investigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_command_timeout(mut self, limit: Duration) -> Self {
        self.command_timeout = limit;
        self
    }

    pub fn with_max_kinds(mut self, max: usize) -> Self {
        self.max_kinds = max.max(1);
        self
    }

    /// One representative per kind, in first-seen order, capped.
    pub fn plan(&self, symptoms: Vec<Symptom>) -> Vec<(Symptom, Vec<String>)> {
        let mut groups: Vec<(Symptom, Vec<String>)> = Vec::new();
        for symptom in symptoms {
            if let Some((_, shared)) = groups.iter_mut().find(|(rep, _)| rep.kind == symptom.kind) {
                shared.push(symptom.subject);
            } else if groups.len() < self.max_kinds {
                groups.push((symptom, Vec::new()));
            }
        }
        groups
    }

    /// Investigate the failures in `results`.
    ///
    /// Stops early on cancellation or when the session can no longer run
    /// commands; the cut-short investigation records why.
    pub async fn investigate(
        &self,
        session: &mut SessionManager,
        env: &CommandEnv,
        results: &[CheckResult],
        cancel: &CancelToken,
    ) -> Vec<Investigation> {
        let plan = self.plan(symptoms(results));
        info!(kinds = plan.len(), "Investigating failures");

        let mut done = Vec::with_capacity(plan.len());
        for (symptom, shared_with) in plan {
            let mut steps = Vec::new();
            let mut interrupted = None;

            for (description, template) in symptom.kind.commands() {
                if cancel.is_cancelled() {
                    interrupted = Some("cancelled".to_string());
                    break;
                }
                let Some(command) = symptom.render(template) else {
                    debug!(kind = %symptom.kind, step = %description, "Skipping step with unresolved name");
                    continue;
                };
                match self.run_step(session, &command, env).await {
                    Ok(output) => steps.push(InvestigationStep {
                        description: description.to_string(),
                        command,
                        output,
                    }),
                    Err(fatal) => {
                        warn!(kind = %symptom.kind, error = %fatal, "Investigation stopped");
                        steps.push(InvestigationStep {
                            description: description.to_string(),
                            command,
                            output: error_text(&fatal),
                        });
                        interrupted = Some(fatal);
                        break;
                    }
                }
            }

            let root_cause = determine_root_cause(symptom.kind, &steps);
            debug!(kind = %symptom.kind, subject = %symptom.subject, cause = %root_cause.title, "Investigation finished");
            let stop = interrupted.is_some();
            done.push(Investigation {
                check_id: symptom.check_id,
                kind: symptom.kind,
                subject: symptom.subject,
                steps,
                root_cause,
                shared_with,
                interrupted,
            });
            if stop {
                break;
            }
        }
        done
    }

    /// Step output, or `Err` with the reason when the session is unusable.
    async fn run_step(
        &self,
        session: &mut SessionManager,
        command: &str,
        env: &CommandEnv,
    ) -> Result<String, String> {
        match timeout(self.command_timeout, session.execute(command, env)).await {
            Ok(Ok(output)) => {
                let text = [output.stdout.trim(), output.stderr.trim()]
                    .into_iter()
                    .find(|t| !t.is_empty())
                    .unwrap_or("(no output)");
                Ok(truncate_output(text, MAX_STEP_OUTPUT))
            }
            Ok(Err(err)) if err.is_fatal_to_build() => Err(err.to_string()),
            Ok(Err(err)) => Ok(error_text(&err.to_string())),
            Err(_) => Ok(format!(
                "(error: timed out after {}s)",
                self.command_timeout.as_secs()
            )),
        }
    }
}

fn error_text(reason: &str) -> String {
    format!("(error: {})", truncate_output(reason, MAX_STEP_ERROR))
}
