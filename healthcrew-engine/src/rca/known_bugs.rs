//! Curated known-issue table with bug status assessed against the cluster
//! version.
//!
//! A failure matches an issue when one of its anchor terms appears in the
//! failure text; hint terms raise the score. Each linked bug is then judged
//! relative to the running version: still open and affecting it, fixed in a
//! newer release, or closed in an older release (a likely regression).

use super::{LookupSource, QueryContext, RcaCandidate, SourceKind};
use crate::error::LookupError;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

const BASE_SCORE: f64 = 0.5;
const HINT_WEIGHT: f64 = 0.4;
const RELEVANT_BUG_BONUS: f64 = 0.1;

// ── Versions ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    /// First `major.minor[.patch]` in `text` (`"CNV 4.17.0"`, `"4.21.0-ec.3"`).
    pub fn parse(text: &str) -> Option<Self> {
        static RE: OnceLock<Option<Regex>> = OnceLock::new();
        let re = RE
            .get_or_init(|| Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").ok())
            .as_ref()?;
        let caps = re.captures(text)?;
        let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        Some(Self {
            major: number(1)?,
            minor: number(2)?,
            patch: number(3).unwrap_or(0),
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// ── Bugs ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BugState {
    Open,
    InProgress,
    Closed,
}

impl BugState {
    fn is_open(self) -> bool {
        matches!(self, Self::Open | Self::InProgress)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KnownBug {
    pub key: &'static str,
    pub state: BugState,
    pub fix_versions: &'static [&'static str],
    pub affects: &'static [&'static str],
}

const fn bug(
    key: &'static str,
    state: BugState,
    fix_versions: &'static [&'static str],
    affects: &'static [&'static str],
) -> KnownBug {
    KnownBug {
        key,
        state,
        fix_versions,
        affects,
    }
}

use BugState::{Closed, InProgress, Open};

pub const KNOWN_BUGS: &[KnownBug] = &[
    bug("CNV-66551", Closed, &["CNV 4.17.0"], &["CNV 4.16"]),
    bug("CNV-71448", InProgress, &[], &["CNV 4.17", "CNV 4.18"]),
    bug("CNV-30274", Closed, &["CNV 4.15.0"], &["CNV 4.14"]),
    bug("CNV-68292", Closed, &["CNV 4.17.1"], &["CNV 4.17.0"]),
    bug("CNV-70607", InProgress, &[], &["CNV 4.17"]),
    bug("CNV-74568", Open, &[], &["CNV 4.18"]),
    bug("CNV-71962", Closed, &["CNV 4.17.2"], &["CNV 4.17"]),
    bug("CNV-74856", Open, &[], &["CNV 4.18"]),
    bug("CNV-76280", Open, &[], &["CNV 4.18"]),
    bug("CNV-74866", InProgress, &[], &["CNV 4.18"]),
    bug("CNV-69281", Closed, &["CNV 4.17.0"], &["CNV 4.16"]),
    bug("CNV-45516", Closed, &["CNV 4.16.0"], &["CNV 4.15"]),
    bug("CNV-52369", Closed, &["CNV 4.16.1"], &["CNV 4.16.0"]),
    bug("CNV-74930", Open, &[], &["CNV 4.18"]),
    bug("CNV-20450", Closed, &["CNV 4.14.0"], &["CNV 4.13"]),
    bug("CNV-75962", InProgress, &[], &["CNV 4.18"]),
    bug("CNV-63538", Closed, &["CNV 4.16.0"], &["CNV 4.15"]),
    bug("CNV-70889", Closed, &["CNV 4.17.0"], &["CNV 4.16"]),
    bug("OCPBUGS-48789", Closed, &["OCP 4.17.0"], &["OCP 4.16"]),
    bug("OCPBUGS-74962", Open, &[], &["OCP 4.18"]),
    bug("OCPBUGS-70140", InProgress, &[], &["OCP 4.17"]),
    bug("OCPBUGS-69390", Closed, &["OCP 4.17.1"], &["OCP 4.17.0"]),
];

pub fn find_bug(key: &str) -> Option<&'static KnownBug> {
    KNOWN_BUGS.iter().find(|b| b.key == key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BugAssessment {
    /// Open and an affected release is at or below the running one.
    AffectsVersion,
    /// Open, but no affected release lines up with the running one.
    MayAffect,
    /// Closed in a release at or below the running one.
    Regression,
    /// Closed in a release newer than the running one.
    FixedNewer,
    /// Closed without a recorded fix version.
    Fixed,
}

impl BugAssessment {
    pub fn is_relevant(self) -> bool {
        matches!(self, Self::AffectsVersion | Self::Regression)
    }
}

/// Judge `bug` against the running version. A missing version compares as
/// `0.0.0`, which makes every fix look newer.
pub fn assess(bug: &KnownBug, cluster: Option<Version>) -> (BugAssessment, String) {
    let running = cluster.unwrap_or_default();
    let shown = cluster.map_or_else(|| "unknown version".to_string(), |v| v.to_string());

    if bug.state.is_open() {
        let affected = bug
            .affects
            .iter()
            .filter_map(|a| Version::parse(a))
            .any(|a| a.major == running.major && a.minor <= running.minor);
        return if affected {
            (
                BugAssessment::AffectsVersion,
                format!("open, affects your version ({shown})"),
            )
        } else {
            (
                BugAssessment::MayAffect,
                format!("open, may affect {shown}"),
            )
        };
    }

    let lowest_fix = bug
        .fix_versions
        .iter()
        .filter_map(|v| Version::parse(v).map(|parsed| (parsed, *v)))
        .min();
    match lowest_fix {
        Some((fix, label)) if running >= fix => (
            BugAssessment::Regression,
            format!("potential regression: fixed in {label}, you have {shown}"),
        ),
        Some((_, label)) => (
            BugAssessment::FixedNewer,
            format!("fixed in {label}; upgrade from {shown} to resolve"),
        ),
        None => (BugAssessment::Fixed, "closed".to_string()),
    }
}

// ── Issues ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct KnownIssue {
    pub key: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    /// At least one must appear for the issue to match.
    pub anchors: &'static [&'static str],
    pub hints: &'static [&'static str],
    pub bugs: &'static [&'static str],
}

pub const KNOWN_ISSUES: &[KnownIssue] = &[
    KnownIssue {
        key: "virt-handler-memory",
        title: "virt-handler high memory usage",
        description: "virt-handler pods using more memory than expected, common above 50 VMs per node.",
        anchors: &["virt-handler"],
        hints: &["memory", "oom"],
        bugs: &["CNV-66551", "CNV-71448", "CNV-30274"],
    },
    KnownIssue {
        key: "virt-handler-error",
        title: "virt-handler pod errors",
        description: "virt-handler pods in error state, often during high-scale VM operations.",
        anchors: &["virt-handler"],
        hints: &["error", "crash", "restart"],
        bugs: &["CNV-68292", "CNV-70607"],
    },
    KnownIssue {
        key: "noobaa-endpoint",
        title: "NooBaa endpoint issues",
        description: "NooBaa endpoint pods in ContainerStatusUnknown state.",
        anchors: &["noobaa"],
        hints: &["containerstatusunknown", "openshift-storage"],
        bugs: &[],
    },
    KnownIssue {
        key: "metal3-crashloop",
        title: "Metal3 image customization crash loop",
        description: "metal3-image-customization pod failing to start.",
        anchors: &["metal3"],
        hints: &["crashloopbackoff", "init"],
        bugs: &["OCPBUGS-48789"],
    },
    KnownIssue {
        key: "container-status-unknown",
        title: "Container status unknown",
        description: "Pods stuck in ContainerStatusUnknown, usually after a node lost contact.",
        anchors: &["containerstatusunknown"],
        hints: &[],
        bugs: &[],
    },
    KnownIssue {
        key: "volumesnapshot-not-ready",
        title: "VolumeSnapshot not ready",
        description: "VolumeSnapshots stuck in a non-ready state.",
        anchors: &["volumesnapshot", "snapshot"],
        hints: &["not ready", "pending"],
        bugs: &["CNV-45516", "CNV-52369", "CNV-74930"],
    },
    KnownIssue {
        key: "datavolume-stuck",
        title: "DataVolume import stuck",
        description: "DataVolumes stuck in import or pending state.",
        anchors: &["datavolume", "importinprogress"],
        hints: &["pending"],
        bugs: &[],
    },
    KnownIssue {
        key: "migration-failed",
        title: "VM live migration failed",
        description: "Virtual machine live migrations failing.",
        anchors: &["vmim", "migration"],
        hints: &["failed"],
        bugs: &["CNV-74568", "CNV-71962", "CNV-74856", "CNV-76280"],
    },
    KnownIssue {
        key: "stuck-migration",
        title: "VM migration stuck",
        description: "Live migrations stuck in Running state for extended periods.",
        anchors: &["vmim", "migration"],
        hints: &["running", "stuck"],
        bugs: &["CNV-74866", "CNV-70607", "CNV-69281"],
    },
    KnownIssue {
        key: "cordoned-node-vms",
        title: "VMs on cordoned nodes",
        description: "VMs running on nodes marked SchedulingDisabled.",
        anchors: &["schedulingdisabled"],
        hints: &["vmi", "virt-launcher"],
        bugs: &["CNV-20450"],
    },
    KnownIssue {
        key: "etcd-unhealthy",
        title: "etcd cluster issues",
        description: "etcd members unhealthy or showing high latency.",
        anchors: &["etcd"],
        hints: &["unhealthy", "timeout", "crashloopbackoff", "not ready"],
        bugs: &["OCPBUGS-74962", "OCPBUGS-70140"],
    },
    KnownIssue {
        key: "oom-events",
        title: "OOMKilled pods",
        description: "Pods being killed for exceeding their memory limits.",
        anchors: &["oomkilled", "oom"],
        hints: &[],
        bugs: &["CNV-75962", "CNV-63538"],
    },
    KnownIssue {
        key: "csi-issues",
        title: "CSI driver issues",
        description: "CSI driver pods not running properly.",
        anchors: &["csi"],
        hints: &["driver", "error", "fail"],
        bugs: &["OCPBUGS-69390", "CNV-70889"],
    },
];

impl KnownIssue {
    /// Score in `[0, 1]`, or `None` when no anchor appears in `lower`.
    fn score(&self, lower: &str) -> Option<f64> {
        if !self.anchors.iter().any(|a| lower.contains(a)) {
            return None;
        }
        let fraction = if self.hints.is_empty() {
            1.0
        } else {
            let hit = self.hints.iter().filter(|h| lower.contains(*h)).count();
            hit as f64 / self.hints.len() as f64
        };
        Some(BASE_SCORE + HINT_WEIGHT * fraction)
    }
}

/// One linked bug and how it relates to the running version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugStatus {
    pub key: String,
    pub assessment: BugAssessment,
    pub detail: String,
}

pub fn assess_issue(issue: &KnownIssue, cluster: Option<Version>) -> Vec<BugStatus> {
    issue
        .bugs
        .iter()
        .filter_map(|key| find_bug(key))
        .map(|bug| {
            let (assessment, detail) = assess(bug, cluster);
            BugStatus {
                key: bug.key.to_string(),
                assessment,
                detail,
            }
        })
        .collect()
}

// ── Source ─────────────────────────────────────────────────────────────────

/// Local known-bug table. Needs no network and runs under `--search-bugs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KnownBugSource;

impl KnownBugSource {
    pub fn evaluate(text: &str, cluster_version: Option<&str>) -> Vec<RcaCandidate> {
        let lower = text.to_ascii_lowercase();
        let cluster = cluster_version.and_then(Version::parse);
        KNOWN_ISSUES
            .iter()
            .filter_map(|issue| issue.score(&lower).map(|score| (issue, score)))
            .map(|(issue, score)| {
                let statuses = assess_issue(issue, cluster);
                let relevant = statuses.iter().find(|s| s.assessment.is_relevant());
                let mut explanation = issue.description.to_string();
                for status in &statuses {
                    explanation.push_str(&format!(" {}: {}.", status.key, status.detail));
                }
                RcaCandidate {
                    source: "known_bugs".to_string(),
                    title: issue.title.to_string(),
                    explanation,
                    score: if relevant.is_some() {
                        score + RELEVANT_BUG_BONUS
                    } else {
                        score
                    },
                    reference: relevant
                        .or(statuses.first())
                        .map(|s| s.key.clone()),
                }
            })
            .collect()
    }
}

#[async_trait]
impl LookupSource for KnownBugSource {
    fn name(&self) -> &str {
        "known_bugs"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::BugSearch
    }

    async fn lookup(&self, query: &QueryContext) -> Result<Vec<RcaCandidate>, LookupError> {
        Ok(Self::evaluate(
            &query.error_text,
            query.cluster_version.as_deref(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(text: &str) -> Option<Version> {
        Version::parse(text)
    }

    #[test]
    fn test_version_parse_formats() {
        assert_eq!(v("4.21.0-ec.3"), Some(Version { major: 4, minor: 21, patch: 0 }));
        assert_eq!(v("CNV 4.17"), Some(Version { major: 4, minor: 17, patch: 0 }));
        assert_eq!(v("OCP 4.17.2"), Some(Version { major: 4, minor: 17, patch: 2 }));
        assert_eq!(v("latest"), None);
        assert!(v("4.17.1").unwrap() > v("4.17.0").unwrap());
    }

    #[test]
    fn test_every_linked_bug_is_in_the_table() {
        for issue in KNOWN_ISSUES {
            for key in issue.bugs {
                assert!(find_bug(key).is_some(), "{} links unknown {key}", issue.key);
            }
        }
    }

    // ---- Assessment ----

    #[test]
    fn test_open_bug_affects_same_or_newer_minor() {
        let bug = find_bug("CNV-71448").unwrap();
        assert_eq!(assess(bug, v("4.18.3")).0, BugAssessment::AffectsVersion);
        assert_eq!(assess(bug, v("4.17.0")).0, BugAssessment::AffectsVersion);
        assert_eq!(assess(bug, v("4.16.9")).0, BugAssessment::MayAffect);
        assert_eq!(assess(bug, v("5.0.0")).0, BugAssessment::MayAffect);
    }

    #[test]
    fn test_closed_bug_regression_or_fixed_newer() {
        let bug = find_bug("CNV-68292").unwrap();
        let (assessment, detail) = assess(bug, v("4.17.1"));
        assert_eq!(assessment, BugAssessment::Regression);
        assert!(detail.contains("CNV 4.17.1"));

        let (assessment, detail) = assess(bug, v("4.17.0"));
        assert_eq!(assessment, BugAssessment::FixedNewer);
        assert!(detail.contains("upgrade from 4.17.0"));
    }

    #[test]
    fn test_unknown_version_treats_fixes_as_newer() {
        let bug = find_bug("OCPBUGS-48789").unwrap();
        let (assessment, detail) = assess(bug, None);
        assert_eq!(assessment, BugAssessment::FixedNewer);
        assert!(detail.contains("unknown version"));
    }

    #[test]
    fn test_closed_without_fix_version() {
        let bug = KnownBug {
            key: "CNV-1",
            state: BugState::Closed,
            fix_versions: &[],
            affects: &[],
        };
        assert_eq!(assess(&bug, v("4.16")).0, BugAssessment::Fixed);
    }

    // ---- Matching ----

    #[test]
    fn test_virt_handler_memory_matches_with_bug_context() {
        let hits = KnownBugSource::evaluate(
            "openshift-cnv/virt-handler-x7: OOMKilled, memory 3.9Gi",
            Some("4.18.2"),
        );
        let best = hits
            .iter()
            .find(|c| c.title == "virt-handler high memory usage")
            .unwrap();
        assert!((best.score - 1.0).abs() < 1e-9);
        assert_eq!(best.reference.as_deref(), Some("CNV-66551"));
        assert!(best.explanation.contains("CNV-71448: open, affects your version (4.18.2)"));
        assert!(hits.iter().any(|c| c.title == "OOMKilled pods"));
    }

    #[test]
    fn test_issue_without_assessable_bugs_has_no_reference() {
        let hits = KnownBugSource::evaluate("ns/api-0 ContainerStatusUnknown", Some("4.16.0"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Container status unknown");
        assert_eq!(hits[0].reference, None);
        assert!((hits[0].score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_no_anchor_no_candidate() {
        assert!(KnownBugSource::evaluate("all nodes ready", Some("4.16.0")).is_empty());
    }

    #[tokio::test]
    async fn test_lookup_uses_query_version() {
        let query = QueryContext {
            check_id: "vm_migrations".into(),
            check_name: "VM migrations".into(),
            category: healthcrew_common::Category::Virtualization,
            status: healthcrew_common::CheckStatus::Warning,
            error_text: "1 migrations failed: vms/mig-2 Failed".into(),
            cluster_version: Some("4.17.2".into()),
        };
        let hits = KnownBugSource.lookup(&query).await.unwrap();
        let failed = hits
            .iter()
            .find(|c| c.title == "VM live migration failed")
            .unwrap();
        assert_eq!(failed.reference.as_deref(), Some("CNV-71962"));
        assert!(failed.explanation.contains("potential regression"));
    }
}
