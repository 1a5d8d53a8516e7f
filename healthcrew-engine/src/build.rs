//! Build record and phase state machine.
//!
//! ```text
//! Init -> Connecting -> Collecting -> Analyzing -> Reporting -> Done
//!                                  \______________/
//! any non-terminal phase -> Failed
//! ```

use crate::error::BuildError;
use crate::investigate::Investigation;
use crate::knowledge::{CheckCandidate, KnowledgeMatch};
use crate::rca::RcaReport;
use crate::session::RecoveryEvent;
use chrono::{DateTime, Utc};
use healthcrew_common::{Alert, CheckResult, CheckStatus, ErrorCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

// ── Phase ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    Init,
    Connecting,
    Collecting,
    Analyzing,
    Reporting,
    Done,
    Failed,
}

impl BuildPhase {
    /// Cosmetic progress percentage.
    pub const fn progress(&self) -> u8 {
        match self {
            Self::Init => 5,
            Self::Connecting => 15,
            Self::Collecting => 50,
            Self::Analyzing => 75,
            Self::Reporting | Self::Done | Self::Failed => 100,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn can_transition_to(&self, next: BuildPhase) -> bool {
        use BuildPhase::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Init, Connecting)
            | (Connecting, Collecting)
            | (Collecting, Analyzing)
            | (Collecting, Reporting)
            | (Analyzing, Reporting)
            | (Reporting, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Connecting => write!(f, "connecting"),
            Self::Collecting => write!(f, "collecting"),
            Self::Analyzing => write!(f, "analyzing"),
            Self::Reporting => write!(f, "reporting"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ── Request ──────────────────────────────────────────────────────────────

/// What a caller asked for. Flags live here, never in global state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Check ids to run; empty means every enabled check.
    #[serde(default)]
    pub checks: Vec<String>,
    #[serde(default)]
    pub enable_deep_analysis: bool,
    #[serde(default)]
    pub bug_matching_only: bool,
    #[serde(default)]
    pub search_external_bugs: bool,
    #[serde(default)]
    pub enable_knowledge_scan: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_host: Option<String>,
}

impl BuildRequest {
    pub fn wants_analysis(&self) -> bool {
        self.enable_deep_analysis || self.bug_matching_only
    }
}

// ── Cancellation ─────────────────────────────────────────────────────────

/// Cooperative cancellation flag, checked between checks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// Self-contained explanation of why a build failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: String,
    pub phase: BuildPhase,
    pub what: String,
    pub why: String,
    pub remediation: Vec<String>,
}

impl Diagnostic {
    pub fn from_code(code: ErrorCode, phase: BuildPhase, why: impl Into<String>) -> Self {
        let entry = code.entry();
        Self {
            code: entry.code,
            phase,
            what: entry.message,
            why: why.into(),
            remediation: entry.remediation,
        }
    }
}

impl From<(&BuildError, BuildPhase)> for Diagnostic {
    fn from((err, phase): (&BuildError, BuildPhase)) -> Self {
        Self::from_code(err.code(), phase, err.to_string())
    }
}

// ── Record ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseChange {
    pub phase: BuildPhase,
    pub at: DateTime<Utc>,
}

/// One run of the health pipeline.
///
/// Mutated only by the orchestrator; frozen once the phase is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub id: Uuid,
    pub request: BuildRequest,
    pub host: String,
    pub phase: BuildPhase,
    pub phase_history: Vec<PhaseChange>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub results: Vec<CheckResult>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_status: Option<CheckStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_version: Option<String>,
    #[serde(default)]
    pub rca: Vec<RcaReport>,
    #[serde(default)]
    pub investigations: Vec<Investigation>,
    #[serde(default)]
    pub knowledge_matches: Vec<KnowledgeMatch>,
    #[serde(default)]
    pub suggestions: Vec<CheckCandidate>,
    #[serde(default)]
    pub recovery_events: Vec<RecoveryEvent>,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<Diagnostic>,
}

impl Build {
    pub fn new(request: BuildRequest, host: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            request,
            host: host.into(),
            phase: BuildPhase::Init,
            phase_history: vec![PhaseChange {
                phase: BuildPhase::Init,
                at: now,
            }],
            started_at: now,
            finished_at: None,
            results: Vec::new(),
            alerts: Vec::new(),
            overall_status: None,
            cluster_version: None,
            rca: Vec::new(),
            investigations: Vec::new(),
            knowledge_matches: Vec::new(),
            suggestions: Vec::new(),
            recovery_events: Vec::new(),
            cancelled: false,
            report_ref: None,
            diagnostic: None,
        }
    }

    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }

    pub fn progress(&self) -> u8 {
        self.phase.progress()
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn transition(&mut self, next: BuildPhase) -> Result<(), BuildError> {
        if !self.phase.can_transition_to(next) {
            return Err(BuildError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        let now = Utc::now();
        self.phase = next;
        self.phase_history.push(PhaseChange {
            phase: next,
            at: now,
        });
        // Reporting seals the outcome so the delivered report carries it.
        if next == BuildPhase::Reporting || next.is_terminal() {
            self.finished_at.get_or_insert(now);
            self.overall_status = self.current_status();
        }
        Ok(())
    }

    /// Move to `Failed` with a diagnostic. No-op on a terminal build.
    pub fn fail(&mut self, diagnostic: Diagnostic) {
        if self.is_terminal() {
            return;
        }
        self.diagnostic = Some(diagnostic);
        // Every non-terminal phase may fail.
        let _ = self.transition(BuildPhase::Failed);
    }

    pub fn push_result(&mut self, result: CheckResult) -> Result<(), BuildError> {
        if self.is_terminal() {
            return Err(BuildError::InvalidTransition {
                from: self.phase,
                to: self.phase,
            });
        }
        self.results.push(result);
        Ok(())
    }

    /// Worst status so far, or `None` without results.
    pub fn current_status(&self) -> Option<CheckStatus> {
        CheckStatus::worst(self.results.iter().map(|r| r.status))
    }

    pub fn failing_results(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| r.status.is_failure())
    }

    pub fn status_counts(&self) -> BTreeMap<CheckStatus, usize> {
        let mut counts = BTreeMap::new();
        for result in &self.results {
            *counts.entry(result.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }
}
