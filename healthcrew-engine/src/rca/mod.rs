//! Root-cause correlation.
//!
//! A failing result becomes a [`QueryContext`] that is fanned out to every
//! enabled [`LookupSource`] at once, each bounded by the lookup timeout.
//! Candidates are merged by score; a source that errors or times out is
//! listed as unavailable and the rest still count.

mod known_bugs;
mod sources;

pub use known_bugs::{BugAssessment, BugStatus, KnownBugSource, Version};
pub use sources::{HttpAnalysisSource, KnowledgeLookup, RuleBasedSource};

use crate::build::BuildRequest;
use crate::error::LookupError;
use async_trait::async_trait;
use futures::future::join_all;
use healthcrew_common::{Category, CheckResult, CheckStatus, truncate_output};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

pub const DEFAULT_MAX_CANDIDATES: usize = 5;
const ERROR_TEXT_LIMIT: usize = 2048;

// ── Query ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    pub check_id: String,
    pub check_name: String,
    pub category: Category,
    pub status: CheckStatus,
    pub error_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_version: Option<String>,
}

impl QueryContext {
    pub fn from_result(result: &CheckResult) -> Self {
        let mut error_text = result.failure_text();
        if !result.raw_output.is_empty() {
            error_text.push('\n');
            error_text.push_str(&result.raw_output);
        }
        Self {
            check_id: result.check_id.clone(),
            check_name: result.name.clone(),
            category: result.category,
            status: result.status,
            error_text: truncate_output(&error_text, ERROR_TEXT_LIMIT),
            cluster_version: None,
        }
    }

    pub fn with_cluster_version(mut self, version: Option<&str>) -> Self {
        self.cluster_version = version.map(str::to_string);
        self
    }

    /// Prompt handed to free-text analysis providers.
    pub fn prompt(&self) -> String {
        let version = self
            .cluster_version
            .as_deref()
            .map(|v| format!(" on cluster version {v}"))
            .unwrap_or_default();
        format!(
            "OpenShift health check '{}' ({} category) reported {}{version}.\n\
             Output:\n{}\n\n\
             Give the most likely root cause and one remediation step.",
            self.check_name, self.category, self.status, self.error_text
        )
    }
}

// ── Candidates ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RcaCandidate {
    pub source: String,
    pub title: String,
    pub explanation: String,
    /// In `[0, 1]`.
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RcaReport {
    pub check_id: String,
    pub candidates: Vec<RcaCandidate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unavailable: Vec<SourceFailure>,
}

impl RcaReport {
    pub fn best(&self) -> Option<&RcaCandidate> {
        self.candidates.first()
    }
}

// ── Sources ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Knowledge,
    Rules,
    BugSearch,
    EmailSearch,
    WebSearch,
    Analysis,
}

impl SourceKind {
    /// Whether a build with these flags consults this kind of source.
    pub fn enabled_for(&self, request: &BuildRequest) -> bool {
        match self {
            Self::Knowledge => true,
            Self::BugSearch => request.search_external_bugs,
            Self::Rules | Self::EmailSearch | Self::WebSearch | Self::Analysis => {
                request.enable_deep_analysis && !request.bug_matching_only
            }
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Knowledge => "knowledge",
            Self::Rules => "rules",
            Self::BugSearch => "bug_search",
            Self::EmailSearch => "email_search",
            Self::WebSearch => "web_search",
            Self::Analysis => "analysis",
        };
        f.write_str(s)
    }
}

/// An external or local collaborator that proposes explanations.
#[async_trait]
pub trait LookupSource: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    async fn lookup(&self, query: &QueryContext) -> Result<Vec<RcaCandidate>, LookupError>;
}

// ── Correlator ───────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RcaCorrelator {
    sources: Vec<Arc<dyn LookupSource>>,
    lookup_timeout: Duration,
    max_candidates: usize,
}

impl fmt::Debug for RcaCorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RcaCorrelator")
            .field("sources", &self.source_names())
            .field("lookup_timeout", &self.lookup_timeout)
            .field("max_candidates", &self.max_candidates)
            .finish()
    }
}

impl RcaCorrelator {
    pub fn new(lookup_timeout: Duration) -> Self {
        Self {
            sources: Vec::new(),
            lookup_timeout,
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn LookupSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = max.max(1);
        self
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn lookup_timeout(&self) -> Duration {
        self.lookup_timeout
    }

    /// Correlate one failing result against the sources `request` enables.
    /// `cluster_version` lets version-aware sources judge bug status.
    pub async fn correlate(
        &self,
        result: &CheckResult,
        request: &BuildRequest,
        cluster_version: Option<&str>,
    ) -> RcaReport {
        let query = QueryContext::from_result(result).with_cluster_version(cluster_version);
        let active: Vec<&Arc<dyn LookupSource>> = self
            .sources
            .iter()
            .filter(|s| s.kind().enabled_for(request))
            .collect();

        let limit = self.lookup_timeout;
        let lookups = active.iter().map(|source| {
            let query = &query;
            async move {
                let outcome = match timeout(limit, source.lookup(query)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(LookupError::Timeout {
                        source_name: source.name().to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    }),
                };
                (source.name().to_string(), outcome)
            }
        });

        let mut candidates = Vec::new();
        let mut unavailable = Vec::new();
        for (name, outcome) in join_all(lookups).await {
            match outcome {
                Ok(found) => {
                    debug!(source = %name, candidates = found.len(), check = %query.check_id, "Lookup returned");
                    candidates.extend(found);
                }
                Err(err) => {
                    warn!(source = %name, check = %query.check_id, error = %err, "Lookup source unavailable");
                    unavailable.push(SourceFailure {
                        source: name,
                        reason: err.to_string(),
                    });
                }
            }
        }

        RcaReport {
            check_id: query.check_id,
            candidates: merge(candidates, self.max_candidates),
            unavailable,
        }
    }
}

/// Order by descending score, then source and title, keeping `cap`.
fn merge(mut candidates: Vec<RcaCandidate>, cap: usize) -> Vec<RcaCandidate> {
    for c in &mut candidates {
        c.score = c.score.clamp(0.0, 1.0);
    }
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.title.cmp(&b.title))
    });
    candidates.dedup_by(|a, b| a.source == b.source && a.title == b.title);
    candidates.truncate(cap);
    candidates
}
