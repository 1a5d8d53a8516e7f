//! Built-in lookup sources.

use super::{LookupSource, QueryContext, RcaCandidate, SourceKind};
use crate::error::LookupError;
use crate::knowledge::KnowledgeBase;
use crate::retry::{BoundedRetryPolicy, run_with_retry};
use async_trait::async_trait;
use healthcrew_common::truncate_output;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// ── Knowledge base ───────────────────────────────────────────────────────

/// Known-issue matches weighted by entry confidence.
#[derive(Debug, Clone)]
pub struct KnowledgeLookup {
    kb: Arc<KnowledgeBase>,
}

impl KnowledgeLookup {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }
}

#[async_trait]
impl LookupSource for KnowledgeLookup {
    fn name(&self) -> &str {
        "knowledge"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Knowledge
    }

    async fn lookup(&self, query: &QueryContext) -> Result<Vec<RcaCandidate>, LookupError> {
        Ok(self
            .kb
            .match_text(&query.error_text)
            .into_iter()
            .map(|m| RcaCandidate {
                source: format!("knowledge/{}", m.source),
                title: m.signature,
                explanation: m.description,
                score: m.score * m.confidence,
                reference: m.reference,
            })
            .collect())
    }
}

// ── Rules ────────────────────────────────────────────────────────────────

struct Rule {
    title: &'static str,
    explanation: &'static str,
    /// Every group must have at least one needle present.
    groups: &'static [&'static [&'static str]],
    score: f64,
}

const HIGH: f64 = 0.8;
const MEDIUM: f64 = 0.5;

const RULES: &[Rule] = &[
    Rule {
        title: "OOM kill",
        explanation: "Container exceeded its memory limit and was killed",
        groups: &[&["oomkilled", "out of memory"]],
        score: HIGH,
    },
    Rule {
        title: "Image pull error",
        explanation: "Container image could not be pulled",
        groups: &[&["imagepullbackoff", "errimagepull", "image pull"]],
        score: HIGH,
    },
    Rule {
        title: "Permission denied",
        explanation: "Workload lacks required permissions",
        groups: &[&["permission denied", "forbidden"]],
        score: HIGH,
    },
    Rule {
        title: "Application crash",
        explanation: "Process inside the container keeps exiting",
        groups: &[&["crashloopbackoff"]],
        score: MEDIUM,
    },
    Rule {
        title: "Insufficient resources",
        explanation: "Cluster lacks capacity to schedule the pod",
        groups: &[&["pending", "unschedulable"], &["insufficient"]],
        score: HIGH,
    },
    Rule {
        title: "Node unavailable",
        explanation: "Node became NotReady or was cordoned",
        groups: &[&["notready", "schedulingdisabled", "containerstatusunknown"]],
        score: HIGH,
    },
    Rule {
        title: "Migration timeout",
        explanation: "Live migration exceeded its time limit",
        groups: &[&["migration", "vmim"], &["timeout", "timed out", "stuck"]],
        score: HIGH,
    },
    Rule {
        title: "Migration bandwidth",
        explanation: "Network bandwidth is limiting migration progress",
        groups: &[&["migration"], &["bandwidth"]],
        score: MEDIUM,
    },
    Rule {
        title: "CPU incompatibility",
        explanation: "CPU features differ between source and target nodes",
        groups: &[&["cpu"], &["mismatch", "incompatible"]],
        score: HIGH,
    },
    Rule {
        title: "CSI driver error",
        explanation: "Storage driver failed to provision or attach a volume",
        groups: &[&["csi"], &["error", "fail"]],
        score: HIGH,
    },
    Rule {
        title: "Snapshot pending",
        explanation: "Volume snapshot waiting on the storage driver",
        groups: &[&["snapshot"], &["pending"]],
        score: MEDIUM,
    },
];

/// Substring rules over the failure text. Purely local.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedSource;

impl RuleBasedSource {
    pub fn evaluate(text: &str) -> Vec<RcaCandidate> {
        let lower = text.to_ascii_lowercase();
        RULES
            .iter()
            .filter(|rule| {
                rule.groups
                    .iter()
                    .all(|group| group.iter().any(|needle| lower.contains(needle)))
            })
            .map(|rule| RcaCandidate {
                source: "rules".to_string(),
                title: rule.title.to_string(),
                explanation: rule.explanation.to_string(),
                score: rule.score,
                reference: None,
            })
            .collect()
    }
}

#[async_trait]
impl LookupSource for RuleBasedSource {
    fn name(&self) -> &str {
        "rules"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Rules
    }

    async fn lookup(&self, query: &QueryContext) -> Result<Vec<RcaCandidate>, LookupError> {
        Ok(Self::evaluate(&query.error_text))
    }
}

// ── HTTP analysis provider ───────────────────────────────────────────────

const ANALYSIS_SCORE: f64 = 0.5;
const TITLE_LIMIT: usize = 96;
const EXPLANATION_LIMIT: usize = 2000;

#[derive(Debug, Serialize)]
struct AnalysisRequest<'a> {
    model: &'a str,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    #[serde(default)]
    response: String,
}

/// Free-text analysis over `POST {model, prompt}` -> `{response}`.
#[derive(Debug, Clone)]
pub struct HttpAnalysisSource {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
    policy: BoundedRetryPolicy,
}

impl HttpAnalysisSource {
    pub fn new(
        url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, LookupError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LookupError::unavailable("analysis", e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            model: model.into(),
            api_key,
            policy: BoundedRetryPolicy::lookup(),
        })
    }

    pub fn with_retry(mut self, policy: BoundedRetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn request_once(&self, prompt: &str) -> Result<String, LookupError> {
        let body = AnalysisRequest {
            model: &self.model,
            prompt: prompt.to_string(),
        };
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| LookupError::unavailable("analysis", format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LookupError::unavailable(
                "analysis",
                format!("HTTP {status}: {}", truncate_output(&text, 200)),
            ));
        }
        let parsed: AnalysisResponse = response
            .json()
            .await
            .map_err(|e| LookupError::unavailable("analysis", format!("bad response: {e}")))?;
        Ok(parsed.response)
    }
}

#[async_trait]
impl LookupSource for HttpAnalysisSource {
    fn name(&self) -> &str {
        "analysis"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Analysis
    }

    async fn lookup(&self, query: &QueryContext) -> Result<Vec<RcaCandidate>, LookupError> {
        let prompt = query.prompt();
        let text = run_with_retry("analysis lookup", &self.policy, || self.request_once(&prompt))
            .await?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let title = text.lines().next().unwrap_or_default();
        Ok(vec![RcaCandidate {
            source: format!("analysis/{}", self.model),
            title: truncate_output(title, TITLE_LIMIT),
            explanation: truncate_output(text, EXPLANATION_LIMIT),
            score: ANALYSIS_SCORE,
            reference: None,
        }])
    }
}
