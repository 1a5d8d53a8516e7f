//! Knowledge base of known-issue signatures.
//!
//! Entries come from ingested feeds (bugs, mail, web) and from failures
//! observed in earlier builds. A failing check result is matched against the
//! snapshot with a pluggable [`SimilarityScorer`]; recurring, confident
//! entries are proposed as new checks but never registered automatically.
//! Operators can record which fixes worked for a signature; the most
//! successful one is attached to later matches.

mod scorer;
mod signature;
mod store;

pub use scorer::{KeywordOverlapScorer, SimilarityScorer};
pub use signature::{Signature, extract_signature, query_terms};
pub use store::KnowledgeBase;

use chrono::{DateTime, Utc};
use healthcrew_common::KnowledgeSource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A known issue keyed by its signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    /// `component:keyword+keyword`
    pub signature: String,
    pub component: String,
    /// Terms the scorer compares against (component first).
    pub keywords: Vec<String>,
    pub source: KnowledgeSource,
    pub description: String,
    pub confidence: f64,
    pub occurrences: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub suggested_check: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// One unprocessed item handed to ingest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl RawItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeMatch {
    pub signature: String,
    pub component: String,
    pub description: String,
    pub source: KnowledgeSource,
    pub score: f64,
    pub confidence: f64,
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<SuggestedFix>,
}

/// One applied remediation and whether it resolved the issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixAttempt {
    pub signature: String,
    pub fix: String,
    pub success: bool,
    pub at: DateTime<Utc>,
}

/// Best-performing recorded fix for a signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedFix {
    pub fix: String,
    pub success_rate: f64,
    pub times_tried: u32,
}

/// A single observation of a signature, kept for trend reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sighting {
    pub signature: String,
    pub component: String,
    pub source: KnowledgeSource,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueTrends {
    pub period_days: u32,
    pub total: usize,
    pub by_component: BTreeMap<String, usize>,
    pub by_source: BTreeMap<KnowledgeSource, usize>,
    /// Most frequent signatures in the window, most frequent first.
    pub top_signatures: Vec<(String, usize)>,
}

/// Advisory proposal for a new check. Requires human approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckCandidate {
    pub id: String,
    pub signature: String,
    pub component: String,
    pub occurrences: u32,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_command: Option<String>,
    pub rationale: String,
    #[serde(default)]
    pub already_suggested: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub created: usize,
    pub reinforced: usize,
    pub skipped: usize,
}

impl IngestSummary {
    pub fn touched(&self) -> usize {
        self.created + self.reinforced
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeStats {
    pub entries: usize,
    pub by_source: BTreeMap<KnowledgeSource, usize>,
    pub recurring: usize,
    pub suggested: usize,
    pub mean_confidence: f64,
    pub fixes_recorded: usize,
}

/// Exponential reinforcement: `c' = c + (max - c) * rate`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reinforcement {
    pub rate: f64,
    pub max: f64,
}

impl Default for Reinforcement {
    fn default() -> Self {
        Self {
            rate: 0.3,
            max: 0.95,
        }
    }
}

impl Reinforcement {
    pub fn new(rate: f64, max: f64) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0),
            max: max.clamp(0.0, 1.0),
        }
    }

    /// Never decreases and never exceeds `max` for inputs in `[0, max]`.
    pub fn apply(&self, confidence: f64) -> f64 {
        if confidence >= self.max {
            return confidence;
        }
        (confidence + (self.max - confidence) * self.rate).min(self.max)
    }

    pub fn clamp(&self, confidence: f64) -> f64 {
        confidence.clamp(0.0, self.max)
    }
}
