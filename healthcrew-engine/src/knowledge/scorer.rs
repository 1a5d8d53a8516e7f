use super::KnowledgeEntry;
use std::collections::BTreeSet;

/// Similarity between a failure's query terms and a stored entry.
pub trait SimilarityScorer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Score in `[0, 1]`.
    fn score(&self, query: &BTreeSet<String>, entry: &KnowledgeEntry) -> f64;

    /// Minimum score that counts as a match.
    fn threshold(&self) -> f64;
}

/// Fraction of the entry's keywords present in the query.
#[derive(Debug, Clone, Copy)]
pub struct KeywordOverlapScorer {
    pub min_score: f64,
}

impl Default for KeywordOverlapScorer {
    fn default() -> Self {
        Self { min_score: 0.5 }
    }
}

impl SimilarityScorer for KeywordOverlapScorer {
    fn name(&self) -> &'static str {
        "keyword_overlap"
    }

    fn score(&self, query: &BTreeSet<String>, entry: &KnowledgeEntry) -> f64 {
        if entry.keywords.is_empty() {
            return 0.0;
        }
        let unique: BTreeSet<&String> = entry.keywords.iter().collect();
        let hits = unique.iter().filter(|k| query.contains(k.as_str())).count();
        hits as f64 / unique.len() as f64
    }

    fn threshold(&self) -> f64 {
        self.min_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use healthcrew_common::KnowledgeSource;

    fn entry(keywords: &[&str]) -> KnowledgeEntry {
        KnowledgeEntry {
            signature: "x".into(),
            component: "x".into(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            source: KnowledgeSource::Bug,
            description: String::new(),
            confidence: 0.6,
            occurrences: 1,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            suggested_check: false,
            reference: None,
        }
    }

    fn query(terms: &[&str]) -> BTreeSet<String> {
        terms.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_overlap_ratio() {
        let scorer = KeywordOverlapScorer::default();
        let e = entry(&["etcd", "timeout", "notready", "failed"]);
        assert_eq!(scorer.score(&query(&["etcd", "timeout"]), &e), 0.5);
        assert_eq!(scorer.score(&query(&["pod"]), &e), 0.0);
        assert_eq!(scorer.threshold(), 0.5);
    }

    #[test]
    fn test_empty_entry_scores_zero() {
        let scorer = KeywordOverlapScorer::default();
        assert_eq!(scorer.score(&query(&["etcd"]), &entry(&[])), 0.0);
    }

    #[test]
    fn test_duplicate_keywords_not_double_counted() {
        let scorer = KeywordOverlapScorer::default();
        let e = entry(&["etcd", "etcd", "timeout"]);
        assert_eq!(scorer.score(&query(&["etcd"]), &e), 0.5);
    }
}
