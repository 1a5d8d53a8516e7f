//! In-memory knowledge snapshot with JSONL append-log persistence.
//!
//! The log holds tagged records: full entry snapshots, applied fixes and
//! sightings. Replay keeps the last entry line per signature. Writers are
//! serialized by a dedicated mutex and stage their changes under the read
//! lock, append to the log with no lock held, then publish under the write
//! lock, so log order matches memory order and readers never wait on disk.

use super::{
    CheckCandidate, FixAttempt, IngestSummary, IssueTrends, KeywordOverlapScorer, KnowledgeEntry,
    KnowledgeMatch, KnowledgeStats, RawItem, Reinforcement, Sighting, SimilarityScorer,
    SuggestedFix, extract_signature, query_terms,
};
use crate::error::KnowledgeError;
use chrono::{DateTime, Duration, Utc};
use healthcrew_common::{CheckResult, CheckStatus, KnowledgeSource, truncate_output};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const DESCRIPTION_LIMIT: usize = 240;

/// Sightings kept in memory (and rewritten by compaction).
pub const MAX_SIGHTINGS: usize = 10_000;

const TOP_SIGNATURES: usize = 10;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LogRecord {
    Entry(KnowledgeEntry),
    Fix(FixAttempt),
    Sighting(Sighting),
}

#[derive(Debug, Default)]
struct Snapshot {
    entries: BTreeMap<String, KnowledgeEntry>,
    fixes: BTreeMap<String, Vec<FixAttempt>>,
    sightings: VecDeque<Sighting>,
}

impl Snapshot {
    fn apply(&mut self, record: LogRecord) {
        match record {
            LogRecord::Entry(entry) => {
                self.entries.insert(entry.signature.clone(), entry);
            }
            LogRecord::Fix(attempt) => {
                self.fixes
                    .entry(attempt.signature.clone())
                    .or_default()
                    .push(attempt);
            }
            LogRecord::Sighting(sighting) => {
                if self.sightings.len() == MAX_SIGHTINGS {
                    self.sightings.pop_front();
                }
                self.sightings.push_back(sighting);
            }
        }
    }
}

pub struct KnowledgeBase {
    state: RwLock<Snapshot>,
    writer: Mutex<()>,
    path: Option<PathBuf>,
    scorer: Box<dyn SimilarityScorer>,
    reinforcement: Reinforcement,
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("entries", &self.len())
            .field("path", &self.path)
            .field("scorer", &self.scorer.name())
            .finish()
    }
}

impl KnowledgeBase {
    /// Memory-only store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Snapshot::default()),
            writer: Mutex::new(()),
            path: None,
            scorer: Box::new(KeywordOverlapScorer::default()),
            reinforcement: Reinforcement::default(),
        }
    }

    /// Replay `path` if it exists and persist future writes to it.
    pub fn open(path: &Path) -> Result<Self, KnowledgeError> {
        let mut base = Self::new();
        base.path = Some(path.to_path_buf());
        if path.exists() {
            let snapshot = Self::replay(path, &base.reinforcement)?;
            debug!(
                path = %path.display(),
                entries = snapshot.entries.len(),
                sightings = snapshot.sightings.len(),
                "Loaded knowledge base"
            );
            base.state = RwLock::new(snapshot);
        }
        Ok(base)
    }

    pub fn with_scorer(mut self, scorer: Box<dyn SimilarityScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_reinforcement(mut self, reinforcement: Reinforcement) -> Self {
        self.reinforcement = reinforcement;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, signature: &str) -> Option<KnowledgeEntry> {
        self.read().entries.get(signature).cloned()
    }

    /// Snapshot ordered by signature.
    pub fn entries(&self) -> Vec<KnowledgeEntry> {
        self.read().entries.values().cloned().collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Snapshot> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Snapshot> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_writer(&self) -> std::sync::MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Matching ─────────────────────────────────────────────────────────

    pub fn match_result(&self, result: &CheckResult) -> Vec<KnowledgeMatch> {
        self.match_text(&result.failure_text())
    }

    /// Entries scoring at or above the scorer threshold, ordered by score,
    /// confidence, recency, then signature.
    pub fn match_text(&self, text: &str) -> Vec<KnowledgeMatch> {
        let query = query_terms(text);
        if query.is_empty() {
            return Vec::new();
        }
        let threshold = self.scorer.threshold();
        let state = self.read();

        let mut matches: Vec<KnowledgeMatch> = state
            .entries
            .values()
            .filter_map(|entry| {
                let score = self.scorer.score(&query, entry);
                (score >= threshold && score > 0.0).then(|| KnowledgeMatch {
                    signature: entry.signature.clone(),
                    component: entry.component.clone(),
                    description: entry.description.clone(),
                    source: entry.source,
                    score,
                    confidence: entry.confidence,
                    last_seen: entry.last_seen,
                    reference: entry.reference.clone(),
                    fix: best_fix(state.fixes.get(&entry.signature)),
                })
            })
            .collect();
        matches.sort_by(compare_matches);
        matches
    }

    // ── Writes ───────────────────────────────────────────────────────────

    /// Reinforce or create one entry per item carrying an error keyword.
    pub fn ingest(
        &self,
        source: KnowledgeSource,
        items: &[RawItem],
    ) -> Result<IngestSummary, KnowledgeError> {
        self.ingest_at(source, items, Utc::now())
    }

    fn ingest_at(
        &self,
        source: KnowledgeSource,
        items: &[RawItem],
        now: DateTime<Utc>,
    ) -> Result<IngestSummary, KnowledgeError> {
        let _writer = self.lock_writer();
        let mut summary = IngestSummary::default();
        let mut staged: BTreeMap<String, KnowledgeEntry> = BTreeMap::new();
        let mut sightings = Vec::new();

        {
            let state = self.read();
            for item in items {
                let Some(signature) = extract_signature(&item.text, item.component.as_deref())
                else {
                    summary.skipped += 1;
                    continue;
                };
                let key = signature.key();
                let existing = staged.get(&key).or_else(|| state.entries.get(&key)).cloned();
                let entry = match existing {
                    Some(mut entry) => {
                        entry.confidence = self.reinforcement.apply(entry.confidence);
                        entry.occurrences = entry.occurrences.saturating_add(1);
                        entry.last_seen = now;
                        if entry.reference.is_none() {
                            entry.reference = item.reference.clone();
                        }
                        summary.reinforced += 1;
                        entry
                    }
                    None => {
                        summary.created += 1;
                        KnowledgeEntry {
                            signature: key.clone(),
                            component: signature.component.clone(),
                            keywords: signature.terms(),
                            source,
                            description: describe(item),
                            confidence: self.reinforcement.clamp(source.initial_confidence()),
                            occurrences: 1,
                            first_seen: now,
                            last_seen: now,
                            suggested_check: false,
                            reference: item.reference.clone(),
                        }
                    }
                };
                sightings.push(Sighting {
                    signature: key.clone(),
                    component: entry.component.clone(),
                    source,
                    at: now,
                });
                staged.insert(key, entry);
            }
        }

        if staged.is_empty() {
            return Ok(summary);
        }
        let records: Vec<LogRecord> = staged
            .values()
            .cloned()
            .map(LogRecord::Entry)
            .chain(sightings.into_iter().map(LogRecord::Sighting))
            .collect();
        self.append(&records)?;

        let mut state = self.write();
        for record in records {
            state.apply(record);
        }
        drop(state);

        info!(
            source = %source,
            created = summary.created,
            reinforced = summary.reinforced,
            skipped = summary.skipped,
            "Knowledge ingested"
        );
        Ok(summary)
    }

    /// Record this build's failures as `learned` entries.
    pub fn learn_from_results(
        &self,
        results: &[CheckResult],
    ) -> Result<IngestSummary, KnowledgeError> {
        let items: Vec<RawItem> = results
            .iter()
            .filter(|r| r.status >= CheckStatus::Warning)
            .map(|r| RawItem {
                text: r.failure_text(),
                component: None,
                description: Some(format!("{}: {}", r.name, r.summary)),
                reference: Some(format!("check:{}", r.check_id)),
            })
            .collect();
        if items.is_empty() {
            return Ok(IngestSummary::default());
        }
        self.ingest(KnowledgeSource::Learned, &items)
    }

    /// Flag an entry as already proposed. Returns false for unknown signatures.
    pub fn mark_suggested(&self, signature: &str) -> Result<bool, KnowledgeError> {
        let _writer = self.lock_writer();
        let updated = {
            let state = self.read();
            let Some(current) = state.entries.get(signature) else {
                return Ok(false);
            };
            if current.suggested_check {
                return Ok(true);
            }
            let mut updated = current.clone();
            updated.suggested_check = true;
            updated
        };
        let record = LogRecord::Entry(updated);
        self.append(std::slice::from_ref(&record))?;
        self.write().apply(record);
        Ok(true)
    }

    /// Remember that `fix` was applied for `signature`. Returns false for
    /// unknown signatures.
    pub fn record_fix(
        &self,
        signature: &str,
        fix: &str,
        success: bool,
    ) -> Result<bool, KnowledgeError> {
        let fix = fix.trim();
        if fix.is_empty() {
            return Err(KnowledgeError::InvalidFix("empty fix description".to_string()));
        }
        let _writer = self.lock_writer();
        if !self.read().entries.contains_key(signature) {
            return Ok(false);
        }
        let record = LogRecord::Fix(FixAttempt {
            signature: signature.to_string(),
            fix: fix.to_string(),
            success,
            at: Utc::now(),
        });
        self.append(std::slice::from_ref(&record))?;
        self.write().apply(record);
        info!(signature = %signature, success, "Fix recorded");
        Ok(true)
    }

    // ── Reads ────────────────────────────────────────────────────────────

    /// Most successful recorded fix: highest success rate, then most tried,
    /// then alphabetical.
    pub fn suggested_fix(&self, signature: &str) -> Option<SuggestedFix> {
        best_fix(self.read().fixes.get(signature))
    }

    /// Sightings within the last `days`, grouped.
    pub fn issue_trends(&self, days: u32) -> IssueTrends {
        self.issue_trends_at(days, Utc::now())
    }

    fn issue_trends_at(&self, days: u32, now: DateTime<Utc>) -> IssueTrends {
        let cutoff = now - Duration::days(i64::from(days));
        let state = self.read();
        let mut trends = IssueTrends {
            period_days: days,
            ..IssueTrends::default()
        };
        let mut by_signature: BTreeMap<&str, usize> = BTreeMap::new();
        for sighting in state.sightings.iter().filter(|s| s.at > cutoff) {
            trends.total += 1;
            *trends
                .by_component
                .entry(sighting.component.clone())
                .or_insert(0) += 1;
            *trends.by_source.entry(sighting.source).or_insert(0) += 1;
            *by_signature.entry(sighting.signature.as_str()).or_insert(0) += 1;
        }
        let mut top: Vec<(String, usize)> = by_signature
            .into_iter()
            .map(|(sig, n)| (sig.to_string(), n))
            .collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top.truncate(TOP_SIGNATURES);
        trends.top_signatures = top;
        trends
    }

    /// Recurring, confident entries proposed as new checks.
    pub fn suggest_checks(&self, min_occurrences: u32, min_confidence: f64) -> Vec<CheckCandidate> {
        let state = self.read();
        let mut candidates: Vec<CheckCandidate> = state
            .entries
            .values()
            .filter(|e| e.occurrences >= min_occurrences && e.confidence >= min_confidence)
            .map(|e| {
                let keyword = e.keywords.get(1).map(String::as_str).unwrap_or("error");
                CheckCandidate {
                    id: format!("learned_{}_{}", e.component, keyword).replace('-', "_"),
                    signature: e.signature.clone(),
                    component: e.component.clone(),
                    occurrences: e.occurrences,
                    confidence: e.confidence,
                    proposed_command: proposed_command(&e.component, keyword),
                    rationale: format!(
                        "seen {} times (confidence {:.2}): {}",
                        e.occurrences, e.confidence, e.description
                    ),
                    already_suggested: e.suggested_check,
                }
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.occurrences
                .cmp(&a.occurrences)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
                .then_with(|| a.signature.cmp(&b.signature))
        });
        candidates
    }

    pub fn stats(&self) -> KnowledgeStats {
        let state = self.read();
        let mut stats = KnowledgeStats {
            entries: state.entries.len(),
            fixes_recorded: state.fixes.values().map(Vec::len).sum(),
            ..KnowledgeStats::default()
        };
        let mut total = 0.0;
        for entry in state.entries.values() {
            *stats.by_source.entry(entry.source).or_insert(0) += 1;
            if entry.occurrences > 1 {
                stats.recurring += 1;
            }
            if entry.suggested_check {
                stats.suggested += 1;
            }
            total += entry.confidence;
        }
        if !state.entries.is_empty() {
            stats.mean_confidence = total / state.entries.len() as f64;
        }
        stats
    }

    // ── Persistence ──────────────────────────────────────────────────────

    fn append(&self, records: &[LogRecord]) -> Result<(), KnowledgeError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source| KnowledgeError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err)?;
        file.write_all(buf.as_bytes()).map_err(io_err)?;
        file.flush().map_err(io_err)
    }

    fn replay(path: &Path, reinforcement: &Reinforcement) -> Result<Snapshot, KnowledgeError> {
        let io_err = |source| KnowledgeError::Io {
            path: path.to_path_buf(),
            source,
        };
        let reader = BufReader::new(File::open(path).map_err(io_err)?);
        let mut snapshot = Snapshot::default();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(io_err)?;
            if line.trim().is_empty() {
                continue;
            }
            // Untagged lines are entry snapshots from older logs.
            let parsed = serde_json::from_str::<LogRecord>(&line)
                .or_else(|_| serde_json::from_str::<KnowledgeEntry>(&line).map(LogRecord::Entry));
            match parsed {
                Ok(LogRecord::Entry(mut entry)) => {
                    entry.confidence = reinforcement.clamp(entry.confidence);
                    snapshot.apply(LogRecord::Entry(entry));
                }
                Ok(record) => snapshot.apply(record),
                Err(e) => warn!(line = lineno + 1, error = %e, "Skipping invalid knowledge line"),
            }
        }
        Ok(snapshot)
    }

    /// Rewrite the log with one line per signature plus fixes and the
    /// retained sightings.
    pub fn compact(&self) -> Result<(), KnowledgeError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source| KnowledgeError::Io {
            path: path.clone(),
            source,
        };
        let _writer = self.lock_writer();
        let mut buf = String::new();
        let entries = {
            let state = self.read();
            for entry in state.entries.values() {
                buf.push_str(&serde_json::to_string(&TaggedRef::Entry(entry))?);
                buf.push('\n');
            }
            for attempt in state.fixes.values().flatten() {
                buf.push_str(&serde_json::to_string(&TaggedRef::Fix(attempt))?);
                buf.push('\n');
            }
            for sighting in &state.sightings {
                buf.push_str(&serde_json::to_string(&TaggedRef::Sighting(sighting))?);
                buf.push('\n');
            }
            state.entries.len()
        };
        let temp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&temp_path).map_err(io_err)?;
            file.write_all(buf.as_bytes()).map_err(io_err)?;
        }
        std::fs::rename(&temp_path, path).map_err(io_err)?;
        debug!(path = %path.display(), entries, "Compacted knowledge log");
        Ok(())
    }
}

/// Borrowing twin of [`LogRecord`] for compaction.
#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum TaggedRef<'a> {
    Entry(&'a KnowledgeEntry),
    Fix(&'a FixAttempt),
    Sighting(&'a Sighting),
}

fn best_fix(attempts: Option<&Vec<FixAttempt>>) -> Option<SuggestedFix> {
    let mut tally: BTreeMap<&str, (u32, u32)> = BTreeMap::new();
    for attempt in attempts? {
        let (ok, tried) = tally.entry(attempt.fix.as_str()).or_insert((0, 0));
        *tried += 1;
        if attempt.success {
            *ok += 1;
        }
    }
    tally
        .into_iter()
        .map(|(fix, (ok, tried))| SuggestedFix {
            fix: fix.to_string(),
            success_rate: f64::from(ok) / f64::from(tried),
            times_tried: tried,
        })
        .min_by(|a, b| {
            b.success_rate
                .total_cmp(&a.success_rate)
                .then_with(|| b.times_tried.cmp(&a.times_tried))
                .then_with(|| a.fix.cmp(&b.fix))
        })
}

fn compare_matches(a: &KnowledgeMatch, b: &KnowledgeMatch) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.confidence.total_cmp(&a.confidence))
        .then_with(|| b.last_seen.cmp(&a.last_seen))
        .then_with(|| a.signature.cmp(&b.signature))
}

fn describe(item: &RawItem) -> String {
    let text = item
        .description
        .as_deref()
        .unwrap_or_else(|| item.text.lines().next().unwrap_or_default());
    truncate_output(text.trim(), DESCRIPTION_LIMIT)
}

/// Read-only command a human could register for this component.
fn proposed_command(component: &str, keyword: &str) -> Option<String> {
    let base = match component {
        "etcd" => "oc get pods -n openshift-etcd --no-headers",
        "kubevirt" => "oc get vmi -A --no-headers",
        "storage" => "oc get pods -n openshift-storage --no-headers",
        "pvc" => "oc get pvc -A --no-headers",
        "machine-config" => "oc get mcp --no-headers",
        "operator" => "oc get clusteroperators --no-headers",
        "certificate" => "oc get csr --no-headers",
        "node" => "oc get nodes --no-headers",
        "pod" => "oc get pods -A --no-headers",
        _ => return None,
    };
    Some(format!("{base} | grep -i {keyword}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use healthcrew_common::Category;
    use tempfile::TempDir;

    fn failing(check_id: &str, summary: &str, status: CheckStatus) -> CheckResult {
        CheckResult {
            check_id: check_id.into(),
            name: check_id.into(),
            category: Category::Workloads,
            command: "oc get pods -A".into(),
            raw_output: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
            metric: None,
            status,
            summary: summary.into(),
            findings: Vec::new(),
            timestamp: Utc::now(),
            duration_ms: 5,
        }
    }

    fn entry_lines(raw: &str) -> usize {
        raw.lines().filter(|l| l.contains("\"kind\":\"entry\"")).count()
    }

    // ---- Ingest ----

    #[test]
    fn test_ingest_creates_then_reinforces() {
        let kb = KnowledgeBase::new();
        let item = RawItem::new("etcd member timeout after upgrade").reference("BZ-1");
        let first = kb.ingest(KnowledgeSource::Bug, &[item.clone()]).unwrap();
        assert_eq!(first.created, 1);

        let entry = kb.get("etcd:timeout").unwrap();
        assert_eq!(entry.confidence, 0.6);
        assert_eq!(entry.reference.as_deref(), Some("BZ-1"));

        let second = kb.ingest(KnowledgeSource::Bug, &[item]).unwrap();
        assert_eq!(second.reinforced, 1);
        let entry = kb.get("etcd:timeout").unwrap();
        assert_eq!(entry.occurrences, 2);
        assert!(entry.confidence > 0.6);
        assert!(entry.confidence <= Reinforcement::default().max);
    }

    #[test]
    fn test_ingest_skips_items_without_keywords() {
        let kb = KnowledgeBase::new();
        let summary = kb
            .ingest(KnowledgeSource::Email, &[RawItem::new("weekly status: all good")])
            .unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(kb.is_empty());
    }

    #[test]
    fn test_same_signature_twice_in_one_batch() {
        let kb = KnowledgeBase::new();
        let item = RawItem::new("pod OOMKilled");
        let summary = kb
            .ingest(KnowledgeSource::Web, &[item.clone(), item])
            .unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.reinforced, 1);
        assert_eq!(kb.get("pod:oomkilled+oom").unwrap().occurrences, 2);
    }

    #[test]
    fn test_learn_from_results_only_failures() {
        let kb = KnowledgeBase::new();
        let results = vec![
            failing("pod_health", "3 pods CrashLoopBackOff", CheckStatus::Warning),
            failing("node_health", "all nodes ready", CheckStatus::Ok),
        ];
        let summary = kb.learn_from_results(&results).unwrap();
        assert_eq!(summary.created, 1);
        let entry = &kb.entries()[0];
        assert_eq!(entry.source, KnowledgeSource::Learned);
        assert_eq!(entry.reference.as_deref(), Some("check:pod_health"));
    }

    // ---- Matching ----

    #[test]
    fn test_match_orders_by_score_then_confidence() {
        let kb = KnowledgeBase::new();
        kb.ingest(KnowledgeSource::Web, &[RawItem::new("etcd timeout")])
            .unwrap();
        kb.ingest(
            KnowledgeSource::Bug,
            &[RawItem::new("etcd leader lost timeout notready")],
        )
        .unwrap();

        let matches = kb.match_text("etcd_health critical: member timeout");
        assert_eq!(matches[0].signature, "etcd:timeout");
        assert_eq!(matches[0].score, 1.0);
        assert!(matches.iter().all(|m| m.score >= 0.5));
    }

    #[test]
    fn test_equal_scores_break_ties_deterministically() {
        let kb = KnowledgeBase::new();
        let now = Utc::now();
        kb.ingest_at(KnowledgeSource::Web, &[RawItem::new("pod evicted")], now)
            .unwrap();
        kb.ingest_at(
            KnowledgeSource::Web,
            &[RawItem::new("pod pending")],
            now + Duration::seconds(5),
        )
        .unwrap();

        let matches = kb.match_text("pod evicted pending");
        let sigs: Vec<_> = matches.iter().map(|m| m.signature.as_str()).collect();
        assert_eq!(sigs, vec!["pod:pending", "pod:evicted"]);
        assert_eq!(matches, kb.match_text("pod evicted pending"));
    }

    #[test]
    fn test_no_terms_no_matches() {
        let kb = KnowledgeBase::new();
        kb.ingest(KnowledgeSource::Bug, &[RawItem::new("etcd timeout")])
            .unwrap();
        assert!(kb.match_text("everything fine").is_empty());
    }

    // ---- Suggestions & stats ----

    #[test]
    fn test_suggest_checks_thresholds() {
        let kb = KnowledgeBase::new();
        let item = RawItem::new("pvc pending for 10m");
        for _ in 0..3 {
            kb.ingest(KnowledgeSource::Learned, &[item.clone()]).unwrap();
        }
        kb.ingest(KnowledgeSource::Web, &[RawItem::new("node notready")])
            .unwrap();

        let candidates = kb.suggest_checks(2, 0.5);
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.id, "learned_pvc_pending");
        assert_eq!(c.occurrences, 3);
        let command = c.proposed_command.as_deref().unwrap();
        assert_eq!(healthcrew_common::validate_command(command), Ok(()));
        assert!(kb.suggest_checks(10, 0.0).is_empty());
    }

    #[test]
    fn test_mark_suggested_and_stats() {
        let kb = KnowledgeBase::new();
        kb.ingest(KnowledgeSource::Bug, &[RawItem::new("etcd timeout")])
            .unwrap();
        kb.ingest(KnowledgeSource::Email, &[RawItem::new("csr pending")])
            .unwrap();
        assert!(kb.mark_suggested("etcd:timeout").unwrap());
        assert!(!kb.mark_suggested("nope:x").unwrap());

        let stats = kb.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.suggested, 1);
        assert_eq!(stats.by_source[&KnowledgeSource::Bug], 1);
        assert!((stats.mean_confidence - 0.5).abs() < 1e-9);
    }

    // ---- Persistence ----

    #[test]
    fn test_replay_is_last_writer_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kb").join("knowledge.jsonl");
        {
            let kb = KnowledgeBase::open(&path).unwrap();
            let item = RawItem::new("etcd timeout");
            kb.ingest(KnowledgeSource::Bug, &[item.clone()]).unwrap();
            kb.ingest(KnowledgeSource::Bug, &[item]).unwrap();
        }
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(entry_lines(&raw), 2);

        let kb = KnowledgeBase::open(&path).unwrap();
        assert_eq!(kb.len(), 1);
        assert_eq!(kb.get("etcd:timeout").unwrap().occurrences, 2);
        assert_eq!(kb.issue_trends(1).total, 2);
    }

    #[test]
    fn test_replay_skips_corrupt_lines_and_compacts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("knowledge.jsonl");
        {
            let kb = KnowledgeBase::open(&path).unwrap();
            for _ in 0..3 {
                kb.ingest(KnowledgeSource::Bug, &[RawItem::new("pod evicted")])
                    .unwrap();
            }
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();
        drop(file);

        let kb = KnowledgeBase::open(&path).unwrap();
        assert_eq!(kb.len(), 1);
        kb.record_fix("pod:evicted", "raise node memory", true).unwrap();
        kb.compact().unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(entry_lines(&raw), 1);
        assert!(!raw.contains("not json"));

        let reopened = KnowledgeBase::open(&path).unwrap();
        assert_eq!(reopened.get("pod:evicted").unwrap().occurrences, 3);
        assert_eq!(reopened.issue_trends(1).total, 3);
        assert_eq!(reopened.suggested_fix("pod:evicted").unwrap().times_tried, 1);
    }

    #[test]
    fn test_replay_accepts_untagged_entry_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("knowledge.jsonl");
        let entry = KnowledgeEntry {
            signature: "etcd:timeout".into(),
            component: "etcd".into(),
            keywords: vec!["etcd".into(), "timeout".into()],
            source: KnowledgeSource::Bug,
            description: "etcd timeout".into(),
            confidence: 0.7,
            occurrences: 4,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            suggested_check: false,
            reference: None,
        };
        std::fs::write(&path, format!("{}\n", serde_json::to_string(&entry).unwrap())).unwrap();

        let kb = KnowledgeBase::open(&path).unwrap();
        assert_eq!(kb.get("etcd:timeout").unwrap().occurrences, 4);
    }

    // ---- Fixes & trends ----

    #[test]
    fn test_suggested_fix_prefers_success_rate_then_attempts() {
        let kb = KnowledgeBase::new();
        kb.ingest(KnowledgeSource::Learned, &[RawItem::new("pod OOMKilled")])
            .unwrap();
        let sig = "pod:oomkilled+oom";
        assert!(kb.suggested_fix(sig).is_none());

        kb.record_fix(sig, "restart the pod", false).unwrap();
        kb.record_fix(sig, "restart the pod", true).unwrap();
        kb.record_fix(sig, "raise memory limit", true).unwrap();
        kb.record_fix(sig, "raise memory limit", true).unwrap();
        kb.record_fix(sig, "drain node", true).unwrap();

        let best = kb.suggested_fix(sig).unwrap();
        assert_eq!(best.fix, "raise memory limit");
        assert_eq!(best.success_rate, 1.0);
        assert_eq!(best.times_tried, 2);
        assert_eq!(kb.stats().fixes_recorded, 5);

        let matches = kb.match_text("pod OOMKilled");
        assert_eq!(matches[0].fix.as_ref().map(|f| f.fix.as_str()), Some("raise memory limit"));
    }

    #[test]
    fn test_record_fix_rejects_unknown_and_empty() {
        let kb = KnowledgeBase::new();
        assert!(!kb.record_fix("nope:x", "anything", true).unwrap());
        kb.ingest(KnowledgeSource::Bug, &[RawItem::new("etcd timeout")])
            .unwrap();
        let err = kb.record_fix("etcd:timeout", "   ", true).unwrap_err();
        assert_eq!(err.code(), healthcrew_common::ErrorCode::KnowledgeInvalidInput);
    }

    #[test]
    fn test_issue_trends_window_and_grouping() {
        let kb = KnowledgeBase::new();
        let now = Utc::now();
        kb.ingest_at(
            KnowledgeSource::Learned,
            &[RawItem::new("etcd timeout"), RawItem::new("pod evicted")],
            now - Duration::days(10),
        )
        .unwrap();
        for _ in 0..3 {
            kb.ingest_at(KnowledgeSource::Learned, &[RawItem::new("etcd timeout")], now)
                .unwrap();
        }
        kb.ingest_at(KnowledgeSource::Bug, &[RawItem::new("pvc pending")], now)
            .unwrap();

        let week = kb.issue_trends_at(7, now);
        assert_eq!(week.period_days, 7);
        assert_eq!(week.total, 4);
        assert_eq!(week.by_component["etcd"], 3);
        assert!(!week.by_component.contains_key("pod"));
        assert_eq!(week.by_source[&KnowledgeSource::Bug], 1);
        assert_eq!(week.top_signatures[0], ("etcd:timeout".to_string(), 3));

        assert_eq!(kb.issue_trends_at(30, now).total, 6);
    }

    // ---- Concurrency ----

    #[test]
    fn test_concurrent_ingest_loses_no_reinforcement() {
        const WRITERS: usize = 16;
        let dir = TempDir::new().unwrap();
        let kb = KnowledgeBase::open(&dir.path().join("knowledge.jsonl")).unwrap();
        let item = RawItem::new("etcd member timeout");

        std::thread::scope(|scope| {
            for _ in 0..WRITERS {
                scope.spawn(|| {
                    kb.ingest(KnowledgeSource::Bug, std::slice::from_ref(&item))
                        .unwrap();
                    assert!(kb.len() <= 1);
                });
            }
        });

        let entry = kb.get("etcd:timeout").unwrap();
        assert_eq!(entry.occurrences, WRITERS as u32);
        let reinforcement = Reinforcement::default();
        let mut expected = KnowledgeSource::Bug.initial_confidence();
        for _ in 1..WRITERS {
            expected = reinforcement.apply(expected);
        }
        assert!((entry.confidence - expected).abs() < 1e-9);

        let reopened = KnowledgeBase::open(kb.path().unwrap()).unwrap();
        assert_eq!(reopened.get("etcd:timeout").unwrap(), entry);
    }

    #[test]
    fn test_readers_not_blocked_by_writer_mutex() {
        let kb = KnowledgeBase::new();
        kb.ingest(KnowledgeSource::Bug, &[RawItem::new("etcd timeout")])
            .unwrap();
        let _writer = kb.lock_writer();
        assert_eq!(kb.match_text("etcd timeout").len(), 1);
        assert_eq!(kb.stats().entries, 1);
    }

    #[test]
    fn test_missing_file_opens_empty() {
        let dir = TempDir::new().unwrap();
        let kb = KnowledgeBase::open(&dir.path().join("absent.jsonl")).unwrap();
        assert!(kb.is_empty());
        assert!(kb.path().is_some());
    }
}
