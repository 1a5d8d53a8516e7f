//! Build history tracking.
//!
//! Ring buffer of recent build summaries with optional JSONL persistence.

use crate::build::{Build, BuildPhase};
use chrono::{DateTime, Utc};
use healthcrew_common::CheckStatus;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::fs::OpenOptions as AsyncOpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default maximum number of builds to retain.
pub const DEFAULT_CAPACITY: usize = 100;

/// Compact record of a finished build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub id: Uuid,
    pub host: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub phase: BuildPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_status: Option<CheckStatus>,
    pub checks_run: usize,
    pub status_counts: BTreeMap<CheckStatus, usize>,
    pub alerts: usize,
    pub recoveries: usize,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl From<&Build> for BuildRecord {
    fn from(build: &Build) -> Self {
        Self {
            id: build.id,
            host: build.host.clone(),
            started_at: build.started_at,
            finished_at: build.finished_at,
            phase: build.phase,
            overall_status: build.overall_status,
            checks_run: build.results.len(),
            status_counts: build.status_counts(),
            alerts: build.alerts.len(),
            recoveries: build.recovery_events.len(),
            cancelled: build.cancelled,
            report_ref: build.report_ref.clone(),
            error_code: build.diagnostic.as_ref().map(|d| d.code.clone()),
        }
    }
}

impl BuildRecord {
    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildStats {
    pub total_builds: usize,
    pub done_count: usize,
    pub failed_count: usize,
    pub by_status: BTreeMap<CheckStatus, usize>,
    pub avg_duration_ms: u64,
}

/// Recent builds, newest last, persisted as one JSON line per build.
pub struct BuildHistory {
    records: RwLock<VecDeque<BuildRecord>>,
    capacity: usize,
    path: Option<PathBuf>,
}

impl BuildHistory {
    /// In-memory only.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            path: None,
        }
    }

    /// Load `path` if it exists and persist new records to it. A file
    /// holding more lines than are kept is rewritten on open.
    pub fn open(path: &Path, capacity: usize) -> std::io::Result<Self> {
        let mut history = Self::new(capacity);
        history.path = Some(path.to_path_buf());
        if !path.exists() {
            return Ok(history);
        }

        let reader = BufReader::new(File::open(path)?);
        let mut lines = 0;
        {
            let mut records = history.records.write().unwrap_or_else(|e| e.into_inner());
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                lines += 1;
                match serde_json::from_str::<BuildRecord>(&line) {
                    Ok(record) => {
                        if records.len() >= history.capacity {
                            records.pop_front();
                        }
                        records.push_back(record);
                    }
                    Err(e) => warn!(error = %e, "Skipping invalid history line"),
                }
            }
        }

        let kept = history.len();
        debug!(records = kept, path = %path.display(), "Loaded build history");
        if lines > kept {
            history.compact()?;
        }
        Ok(history)
    }

    /// Record a finished build. Returns the append task when persisting.
    pub fn record(&self, build: &Build) -> Option<tokio::task::JoinHandle<()>> {
        let record = BuildRecord::from(build);
        debug!(
            build = %record.id,
            phase = %record.phase,
            checks = record.checks_run,
            "Recording build"
        );

        let append = self.path.clone().map(|path| (path, record.clone()));
        {
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            if records.len() >= self.capacity {
                records.pop_front();
            }
            records.push_back(record);
        }

        append.map(|(path, record)| {
            tokio::spawn(async move {
                if let Err(e) = append_record(&path, &record).await {
                    warn!(path = %path.display(), error = %e, "Failed to persist build record");
                }
            })
        })
    }

    /// Most recent first, optionally only builds against `host`.
    pub fn recent(&self, limit: usize, host: Option<&str>) -> Vec<BuildRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .iter()
            .rev()
            .filter(|r| host.is_none_or(|h| r.host == h))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> BuildStats {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let total = records.len();
        if total == 0 {
            return BuildStats::default();
        }

        let mut by_status = BTreeMap::new();
        for status in records.iter().filter_map(|r| r.overall_status) {
            *by_status.entry(status).or_insert(0) += 1;
        }
        let durations: Vec<u64> = records.iter().filter_map(BuildRecord::duration_ms).collect();
        let avg_duration_ms = if durations.is_empty() {
            0
        } else {
            durations.iter().sum::<u64>() / durations.len() as u64
        };

        BuildStats {
            total_builds: total,
            done_count: records.iter().filter(|r| r.phase == BuildPhase::Done).count(),
            failed_count: records.iter().filter(|r| r.phase == BuildPhase::Failed).count(),
            by_status,
            avg_duration_ms,
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrite the file with only the retained records.
    fn compact(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let temp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&temp_path)?;
            for record in records.iter() {
                writeln!(file, "{}", serde_json::to_string(record)?)?;
            }
        }
        std::fs::rename(temp_path, path)?;
        debug!(path = %path.display(), kept = records.len(), "Compacted history file");
        Ok(())
    }
}

async fn append_record(path: &Path, record: &BuildRecord) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = AsyncOpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
