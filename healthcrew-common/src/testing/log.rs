//! Structured logging for tests.
//!
//! `init_global_test_logging()` installs a subscriber that mirrors every
//! event to `target/test-logs/healthcrew_tests.jsonl` and to the libtest
//! writer. It is safe to call from every test.
//!
//! ```ignore
//! #[tokio::test]
//! async fn scenario() {
//!     init_global_test_logging();
//!     let log = ScenarioLog::new("auth_recovery");
//!     log.phase(TestPhase::Execute, "running build");
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, Once};
use std::time::Instant;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestPhase {
    Setup,
    Execute,
    Verify,
    Teardown,
}

impl std::fmt::Display for TestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Execute => write!(f, "execute"),
            Self::Verify => write!(f, "verify"),
            Self::Teardown => write!(f, "teardown"),
        }
    }
}

static GLOBAL_LOGGING_INIT: Once = Once::new();

/// Install the shared test subscriber once per process.
///
/// `HEALTHCREW_TEST_LOG_FILE` overrides the JSONL path and
/// `HEALTHCREW_TEST_LOG_LEVEL` the level (default `info`).
pub fn init_global_test_logging() {
    GLOBAL_LOGGING_INIT.call_once(|| {
        let file_layer = create_global_log_file().map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_file(true)
                .with_line_number(true)
        });

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .compact();

        let level =
            std::env::var("HEALTHCREW_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let filter = tracing_subscriber::EnvFilter::try_new(format!(
            "healthcrew={level},healthcrew_engine={level},healthcrew_common={level}"
        ))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(stderr_layer)
            .try_init();
    });
}

fn create_global_log_file() -> Option<std::fs::File> {
    if let Ok(custom) = std::env::var("HEALTHCREW_TEST_LOG_FILE") {
        let path = PathBuf::from(custom);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        return std::fs::File::create(path).ok();
    }

    let log_dir = find_target_dir().join("test-logs");
    let _ = std::fs::create_dir_all(&log_dir);
    std::fs::File::create(log_dir.join("healthcrew_tests.jsonl")).ok()
}

fn find_target_dir() -> PathBuf {
    if let Ok(target_dir) = std::env::var("CARGO_TARGET_DIR") {
        return PathBuf::from(target_dir);
    }

    let mut cwd = std::env::current_dir().unwrap_or_default();
    loop {
        let target = cwd.join("target");
        if target.is_dir() {
            return target;
        }
        if !cwd.pop() {
            return PathBuf::from("target");
        }
    }
}

/// One recorded step of a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioEntry {
    pub phase: TestPhase,
    pub message: String,
    pub elapsed_ms: u64,
}

/// Phase-tagged log for a multi-step scenario test.
///
/// Entries go to tracing and are kept so a failing test can dump them.
pub struct ScenarioLog {
    name: String,
    started: Instant,
    entries: Mutex<Vec<ScenarioEntry>>,
}

impl ScenarioLog {
    pub fn new(name: &str) -> Self {
        let log = Self {
            name: name.to_string(),
            started: Instant::now(),
            entries: Mutex::new(Vec::new()),
        };
        log.phase(TestPhase::Setup, "scenario start");
        log
    }

    pub fn phase(&self, phase: TestPhase, message: impl Into<String>) {
        let entry = ScenarioEntry {
            phase,
            message: message.into(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            scenario = %self.name,
            phase = %entry.phase,
            elapsed_ms = entry.elapsed_ms,
            "{}",
            entry.message
        );
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    pub fn entries(&self) -> Vec<ScenarioEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Render the recorded steps, one per line.
    pub fn dump(&self) -> String {
        self.entries()
            .iter()
            .map(|e| format!("[{:>6}ms] {:<8} {}", e.elapsed_ms, e.phase, e.message))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(TestPhase::Setup.to_string(), "setup");
        assert_eq!(TestPhase::Teardown.to_string(), "teardown");
    }

    #[test]
    fn test_scenario_log_records_in_order() {
        init_global_test_logging();
        let log = ScenarioLog::new("ordering");
        log.phase(TestPhase::Execute, "step one");
        log.phase(TestPhase::Verify, "step two");

        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].message, "step one");
        assert_eq!(entries[2].phase, TestPhase::Verify);
        assert!(log.dump().contains("step two"));
    }

    #[test]
    fn test_init_is_idempotent() {
        init_global_test_logging();
        init_global_test_logging();
        tracing::info!("still fine");
    }
}
