//! Check execution pipeline.
//!
//! Checks run sequentially over one session in registry order. A rejected
//! command, a timeout, a non-zero exit or a panicking evaluator turns into an
//! `Error` result for that check only; session-level failures stop the run.

use crate::build::CancelToken;
use crate::error::SessionError;
use crate::registry::{CheckDefinition, Evaluation};
use crate::session::{CommandEnv, CommandOutput, SessionManager};
use chrono::Utc;
use healthcrew_common::{CheckResult, CheckStatus, mask_sensitive_command, truncate_output};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;
const MAX_STDERR_BYTES: usize = 4 * 1024;

/// Why a run over the check list ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    Completed,
    Cancelled,
    Fatal(SessionError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub results: Vec<CheckResult>,
    pub stop: StopReason,
}

impl ExecutionReport {
    pub fn completed(&self) -> bool {
        self.stop == StopReason::Completed
    }
}

#[derive(Debug, Clone)]
pub struct CheckExecutor {
    max_output_bytes: usize,
}

impl Default for CheckExecutor {
    fn default() -> Self {
        Self {
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

impl CheckExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Run `checks` until done, cancelled, or a session-fatal error.
    ///
    /// Cancellation is observed between checks; the in-flight command
    /// finishes first.
    pub async fn run_all<'a, I>(
        &self,
        session: &mut SessionManager,
        checks: I,
        env: &CommandEnv,
        cancel: &CancelToken,
    ) -> ExecutionReport
    where
        I: IntoIterator<Item = &'a CheckDefinition>,
    {
        let mut results = Vec::new();
        for check in checks {
            if cancel.is_cancelled() {
                info!(completed = results.len(), "Cancellation requested, stopping checks");
                return ExecutionReport {
                    results,
                    stop: StopReason::Cancelled,
                };
            }
            match self.run_check(session, check, env).await {
                Ok(result) => results.push(result),
                Err(err) => {
                    warn!(check = %check.id, error = %err, "Session failure, aborting remaining checks");
                    return ExecutionReport {
                        results,
                        stop: StopReason::Fatal(err),
                    };
                }
            }
        }
        ExecutionReport {
            results,
            stop: StopReason::Completed,
        }
    }

    /// Run one check. `Err` only for failures that end the whole build.
    pub async fn run_check(
        &self,
        session: &mut SessionManager,
        check: &CheckDefinition,
        env: &CommandEnv,
    ) -> Result<CheckResult, SessionError> {
        let started = Instant::now();
        debug!(check = %check.id, category = %check.category, "Running check");

        let outcome = session.execute(&check.command, env).await;
        let result = match outcome {
            Ok(output) if output.success() || is_empty_filter_match(&check.command, &output) => {
                let evaluation = evaluate_isolated(check, &output.stdout);
                self.build_result(check, Some(&output), evaluation, started)
            }
            Ok(output) => {
                let evaluation = Evaluation::new(
                    CheckStatus::Error,
                    format!("exit {}: {}", output.exit_code, output.headline()),
                );
                self.build_result(check, Some(&output), evaluation, started)
            }
            Err(err) if err.is_fatal_to_build() => return Err(err),
            Err(err) => {
                let evaluation = Evaluation::new(CheckStatus::Error, err.to_string());
                self.build_result(check, None, evaluation, started)
            }
        };

        info!(
            check = %result.check_id,
            status = %result.status,
            metric = ?result.metric,
            duration_ms = result.duration_ms,
            "Check finished"
        );
        Ok(result)
    }

    fn build_result(
        &self,
        check: &CheckDefinition,
        output: Option<&CommandOutput>,
        evaluation: Evaluation,
        started: Instant,
    ) -> CheckResult {
        CheckResult {
            check_id: check.id.clone(),
            name: check.name.clone(),
            category: check.category,
            command: mask_sensitive_command(&check.command),
            raw_output: output
                .map(|o| truncate_output(&o.stdout, self.max_output_bytes))
                .unwrap_or_default(),
            stderr: output
                .map(|o| truncate_output(&o.stderr, MAX_STDERR_BYTES))
                .unwrap_or_default(),
            exit_code: output.map(|o| o.exit_code),
            metric: evaluation.metric,
            status: evaluation.status,
            summary: evaluation.summary,
            findings: evaluation.findings,
            timestamp: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// `grep` exits 1 when nothing matched; that is an empty result, not a failure.
fn is_empty_filter_match(command: &str, output: &CommandOutput) -> bool {
    output.exit_code == 1
        && output.stdout.trim().is_empty()
        && output.stderr.trim().is_empty()
        && command
            .rsplit('|')
            .next()
            .is_some_and(|last| matches!(last.split_whitespace().next(), Some("grep" | "egrep")))
}

fn evaluate_isolated(check: &CheckDefinition, stdout: &str) -> Evaluation {
    let evaluator = check.evaluator;
    match catch_unwind(AssertUnwindSafe(|| evaluator(stdout, &check.thresholds))) {
        Ok(evaluation) => evaluation,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(check = %check.id, panic = %message, "Evaluator panicked");
            Evaluation::new(CheckStatus::Error, format!("evaluator panicked: {message}"))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
