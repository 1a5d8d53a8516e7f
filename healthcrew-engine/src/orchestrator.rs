//! Build orchestration.
//!
//! Drives one [`Build`] through its phases over one session. The session is
//! closed on every exit path and every build, failed or not, is handed to
//! the report sink.
//!
//! Failures are matched against the knowledge base and correlated before
//! they are learned, so a build never cites its own failures as known
//! issues.

use crate::alerts;
use crate::build::{Build, BuildPhase, CancelToken, Diagnostic};
use crate::error::{BuildError, SessionError};
use crate::evaluators::rows;
use crate::executor::{CheckExecutor, StopReason};
use crate::investigate::Investigator;
use crate::knowledge::{KnowledgeBase, KnowledgeMatch};
use crate::rca::RcaCorrelator;
use crate::registry::CheckRegistry;
use crate::report::ReportSink;
use crate::session::{CommandEnv, SessionManager};
use healthcrew_common::{CheckResult, CheckStatus, ErrorCode};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_SUGGEST_MIN_OCCURRENCES: u32 = 2;
pub const DEFAULT_SUGGEST_MIN_CONFIDENCE: f64 = 0.6;
const CLUSTER_VERSION_COMMAND: &str = "oc get clusterversion version --no-headers";

#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<CheckRegistry>,
    knowledge: Arc<KnowledgeBase>,
    rca: RcaCorrelator,
    sink: Arc<dyn ReportSink>,
    executor: CheckExecutor,
    investigator: Investigator,
    suggest_min_occurrences: u32,
    suggest_min_confidence: f64,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("checks", &self.registry.len())
            .field("rca", &self.rca)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        registry: Arc<CheckRegistry>,
        knowledge: Arc<KnowledgeBase>,
        rca: RcaCorrelator,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        Self {
            registry,
            knowledge,
            rca,
            sink,
            executor: CheckExecutor::new(),
            investigator: Investigator::new(),
            suggest_min_occurrences: DEFAULT_SUGGEST_MIN_OCCURRENCES,
            suggest_min_confidence: DEFAULT_SUGGEST_MIN_CONFIDENCE,
        }
    }

    pub fn with_executor(mut self, executor: CheckExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_investigator(mut self, investigator: Investigator) -> Self {
        self.investigator = investigator;
        self
    }

    pub fn with_suggestion_thresholds(mut self, min_occurrences: u32, min_confidence: f64) -> Self {
        self.suggest_min_occurrences = min_occurrences;
        self.suggest_min_confidence = min_confidence;
        self
    }

    pub fn registry(&self) -> &CheckRegistry {
        &self.registry
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeBase> {
        &self.knowledge
    }

    /// Run `build` to a terminal phase.
    pub async fn run(
        &self,
        mut build: Build,
        mut session: SessionManager,
        cancel: CancelToken,
    ) -> Build {
        info!(build = %build.short_id(), host = %build.host, "Build started");

        let outcome = self.drive(&mut build, &mut session, &cancel).await;
        build.recovery_events = session.recovery_events().to_vec();
        session.close().await;

        if let Err(diagnostic) = outcome {
            warn!(
                build = %build.short_id(),
                code = %diagnostic.code,
                phase = %diagnostic.phase,
                why = %diagnostic.why,
                "Build failed"
            );
            build.fail(diagnostic);
            match self.sink.deliver(&build).await {
                Ok(reference) => build.report_ref = Some(reference),
                Err(e) => warn!(build = %build.short_id(), error = %e, "Failure report not delivered"),
            }
        }

        info!(
            build = %build.short_id(),
            phase = %build.phase,
            status = ?build.overall_status,
            results = build.results.len(),
            alerts = build.alerts.len(),
            "Build finished"
        );
        build
    }

    async fn drive(
        &self,
        build: &mut Build,
        session: &mut SessionManager,
        cancel: &CancelToken,
    ) -> Result<(), Diagnostic> {
        let selected = self
            .registry
            .select(&build.request.checks)
            .map_err(|e| Diagnostic::from_code(e.code(), BuildPhase::Init, e.to_string()))?;

        step(build, BuildPhase::Connecting)?;
        ensure_not_cancelled(build, cancel)?;
        session.connect().await.map_err(|e| session_failure(e, build.phase))?;
        let version = session
            .validate_environment()
            .await
            .map_err(|e| session_failure(e, build.phase))?;
        debug!(build = %build.short_id(), version = %version, "Remote environment validated");

        step(build, BuildPhase::Collecting)?;
        let env = session.env();
        let execution = self
            .executor
            .run_all(session, selected.enabled(), &env, cancel)
            .await;
        for result in execution.results {
            push(build, result)?;
        }
        build.alerts = alerts::collect(&build.results, &selected);
        match execution.stop {
            StopReason::Completed => {}
            StopReason::Cancelled => {
                build.cancelled = true;
                return Err(cancelled(build.phase));
            }
            StopReason::Fatal(err) => return Err(session_failure(err, build.phase)),
        }

        let failing: Vec<CheckResult> = build
            .results
            .iter()
            .filter(|r| r.status >= CheckStatus::Warning)
            .cloned()
            .collect();
        self.match_knowledge(build, &failing);

        if build.request.wants_analysis() {
            step(build, BuildPhase::Analyzing)?;
            ensure_not_cancelled(build, cancel)?;
            self.analyze(build, session, &env, &failing, cancel).await;
        }

        self.learn(build, failing).await;
        if build.request.enable_knowledge_scan {
            build.suggestions = self
                .knowledge
                .suggest_checks(self.suggest_min_occurrences, self.suggest_min_confidence);
        }

        step(build, BuildPhase::Reporting)?;
        build.recovery_events = session.recovery_events().to_vec();
        let reference = self
            .sink
            .deliver(build)
            .await
            .map_err(|e| Diagnostic::from((&e, BuildPhase::Reporting)))?;
        build.report_ref = Some(reference);
        step(build, BuildPhase::Done)
    }

    /// Best match per signature, against what was known before this build.
    fn match_knowledge(&self, build: &mut Build, failing: &[CheckResult]) {
        if !(build.request.enable_knowledge_scan || build.request.wants_analysis()) {
            return;
        }
        let mut best: BTreeMap<String, KnowledgeMatch> = BTreeMap::new();
        for result in failing {
            for m in self.knowledge.match_result(result) {
                match best.get(&m.signature) {
                    Some(existing) if existing.score >= m.score => {}
                    _ => {
                        best.insert(m.signature.clone(), m);
                    }
                }
            }
        }
        let mut matches: Vec<KnowledgeMatch> = best.into_values().collect();
        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
                .then_with(|| b.last_seen.cmp(&a.last_seen))
                .then_with(|| a.signature.cmp(&b.signature))
        });
        build.knowledge_matches = matches;
    }

    /// Record failures as learned entries. Store IO runs off the async
    /// workers; errors degrade to a warning.
    async fn learn(&self, build: &Build, failing: Vec<CheckResult>) {
        if failing.is_empty() {
            return;
        }
        let knowledge = Arc::clone(&self.knowledge);
        match tokio::task::spawn_blocking(move || knowledge.learn_from_results(&failing)).await {
            Ok(Ok(summary)) => debug!(
                build = %build.short_id(),
                created = summary.created,
                reinforced = summary.reinforced,
                "Learned from build failures"
            ),
            Ok(Err(e)) => warn!(build = %build.short_id(), code = %e.code(), error = %e, "Knowledge update failed"),
            Err(e) => warn!(build = %build.short_id(), error = %e, "Knowledge update task failed"),
        }
    }

    async fn analyze(
        &self,
        build: &mut Build,
        session: &mut SessionManager,
        env: &CommandEnv,
        failing: &[CheckResult],
        cancel: &CancelToken,
    ) {
        if failing.is_empty() {
            return;
        }
        if build.request.search_external_bugs {
            build.cluster_version = cluster_version(session, env).await;
        }
        for result in failing {
            let report = self
                .rca
                .correlate(result, &build.request, build.cluster_version.as_deref())
                .await;
            debug!(
                build = %build.short_id(),
                check = %report.check_id,
                candidates = report.candidates.len(),
                unavailable = report.unavailable.len(),
                "Correlated failure"
            );
            build.rca.push(report);
        }
        if build.request.enable_deep_analysis && !build.request.bug_matching_only {
            build.investigations = self
                .investigator
                .investigate(session, env, failing, cancel)
                .await;
        }
    }
}

/// OpenShift version from the `clusterversion` resource, if readable.
async fn cluster_version(session: &mut SessionManager, env: &CommandEnv) -> Option<String> {
    match session.execute(CLUSTER_VERSION_COMMAND, env).await {
        Ok(output) if output.success() => {
            let version = rows(&output.stdout)
                .first()
                .and_then(|r| r.get(1))
                .map(|v| v.to_string());
            debug!(version = ?version, "Cluster version discovered");
            version
        }
        Ok(output) => {
            warn!(detail = %output.headline(), "Cluster version unavailable");
            None
        }
        Err(e) => {
            warn!(error = %e, "Cluster version unavailable");
            None
        }
    }
}

fn step(build: &mut Build, phase: BuildPhase) -> Result<(), Diagnostic> {
    let from = build.phase;
    build
        .transition(phase)
        .map_err(|e| Diagnostic::from((&e, from)))?;
    info!(build = %build.short_id(), phase = %phase, progress = phase.progress(), "Build phase");
    Ok(())
}

fn push(build: &mut Build, result: CheckResult) -> Result<(), Diagnostic> {
    let phase = build.phase;
    build
        .push_result(result)
        .map_err(|e| Diagnostic::from((&e, phase)))
}

fn ensure_not_cancelled(build: &mut Build, cancel: &CancelToken) -> Result<(), Diagnostic> {
    if cancel.is_cancelled() {
        build.cancelled = true;
        return Err(cancelled(build.phase));
    }
    Ok(())
}

fn cancelled(phase: BuildPhase) -> Diagnostic {
    Diagnostic::from_code(ErrorCode::BuildCancelled, phase, BuildError::Cancelled.to_string())
}

fn session_failure(err: SessionError, phase: BuildPhase) -> Diagnostic {
    Diagnostic::from((&BuildError::Session(err), phase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::BuildRequest;
    use crate::report::MemoryReportSink;
    use crate::session::{MockReply, MockTransport, SessionConfig, SessionTarget};
    use std::time::Duration;

    fn orchestrator(sink: Arc<MemoryReportSink>) -> Orchestrator {
        Orchestrator::new(
            Arc::new(CheckRegistry::with_builtin_checks()),
            Arc::new(KnowledgeBase::new()),
            RcaCorrelator::new(Duration::from_secs(1)),
            sink,
        )
    }

    fn session(transport: MockTransport) -> SessionManager {
        SessionManager::new(
            Box::new(transport),
            SessionConfig::new(SessionTarget::new("bastion", "root")),
        )
    }

    fn request(checks: &[&str]) -> BuildRequest {
        BuildRequest {
            checks: checks.iter().map(|s| s.to_string()).collect(),
            ..BuildRequest::default()
        }
    }

    #[tokio::test]
    async fn test_happy_path_reaches_done() {
        let sink = Arc::new(MemoryReportSink::new());
        let transport = MockTransport::new().on(
            "get nodes",
            MockReply::stdout("master-0 Ready control-plane 10d v1.29\n"),
        );
        let handle = transport.handle();
        let build = orchestrator(sink.clone())
            .run(
                Build::new(request(&["node_health"]), "bastion"),
                session(transport),
                CancelToken::new(),
            )
            .await;

        assert_eq!(build.phase, BuildPhase::Done);
        assert_eq!(build.overall_status, Some(CheckStatus::Ok));
        assert!(build.report_ref.is_some());
        assert_eq!(sink.delivered().len(), 1);
        assert_eq!(handle.closes(), 1);
        let phases: Vec<_> = build.phase_history.iter().map(|p| p.phase).collect();
        assert_eq!(
            phases,
            vec![
                BuildPhase::Init,
                BuildPhase::Connecting,
                BuildPhase::Collecting,
                BuildPhase::Reporting,
                BuildPhase::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_failure_yields_diagnostic_report() {
        let sink = Arc::new(MemoryReportSink::new());
        let transport =
            MockTransport::new().fail_connect(vec![MockReply::Error("refused".into())]);
        let session = SessionManager::new(
            Box::new(transport),
            SessionConfig::new(SessionTarget::new("bastion", "root"))
                .with_connect_retry(crate::retry::BoundedRetryPolicy::once()),
        );
        let build = orchestrator(sink.clone())
            .run(Build::new(request(&[]), "bastion"), session, CancelToken::new())
            .await;

        assert_eq!(build.phase, BuildPhase::Failed);
        assert!(build.results.is_empty());
        assert_eq!(build.overall_status, None);
        let diag = build.diagnostic.as_ref().unwrap();
        assert_eq!(diag.code, "HC-E100");
        assert_eq!(diag.phase, BuildPhase::Connecting);
        assert_eq!(sink.delivered().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_cli_fails_environment_check() {
        let sink = Arc::new(MemoryReportSink::new());
        let transport = MockTransport::new().on(
            "oc version --client",
            MockReply::exit(127, "bash: oc: command not found"),
        );
        let build = orchestrator(sink)
            .run(Build::new(request(&[]), "bastion"), session(transport), CancelToken::new())
            .await;
        assert_eq!(build.phase, BuildPhase::Failed);
        assert_eq!(build.diagnostic.unwrap().code, "HC-E102");
    }

    #[tokio::test]
    async fn test_unknown_check_fails_before_connect() {
        let sink = Arc::new(MemoryReportSink::new());
        let transport = MockTransport::new();
        let handle = transport.handle();
        let build = orchestrator(sink)
            .run(Build::new(request(&["nope"]), "bastion"), session(transport), CancelToken::new())
            .await;
        assert_eq!(build.phase, BuildPhase::Failed);
        assert_eq!(build.diagnostic.unwrap().code, "HC-E203");
        assert_eq!(handle.connects(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_build_keeps_partial_results() {
        let sink = Arc::new(MemoryReportSink::new());
        let cancel = CancelToken::new();
        cancel.cancel();
        let build = orchestrator(sink)
            .run(Build::new(request(&[]), "bastion"), session(MockTransport::new()), cancel)
            .await;
        assert_eq!(build.phase, BuildPhase::Failed);
        assert!(build.cancelled);
        assert_eq!(build.diagnostic.unwrap().code, "HC-E300");
    }

    #[tokio::test]
    async fn test_analysis_phase_when_requested() {
        let sink = Arc::new(MemoryReportSink::new());
        let transport = MockTransport::new().on(
            "get nodes",
            MockReply::stdout("worker-1 NotReady worker 10d v1.29\n"),
        );
        let mut req = request(&["node_health"]);
        req.enable_deep_analysis = true;
        let build = orchestrator(sink)
            .run(Build::new(req, "bastion"), session(transport), CancelToken::new())
            .await;
        assert_eq!(build.phase, BuildPhase::Done);
        assert!(build.phase_history.iter().any(|p| p.phase == BuildPhase::Analyzing));
        assert_eq!(build.rca.len(), 1);
        assert_eq!(build.overall_status, Some(CheckStatus::Warning));
    }

    #[tokio::test]
    async fn test_failures_learned_after_matching() {
        let knowledge = Arc::new(KnowledgeBase::new());
        let orchestrator = Orchestrator::new(
            Arc::new(CheckRegistry::with_builtin_checks()),
            Arc::clone(&knowledge),
            RcaCorrelator::new(Duration::from_secs(1))
                .with_source(Arc::new(crate::rca::KnowledgeLookup::new(Arc::clone(&knowledge)))),
            Arc::new(MemoryReportSink::new()),
        );
        let run = || {
            let transport = MockTransport::new().on(
                "get nodes",
                MockReply::stdout("worker-1 NotReady worker 10d v1.29\n"),
            );
            let mut req = request(&["node_health"]);
            req.enable_deep_analysis = true;
            orchestrator.run(Build::new(req, "bastion"), session(transport), CancelToken::new())
        };

        let first = run().await;
        assert!(first.knowledge_matches.is_empty());
        assert!(first.rca[0].candidates.iter().all(|c| !c.source.starts_with("knowledge/")));
        assert_eq!(knowledge.len(), 1);

        let second = run().await;
        assert_eq!(second.knowledge_matches.len(), 1);
        assert!(second.rca[0].candidates.iter().any(|c| c.source == "knowledge/learned"));
        assert_eq!(knowledge.len(), 1);
    }

    #[tokio::test]
    async fn test_delivered_report_carries_final_status() {
        let sink = Arc::new(MemoryReportSink::new());
        let transport = MockTransport::new().on(
            "get nodes",
            MockReply::stdout("worker-1 NotReady worker 10d v1.29\n"),
        );
        let build = orchestrator(sink.clone())
            .run(Build::new(request(&["node_health"]), "bastion"), session(transport), CancelToken::new())
            .await;
        let delivered = &sink.delivered()[0];
        assert_eq!(delivered.phase, BuildPhase::Reporting);
        assert_eq!(delivered.overall_status, Some(CheckStatus::Warning));
        assert!(delivered.finished_at.is_some());
        assert_eq!(build.finished_at, delivered.finished_at);
    }

    #[tokio::test]
    async fn test_deep_analysis_investigates_with_cluster_version() {
        let sink = Arc::new(MemoryReportSink::new());
        let transport = MockTransport::new()
            .on(
                "get pods -A",
                MockReply::stdout("openshift-cnv virt-handler-q2 0/1 CrashLoopBackOff 9 1h\n"),
            )
            .on(
                "get clusterversion",
                MockReply::stdout("version 4.17.0 True False 5d Cluster version is 4.17.0\n"),
            )
            .on("wc -l", MockReply::stdout("1200\n"));
        let orchestrator = Orchestrator::new(
            Arc::new(CheckRegistry::with_builtin_checks()),
            Arc::new(KnowledgeBase::new()),
            RcaCorrelator::new(Duration::from_secs(1))
                .with_source(Arc::new(crate::rca::KnownBugSource)),
            sink,
        );
        let mut req = request(&["pod_health"]);
        req.enable_deep_analysis = true;
        req.search_external_bugs = true;
        let build = orchestrator
            .run(Build::new(req, "bastion"), session(transport), CancelToken::new())
            .await;

        assert_eq!(build.phase, BuildPhase::Done);
        assert_eq!(build.cluster_version.as_deref(), Some("4.17.0"));
        assert!(build.rca[0]
            .candidates
            .iter()
            .any(|c| c.source == "known_bugs" && c.explanation.contains("(4.17.0)")));
        assert_eq!(build.investigations.len(), 1);
        let inv = &build.investigations[0];
        assert_eq!(inv.kind, crate::investigate::IssueKind::VirtHandlerMemory);
        assert_eq!(inv.subject, "openshift-cnv/virt-handler-q2");
        assert_eq!(inv.root_cause.confidence, crate::investigate::Confidence::High);
    }

    #[tokio::test]
    async fn test_bug_matching_only_skips_investigation() {
        let sink = Arc::new(MemoryReportSink::new());
        let transport = MockTransport::new().on(
            "get pods -A",
            MockReply::stdout("shop web-1 0/1 CrashLoopBackOff 9 1h\n"),
        );
        let handle = transport.handle();
        let mut req = request(&["pod_health"]);
        req.bug_matching_only = true;
        let build = orchestrator(sink)
            .run(Build::new(req, "bastion"), session(transport), CancelToken::new())
            .await;
        assert!(build.phase_history.iter().any(|p| p.phase == BuildPhase::Analyzing));
        assert!(build.investigations.is_empty());
        assert_eq!(build.cluster_version, None);
        assert_eq!(handle.count("describe pod"), 0);
    }
}
