#![allow(dead_code)]

use healthcrew_engine::registry::Evaluator;
use healthcrew_engine::session::{
    FallbackCredential, MockHandle, MockTransport, SessionConfig, SessionManager, SessionTarget,
};
use healthcrew_engine::{
    BoundedRetryPolicy, CheckDefinition, CheckRegistry, KnowledgeBase, MemoryReportSink,
    Orchestrator, RcaCorrelator,
};
use healthcrew_common::{Category, Thresholds};
use std::sync::Arc;
use std::time::Duration;

pub use healthcrew_common::testing::{ScenarioLog, TestPhase, init_global_test_logging};

pub const NODES_ONE_NOT_READY: &str = "\
m0 Ready master 12d v1.29.6
w1 Ready worker 12d v1.29.6
w2 NotReady worker 12d v1.29.6
";

pub const NODES_ALL_READY: &str = "\
m0 Ready master 12d v1.29.6
w1 Ready worker 12d v1.29.6
";

pub fn session_config() -> SessionConfig {
    SessionConfig::new(SessionTarget::new("bastion.lab", "kni"))
        .with_command_timeout(Duration::from_millis(500))
        .with_connect_retry(BoundedRetryPolicy::once())
}

pub fn with_fallback(config: SessionConfig) -> SessionConfig {
    config.with_fallback(Some(FallbackCredential {
        server: "https://api.lab:6443".to_string(),
        token: "sha256~fallback".to_string(),
    }))
}

pub fn session(mock: MockTransport, config: SessionConfig) -> (SessionManager, MockHandle) {
    let handle = mock.handle();
    (SessionManager::new(Box::new(mock), config), handle)
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub sink: Arc<MemoryReportSink>,
    pub knowledge: Arc<KnowledgeBase>,
}

pub fn harness(registry: CheckRegistry, rca: RcaCorrelator) -> Harness {
    let sink = Arc::new(MemoryReportSink::new());
    let knowledge = Arc::new(KnowledgeBase::new());
    let orchestrator = Orchestrator::new(
        Arc::new(registry),
        Arc::clone(&knowledge),
        rca,
        Arc::clone(&sink) as Arc<dyn healthcrew_engine::ReportSink>,
    );
    Harness {
        orchestrator,
        sink,
        knowledge,
    }
}

pub fn default_harness() -> Harness {
    harness(
        CheckRegistry::with_builtin_checks(),
        RcaCorrelator::new(Duration::from_millis(200)),
    )
}

pub fn custom_check(id: &str, command: &str, evaluator: Evaluator) -> CheckDefinition {
    CheckDefinition::new(id, id, Category::Workloads, command, evaluator)
        .thresholds(Thresholds::new(0.0, 1.0))
}
