//! HealthCrew engine.
//!
//! Drives health builds against a remote OpenShift cluster: one session per
//! build, checks collected in registry order, results evaluated against
//! thresholds, failures matched against the knowledge base, optionally
//! investigated and correlated with external sources, and a report delivered
//! at the end.

pub mod alerts;
pub mod build;
pub mod error;
pub mod evaluators;
pub mod executor;
pub mod history;
pub mod investigate;
pub mod knowledge;
pub mod orchestrator;
pub mod rca;
pub mod registry;
pub mod report;
pub mod retry;
pub mod runner;
pub mod session;

pub use build::{Build, BuildPhase, BuildRequest, CancelToken, Diagnostic, PhaseChange};
pub use error::{BuildError, KnowledgeError, LookupError, SessionError};
pub use executor::{CheckExecutor, ExecutionReport, StopReason};
pub use history::{BuildHistory, BuildRecord, BuildStats};
pub use investigate::{Investigation, Investigator, IssueKind, RootCause};
pub use knowledge::{CheckCandidate, KnowledgeBase, KnowledgeEntry, KnowledgeMatch, RawItem};
pub use orchestrator::Orchestrator;
pub use rca::{KnownBugSource, LookupSource, RcaCorrelator, RcaReport};
pub use registry::{CheckDefinition, CheckRegistry, Evaluation};
pub use report::{FileReportSink, MemoryReportSink, ReportSink};
pub use retry::BoundedRetryPolicy;
#[cfg(unix)]
pub use runner::SshSessionFactory;
pub use runner::{BuildHandle, BuildRunner, SessionFactory};
pub use session::{SessionConfig, SessionManager};
