//! Concurrent build runner.
//!
//! Every build runs in its own tokio task with its own session, so a panic
//! or cancellation in one cannot touch another. A semaphore caps how many
//! builds hold a session at once; the rest wait for a permit.

use crate::build::{Build, BuildPhase, BuildRequest, CancelToken, Diagnostic};
use crate::error::BuildError;
use crate::history::BuildHistory;
use crate::orchestrator::Orchestrator;
use crate::session::{SessionConfig, SessionManager};
use healthcrew_common::ErrorCode;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

pub const DEFAULT_MAX_CONCURRENT_BUILDS: usize = 3;

/// Creates a fresh session for one build.
pub trait SessionFactory: Send + Sync {
    fn create(&self, host: &str) -> SessionManager;
}

impl<F> SessionFactory for F
where
    F: Fn(&str) -> SessionManager + Send + Sync,
{
    fn create(&self, host: &str) -> SessionManager {
        self(host)
    }
}

/// SSH sessions cloned from a template config with the host swapped in.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct SshSessionFactory {
    template: SessionConfig,
}

#[cfg(unix)]
impl SshSessionFactory {
    pub fn new(template: SessionConfig) -> Self {
        Self { template }
    }
}

#[cfg(unix)]
impl SessionFactory for SshSessionFactory {
    fn create(&self, host: &str) -> SessionManager {
        let mut config = self.template.clone();
        config.target.host = host.to_string();
        SessionManager::new(Box::new(crate::session::SshTransport::new()), config)
    }
}

/// Drops the build from the active map however the task ends.
struct ActiveGuard {
    active: Arc<Mutex<HashMap<Uuid, CancelToken>>>,
    id: Uuid,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

/// A submitted build.
#[derive(Debug)]
pub struct BuildHandle {
    pub id: Uuid,
    cancel: CancelToken,
    join: JoinHandle<Build>,
}

impl BuildHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the build to reach a terminal phase.
    pub async fn wait(self) -> Result<Build, BuildError> {
        self.join.await.map_err(|e| {
            error!(build = %self.id, error = %e, "Build task died");
            BuildError::Task(e.to_string())
        })
    }
}

pub struct BuildRunner {
    orchestrator: Arc<Orchestrator>,
    sessions: Arc<dyn SessionFactory>,
    permits: Arc<Semaphore>,
    history: Option<Arc<BuildHistory>>,
    default_host: String,
    active: Arc<Mutex<HashMap<Uuid, CancelToken>>>,
}

impl std::fmt::Debug for BuildRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildRunner")
            .field("default_host", &self.default_host)
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl BuildRunner {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        sessions: Arc<dyn SessionFactory>,
        default_host: impl Into<String>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            orchestrator,
            sessions,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            history: None,
            default_host: default_host.into(),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_history(mut self, history: Arc<BuildHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn history(&self) -> Option<&Arc<BuildHistory>> {
        self.history.as_ref()
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Ids of builds submitted and not yet finished.
    pub fn active(&self) -> Vec<Uuid> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }

    /// Request cancellation. Returns false when the build is not active.
    pub fn cancel(&self, id: Uuid) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Spawn a build and return immediately.
    pub fn submit(&self, request: BuildRequest) -> BuildHandle {
        let host = request
            .target_host
            .clone()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| self.default_host.clone());
        let build = Build::new(request, host);
        let id = build.id;
        let cancel = CancelToken::new();
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, cancel.clone());

        let orchestrator = Arc::clone(&self.orchestrator);
        let sessions = Arc::clone(&self.sessions);
        let permits = Arc::clone(&self.permits);
        let history = self.history.clone();
        let active = Arc::clone(&self.active);
        let token = cancel.clone();

        let join = tokio::spawn(async move {
            let _active = ActiveGuard { active, id: build.id };
            let finished = match permits.acquire_owned().await {
                Ok(permit) => {
                    debug!(build = %build.short_id(), "Build slot acquired");
                    let session = sessions.create(&build.host);
                    let finished = orchestrator.run(build, session, token).await;
                    drop(permit);
                    finished
                }
                Err(_) => {
                    let mut build = build;
                    build.fail(Diagnostic::from_code(
                        ErrorCode::BuildTaskFailed,
                        BuildPhase::Init,
                        "build slots closed",
                    ));
                    build
                }
            };

            if let Some(history) = history
                && let Some(task) = history.record(&finished)
            {
                let _ = task.await;
            }
            finished
        });

        info!(build = %id, "Build submitted");
        BuildHandle { id, cancel, join }
    }

    /// Submit and wait.
    pub async fn run(&self, request: BuildRequest) -> Result<Build, BuildError> {
        self.submit(request).wait().await
    }
}
