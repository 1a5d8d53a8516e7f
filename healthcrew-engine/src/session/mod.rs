//! Remote session management.
//!
//! A [`SessionManager`] owns exactly one transport channel for the lifetime
//! of a build. Every command passes the [`CommandPolicy`] before it reaches
//! the channel, runs with `KUBECONFIG` exported, and is bounded by the
//! command timeout. When the cluster rejects the current credentials the
//! manager logs in once with the fallback token and retries the command
//! once; a second rejection marks the session expired.

pub mod mock;
#[cfg(unix)]
pub mod ssh;
pub mod transport;

pub use mock::{MockHandle, MockReply, MockTransport};
#[cfg(unix)]
pub use ssh::SshTransport;
pub use transport::{CommandOutput, RemoteTransport, SessionTarget};

use crate::error::SessionError;
use crate::retry::BoundedRetryPolicy;
use chrono::{DateTime, Utc};
use healthcrew_common::config::settings::DEFAULT_REMOTE_KUBECONFIG;
use healthcrew_common::{CommandPolicy, mask_sensitive_command};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

const AUTH_FAILURE_PATTERN: &str = r"(?i)(\(Unauthorized\)|you must be logged in|token (has )?expired|provide credentials|invalid bearer token)";

fn auth_failure_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(AUTH_FAILURE_PATTERN).ok())
        .as_ref()
}

/// Whether command output carries a cluster authentication failure.
pub fn is_auth_failure(output: &CommandOutput) -> bool {
    if output.success() {
        return false;
    }
    match auth_failure_regex() {
        Some(re) => re.is_match(&output.stderr) || re.is_match(&output.stdout),
        None => output.stderr.contains("Unauthorized"),
    }
}

/// Cluster credential used to log in again after expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct FallbackCredential {
    pub server: String,
    pub token: String,
}

impl fmt::Debug for FallbackCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackCredential")
            .field("server", &self.server)
            .field("token", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
    Expired,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => f.write_str("unauthenticated"),
            Self::Authenticated => f.write_str("authenticated"),
            Self::Expired => f.write_str("expired"),
        }
    }
}

/// A successful automatic re-login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryEvent {
    pub at: DateTime<Utc>,
    /// Command (masked) whose failure triggered the re-login.
    pub command: String,
    /// First line of the rejected output.
    pub trigger: String,
}

/// Environment exported in front of every remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandEnv {
    vars: BTreeMap<String, String>,
}

impl CommandEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kubeconfig(path: impl Into<String>) -> Self {
        Self::new().with("KUBECONFIG", path)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Wrap `command` as `export K='v' && command`.
    pub fn wrap(&self, command: &str) -> String {
        if self.vars.is_empty() {
            return command.to_string();
        }
        let assignments: Vec<String> = self
            .vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, shell_escape::escape(Cow::Borrowed(v.as_str()))))
            .collect();
        format!("export {} && {}", assignments.join(" "), command)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub target: SessionTarget,
    /// Kubeconfig path on the remote host.
    pub remote_kubeconfig: String,
    pub fallback: Option<FallbackCredential>,
    pub command_timeout: Duration,
    pub connect_retry: BoundedRetryPolicy,
    pub reauth_retry: BoundedRetryPolicy,
    pub policy: CommandPolicy,
}

impl SessionConfig {
    pub fn new(target: SessionTarget) -> Self {
        Self {
            target,
            remote_kubeconfig: DEFAULT_REMOTE_KUBECONFIG.to_string(),
            fallback: None,
            command_timeout: Duration::from_secs(30),
            connect_retry: BoundedRetryPolicy::connect(),
            reauth_retry: BoundedRetryPolicy::reauth(),
            policy: CommandPolicy::default(),
        }
    }

    pub fn with_kubeconfig(mut self, path: impl Into<String>) -> Self {
        self.remote_kubeconfig = path.into();
        self
    }

    pub fn with_fallback(mut self, fallback: Option<FallbackCredential>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_connect_retry(mut self, policy: BoundedRetryPolicy) -> Self {
        self.connect_retry = policy;
        self
    }
}

pub struct SessionManager {
    transport: Box<dyn RemoteTransport>,
    config: SessionConfig,
    state: AuthState,
    connected: bool,
    recovery_events: Vec<RecoveryEvent>,
}

impl SessionManager {
    pub fn new(transport: Box<dyn RemoteTransport>, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            state: AuthState::Unauthenticated,
            connected: false,
            recovery_events: Vec::new(),
        }
    }

    pub fn auth_state(&self) -> AuthState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn host(&self) -> &str {
        &self.config.target.host
    }

    pub fn recovery_events(&self) -> &[RecoveryEvent] {
        &self.recovery_events
    }

    /// Default per-command environment.
    pub fn env(&self) -> CommandEnv {
        CommandEnv::kubeconfig(self.config.remote_kubeconfig.clone())
    }

    /// Open the channel, retrying transient failures under the connect
    /// policy. Each attempt is bounded by the target's connect timeout.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        let target = self.config.target.clone();
        if target.host.trim().is_empty() {
            return Err(SessionError::ConnectFailed {
                host: target.host,
                message: "no target host configured".to_string(),
            });
        }
        if let Some(identity) = &target.identity
            && !identity.exists()
        {
            return Err(SessionError::ConnectFailed {
                host: target.host.clone(),
                message: format!("identity file {} not found", identity.display()),
            });
        }
        if self.connected {
            return Ok(());
        }

        let policy = self.config.connect_retry.clone();
        let mut attempt = 1;
        loop {
            let started = Instant::now();
            let result = match timeout(target.connect_timeout, self.transport.connect(&target)).await
            {
                Ok(result) => result,
                Err(_) => Err(SessionError::ConnectTimeout {
                    host: target.host.clone(),
                    timeout_secs: target.connect_timeout.as_secs(),
                }),
            };

            match result {
                Ok(()) => {
                    self.connected = true;
                    self.state = AuthState::Unauthenticated;
                    info!(
                        destination = %target.destination(),
                        transport = self.transport.name(),
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Session connected"
                    );
                    return Ok(());
                }
                Err(err) if policy.should_retry(attempt, &err) => {
                    let delay = policy.backoff_delay(attempt);
                    warn!(host = %target.host, attempt, error = %err, "Connect failed, retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(host = %target.host, attempt, error = %err, "Connect failed");
                    return Err(err);
                }
            }
        }
    }

    /// Confirm the administrative CLI exists on the remote host.
    pub async fn validate_environment(&mut self) -> Result<String, SessionError> {
        let env = self.env();
        let output = self.run_wrapped("oc version --client", &env).await?;
        if !output.success() {
            return Err(SessionError::EnvironmentMissing {
                detail: output.headline().to_string(),
            });
        }
        let version = output.stdout.trim().to_string();
        debug!(version = %version, "Remote CLI present");
        Ok(version)
    }

    /// Run a validated command with `env` exported.
    ///
    /// Rejected commands never reach the transport. An authentication
    /// failure triggers at most one re-login and one retry per call.
    pub async fn execute(
        &mut self,
        command: &str,
        env: &CommandEnv,
    ) -> Result<CommandOutput, SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        self.config.policy.validate(command)?;
        if self.state == AuthState::Expired {
            return Err(SessionError::AuthExpired {
                detail: "session credentials already expired".to_string(),
            });
        }

        let output = self.run_wrapped(command, env).await?;
        if !is_auth_failure(&output) {
            self.state = AuthState::Authenticated;
            return Ok(output);
        }

        let trigger = output.headline().to_string();
        warn!(
            command = %mask_sensitive_command(command),
            trigger = %trigger,
            "Cluster rejected credentials, re-authenticating"
        );
        self.reauthenticate(env).await?;

        let retried = self.run_wrapped(command, env).await?;
        if is_auth_failure(&retried) {
            self.state = AuthState::Expired;
            return Err(SessionError::AuthExpired {
                detail: retried.headline().to_string(),
            });
        }

        self.state = AuthState::Authenticated;
        self.recovery_events.push(RecoveryEvent {
            at: Utc::now(),
            command: mask_sensitive_command(command),
            trigger,
        });
        info!(command = %mask_sensitive_command(command), "Recovered from expired credentials");
        Ok(retried)
    }

    async fn reauthenticate(&mut self, env: &CommandEnv) -> Result<(), SessionError> {
        let Some(fallback) = self.config.fallback.clone() else {
            self.state = AuthState::Expired;
            return Err(SessionError::AuthExpired {
                detail: "no fallback credential configured".to_string(),
            });
        };

        let login = format!(
            "oc login --server={} --token={} --insecure-skip-tls-verify=true",
            shell_escape::escape(Cow::Borrowed(fallback.server.as_str())),
            shell_escape::escape(Cow::Borrowed(fallback.token.as_str())),
        );
        self.config.policy.validate_login(&login)?;

        let policy = self.config.reauth_retry.clone();
        let mut attempt = 1;
        let detail = loop {
            let failure = match self.run_wrapped(&login, env).await {
                Ok(output) if output.success() => {
                    debug!(server = %fallback.server, "Re-login succeeded");
                    return Ok(());
                }
                Ok(output) => SessionError::AuthExpired {
                    detail: output.headline().to_string(),
                },
                Err(err) => err,
            };
            if attempt >= policy.attempts() {
                break failure.to_string();
            }
            sleep(policy.backoff_delay(attempt)).await;
            attempt += 1;
        };

        self.state = AuthState::Expired;
        warn!(server = %fallback.server, detail = %detail, "Re-login failed");
        Err(SessionError::AuthExpired {
            detail: format!("re-login failed: {detail}"),
        })
    }

    async fn run_wrapped(
        &mut self,
        command: &str,
        env: &CommandEnv,
    ) -> Result<CommandOutput, SessionError> {
        let line = env.wrap(command);
        let limit = self.config.command_timeout;
        debug!(command = %mask_sensitive_command(command), "Executing remote command");

        match timeout(limit, self.transport.run(&line)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::CommandTimeout {
                command: mask_sensitive_command(command),
                timeout_secs: limit.as_secs(),
            }),
        }
    }

    /// Release the channel. Safe to call more than once.
    pub async fn close(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        if let Err(e) = self.transport.close().await {
            warn!(host = %self.config.target.host, error = %e, "Session close reported an error");
        } else {
            debug!(host = %self.config.target.host, "Session closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig::new(SessionTarget::new("bastion.lab", "kni"))
            .with_command_timeout(Duration::from_millis(200))
            .with_connect_retry(BoundedRetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
                jitter: 0.0,
            })
    }

    fn fallback() -> Option<FallbackCredential> {
        Some(FallbackCredential {
            server: "https://api.lab:6443".to_string(),
            token: "sha256~secret".to_string(),
        })
    }

    async fn connected(mock: MockTransport, config: SessionConfig) -> SessionManager {
        let mut session = SessionManager::new(Box::new(mock), config);
        session.connect().await.unwrap();
        session
    }

    // ---- Environment injection ----

    #[test]
    fn test_env_wrap_escapes_values() {
        let env = CommandEnv::kubeconfig("/home/kni/my configs/kubeconfig");
        assert_eq!(
            env.wrap("oc get nodes"),
            "export KUBECONFIG='/home/kni/my configs/kubeconfig' && oc get nodes"
        );
        assert_eq!(CommandEnv::new().wrap("oc get nodes"), "oc get nodes");
    }

    #[tokio::test]
    async fn test_execute_injects_kubeconfig() {
        let mock = MockTransport::new().on("get nodes", MockReply::stdout("node-0 Ready\n"));
        let handle = mock.handle();
        let mut session = connected(mock, config().with_kubeconfig("/tmp/kc")).await;

        let env = session.env();
        let out = session.execute("oc get nodes", &env).await.unwrap();
        assert_eq!(out.stdout, "node-0 Ready\n");
        assert_eq!(session.auth_state(), AuthState::Authenticated);
        assert!(handle.commands()[0].starts_with("export KUBECONFIG=/tmp/kc && "));
    }

    // ---- Validation ----

    #[tokio::test]
    async fn test_rejected_command_never_reaches_transport() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let mut session = connected(mock, config()).await;

        let env = session.env();
        let err = session.execute("rm -rf /", &env).await.unwrap_err();
        assert!(matches!(err, SessionError::Rejected(_)));
        assert!(handle.commands().is_empty());
    }

    #[tokio::test]
    async fn test_execute_requires_connection() {
        let mut session = SessionManager::new(Box::new(MockTransport::new()), config());
        let env = session.env();
        assert_eq!(
            session.execute("oc get nodes", &env).await.unwrap_err(),
            SessionError::NotConnected
        );
    }

    // ---- Connect ----

    #[tokio::test]
    async fn test_connect_retries_then_succeeds() {
        let mock = MockTransport::new().fail_connect(vec![MockReply::Error("refused".into())]);
        let handle = mock.handle();
        let mut session = SessionManager::new(Box::new(mock), config());
        session.connect().await.unwrap();
        assert_eq!(handle.connects(), 2);
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let mock = MockTransport::new().fail_connect(vec![MockReply::Hang, MockReply::Hang]);
        let mut cfg = config();
        cfg.target.connect_timeout = Duration::from_millis(20);
        let mut session = SessionManager::new(Box::new(mock), cfg);
        assert!(matches!(
            session.connect().await,
            Err(SessionError::ConnectTimeout { .. })
        ));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_connect_rejects_missing_identity() {
        let mut cfg = config();
        cfg.target.identity = Some("/nonexistent/id_rsa".into());
        let mut session = SessionManager::new(Box::new(MockTransport::new()), cfg);
        assert!(matches!(
            session.connect().await,
            Err(SessionError::ConnectFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_validate_environment_missing_cli() {
        let mock = MockTransport::new().on(
            "oc version --client",
            MockReply::exit(127, "bash: oc: command not found"),
        );
        let mut session = connected(mock, config()).await;
        let err = session.validate_environment().await.unwrap_err();
        assert_eq!(
            err,
            SessionError::EnvironmentMissing {
                detail: "bash: oc: command not found".into()
            }
        );
    }

    // ---- Re-authentication ----

    #[tokio::test]
    async fn test_single_reauth_then_success() {
        let mock = MockTransport::new().on_sequence(
            "get nodes",
            vec![MockReply::unauthorized(), MockReply::stdout("node-0 Ready\n")],
        );
        let handle = mock.handle();
        let mut session = connected(mock, config().with_fallback(fallback())).await;

        let env = session.env();
        let out = session.execute("oc get nodes", &env).await.unwrap();
        assert!(out.success());
        assert_eq!(handle.count("oc login"), 1);
        assert_eq!(session.recovery_events().len(), 1);
        assert_eq!(session.auth_state(), AuthState::Authenticated);
        assert!(!session.recovery_events()[0].command.contains("secret"));
    }

    #[tokio::test]
    async fn test_second_auth_failure_surfaces_expired() {
        let mock = MockTransport::new().on("get nodes", MockReply::unauthorized());
        let handle = mock.handle();
        let mut session = connected(mock, config().with_fallback(fallback())).await;

        let env = session.env();
        let err = session.execute("oc get nodes", &env).await.unwrap_err();
        assert!(matches!(err, SessionError::AuthExpired { .. }));
        assert_eq!(handle.count("oc login"), 1);
        assert_eq!(handle.count("get nodes"), 2);
        assert_eq!(session.auth_state(), AuthState::Expired);

        // Expired sessions refuse further work without another login.
        let again = session.execute("oc get nodes", &env).await.unwrap_err();
        assert!(matches!(again, SessionError::AuthExpired { .. }));
        assert_eq!(handle.count("oc login"), 1);
    }

    #[tokio::test]
    async fn test_failed_login_marks_expired() {
        let mock = MockTransport::new()
            .on("get nodes", MockReply::unauthorized())
            .on("oc login", MockReply::exit(1, "error: invalid token"));
        let mut session = connected(mock, config().with_fallback(fallback())).await;

        let env = session.env();
        let err = session.execute("oc get nodes", &env).await.unwrap_err();
        match err {
            SessionError::AuthExpired { detail } => assert!(detail.contains("re-login failed")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(session.auth_state(), AuthState::Expired);
    }

    #[tokio::test]
    async fn test_no_fallback_means_expired() {
        let mock = MockTransport::new().on("get nodes", MockReply::unauthorized());
        let mut session = connected(mock, config()).await;
        let env = session.env();
        assert!(matches!(
            session.execute("oc get nodes", &env).await,
            Err(SessionError::AuthExpired { .. })
        ));
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let mock = MockTransport::new().on("get pods", MockReply::Hang);
        let mut session = connected(mock, config()).await;
        let env = session.env();
        assert!(matches!(
            session.execute("oc get pods -A", &env).await,
            Err(SessionError::CommandTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let mut session = connected(mock, config()).await;
        session.close().await;
        session.close().await;
        assert_eq!(handle.closes(), 1);
    }

    #[test]
    fn test_auth_failure_detection() {
        assert!(is_auth_failure(&CommandOutput::failed(
            1,
            "error: You must be logged in to the server (Unauthorized)"
        )));
        assert!(is_auth_failure(&CommandOutput::failed(1, "the token has expired")));
        assert!(!is_auth_failure(&CommandOutput::failed(1, "error: no such resource")));
        assert!(!is_auth_failure(&CommandOutput::ok("Unauthorized is just a word here")));
    }

    #[test]
    fn test_fallback_debug_masks_token() {
        let rendered = format!("{:?}", fallback().unwrap());
        assert!(!rendered.contains("secret"));
    }
}
