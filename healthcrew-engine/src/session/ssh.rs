//! OpenSSH-backed transport.
//!
//! Uses the system `ssh` binary through a control-master connection so every
//! command of a build rides the same authenticated channel.

use super::transport::{CommandOutput, RemoteTransport, SessionTarget};
use crate::error::SessionError;
use async_trait::async_trait;
use openssh::{KnownHosts, Session, SessionBuilder};
use tracing::{debug, warn};

#[derive(Default)]
pub struct SshTransport {
    session: Option<Session>,
    host: String,
}

impl SshTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemoteTransport for SshTransport {
    fn name(&self) -> &'static str {
        "ssh"
    }

    async fn connect(&mut self, target: &SessionTarget) -> Result<(), SessionError> {
        let mut builder = SessionBuilder::default();
        builder
            .user(target.user.clone())
            .port(target.port)
            .connect_timeout(target.connect_timeout)
            .known_hosts_check(KnownHosts::Add);
        if let Some(identity) = &target.identity {
            builder.keyfile(identity);
        }

        debug!(destination = %target.destination(), "Opening SSH session");
        let session = builder
            .connect(&target.host)
            .await
            .map_err(|e| SessionError::ConnectFailed {
                host: target.host.clone(),
                message: e.to_string(),
            })?;

        self.host = target.host.clone();
        self.session = Some(session);
        Ok(())
    }

    async fn run(&mut self, command_line: &str) -> Result<CommandOutput, SessionError> {
        let session = self.session.as_ref().ok_or(SessionError::NotConnected)?;
        let output = session
            .raw_command(command_line)
            .output()
            .await
            .map_err(|e| SessionError::Exec(e.to_string()))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!(host = %self.host, error = %e, "SSH session did not close cleanly");
                return Err(SessionError::Exec(e.to_string()));
            }
            debug!(host = %self.host, "SSH session closed");
        }
        Ok(())
    }
}
