//! Scripted in-memory transport for tests and dry runs.
//!
//! Replies are matched by substring against the full command line, in the
//! order rules were added. A rule with several replies hands them out one
//! per call and then keeps repeating the last one.
//!
//! ```ignore
//! let transport = MockTransport::new()
//!     .on("adm top nodes", MockReply::stdout("m0 3000m 92% 20Gi 40%\n"))
//!     .on_sequence("get nodes", vec![MockReply::unauthorized(), MockReply::stdout("...")]);
//! let handle = transport.handle();
//! ```

use super::transport::{CommandOutput, RemoteTransport, SessionTarget};
use crate::error::SessionError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum MockReply {
    Output(CommandOutput),
    /// Transport-level failure.
    Error(String),
    /// Never answers; exercises timeouts.
    Hang,
    /// Answers after a delay.
    Delayed(Duration, CommandOutput),
}

impl MockReply {
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self::Output(CommandOutput::ok(stdout))
    }

    pub fn exit(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self::Output(CommandOutput::failed(exit_code, stderr))
    }

    pub fn unauthorized() -> Self {
        Self::exit(
            1,
            "error: You must be logged in to the server (Unauthorized)",
        )
    }
}

#[derive(Debug)]
struct Rule {
    pattern: String,
    replies: VecDeque<MockReply>,
}

#[derive(Debug, Default)]
struct MockState {
    commands: Vec<String>,
    connects: u32,
    closes: u32,
}

/// Read-only view of what a [`MockTransport`] saw.
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .commands
            .clone()
    }

    /// Number of command lines containing `pattern`.
    pub fn count(&self, pattern: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(pattern)).count()
    }

    pub fn connects(&self) -> u32 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).connects
    }

    pub fn closes(&self) -> u32 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closes
    }
}

#[derive(Debug)]
pub struct MockTransport {
    rules: Vec<Rule>,
    fallback: MockReply,
    connect_failures: VecDeque<MockReply>,
    connected: bool,
    handle: MockHandle,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A transport that answers every command with empty success, except
    /// `oc version --client` which reports a client version.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fallback: MockReply::stdout(""),
            connect_failures: VecDeque::new(),
            connected: false,
            handle: MockHandle::default(),
        }
        .on("oc version --client", MockReply::stdout("Client Version: 4.16.0\n"))
    }

    pub fn on(self, pattern: &str, reply: MockReply) -> Self {
        self.on_sequence(pattern, vec![reply])
    }

    /// Register replies for `pattern`. Later rules for the same pattern are
    /// shadowed by earlier ones, except the built-in version probe.
    pub fn on_sequence(mut self, pattern: &str, replies: Vec<MockReply>) -> Self {
        let rule = Rule {
            pattern: pattern.to_string(),
            replies: replies.into(),
        };
        if let Some(existing) = self.rules.iter_mut().find(|r| r.pattern == pattern) {
            *existing = rule;
        } else {
            self.rules.push(rule);
        }
        self
    }

    pub fn fallback(mut self, reply: MockReply) -> Self {
        self.fallback = reply;
        self
    }

    /// Fail the next connect attempts with these replies (`Error` or `Hang`).
    pub fn fail_connect(mut self, failures: Vec<MockReply>) -> Self {
        self.connect_failures = failures.into();
        self
    }

    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }

    fn next_reply(&mut self, command_line: &str) -> MockReply {
        for rule in &mut self.rules {
            if command_line.contains(&rule.pattern) {
                return if rule.replies.len() > 1 {
                    rule.replies.pop_front().unwrap_or_else(|| self.fallback.clone())
                } else {
                    rule.replies.front().cloned().unwrap_or_else(|| self.fallback.clone())
                };
            }
        }
        self.fallback.clone()
    }
}

#[async_trait]
impl RemoteTransport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&mut self, target: &SessionTarget) -> Result<(), SessionError> {
        self.handle
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .connects += 1;

        match self.connect_failures.pop_front() {
            Some(MockReply::Hang) => std::future::pending().await,
            Some(MockReply::Error(message)) => Err(SessionError::ConnectFailed {
                host: target.host.clone(),
                message,
            }),
            _ => {
                self.connected = true;
                Ok(())
            }
        }
    }

    async fn run(&mut self, command_line: &str) -> Result<CommandOutput, SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        self.handle
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .commands
            .push(command_line.to_string());

        match self.next_reply(command_line) {
            MockReply::Output(output) => Ok(output),
            MockReply::Error(message) => Err(SessionError::Exec(message)),
            MockReply::Hang => std::future::pending().await,
            MockReply::Delayed(delay, output) => {
                tokio::time::sleep(delay).await;
                Ok(output)
            }
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.connected = false;
        self.handle
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .closes += 1;
        Ok(())
    }
}
