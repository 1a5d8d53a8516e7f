//! Effective HealthCrew settings assembled from the environment.

use super::env::{EnvError, EnvParser};
use super::source::Sourced;
use std::path::PathBuf;
use std::time::Duration;

/// Remote kubeconfig used on the provisioning host when none is configured.
pub const DEFAULT_REMOTE_KUBECONFIG: &str = "/home/kni/clusterconfigs/auth/kubeconfig";

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_MAX_CONCURRENT_BUILDS: u64 = 3;

/// All runtime settings, each tagged with where it came from.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: Sourced<Option<String>>,
    pub user: Sourced<String>,
    pub ssh_key: Sourced<Option<PathBuf>>,
    pub ssh_port: Sourced<u64>,
    pub remote_kubeconfig: Sourced<String>,
    pub fallback_server: Sourced<Option<String>>,
    pub fallback_token: Sourced<Option<String>>,
    pub analysis_url: Sourced<Option<String>>,
    pub analysis_model: Sourced<String>,
    pub analysis_api_key: Sourced<Option<String>>,
    pub connect_timeout_secs: Sourced<u64>,
    pub command_timeout_secs: Sourced<u64>,
    pub lookup_timeout_secs: Sourced<u64>,
    pub max_concurrent_builds: Sourced<u64>,
    pub knowledge_file: Sourced<PathBuf>,
    pub history_file: Sourced<PathBuf>,
    pub reports_dir: Sourced<PathBuf>,
    pub thresholds_file: Sourced<Option<PathBuf>>,
}

impl Settings {
    /// Read settings from `HEALTHCREW_*` variables.
    ///
    /// Returns every invalid variable at once on failure.
    pub fn from_env() -> Result<Self, Vec<EnvError>> {
        let mut parser = EnvParser::new();
        let data_dir = default_data_dir();

        let settings = Self {
            host: parser.get_optional_string("HOST"),
            user: parser.get_string("USER", "root"),
            ssh_key: parser.get_optional_path("SSH_KEY", true),
            ssh_port: parser.get_u64_range("SSH_PORT", 22, 1, 65535),
            remote_kubeconfig: parser.get_string("KUBECONFIG", DEFAULT_REMOTE_KUBECONFIG),
            fallback_server: parser.get_optional_string("FALLBACK_SERVER"),
            fallback_token: parser.get_optional_string("FALLBACK_TOKEN"),
            analysis_url: parser.get_optional_string("ANALYSIS_URL"),
            analysis_model: parser.get_string("ANALYSIS_MODEL", "llama3.2:3b"),
            analysis_api_key: parser.get_optional_string("ANALYSIS_API_KEY"),
            connect_timeout_secs: parser.get_u64_range(
                "CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
                1,
                300,
            ),
            command_timeout_secs: parser.get_u64_range(
                "COMMAND_TIMEOUT_SECS",
                DEFAULT_COMMAND_TIMEOUT_SECS,
                1,
                3600,
            ),
            lookup_timeout_secs: parser.get_u64_range(
                "LOOKUP_TIMEOUT_SECS",
                DEFAULT_LOOKUP_TIMEOUT_SECS,
                1,
                600,
            ),
            max_concurrent_builds: parser.get_u64_range(
                "MAX_CONCURRENT_BUILDS",
                DEFAULT_MAX_CONCURRENT_BUILDS,
                1,
                64,
            ),
            knowledge_file: parser.get_path(
                "KNOWLEDGE_FILE",
                data_dir.join("knowledge.jsonl"),
                false,
            ),
            history_file: parser.get_path("HISTORY_FILE", data_dir.join("builds.jsonl"), false),
            reports_dir: parser.get_path("REPORTS_DIR", data_dir.join("reports"), false),
            thresholds_file: parser.get_optional_path("THRESHOLDS_FILE", true),
        };

        if parser.has_errors() {
            return Err(parser.take_errors());
        }
        Ok(settings)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.value)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.value)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs.value)
    }

    /// Name/value/source triples for display; secrets are masked.
    pub fn describe(&self) -> Vec<(&'static str, String, String)> {
        fn opt<T: std::fmt::Display>(v: &Option<T>) -> String {
            v.as_ref().map(ToString::to_string).unwrap_or_else(|| "-".to_string())
        }
        fn secret(v: &Option<String>) -> String {
            if v.is_some() { "***".to_string() } else { "-".to_string() }
        }
        fn path(v: &Option<PathBuf>) -> String {
            opt(&v.as_ref().map(|p| p.display().to_string()))
        }

        vec![
            ("host", opt(&self.host.value), self.host.source.to_string()),
            ("user", self.user.value.clone(), self.user.source.to_string()),
            ("ssh_key", path(&self.ssh_key.value), self.ssh_key.source.to_string()),
            ("ssh_port", self.ssh_port.value.to_string(), self.ssh_port.source.to_string()),
            (
                "remote_kubeconfig",
                self.remote_kubeconfig.value.clone(),
                self.remote_kubeconfig.source.to_string(),
            ),
            (
                "fallback_server",
                opt(&self.fallback_server.value),
                self.fallback_server.source.to_string(),
            ),
            (
                "fallback_token",
                secret(&self.fallback_token.value),
                self.fallback_token.source.to_string(),
            ),
            (
                "analysis_url",
                opt(&self.analysis_url.value),
                self.analysis_url.source.to_string(),
            ),
            (
                "analysis_api_key",
                secret(&self.analysis_api_key.value),
                self.analysis_api_key.source.to_string(),
            ),
            (
                "connect_timeout_secs",
                self.connect_timeout_secs.value.to_string(),
                self.connect_timeout_secs.source.to_string(),
            ),
            (
                "command_timeout_secs",
                self.command_timeout_secs.value.to_string(),
                self.command_timeout_secs.source.to_string(),
            ),
            (
                "lookup_timeout_secs",
                self.lookup_timeout_secs.value.to_string(),
                self.lookup_timeout_secs.source.to_string(),
            ),
            (
                "max_concurrent_builds",
                self.max_concurrent_builds.value.to_string(),
                self.max_concurrent_builds.source.to_string(),
            ),
            (
                "knowledge_file",
                self.knowledge_file.value.display().to_string(),
                self.knowledge_file.source.to_string(),
            ),
            (
                "history_file",
                self.history_file.value.display().to_string(),
                self.history_file.source.to_string(),
            ),
            (
                "reports_dir",
                self.reports_dir.value.display().to_string(),
                self.reports_dir.source.to_string(),
            ),
            (
                "thresholds_file",
                path(&self.thresholds_file.value),
                self.thresholds_file.source.to_string(),
            ),
        ]
    }
}

/// `$XDG_DATA_HOME/healthcrew`, falling back to the working directory.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("healthcrew"))
        .unwrap_or_else(|| PathBuf::from(".healthcrew"))
}
