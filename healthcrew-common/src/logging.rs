//! Tracing subscriber setup shared by the CLI and embedders.
//!
//! Controlled by `HEALTHCREW_LOG_LEVEL`, `HEALTHCREW_LOG_FORMAT` (`text` or
//! `json`) and `HEALTHCREW_LOG_FILE`. `RUST_LOG` wins over the level when set.

use crate::config::{EnvError, EnvParser};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" | "human" => Ok(Self::Text),
            "json" | "jsonl" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    /// Also write JSON lines to this file.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Result<Self, Vec<EnvError>> {
        let mut parser = EnvParser::new();
        let level = parser.get_log_level("LOG_LEVEL", "info").into_inner();
        let raw_format = parser.get_string("LOG_FORMAT", "text");
        let file = parser.get_optional_path("LOG_FILE", false).into_inner();

        let mut errors = parser.take_errors();
        let format = match raw_format.value.parse() {
            Ok(format) => format,
            Err(_) => {
                errors.push(EnvError::InvalidValue {
                    var: raw_format
                        .env_var
                        .unwrap_or_else(|| "HEALTHCREW_LOG_FORMAT".to_string()),
                    expected: "text or json".to_string(),
                    value: raw_format.value,
                });
                LogFormat::Text
            }
        };

        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(Self {
            level,
            format,
            file,
        })
    }

    /// Raise the level to `debug` for `--verbose`.
    pub fn verbose(mut self, verbose: bool) -> Self {
        if verbose {
            self.level = "debug".to_string();
        }
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::try_new(format!(
                "healthcrew={lvl},healthcrew_engine={lvl},healthcrew_common={lvl}",
                lvl = self.level
            ))
            .unwrap_or_else(|_| EnvFilter::new("info"))
        })
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to prepare log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("log file path has no file name: {0}")]
    InvalidFile(PathBuf),

    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Keeps the non-blocking file writer flushing; drop it at exit.
#[must_use = "dropping the guards stops file logging"]
pub struct LoggingGuards {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards, LoggingError> {
    let (file_writer, file_guard) = match &config.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let name = path
                .file_name()
                .ok_or_else(|| LoggingError::InvalidFile(path.clone()))?;
            std::fs::create_dir_all(&dir).map_err(|source| LoggingError::LogDir {
                path: dir.clone(),
                source,
            })?;
            let appender = tracing_appender::rolling::never(&dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let json = config.format == LogFormat::Json;
    let stderr_text = (!json).then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));
    let stderr_json = json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let file_layer = file_writer.map(|writer| {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_ansi(false)
            .with_current_span(true)
    });

    tracing_subscriber::registry()
        .with(config.filter())
        .with(stderr_text)
        .with(stderr_json)
        .with(file_layer)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    Ok(LoggingGuards { _file: file_guard })
}
