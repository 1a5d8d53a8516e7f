//! Shared types and utilities for HealthCrew.
//!
//! This crate holds the pieces every other HealthCrew crate agrees on: the
//! check/category/status vocabulary, the error catalogue, the environment
//! configuration parser, the remote command validator and logging setup.

pub mod config;
pub mod errors;
pub mod logging;
pub mod testing;
pub mod types;
pub mod util;
pub mod validator;

pub use config::{ConfigError, ConfigSource, EnvError, EnvParser, Settings, Sourced, ThresholdOverrides};
pub use errors::{ErrorCategory, ErrorCode, ErrorEntry};
pub use logging::{LogConfig, LogFormat, LoggingError, LoggingGuards, init_logging};
pub use types::{
    Alert, AlertSeverity, Category, CheckResult, CheckStatus, KnowledgeSource, Thresholds,
};
pub use util::{mask_sensitive_command, truncate_output};
pub use validator::{CommandPolicy, ValidationError, validate_command};
