//! Error Catalog for HealthCrew
//!
//! Each code (HC-E001 through HC-E599) carries a message template and the
//! remediation steps shown in diagnostic reports.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering every reportable HealthCrew failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Config Errors (E001-E099)
    // =========================================================================
    /// Environment variable has invalid value
    ConfigEnvError,
    /// Threshold override file could not be parsed
    ConfigParseError,
    /// No target host configured
    ConfigMissingHost,
    /// SSH identity file missing or unreadable
    ConfigSshKeyError,
    /// Threshold override refers to an unknown check or category
    ConfigThresholdError,

    // =========================================================================
    // Session Errors (E100-E199)
    // =========================================================================
    /// Could not open the remote session
    SessionConnectFailed,
    /// Opening the remote session timed out
    SessionConnectTimeout,
    /// Administrative CLI not present on the remote host
    SessionEnvironmentMissing,
    /// Cluster credentials expired and re-login failed
    SessionAuthExpired,
    /// A remote command exceeded its timeout
    SessionCommandTimeout,
    /// Session used after close
    SessionClosed,
    /// Remote command could not be executed
    SessionExecFailed,

    // =========================================================================
    // Check Errors (E200-E299)
    // =========================================================================
    /// Command rejected by the validator
    CheckCommandRejected,
    /// Evaluator panicked while parsing output
    CheckEvaluatorPanicked,
    /// Two checks registered with the same id
    CheckDuplicateId,
    /// Requested check id is not registered
    CheckUnknownId,

    // =========================================================================
    // Build Errors (E300-E399)
    // =========================================================================
    /// Build was cancelled
    BuildCancelled,
    /// Illegal phase transition
    BuildInvalidTransition,
    /// Report could not be delivered
    BuildReportFailed,
    /// Build task terminated abnormally
    BuildTaskFailed,

    // =========================================================================
    // Knowledge Errors (E400-E499)
    // =========================================================================
    /// Knowledge log could not be written
    KnowledgePersistFailed,
    /// Knowledge log could not be read
    KnowledgeLoadFailed,
    /// RCA source unavailable
    LookupUnavailable,
    /// RCA source timed out
    LookupTimeout,
    /// Knowledge write rejected before reaching the log
    KnowledgeInvalidInput,

    // =========================================================================
    // Internal Errors (E500-E599)
    // =========================================================================
    /// JSON (de)serialization failed
    InternalSerdeError,
    /// Logging could not be initialised
    InternalLoggingError,
}

impl ErrorCode {
    /// Returns the numeric part of the error code.
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            Self::ConfigEnvError => 1,
            Self::ConfigParseError => 2,
            Self::ConfigMissingHost => 3,
            Self::ConfigSshKeyError => 4,
            Self::ConfigThresholdError => 5,

            Self::SessionConnectFailed => 100,
            Self::SessionConnectTimeout => 101,
            Self::SessionEnvironmentMissing => 102,
            Self::SessionAuthExpired => 103,
            Self::SessionCommandTimeout => 104,
            Self::SessionClosed => 105,
            Self::SessionExecFailed => 106,

            Self::CheckCommandRejected => 200,
            Self::CheckEvaluatorPanicked => 201,
            Self::CheckDuplicateId => 202,
            Self::CheckUnknownId => 203,

            Self::BuildCancelled => 300,
            Self::BuildInvalidTransition => 301,
            Self::BuildReportFailed => 302,
            Self::BuildTaskFailed => 303,

            Self::KnowledgePersistFailed => 400,
            Self::KnowledgeLoadFailed => 401,
            Self::LookupUnavailable => 402,
            Self::LookupTimeout => 403,
            Self::KnowledgeInvalidInput => 404,

            Self::InternalSerdeError => 500,
            Self::InternalLoggingError => 501,
        }
    }

    /// Returns the formatted code string (e.g., "HC-E100").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("HC-E{:03}", self.code_number())
    }

    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Config,
            100..=199 => ErrorCategory::Session,
            200..=299 => ErrorCategory::Check,
            300..=399 => ErrorCategory::Build,
            400..=499 => ErrorCategory::Knowledge,
            _ => ErrorCategory::Internal,
        }
    }

    /// Returns the full error entry with all metadata.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Returns the error message template.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::ConfigEnvError => "Environment variable has invalid value",
            Self::ConfigParseError => "Threshold override file is not valid TOML",
            Self::ConfigMissingHost => "No target host configured",
            Self::ConfigSshKeyError => "SSH identity file is missing or unreadable",
            Self::ConfigThresholdError => "Threshold override refers to an unknown check",

            Self::SessionConnectFailed => "Could not connect to the target host",
            Self::SessionConnectTimeout => "Timed out connecting to the target host",
            Self::SessionEnvironmentMissing => {
                "Administrative CLI is not available on the target host"
            }
            Self::SessionAuthExpired => "Cluster credentials expired and re-login failed",
            Self::SessionCommandTimeout => "Remote command timed out",
            Self::SessionClosed => "Remote session is already closed",
            Self::SessionExecFailed => "Remote command could not be executed",

            Self::CheckCommandRejected => "Command rejected by the read-only command policy",
            Self::CheckEvaluatorPanicked => "Check evaluator failed while parsing output",
            Self::CheckDuplicateId => "A check with this id is already registered",
            Self::CheckUnknownId => "Requested check is not registered",

            Self::BuildCancelled => "Build was cancelled before completion",
            Self::BuildInvalidTransition => "Build attempted an illegal phase transition",
            Self::BuildReportFailed => "Report could not be delivered",
            Self::BuildTaskFailed => "Build task terminated abnormally",

            Self::KnowledgePersistFailed => "Knowledge log could not be written",
            Self::KnowledgeLoadFailed => "Knowledge log could not be read",
            Self::LookupUnavailable => "RCA source unavailable",
            Self::LookupTimeout => "RCA source timed out",
            Self::KnowledgeInvalidInput => "Knowledge write rejected",

            Self::InternalSerdeError => "Serialization failed",
            Self::InternalLoggingError => "Logging could not be initialised",
        }
    }

    /// Returns remediation steps for the error.
    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::ConfigEnvError => &[
                "Check the HEALTHCREW_* environment variables for typos",
                "Run 'healthcrew config' to print the effective configuration",
            ],
            Self::ConfigParseError => &[
                "Validate the threshold file with a TOML linter",
                "Thresholds must be numbers, e.g. warning = 85.0",
            ],
            Self::ConfigMissingHost => &[
                "Set HEALTHCREW_HOST to the bastion or provisioning host",
                "Or pass --host on the command line",
            ],
            Self::ConfigSshKeyError => &[
                "Check that HEALTHCREW_SSH_KEY points at an existing private key",
                "Verify file permissions (chmod 600)",
            ],
            Self::ConfigThresholdError => &[
                "Run 'healthcrew checks' to list valid check ids",
                "Category names are Infrastructure, Workloads, Virtualization, Storage, Performance, Security, Monitoring",
            ],

            Self::SessionConnectFailed => &[
                "Verify the host is reachable: ssh <user>@<host> true",
                "Check that the SSH key is authorised on the host",
                "Confirm no firewall blocks port 22",
            ],
            Self::SessionConnectTimeout => &[
                "Check network connectivity to the host",
                "Increase HEALTHCREW_CONNECT_TIMEOUT_SECS for slow links",
            ],
            Self::SessionEnvironmentMissing => &[
                "Install the oc client on the target host",
                "Make sure oc is on the non-interactive shell PATH",
            ],
            Self::SessionAuthExpired => &[
                "Refresh the kubeconfig at the configured remote path",
                "Set HEALTHCREW_FALLBACK_SERVER and HEALTHCREW_FALLBACK_TOKEN for automatic re-login",
                "Verify the service account token has not been revoked",
            ],
            Self::SessionCommandTimeout => &[
                "Check API server responsiveness on the cluster",
                "Increase HEALTHCREW_COMMAND_TIMEOUT_SECS",
            ],
            Self::SessionClosed => &["Start a new build; sessions are not reusable"],
            Self::SessionExecFailed => &[
                "Check the SSH connection is still alive",
                "Inspect stderr in the check result for details",
            ],

            Self::CheckCommandRejected => &[
                "Only read-only oc/kubectl commands are allowed",
                "Pipelines may only use grep, wc, head, tail, sort, uniq, cut and tr",
            ],
            Self::CheckEvaluatorPanicked => &[
                "Inspect the raw output recorded on the check result",
                "Report the output format so the evaluator can be fixed",
            ],
            Self::CheckDuplicateId => &["Give each check a unique id"],
            Self::CheckUnknownId => &["Run 'healthcrew checks' to list registered check ids"],

            Self::BuildCancelled => &["Re-run the build when ready"],
            Self::BuildInvalidTransition => &["This indicates a bug; please report it"],
            Self::BuildReportFailed => &[
                "Check that the reports directory is writable",
                "Check free disk space",
            ],
            Self::BuildTaskFailed => &[
                "Check the logs for a panic message",
                "Re-run the build",
            ],

            Self::KnowledgePersistFailed => &[
                "Check that the knowledge file directory is writable",
                "Check free disk space",
            ],
            Self::KnowledgeLoadFailed => &[
                "Check file permissions on the knowledge file",
                "Invalid lines are skipped; run 'healthcrew knowledge compact' to rewrite the log",
            ],
            Self::LookupUnavailable => &[
                "The source is optional; results from other sources are still reported",
                "Check credentials and reachability of the source",
            ],
            Self::LookupTimeout => &["Increase HEALTHCREW_LOOKUP_TIMEOUT_SECS"],
            Self::KnowledgeInvalidInput => &[
                "Describe the fix in a non-empty sentence",
                "Run 'healthcrew knowledge stats' to list known signatures",
            ],

            Self::InternalSerdeError => &["This indicates a bug; please report it"],
            Self::InternalLoggingError => &[
                "Check that the log file path is writable",
                "Unset HEALTHCREW_LOG_FILE to log to stderr only",
            ],
        }
    }

    /// Returns all error codes (for iteration/testing).
    #[must_use]
    pub fn all() -> &'static [ErrorCode] {
        &[
            Self::ConfigEnvError,
            Self::ConfigParseError,
            Self::ConfigMissingHost,
            Self::ConfigSshKeyError,
            Self::ConfigThresholdError,
            Self::SessionConnectFailed,
            Self::SessionConnectTimeout,
            Self::SessionEnvironmentMissing,
            Self::SessionAuthExpired,
            Self::SessionCommandTimeout,
            Self::SessionClosed,
            Self::SessionExecFailed,
            Self::CheckCommandRejected,
            Self::CheckEvaluatorPanicked,
            Self::CheckDuplicateId,
            Self::CheckUnknownId,
            Self::BuildCancelled,
            Self::BuildInvalidTransition,
            Self::BuildReportFailed,
            Self::BuildTaskFailed,
            Self::KnowledgePersistFailed,
            Self::KnowledgeLoadFailed,
            Self::LookupUnavailable,
            Self::LookupTimeout,
            Self::KnowledgeInvalidInput,
            Self::InternalSerdeError,
            Self::InternalLoggingError,
        ]
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code_string(), self.message())
    }
}

/// Error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Config,
    Session,
    Check,
    Build,
    Knowledge,
    Internal,
}

impl ErrorCategory {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Config => "Configuration",
            Self::Session => "Session",
            Self::Check => "Check",
            Self::Build => "Build",
            Self::Knowledge => "Knowledge",
            Self::Internal => "Internal",
        }
    }
}

/// Full error entry with metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Error code string (e.g., "HC-E001")
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    /// Steps to remediate the error
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// Formats the error for display with full remediation steps.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut output = format!("[{}] {}\n", self.code, self.message);

        if !self.remediation.is_empty() {
            output.push_str("\nRemediation steps:\n");
            for (i, step) in self.remediation.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }

        output
    }

    /// Formats the error as a single line.
    #[must_use]
    pub fn format_brief(&self) -> String {
        format!("[{}] {}", self.code, self.message)
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_brief())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_numbers_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for code in ErrorCode::all() {
            let num = code.code_number();
            assert!(
                seen.insert(num),
                "Duplicate error code number: {} for {:?}",
                num,
                code
            );
        }
    }

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::ConfigEnvError.code_string(), "HC-E001");
        assert_eq!(ErrorCode::SessionConnectFailed.code_string(), "HC-E100");
        assert_eq!(ErrorCode::CheckCommandRejected.code_string(), "HC-E200");
        assert_eq!(ErrorCode::BuildCancelled.code_string(), "HC-E300");
        assert_eq!(ErrorCode::LookupTimeout.code_string(), "HC-E403");
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(ErrorCode::ConfigMissingHost.category(), ErrorCategory::Config);
        assert_eq!(
            ErrorCode::SessionAuthExpired.category(),
            ErrorCategory::Session
        );
        assert_eq!(ErrorCode::CheckUnknownId.category(), ErrorCategory::Check);
        assert_eq!(
            ErrorCode::KnowledgeLoadFailed.category(),
            ErrorCategory::Knowledge
        );
        assert_eq!(
            ErrorCode::InternalSerdeError.category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_all_errors_have_message_and_remediation() {
        for code in ErrorCode::all() {
            assert!(!code.message().is_empty(), "{:?} has empty message", code);
            assert!(
                !code.remediation().is_empty(),
                "{:?} has no remediation steps",
                code
            );
        }
    }

    #[test]
    fn test_format_full_numbers_steps() {
        let full = ErrorCode::SessionAuthExpired.entry().format_full();
        assert!(full.starts_with("[HC-E103]"));
        assert!(full.contains("  1. Refresh the kubeconfig"));
    }

    #[test]
    fn test_error_entry_serialization() {
        let entry = ErrorCode::SessionConnectFailed.entry();
        let json = serde_json::to_string(&entry).expect("serialization failed");
        assert!(json.contains("HC-E100"));
        assert!(json.contains("session"));

        let parsed: ErrorEntry = serde_json::from_str(&json).expect("deserialization failed");
        assert_eq!(parsed, entry);
    }
}
