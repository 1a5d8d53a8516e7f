//! HealthCrew - Command Line Interface
//!
//! Runs health builds against a remote OpenShift provisioning host and
//! inspects the local knowledge base and build history.

#![forbid(unsafe_code)]

mod commands;
mod wiring;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use healthcrew_common::{KnowledgeSource, LogConfig, Settings, init_logging};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "healthcrew")]
#[command(author, version, about = "HealthCrew - OpenShift cluster health builds")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Threshold overrides (TOML)
    #[arg(long, global = true)]
    thresholds: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a health build against the target host
    Run(RunArgs),

    /// List registered checks with their effective thresholds
    Checks,

    /// Inspect and feed the knowledge base
    Knowledge {
        #[command(subcommand)]
        action: KnowledgeCommand,
    },

    /// Show recent builds
    History {
        /// Number of builds to show
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Only builds against this host
        #[arg(long)]
        host: Option<String>,

        /// Show aggregate statistics instead of the list
        #[arg(long)]
        stats: bool,
    },

    /// Show the effective configuration and where each value came from
    Config,
}

#[derive(clap::Args, Debug, Clone, Default)]
struct RunArgs {
    /// Provisioning host to connect to (defaults to HEALTHCREW_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Checks to run, comma separated (default: all enabled)
    #[arg(short, long, value_delimiter = ',')]
    checks: Vec<String>,

    /// Correlate failures with every configured source
    #[arg(long)]
    deep: bool,

    /// Only match failures against known bugs
    #[arg(long, conflicts_with = "deep")]
    bug_matching_only: bool,

    /// Include the external bug tracker in correlation
    #[arg(long)]
    search_bugs: bool,

    /// Report known issues and suggest new checks
    #[arg(long)]
    knowledge_scan: bool,
}

#[derive(Subcommand, Debug)]
enum KnowledgeCommand {
    /// Propose checks for recurring issues
    Suggest {
        #[arg(long, default_value = "2")]
        min_occurrences: u32,

        #[arg(long, default_value = "0.6")]
        min_confidence: f64,

        /// Flag the listed candidates as proposed
        #[arg(long)]
        mark: bool,
    },

    /// Entry counts, confidence summary and recent issue trends
    Stats {
        /// Trend window in days
        #[arg(long, default_value = "30")]
        days: u32,
    },

    /// Record a remediation attempt for a known signature
    Fix {
        signature: String,

        /// What was done
        description: String,

        /// The attempt did not resolve the issue
        #[arg(long)]
        failed: bool,
    },

    /// Ingest raw items from a JSON array file
    Ingest {
        file: PathBuf,

        #[arg(long, value_enum, default_value = "bug")]
        source: SourceArg,
    },

    /// Rewrite the store file with one line per entry
    Compact,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum SourceArg {
    Bug,
    Email,
    Web,
}

impl From<SourceArg> for KnowledgeSource {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Bug => KnowledgeSource::Bug,
            SourceArg::Email => KnowledgeSource::Email,
            SourceArg::Web => KnowledgeSource::Web,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_env()
        .map_err(wiring::env_errors)?
        .verbose(cli.verbose);
    let _logging_guards = init_logging(&log_config)?;

    let mut settings = Settings::from_env().map_err(wiring::env_errors)?;
    settings.thresholds_file.override_with(cli.thresholds.clone().map(Some));

    let code = match cli.command {
        Commands::Run(args) => commands::run(&settings, args, cli.json).await?,
        Commands::Checks => commands::checks(&settings, cli.json)?,
        Commands::Knowledge { action } => commands::knowledge(&settings, action, cli.json)?,
        Commands::History { limit, host, stats } => {
            commands::history(&settings, limit, host.as_deref(), stats, cli.json)?
        }
        Commands::Config => commands::config(&settings, cli.json)?,
    };
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
