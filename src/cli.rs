// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `pipedag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pipedag",
    version,
    about = "Run file-pattern driven pipelines of external tools, skipping up-to-date work.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the pipeline manifest (TOML).
    ///
    /// Default: `Pipedag.toml` in the current working directory. Input and
    /// output patterns are resolved relative to the manifest's directory.
    #[arg(long, global = true, value_name = "PATH", default_value = "Pipedag.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PIPEDAG_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Build the task graph and run every out-of-date instance.
    Run(RunArgs),
    /// Print every instance with its last recorded status and staleness.
    Status,
    /// Continue a previous run from the persisted state (never forces).
    Resume(ResumeArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Only run these tasks (comma separated) plus everything upstream of them.
    #[arg(long, value_delimiter = ',', value_name = "IDS")]
    pub tasks: Vec<String>,

    /// Maximum number of jobs running at the same time.
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Treat every selected instance as out of date.
    #[arg(long)]
    pub force: bool,

    /// Print the plan (what would run or be skipped) without executing anything.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ResumeArgs {
    /// Maximum number of jobs running at the same time.
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
