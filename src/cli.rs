// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `workplant`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "workplant",
    version,
    about = "Run a tree of tasks over shared resources on a fixed worker pool.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to a pipeline config file (TOML).
    ///
    /// Default: `Workplant.toml` in the current working directory if it
    /// exists, otherwise the built-in morning-prep pipeline.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Override the worker-pool size from the config.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WORKPLANT_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the task tree, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_flags() {
        let args = CliArgs::try_parse_from([
            "workplant",
            "--config",
            "pipeline.toml",
            "--workers",
            "3",
            "--log-level",
            "debug",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(args.config.as_deref(), Some("pipeline.toml"));
        assert_eq!(args.workers, Some(3));
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        assert!(args.dry_run);
    }
}
