// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `devfleet`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "devfleet",
    version,
    about = "Clone, run, monitor and manage a fleet of development services.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Fleet.toml` in the current working directory.
    #[arg(
        long,
        value_name = "PATH",
        env = "DEVFLEET_CONFIG",
        default_value = "Fleet.toml"
    )]
    pub config: PathBuf,

    /// Execute one task (e.g. `GIT_PULL`) against `--service`, then exit.
    #[arg(long, value_name = "TASK", requires = "service", conflicts_with_all = ["status", "script"])]
    pub run: Option<String>,

    /// Run one `package.json` script of `--service`, then exit.
    #[arg(long, value_name = "NAME", requires = "service", conflicts_with = "status")]
    pub script: Option<String>,

    /// Service the task or script runs against.
    #[arg(long, value_name = "NAME")]
    pub service: Option<String>,

    /// Task attribute, repeatable: `--attr branch=develop`.
    #[arg(
        long = "attr",
        value_name = "KEY=VALUE",
        value_parser = parse_attribute,
        requires = "run"
    )]
    pub attributes: Vec<(String, String)>,

    /// Print the aggregate service status as JSON, then exit.
    #[arg(long)]
    pub status: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DEVFLEET_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the catalog, but don't execute any commands.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// `key=value`; the value may itself contain `=`.
pub fn parse_attribute(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
