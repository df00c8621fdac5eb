// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::config::{default_config_path, parse_duration};

/// Command-line arguments for `compositor`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "compositor",
    version,
    about = "Provision a composition of dependent resources as a DAG of sub-tasks.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the composition file (TOML).
    ///
    /// Default: `Compositor.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value_os_t = default_config_path())]
    pub config: PathBuf,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `COMPOSITOR_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the graph in dependency order, but don't
    /// provision anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Give up waiting for the request outcome after this long (e.g. `30s`).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub timeout: Option<Duration>,
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
