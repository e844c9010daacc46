// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `run`: Start the gateway (default)
//! - `validate`: Validate the configuration file
//! - `version`: Show version information

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tether_config::LoggingConfig;

// =============================================================================
// Main CLI Structure
// =============================================================================

/// tether - OPC UA to MQTT telemetry gateway
///
/// Hosts an OPC UA address space, detects value changes on its nodes and
/// republishes them to an MQTT broker.
#[derive(Parser, Debug)]
#[command(
    name = "tether",
    author = "Sylvex <contact@sylvex.io>",
    version = tether_config::VERSION,
    about = "OPC UA to MQTT telemetry gateway",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "tether.yaml",
        env = "TETHER_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, env = "TETHER_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log format (text, json, compact); overrides the config file
    #[arg(long, env = "TETHER_LOG_FORMAT", global = true)]
    pub log_format: Option<LogFormat>,

    /// Enable quiet mode (warnings and errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands for the tether CLI.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the gateway
    ///
    /// This is the default command when no subcommand is specified. It hosts
    /// the OPC UA endpoint and bridges node changes to the MQTT broker until
    /// SIGINT or SIGTERM.
    Run(RunArgs),

    /// Validate the configuration file
    ///
    /// Parses and validates the configuration file without starting the gateway.
    Validate(ValidateArgs),

    /// Show detailed version information
    Version,
}

// =============================================================================
// Command Arguments
// =============================================================================

/// Arguments for the `run` command.
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Run the built-in sensor simulator regardless of the config file
    #[arg(long, env = "TETHER_SIMULATE")]
    pub simulate: bool,
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Default, Clone)]
pub struct ValidateArgs {
    /// Show the parsed configuration (secrets masked) after validation
    #[arg(short, long)]
    pub show_config: bool,

    /// Output format for validation results
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

// =============================================================================
// Enums
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
    /// Compact format for minimal output
    Compact,
}

impl From<tether_config::LogFormat> for LogFormat {
    fn from(format: tether_config::LogFormat) -> Self {
        match format {
            tether_config::LogFormat::Text => LogFormat::Text,
            tether_config::LogFormat::Json => LogFormat::Json,
            tether_config::LogFormat::Compact => LogFormat::Compact,
        }
    }
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for programmatic parsing
    Json,
    /// TOML, loadable as a configuration file
    Toml,
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// Parse CLI arguments from the command line.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the effective command, defaulting to `Run` if none specified.
    pub fn effective_command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Run(RunArgs::default()))
    }

    /// Check if verbose logging is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose && !self.quiet
    }

    /// Get the effective log level based on flags, ignoring the config file.
    pub fn effective_log_level(&self) -> &str {
        self.resolve_log_level(None)
    }

    /// Resolves the log level: `-q`/`-v`, then `--log-level`, then the config
    /// file, then `info`.
    pub fn resolve_log_level<'a>(&'a self, file: Option<&'a LoggingConfig>) -> &'a str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else if let Some(level) = &self.log_level {
            level
        } else {
            file.map(|logging| logging.level.as_str()).unwrap_or("info")
        }
    }

    /// Resolves the log format: `--log-format`, then the config file.
    pub fn resolve_log_format(&self, file: Option<&LoggingConfig>) -> LogFormat {
        self.log_format
            .or_else(|| file.map(|logging| logging.format.into()))
            .unwrap_or_default()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tether_config::LogLevel;

    #[test]
    fn test_default_command() {
        let cli = Cli::parse_from(["tether"]);
        assert!(cli.command.is_none());
        assert!(matches!(cli.effective_command(), Commands::Run(ref args) if !args.simulate));
    }

    #[test]
    fn test_run_simulate() {
        let cli = Cli::parse_from(["tether", "run", "--simulate"]);
        match cli.command {
            Some(Commands::Run(args)) => assert!(args.simulate),
            other => panic!("Expected Run command, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_command() {
        let cli = Cli::parse_from(["tether", "validate", "--show-config", "-f", "toml"]);
        if let Some(Commands::Validate(args)) = cli.command {
            assert!(args.show_config);
            assert_eq!(args.format, OutputFormat::Toml);
        } else {
            panic!("Expected Validate command");
        }
    }

    #[test]
    fn test_config_path() {
        let cli = Cli::parse_from(["tether", "-c", "/etc/tether/tether.yaml"]);
        assert_eq!(cli.config, PathBuf::from("/etc/tether/tether.yaml"));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["tether", "validate", "--log-format", "json", "-l", "debug"]);
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_quiet_and_verbose() {
        let cli = Cli::parse_from(["tether", "-q", "-l", "trace"]);
        assert_eq!(cli.effective_log_level(), "warn");

        let cli = Cli::parse_from(["tether", "-v"]);
        assert!(cli.is_verbose());
        assert_eq!(cli.effective_log_level(), "debug");
    }

    #[test]
    fn test_config_file_logging_fallback() {
        let file = LoggingConfig {
            level: LogLevel::Warn,
            format: tether_config::LogFormat::Compact,
        };

        let cli = Cli::parse_from(["tether"]);
        assert_eq!(cli.resolve_log_level(Some(&file)), "warn");
        assert_eq!(cli.resolve_log_format(Some(&file)), LogFormat::Compact);
        assert_eq!(cli.resolve_log_level(None), "info");
        assert_eq!(cli.resolve_log_format(None), LogFormat::Text);

        let cli = Cli::parse_from(["tether", "-l", "error", "--log-format", "json"]);
        assert_eq!(cli.resolve_log_level(Some(&file)), "error");
        assert_eq!(cli.resolve_log_format(Some(&file)), LogFormat::Json);
    }
}
