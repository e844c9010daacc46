// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Errors surfaced by the `tether` binary and their process exit codes.

use thiserror::Error;

/// Result alias for command and runtime code.
pub type BinResult<T> = Result<T, BinError>;

/// Failures that end the process.
#[derive(Debug, Error)]
pub enum BinError {
    /// No usable configuration. Exit code 1.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Startup could not complete. Exit code 2.
    #[error("Startup failed: {0}")]
    Initialization(String),

    /// The running gateway failed. Exit code 3.
    #[error("Gateway failed: {0}")]
    Runtime(String),

    /// Terminal, signal or file failure. Exit code 4.
    #[error("I/O failure: {0}")]
    Io(String),

    /// Loading or validating the file failed.
    #[error("{0}")]
    Config(#[from] tether_config::ConfigError),

    /// A configured node could not be created.
    #[error("Address space: {0}")]
    Node(#[from] tether_core::NodeError),

    /// Error from a gateway component.
    #[error("{0}")]
    Gateway(#[from] tether_core::GatewayError),

    /// Another error with the step that failed.
    #[error("{context}: {source}")]
    WithContext {
        /// What was being done.
        context: String,
        /// The wrapped error.
        #[source]
        source: Box<BinError>,
    },
}

impl BinError {
    /// Configuration failure.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Startup failure.
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Initialization(msg.into())
    }

    /// Failure while running.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// I/O failure.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Wraps the error with the step that failed.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Process exit code; wrapped errors keep the code of their source.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::Config(_) => 1,
            Self::Initialization(_) | Self::Node(_) => 2,
            Self::Runtime(_) | Self::Gateway(_) => 3,
            Self::Io(_) => 4,
            Self::WithContext { source, .. } => source.exit_code(),
        }
    }
}

impl From<std::io::Error> for BinError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<anyhow::Error> for BinError {
    fn from(err: anyhow::Error) -> Self {
        Self::Runtime(format!("{:#}", err))
    }
}

// =============================================================================
// Error Reporting
// =============================================================================

/// Prints the error and its causes to stderr.
pub fn report_error(error: &BinError) {
    eprintln!("tether: {}", error);

    let mut cause = std::error::Error::source(error);
    while let Some(inner) = cause {
        eprintln!("  because: {}", inner);
        cause = inner.source();
    }
}

/// Prints the error and exits with its code.
pub fn report_error_and_exit(error: BinError) -> ! {
    report_error(&error);
    std::process::exit(error.exit_code())
}

// =============================================================================
// Tests
// =============================================================================
