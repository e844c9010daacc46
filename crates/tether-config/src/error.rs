// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Errors raised while loading or validating a gateway configuration.
//!
//! All of them are fatal at startup.

use std::path::PathBuf;
use thiserror::Error;

/// Why a configuration could not be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document is not valid for its format or schema.
    #[error("Cannot parse '{path}': {message}")]
    Parse {
        /// Source of the document.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// A value parsed but is not acceptable.
    #[error("Invalid '{field}': {message}")]
    Validation {
        /// Dotted path of the offending option.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// The file exists but could not be read.
    #[error("Cannot read '{path}': {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// No file at the given path.
    #[error("Configuration file '{path}' does not exist")]
    FileNotFound {
        /// File path.
        path: PathBuf,
    },

    /// An OPC UA endpoint URL or broker address that cannot be used.
    #[error("Invalid address '{address}': {message}")]
    InvalidAddress {
        /// The address as written.
        address: String,
        /// Why it was refused.
        message: String,
    },

    /// Two `nodes` entries share an id.
    #[error("Node '{node_id}' is configured more than once")]
    DuplicateNodeId {
        /// The repeated id.
        node_id: String,
    },

    /// `${NAME}` placeholder with no default and no such variable.
    #[error("Placeholder refers to unset variable {name}")]
    EnvVarNotFound {
        /// Variable name.
        name: String,
    },

    /// A `TETHER_*` override that does not parse.
    #[error("Override {name} is invalid: {message}")]
    InvalidEnvVar {
        /// Variable name.
        name: String,
        /// Expected form.
        message: String,
    },

    /// A number outside its allowed range.
    #[error("Value out of range for '{field}': {value} (expected {min}..={max})")]
    OutOfRange {
        /// Dotted path of the option.
        field: String,
        /// Configured value.
        value: String,
        /// Lowest accepted value.
        min: String,
        /// Highest accepted value.
        max: String,
    },

    /// File extension is not yaml, yml, toml or json.
    #[error("Unsupported configuration format '{format}'")]
    UnsupportedFormat {
        /// The extension seen.
        format: String,
    },

    /// Rendering a configuration back to text failed.
    #[error("Cannot serialize configuration: {message}")]
    Serialization {
        /// Serializer message.
        message: String,
    },
}

impl ConfigError {
    /// Parse failure for the document at `path`.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Validation failure for `field`.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Read failure for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Missing file.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Unusable endpoint or broker address.
    pub fn invalid_address(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Repeated node id.
    pub fn duplicate_node_id(node_id: impl Into<String>) -> Self {
        Self::DuplicateNodeId {
            node_id: node_id.into(),
        }
    }

    /// Unset placeholder variable.
    pub fn env_var_not_found(name: impl Into<String>) -> Self {
        Self::EnvVarNotFound { name: name.into() }
    }

    /// Unparseable override.
    pub fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Value outside `min..=max`.
    pub fn out_of_range<T: std::fmt::Display>(
        field: impl Into<String>,
        value: T,
        min: T,
        max: T,
    ) -> Self {
        Self::OutOfRange {
            field: field.into(),
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        }
    }

    /// Unknown file extension.
    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    /// Rendering failure.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns `true` when the file itself could not be read.
    pub fn is_io_error(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::FileNotFound { .. })
    }

    /// Short label used in structured logs.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::Validation { .. } => "validation",
            Self::Io { .. } => "io",
            Self::FileNotFound { .. } => "file_not_found",
            Self::InvalidAddress { .. } => "invalid_address",
            Self::DuplicateNodeId { .. } => "duplicate_node_id",
            Self::EnvVarNotFound { .. } => "env_var_not_found",
            Self::InvalidEnvVar { .. } => "invalid_env_var",
            Self::OutOfRange { .. } => "out_of_range",
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::Serialization { .. } => "serialization",
        }
    }
}

/// Result alias for configuration handling.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        let error = ConfigError::validation("mqtt.port", "cannot be zero");
        assert_eq!(error.error_type(), "validation");
        assert_eq!(error.to_string(), "Invalid 'mqtt.port': cannot be zero");

        let error = ConfigError::invalid_address("opc.tcp://", "missing host");
        assert_eq!(error.error_type(), "invalid_address");
        assert!(error.to_string().contains("opc.tcp://"));
    }

    #[test]
    fn test_file_errors_are_io() {
        let error = ConfigError::io(
            "tether.yaml",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(error.is_io_error());
        assert!(ConfigError::file_not_found("tether.yaml").is_io_error());
        assert!(!ConfigError::duplicate_node_id("ns=2;s=A").is_io_error());
    }

    #[test]
    fn test_out_of_range_message() {
        let error = ConfigError::out_of_range("sampling.interval_ms", 0, 10, 3_600_000);
        assert_eq!(
            error.to_string(),
            "Value out of range for 'sampling.interval_ms': 0 (expected 10..=3600000)"
        );
    }
}
