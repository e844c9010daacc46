// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Unified error hierarchy for tether.
//!
//! Errors are split by the side of the gateway they come from:
//!
//! ```text
//! GatewayError (root)
//! ├── NodeError       - Address space and write path
//! ├── PublishError    - MQTT publication
//! └── EndpointError   - Connection establishment and loss
//!
//! BusError            - Internal change-event channel
//! ```
//!
//! Per-node errors are returned to the immediate caller. Endpoint errors are
//! absorbed by the connection supervisors and surface only as state changes,
//! counters and logs. Publish errors feed the bridge's retry policy.
//!
//! # Examples
//!
//! ```
//! use tether_core::error::{GatewayError, PublishError};
//! use std::time::Duration;
//!
//! let error = PublishError::timeout(Duration::from_secs(5));
//! assert!(error.is_retryable());
//!
//! let gateway_error: GatewayError = error.into();
//! assert!(gateway_error.is_retryable());
//! ```

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::types::{DataType, NodeId};

// =============================================================================
// GatewayError - Root Error Type
// =============================================================================

/// The root error type for tether.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Address space error.
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    /// Publish error.
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    /// Endpoint error.
    #[error("Endpoint error: {0}")]
    Endpoint(#[from] EndpointError),
}

impl GatewayError {
    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Node(e) => e.is_retryable(),
            GatewayError::Publish(e) => e.is_retryable(),
            GatewayError::Endpoint(e) => e.is_retryable(),
        }
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Node(e) => e.error_type(),
            GatewayError::Publish(e) => e.error_type(),
            GatewayError::Endpoint(e) => e.error_type(),
        }
    }
}

// =============================================================================
// NodeError
// =============================================================================

/// Errors raised by the address space and the session-facing write path.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeError {
    /// The node does not exist.
    #[error("Node not found: {node_id}")]
    NotFound {
        /// The missing node.
        node_id: NodeId,
    },

    /// The value type does not match the node's declared type.
    #[error("Type mismatch on {node_id}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The node written to.
        node_id: NodeId,
        /// Declared type.
        expected: DataType,
        /// Type of the rejected value.
        actual: DataType,
    },

    /// A node with the same identity already exists.
    #[error("Duplicate node identity: {node_id}")]
    DuplicateIdentity {
        /// The conflicting identity.
        node_id: NodeId,
    },

    /// The node is read-only.
    #[error("Node is not writable: {node_id}")]
    NotWritable {
        /// The read-only node.
        node_id: NodeId,
    },

    /// The OPC UA endpoint is not connected.
    #[error("OPC UA endpoint unavailable")]
    EndpointUnavailable,

    /// A monitored item's node has disappeared.
    #[error("Monitored item is stale: {node_id}")]
    Stale {
        /// The node that went missing.
        node_id: NodeId,
    },

    /// A node identity string could not be parsed.
    #[error("Invalid node id '{input}': {reason}")]
    InvalidNodeId {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A data type name is not recognised.
    #[error("Unknown data type: {name}")]
    UnknownDataType {
        /// The rejected name.
        name: String,
    },
}

impl NodeError {
    /// Creates a not found error.
    pub fn not_found(node_id: &NodeId) -> Self {
        Self::NotFound {
            node_id: node_id.clone(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(node_id: &NodeId, expected: DataType, actual: DataType) -> Self {
        Self::TypeMismatch {
            node_id: node_id.clone(),
            expected,
            actual,
        }
    }

    /// Creates a duplicate identity error.
    pub fn duplicate(node_id: &NodeId) -> Self {
        Self::DuplicateIdentity {
            node_id: node_id.clone(),
        }
    }

    /// Creates a not writable error.
    pub fn not_writable(node_id: &NodeId) -> Self {
        Self::NotWritable {
            node_id: node_id.clone(),
        }
    }

    /// Creates an invalid node id error.
    pub fn invalid_node_id(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNodeId {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EndpointUnavailable)
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::DuplicateIdentity { .. } => "duplicate_identity",
            Self::NotWritable { .. } => "not_writable",
            Self::EndpointUnavailable => "endpoint_unavailable",
            Self::Stale { .. } => "stale",
            Self::InvalidNodeId { .. } => "invalid_node_id",
            Self::UnknownDataType { .. } => "unknown_data_type",
        }
    }
}

// =============================================================================
// PublishError
// =============================================================================

/// Errors returned by a publish attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The MQTT link is not connected.
    #[error("MQTT broker unavailable")]
    BrokerUnavailable,

    /// The broker did not acknowledge within the publish timeout.
    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),

    /// The publication was refused and will not succeed on retry.
    #[error("Publish rejected: {reason}")]
    Rejected {
        /// Why it was refused.
        reason: String,
    },
}

impl PublishError {
    /// Creates a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout(duration)
    }

    /// Creates a rejected error.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::BrokerUnavailable => "broker_unavailable",
            Self::Timeout(_) => "timeout",
            Self::Rejected { .. } => "rejected",
        }
    }
}

// =============================================================================
// EndpointError
// =============================================================================

/// Errors raised while establishing or holding an endpoint connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    /// The remote side refused the connection.
    #[error("Connection refused by {endpoint}: {message}")]
    Refused {
        /// Endpoint name.
        endpoint: String,
        /// Detail.
        message: String,
    },

    /// Connecting did not complete in time.
    #[error("Connection to {endpoint} timed out after {duration:?}")]
    Timeout {
        /// Endpoint name.
        endpoint: String,
        /// Configured timeout.
        duration: Duration,
    },

    /// An established connection failed.
    #[error("I/O error on {endpoint}: {message}")]
    Io {
        /// Endpoint name.
        endpoint: String,
        /// Detail.
        message: String,
    },

    /// The connection was closed.
    #[error("Connection to {endpoint} closed")]
    Closed {
        /// Endpoint name.
        endpoint: String,
    },

    /// The configured address cannot be used.
    #[error("Invalid address '{address}': {message}")]
    InvalidAddress {
        /// The address.
        address: String,
        /// Detail.
        message: String,
    },
}

impl EndpointError {
    /// Creates a refused error.
    pub fn refused(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Refused {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(endpoint: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            endpoint: endpoint.into(),
            duration,
        }
    }

    /// Creates an I/O error.
    pub fn io(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates an I/O error from a [`std::io::Error`].
    pub fn from_io(endpoint: impl Into<String>, err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused | io::ErrorKind::AddrInUse => {
                Self::refused(endpoint, err.to_string())
            }
            io::ErrorKind::AddrNotAvailable => Self::InvalidAddress {
                address: endpoint.into(),
                message: err.to_string(),
            },
            _ => Self::io(endpoint, err.to_string()),
        }
    }

    /// Creates a closed error.
    pub fn closed(endpoint: impl Into<String>) -> Self {
        Self::Closed {
            endpoint: endpoint.into(),
        }
    }

    /// Creates an invalid address error.
    pub fn invalid_address(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if this error came from a failed connection attempt.
    ///
    /// Such failures move a supervisor to `Failing` rather than
    /// `Disconnected`.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            Self::Refused { .. } | Self::Timeout { .. } | Self::InvalidAddress { .. }
        )
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        true
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Refused { .. } => "refused",
            Self::Timeout { .. } => "connect_timeout",
            Self::Io { .. } => "io",
            Self::Closed { .. } => "closed",
            Self::InvalidAddress { .. } => "invalid_address",
        }
    }
}

// =============================================================================
// BusError
// =============================================================================

/// Errors from the internal change-event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    /// The channel is at capacity.
    #[error("Change channel is full")]
    Full,

    /// The receiving side has been dropped.
    #[error("Change channel is closed")]
    Closed,
}

impl BusError {
    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Full)
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Result type for address space operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// Result type for publish operations.
pub type PublishResult<T> = Result<T, PublishError>;

/// Result type for endpoint operations.
pub type EndpointResult<T> = Result<T, EndpointError>;

/// Result type for change channel operations.
pub type BusResult<T> = Result<T, BusError>;

// =============================================================================
// Tests
// =============================================================================
