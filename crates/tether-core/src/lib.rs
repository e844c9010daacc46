// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tether-core
//!
//! Core abstractions and shared types for the tether OPC UA to MQTT gateway.
//!
//! - **Types**: `NodeId`, `DataType`, `Value`, `StatusCode`, `DataValue`
//! - **Error**: Unified error hierarchy
//! - **Message**: Change events emitted by the subscription engine
//! - **Bus**: Bounded, non-blocking change channel
//! - **Retry**: Backoff policies for publish retries and reconnects
//! - **Supervisor**: Connection state machine shared by both endpoints
//! - **Shutdown**: Cooperative shutdown tokens
//!
//! ## Example
//!
//! ```
//! use tether_core::types::{NodeId, Value, DataType};
//!
//! let node: NodeId = "ns=2;s=Temperature".parse().unwrap();
//! let value = Value::Float(21.5).coerce_to(DataType::Double).unwrap();
//!
//! assert_eq!(node.identifier_text(), "Temperature");
//! assert_eq!(value, Value::Double(21.5));
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Core Modules
// =============================================================================

pub mod error;
pub mod types;

// =============================================================================
// Messaging
// =============================================================================

pub mod bus;
pub mod message;

// =============================================================================
// Connection Management
// =============================================================================

pub mod retry;
pub mod shutdown;
pub mod supervisor;

// =============================================================================
// Re-exports
// =============================================================================

pub use bus::{change_channel, BusStats, ChangeReceiver, ChangeSender};
pub use error::{
    BusError, EndpointError, EndpointResult, GatewayError, GatewayResult, NodeError, NodeResult,
    PublishError, PublishResult,
};
pub use message::ChangeEvent;
pub use retry::{Backoff, ExponentialBackoff, RetryConfig, RetryDecision, RetryStrategy, Retryable};
pub use shutdown::{ShutdownCoordinator, ShutdownToken};
pub use supervisor::{
    ConnectionState, Endpoint, HealthReport, Supervisor, SupervisorConfig, SupervisorHandle,
};
pub use types::{DataType, DataValue, NodeId, NodeIdentifier, StatusCode, Value};
