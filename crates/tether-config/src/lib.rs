// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tether-config
//!
//! Configuration management for the tether gateway.
//!
//! ## Features
//!
//! - **Schema Definition**: every section with deployment defaults and validation
//! - **Multi-Format Support**: YAML, TOML and JSON configuration files
//! - **Environment Overrides**: `TETHER_*` variables and `${VAR:default}` placeholders
//! - **Runtime Settings**: conversions into the settings types of the other crates
//!
//! ## Quick Start
//!
//! ```no_run
//! use tether_config::loader::load_config;
//!
//! let config = load_config("tether.yaml").unwrap();
//! println!("Gateway ID: {}", config.gateway.id);
//! println!("Nodes: {}", config.nodes.len());
//! ```
//!
//! ## Configuration Schema
//!
//! - `gateway` - identification
//! - `opcua` - hosted server endpoint and namespace
//! - `mqtt` - broker, topics and delivery options
//! - `sampling` - change detection
//! - `publish` - retries and per-node lanes
//! - `nodes` - address-space nodes
//! - `simulator` - built-in sensor simulator
//! - `shutdown`, `health`, `logging`

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod error;
pub mod loader;
pub mod schema;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, load_config_str, ConfigFormat, ConfigLoader};
pub use schema::{
    GatewayConfig, HealthConfig, LogFormat, LogLevel, LoggingConfig, MqttConfig, NodeConfig,
    OpcUaConfig, PublishConfig, SamplingConfig, ScalarValue, SensorConfig, ShutdownConfig,
    SimulatorConfig, TetherConfig,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
