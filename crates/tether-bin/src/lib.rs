// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tether-bin
//!
//! CLI binary for the tether OPC UA to MQTT gateway.
//!
//! - CLI argument parsing with clap
//! - Gateway runtime orchestration
//! - Logging initialization
//! - Command implementations (run, validate, version)
//!
//! ## Architecture
//!
//! ```text
//!                    main.rs
//!                       │
//!                    cli.rs
//!                       │
//!          ┌────────────┼────────────┐
//!          ▼            ▼            ▼
//!      commands      runtime      logging
//!                       │
//!     ┌─────────┬───────┴───┬──────────────┐
//!     ▼         ▼           ▼              ▼
//!  opcua sup  engine  protocol bridge  mqtt sup
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the gateway (default command)
//! tether
//!
//! # Start with a custom config and the sensor simulator
//! tether -c /etc/tether/tether.yaml run --simulate
//!
//! # Validate configuration
//! tether validate --show-config
//!
//! # Show version
//! tether version
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod runtime;

// =============================================================================
// Re-exports
// =============================================================================

pub use cli::{Cli, Commands};
pub use error::{BinError, BinResult};
pub use logging::init_logging;
pub use runtime::{GatewayRuntime, RuntimeBuilder};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
