// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # tether Integration Tests
//!
//! Integration tests for the tether gateway and the utilities they share.
//!
//! ## Module Structure
//!
//! - [`common`]: Shared test utilities
//!   - `fixtures`: Nodes, events and configuration files
//!   - `mocks`: Recording publisher and scriptable endpoint
//!   - `harness`: In-process pipeline (address space to publisher)
//!   - `assertions`: Payload and accounting checks
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test -p tether-tests
//!
//! # Run specific test suite
//! cargo test -p tether-tests --test integration_pipeline
//! cargo test -p tether-tests --test integration_delivery
//! cargo test -p tether-tests --test integration_codec
//! cargo test -p tether-tests --test integration_config
//! ```
//!
//! ## Test Categories
//!
//! ### Pipeline Tests (`integration_pipeline.rs`)
//! - Write, sweep and publish end to end
//! - Suppression of unchanged values
//! - Coalescing of writes between sweeps
//! - Per-node ordering
//!
//! ### Delivery Tests (`integration_delivery.rs`)
//! - Retry schedule and bounds
//! - Broker unavailability
//! - Lane isolation, overflow and shutdown drain
//! - Endpoint supervision and write gating
//!
//! ### Codec Tests (`integration_codec.rs`)
//! - Payload round trips and topic mapping
//!
//! ### Config Tests (`integration_config.rs`)
//! - YAML, TOML and JSON files through to running components
//!
//! ## Using the Harness
//!
//! ```rust,ignore
//! use tether_tests::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_something() {
//!     let harness = PipelineHarness::new(HarnessConfig::default());
//!     harness.write(&NodeFixtures::temperature1(), Value::Double(21.5), Utc::now());
//!     harness.sweep();
//!     harness.settle().await;
//!     assert_eq!(harness.publisher().publications().len(), 1);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::assertions::*;
    pub use crate::common::fixtures::*;
    pub use crate::common::harness::*;
    pub use crate::common::mocks::*;
    pub use crate::common::{init_test_logging, unique_test_id};
}
