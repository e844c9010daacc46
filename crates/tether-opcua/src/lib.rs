// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA side of the tether gateway.
//!
//! # Features
//!
//! - Address space with per-node write serialisation
//! - Endpoint-gated write entry point for sessions and the simulator
//! - Sampling subscription engine emitting change events
//! - OPC UA server endpoint (`real-transport` feature) and an in-process
//!   loopback endpoint
//! - Random-reading sensor simulator
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use chrono::Utc;
//! use tether_core::bus::change_channel;
//! use tether_core::types::{DataType, NodeId, Value};
//! use tether_opcua::{AddressSpace, EngineConfig, MonitoredItemSettings, SubscriptionEngine};
//!
//! let space = Arc::new(AddressSpace::new());
//! let node = NodeId::string(2, "Temperature");
//! space.create_node(node.clone(), "Temperature", DataType::Double, Value::Double(0.0)).unwrap();
//!
//! let (tx, mut rx) = change_channel(16);
//! let engine = SubscriptionEngine::new(space.clone(), tx, EngineConfig::default());
//! engine.add_item(MonitoredItemSettings::new(node.clone())).unwrap();
//!
//! space.write_value(&node, Value::Double(21.5), Utc::now()).unwrap();
//! engine.sweep(tokio::time::Instant::now());
//! assert_eq!(rx.try_recv().unwrap().value, Value::Double(21.5));
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod address_space;
pub mod sensor;
pub mod server;
pub mod subscription;
pub mod write_acceptor;

pub use address_space::{AddressSpace, Node, NodeDefinition};
pub use sensor::{SensorSimulator, SensorSpec, SimulatorStats};
pub use server::{parse_endpoint_url, LoopbackEndpoint, LoopbackSession, ServerSettings};
pub use subscription::{
    EngineConfig, EngineStats, ItemState, MonitoredItemSettings, SubscriptionEngine,
};
pub use write_acceptor::{WriteAcceptor, WriteStats};

#[cfg(feature = "real-transport")]
pub use server::{UaServerConnection, UaServerEndpoint};
