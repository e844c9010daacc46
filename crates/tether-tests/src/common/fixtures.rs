// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Pre-built nodes, events and configuration files.

use std::io::Write;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::NamedTempFile;

use tether_core::message::ChangeEvent;
use tether_core::types::{DataType, NodeId, StatusCode, Value};
use tether_opcua::address_space::NodeDefinition;

/// Namespace index used by every fixture node.
pub const NS: u16 = 2;

// =============================================================================
// Node Fixtures
// =============================================================================

/// Node identities and definitions.
pub struct NodeFixtures;

impl NodeFixtures {
    /// `ns=2;s=Temperature1`.
    pub fn temperature1() -> NodeId {
        NodeId::string(NS, "Temperature1")
    }

    /// `ns=2;s=Pressure1`.
    pub fn pressure1() -> NodeId {
        NodeId::string(NS, "Pressure1")
    }

    /// `ns=2;s=Valve1`.
    pub fn valve1() -> NodeId {
        NodeId::string(NS, "Valve1")
    }

    /// A Double node starting at 0.0.
    pub fn double(node_id: NodeId) -> NodeDefinition {
        let name = node_id.identifier_text();
        NodeDefinition::new(node_id, name, DataType::Double).with_initial_value(Value::Double(0.0))
    }

    /// Temperature1 and Pressure1 (Double) plus Valve1 (Boolean).
    pub fn plant() -> Vec<NodeDefinition> {
        vec![
            Self::double(Self::temperature1()),
            Self::double(Self::pressure1()),
            NodeDefinition::new(Self::valve1(), "Valve1", DataType::Boolean)
                .with_initial_value(Value::Boolean(false)),
        ]
    }
}

// =============================================================================
// Event Fixtures
// =============================================================================

/// Change events.
pub struct EventFixtures;

impl EventFixtures {
    /// A fixed, sub-second timestamp.
    pub fn t1() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, 26)
            .single()
            .expect("valid timestamp")
            + chrono::Duration::nanoseconds(535_897_932)
    }

    /// A Good Double event.
    pub fn double(node_id: NodeId, value: f64, sequence: u64) -> ChangeEvent {
        ChangeEvent {
            node_id,
            value: Value::Double(value),
            status: StatusCode::Good,
            timestamp: Self::t1(),
            sequence,
        }
    }

    /// One event per value, numbered from 1.
    pub fn series(node_id: &NodeId, values: &[f64]) -> Vec<ChangeEvent> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Self::double(node_id.clone(), *v, i as u64 + 1))
            .collect()
    }
}

// =============================================================================
// Config Fixtures
// =============================================================================

/// Configuration documents.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// A complete YAML configuration.
    pub fn yaml() -> &'static str {
        r#"
gateway:
  id: plant-a-gw
  name: Plant A

opcua:
  endpoint: "opc.tcp://127.0.0.1:48400"
  namespace_uri: PLANT_A

mqtt:
  host: broker.local
  port: 1884
  client_id: plant-a
  topic_prefix: plant-a/sensors
  qos: 1
  publish_timeout_ms: 2000

sampling:
  interval_ms: 250

publish:
  lane_capacity: 16
  retry:
    max_attempts: 4
    initial_delay: 500

nodes:
  - id: "ns=2;s=Temperature1"
    data_type: Double
    initial_value: 20.0
    deadband: 0.1
  - id: "ns=2;s=Pressure1"
    data_type: Double
    initial_value: 1.0
    topic: plant-a/pressure
  - id: "ns=2;s=Valve1"
    data_type: Boolean
    initial_value: false
    writable: false
    sampling_interval_ms: 1000

simulator:
  enabled: true
  interval_ms: 5000
  sensors:
    - node: "ns=2;s=Temperature1"
      min: 15.0
      max: 30.0

shutdown:
  grace_period_ms: 2000

logging:
  level: debug
  format: json
"#
    }

    /// The same gateway in TOML.
    pub fn toml() -> &'static str {
        r#"
[gateway]
id = "plant-a-gw"

[mqtt]
host = "broker.local"
port = 1884
topic_prefix = "plant-a/sensors"

[sampling]
interval_ms = 250

[[nodes]]
id = "ns=2;s=Temperature1"
data_type = "Double"
initial_value = 20.0
"#
    }

    /// The same gateway in JSON.
    pub fn json() -> &'static str {
        r#"{
  "gateway": { "id": "plant-a-gw" },
  "mqtt": { "host": "broker.local", "port": 1884, "topic_prefix": "plant-a/sensors" },
  "sampling": { "interval_ms": 250 },
  "nodes": [
    { "id": "ns=2;s=Temperature1", "data_type": "Double", "initial_value": 20.0 }
  ]
}"#
    }

    /// Writes `content` to a temporary file with the given extension.
    pub fn write_temp(content: &str, extension: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .prefix("tether_test_")
            .suffix(&format!(".{}", extension))
            .tempfile()
            .expect("Failed to create temp config");
        file.write_all(content.as_bytes())
            .expect("Failed to write temp config");
        file
    }
}
