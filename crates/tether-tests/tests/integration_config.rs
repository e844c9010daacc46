// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Configuration Integration Tests
//!
//! Loading configuration files and turning them into runtime settings.

use std::env;
use std::time::Duration;

use tether_config::{ConfigError, ConfigFormat, ConfigLoader, LogFormat, LogLevel};
use tether_core::types::{DataType, NodeId, Value};
use tether_mqtt::codec::DeliveryGuarantee;
use tether_tests::prelude::*;

fn loader() -> ConfigLoader {
    ConfigLoader::new().with_env_prefix(unique_test_id())
}

// =============================================================================
// Formats
// =============================================================================

#[test]
fn test_yaml_full_config() {
    let file = ConfigFixtures::write_temp(ConfigFixtures::yaml(), "yaml");
    let config = loader().load(file.path()).unwrap();

    assert_eq!(config.gateway.id, "plant-a-gw");
    assert_eq!(config.opcua.endpoint, "opc.tcp://127.0.0.1:48400");
    assert_eq!(config.opcua.namespace_uri, "PLANT_A");
    assert_eq!(config.nodes.len(), 3);
    assert!(config.simulator.enabled);
    assert_eq!(config.logging.level, LogLevel::Debug);
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
fn test_toml_and_json_agree() {
    let toml_file = ConfigFixtures::write_temp(ConfigFixtures::toml(), "toml");
    let json_file = ConfigFixtures::write_temp(ConfigFixtures::json(), "json");

    let from_toml = loader().load(toml_file.path()).unwrap();
    let from_json = loader().load(json_file.path()).unwrap();

    assert_eq!(from_toml, from_json);
    assert_eq!(from_toml.mqtt.host, "broker.local");
    assert_eq!(from_toml.sampling.interval_ms, 250);
    assert_eq!(from_toml.nodes.len(), 1);
}

#[test]
fn test_unknown_extension_rejected() {
    let file = ConfigFixtures::write_temp(ConfigFixtures::yaml(), "ini");
    let err = loader().load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
}

#[test]
fn test_missing_file() {
    let err = loader().load("/nonexistent/tether.yaml").unwrap_err();
    assert!(err.is_io_error());
}

// =============================================================================
// Runtime Settings
// =============================================================================

#[test]
fn test_node_definitions_from_config() {
    let config = loader()
        .load_from_str(ConfigFixtures::yaml(), ConfigFormat::Yaml)
        .unwrap();
    let definitions = config.node_definitions().unwrap();

    let temperature = &definitions[0];
    assert_eq!(temperature.node_id, NodeFixtures::temperature1());
    assert_eq!(temperature.browse_name, "Temperature1");
    assert_eq!(temperature.data_type, DataType::Double);
    assert_eq!(temperature.initial_value, Some(Value::Double(20.0)));
    assert!(temperature.writable);

    let valve = &definitions[2];
    assert_eq!(valve.initial_value, Some(Value::Boolean(false)));
    assert!(!valve.writable);
}

#[test]
fn test_monitored_items_from_config() {
    let config = loader()
        .load_from_str(ConfigFixtures::yaml(), ConfigFormat::Yaml)
        .unwrap();
    let items = config.monitored_items();

    assert_eq!(items.len(), 3);
    assert_eq!(items[0].sampling_interval, Duration::from_millis(250));
    assert_eq!(items[0].deadband, 0.1);
    assert_eq!(items[1].deadband, 0.0);
    assert_eq!(items[2].sampling_interval, Duration::from_secs(1));
}

#[test]
fn test_topics_and_delivery_from_config() {
    let config = loader()
        .load_from_str(ConfigFixtures::yaml(), ConfigFormat::Yaml)
        .unwrap();

    let topics = config.topic_mapper();
    assert_eq!(
        topics.topic_for(&NodeFixtures::temperature1()),
        "plant-a/sensors/Temperature1"
    );
    assert_eq!(topics.topic_for(&NodeFixtures::pressure1()), "plant-a/pressure");

    let bridge = config.bridge_config().unwrap();
    assert_eq!(bridge.lane_capacity, 16);
    assert_eq!(bridge.retry.max_attempts, 4);
    assert_eq!(bridge.retry.initial_delay, Duration::from_millis(500));
    assert_eq!(bridge.retry.max_delay, Duration::from_secs(30));
    assert_eq!(bridge.grace_period, Duration::from_secs(2));
    assert_eq!(bridge.qos, DeliveryGuarantee::AtLeastOnce);

    let settings = config.mqtt.settings();
    assert_eq!(settings.host, "broker.local");
    assert_eq!(settings.port, 1884);
    assert_eq!(settings.client_id, "plant-a");
    assert_eq!(config.mqtt.publish_timeout(), Duration::from_secs(2));
}

#[test]
fn test_simulator_from_config() {
    let config = loader()
        .load_from_str(ConfigFixtures::yaml(), ConfigFormat::Yaml)
        .unwrap();
    let specs = config.simulator.sensor_specs();

    assert_eq!(config.simulator.interval(), Duration::from_secs(5));
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].node_id, NodeFixtures::temperature1());
    assert_eq!((specs[0].min, specs[0].max), (15.0, 30.0));
}

// =============================================================================
// Environment
// =============================================================================

#[test]
fn test_env_overrides_win_over_file() {
    let prefix = unique_test_id();
    env::set_var(format!("{}_MQTT_HOST", prefix), "override-host");
    env::set_var(format!("{}_OPCUA_ENDPOINT", prefix), "opc.tcp://0.0.0.0:4841");
    env::set_var(format!("{}_LOG_LEVEL", prefix), "warn");

    let config = ConfigLoader::new()
        .with_env_prefix(&prefix)
        .load_from_str(ConfigFixtures::yaml(), ConfigFormat::Yaml)
        .unwrap();

    assert_eq!(config.mqtt.host, "override-host");
    assert_eq!(config.mqtt.port, 1884);
    assert_eq!(config.opcua.endpoint, "opc.tcp://0.0.0.0:4841");
    assert_eq!(config.logging.level, LogLevel::Warn);
}

#[test]
fn test_env_override_is_validated() {
    let prefix = unique_test_id();
    env::set_var(format!("{}_OPCUA_ENDPOINT", prefix), "http://not-opc");

    let err = ConfigLoader::new()
        .with_env_prefix(&prefix)
        .load_from_str(ConfigFixtures::yaml(), ConfigFormat::Yaml)
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidAddress { .. }));
}

#[test]
fn test_env_overrides_can_be_disabled() {
    let prefix = unique_test_id();
    env::set_var(format!("{}_MQTT_HOST", prefix), "ignored");

    let config = ConfigLoader::new()
        .with_env_prefix(&prefix)
        .with_env_vars(false)
        .load_from_str(ConfigFixtures::yaml(), ConfigFormat::Yaml)
        .unwrap();
    assert_eq!(config.mqtt.host, "broker.local");
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_duplicate_nodes_rejected() {
    let content = r#"
nodes:
  - id: "ns=2;s=A"
  - id: "ns=2;s=A"
"#;
    let err = loader().load_from_str(content, ConfigFormat::Yaml).unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateNodeId { .. }));
}

#[test]
fn test_nodes_sharing_a_topic_rejected() {
    let content = r#"
nodes:
  - id: "ns=2;s=Flow"
  - id: "ns=3;s=Flow"
"#;
    let err = loader().load_from_str(content, ConfigFormat::Yaml).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Validation { ref field, .. } if field == "nodes.ns=3;s=Flow.topic"
    ));

    let content = r#"
nodes:
  - id: "ns=2;s=Flow"
  - id: "ns=3;s=Flow"
    topic: "sensors/line3/Flow"
"#;
    let config = loader().load_from_str(content, ConfigFormat::Yaml).unwrap();
    assert_eq!(
        config.topic_mapper().topic_for(&NodeId::string(3, "Flow")),
        "sensors/line3/Flow"
    );
}

#[test]
fn test_simulator_must_target_known_nodes() {
    let content = r#"
nodes:
  - id: "ns=2;s=A"
simulator:
  enabled: true
  sensors:
    - node: "ns=2;s=Missing"
      min: 0.0
      max: 1.0
"#;
    assert!(loader().load_from_str(content, ConfigFormat::Yaml).is_err());
}

#[test]
fn test_defaults_without_nodes() {
    let config = loader().load_from_str("{}", ConfigFormat::Json).unwrap();
    assert_eq!(
        config.nodes.iter().map(|n| n.id.clone()).collect::<Vec<_>>(),
        vec![NodeId::string(2, "Temperature"), NodeId::string(2, "Pressure")]
    );
    assert_eq!(config.mqtt.topic_prefix, "sensors");
    assert_eq!(config.sampling.interval_ms, 1_000);
}
