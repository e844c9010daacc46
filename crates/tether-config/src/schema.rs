// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration schema for the tether gateway.
//!
//! Every section has defaults that reproduce the reference deployment: an
//! OPC UA server on `opc.tcp://0.0.0.0:4840` exposing `Temperature` and
//! `Pressure` in the `SENSOR_DATA` namespace, bridged to `mqtt-broker:1883`.
//! Durations are given in milliseconds unless the field name says otherwise.
//!
//! # Example
//!
//! ```yaml
//! gateway:
//!   id: plant-a-gw
//! mqtt:
//!   host: "${MQTT_HOST:localhost}"
//!   topic_prefix: plant-a/sensors
//! nodes:
//!   - id: "ns=2;s=Temperature"
//!     data_type: Double
//!     initial_value: 0.0
//!     deadband: 0.05
//! ```

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::retry::RetryConfig;
use tether_core::supervisor::SupervisorConfig;
use tether_core::types::{DataType, NodeId, Value};
use tether_mqtt::bridge::BridgeConfig;
use tether_mqtt::client::MqttSettings;
use tether_mqtt::codec::{DeliveryGuarantee, TopicMapper};
use tether_opcua::address_space::NodeDefinition;
use tether_opcua::sensor::SensorSpec;
use tether_opcua::server::{parse_endpoint_url, ServerSettings};
use tether_opcua::subscription::{EngineConfig, MonitoredItemSettings};

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// Constants
// =============================================================================

/// Minimum sampling interval in milliseconds.
pub const MIN_SAMPLING_INTERVAL_MS: u64 = 10;

/// Maximum sampling interval in milliseconds (1 hour).
pub const MAX_SAMPLING_INTERVAL_MS: u64 = 3_600_000;

/// Minimum health report interval in milliseconds.
pub const MIN_HEALTH_INTERVAL_MS: u64 = 1_000;

/// Smallest accepted MQTT packet size limit in bytes.
pub const MIN_PACKET_SIZE: usize = 128;

/// Largest packet MQTT 3.1.1 can encode.
pub const MAX_PACKET_SIZE: usize = 268_435_460;

/// Default namespace index of gateway nodes.
pub const DEFAULT_NAMESPACE_INDEX: u16 = 2;

// =============================================================================
// Root Configuration
// =============================================================================

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TetherConfig {
    /// Gateway identity.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Hosted OPC UA server.
    #[serde(default)]
    pub opcua: OpcUaConfig,

    /// MQTT broker connection and publication options.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Change detection.
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Publish retries and lanes.
    #[serde(default)]
    pub publish: PublishConfig,

    /// Nodes created at startup.
    #[serde(default = "default_nodes")]
    pub nodes: Vec<NodeConfig>,

    /// Built-in sensor simulator.
    #[serde(default)]
    pub simulator: SimulatorConfig,

    /// Shutdown behaviour.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Periodic health reporting.
    #[serde(default)]
    pub health: HealthConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            opcua: OpcUaConfig::default(),
            mqtt: MqttConfig::default(),
            sampling: SamplingConfig::default(),
            publish: PublishConfig::default(),
            nodes: default_nodes(),
            simulator: SimulatorConfig::default(),
            shutdown: ShutdownConfig::default(),
            health: HealthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TetherConfig {
    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.gateway.validate()?;
        self.opcua.validate()?;
        self.mqtt.validate()?;
        self.sampling.validate()?;
        self.publish.validate()?;

        let mut node_ids = HashSet::new();
        for node in &self.nodes {
            if !node_ids.insert(&node.id) {
                return Err(ConfigError::duplicate_node_id(node.id.to_string()));
            }
            node.validate()?;
        }

        self.simulator.validate(&node_ids)?;
        self.health.validate()?;
        self.validate_topics()?;

        Ok(())
    }

    /// Rejects node sets whose topics collide once derived.
    ///
    /// Derived topics drop the namespace and flatten wildcards, so two
    /// distinct nodes may otherwise publish to the same topic.
    fn validate_topics(&self) -> ConfigResult<()> {
        let mapper = self.topic_mapper();
        let mut topics: HashMap<String, &NodeId> = HashMap::new();
        for node in &self.nodes {
            let topic = mapper.topic_for(&node.id);
            if let Some(other) = topics.insert(topic.clone(), &node.id) {
                return Err(ConfigError::validation(
                    format!("nodes.{}.topic", node.id),
                    format!("topic '{}' is already used by node {}", topic, other),
                ));
            }
        }
        Ok(())
    }

    /// Returns a node configuration by ID.
    pub fn get_node(&self, node_id: &NodeId) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| &n.id == node_id)
    }

    /// Builds the address-space definitions for all configured nodes.
    pub fn node_definitions(&self) -> ConfigResult<Vec<NodeDefinition>> {
        self.nodes.iter().map(NodeConfig::definition).collect()
    }

    /// Builds one monitored item per configured node.
    pub fn monitored_items(&self) -> Vec<MonitoredItemSettings> {
        self.nodes
            .iter()
            .map(|node| node.monitored_item(self.sampling.interval()))
            .collect()
    }

    /// Builds the topic mapper, including per-node overrides.
    pub fn topic_mapper(&self) -> TopicMapper {
        self.nodes
            .iter()
            .filter_map(|node| node.topic.as_ref().map(|topic| (node.id.clone(), topic.clone())))
            .fold(TopicMapper::new(self.mqtt.topic_prefix.clone()), |mapper, (id, topic)| {
                mapper.with_override(id, topic)
            })
    }

    /// Builds the subscription engine configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            emit_initial: self.sampling.emit_initial,
            idle_interval: self.sampling.interval(),
        }
    }

    /// Builds the protocol bridge configuration.
    pub fn bridge_config(&self) -> ConfigResult<BridgeConfig> {
        Ok(BridgeConfig {
            lane_capacity: self.publish.lane_capacity,
            retry: self.publish.retry.clone(),
            grace_period: self.shutdown.grace_period(),
            qos: self.mqtt.delivery_guarantee()?,
            retain: self.mqtt.retain,
        })
    }

    /// Returns a copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.mqtt.password.is_some() {
            copy.mqtt.password = Some("********".to_string());
        }
        copy
    }
}

// =============================================================================
// Gateway Configuration
// =============================================================================

/// Gateway identification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Unique gateway identifier.
    #[serde(default = "default_gateway_id")]
    pub id: String,

    /// Human-readable name.
    #[serde(default = "default_gateway_name")]
    pub name: String,
}

fn default_gateway_id() -> String {
    "tether-gateway-01".to_string()
}

fn default_gateway_name() -> String {
    "OPC UA to MQTT Gateway".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            id: default_gateway_id(),
            name: default_gateway_name(),
        }
    }
}

impl GatewayConfig {
    /// Validates the gateway configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.id.is_empty() {
            return Err(ConfigError::validation("gateway.id", "cannot be empty"));
        }
        if self.id.len() > 64 {
            return Err(ConfigError::validation("gateway.id", "cannot exceed 64 characters"));
        }
        Ok(())
    }
}

// =============================================================================
// OPC UA Configuration
// =============================================================================

/// Hosted OPC UA server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpcUaConfig {
    /// Endpoint URL the server binds to.
    #[serde(default = "default_opcua_endpoint")]
    pub endpoint: String,

    /// Application name shown to clients.
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Application URI.
    #[serde(default = "default_application_uri")]
    pub application_uri: String,

    /// Namespace URI registered for gateway nodes.
    #[serde(default = "default_namespace_uri")]
    pub namespace_uri: String,

    /// Namespace index expected for gateway nodes.
    #[serde(default = "default_namespace_index")]
    pub namespace_index: u16,

    /// Directory for the server's PKI material.
    #[serde(default = "default_pki_dir")]
    pub pki_dir: PathBuf,

    /// Time allowed for the server to come up.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Restart backoff.
    #[serde(default = "RetryConfig::reconnect")]
    pub reconnect: RetryConfig,
}

fn default_opcua_endpoint() -> String {
    "opc.tcp://0.0.0.0:4840".to_string()
}

fn default_server_name() -> String {
    "OPC UA Gateway Server".to_string()
}

fn default_application_uri() -> String {
    "urn:tether:gateway".to_string()
}

fn default_namespace_uri() -> String {
    "SENSOR_DATA".to_string()
}

fn default_namespace_index() -> u16 {
    DEFAULT_NAMESPACE_INDEX
}

fn default_pki_dir() -> PathBuf {
    PathBuf::from("pki")
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for OpcUaConfig {
    fn default() -> Self {
        Self {
            endpoint: default_opcua_endpoint(),
            server_name: default_server_name(),
            application_uri: default_application_uri(),
            namespace_uri: default_namespace_uri(),
            namespace_index: default_namespace_index(),
            pki_dir: default_pki_dir(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect: RetryConfig::reconnect(),
        }
    }
}

impl OpcUaConfig {
    /// Validates the OPC UA configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        parse_endpoint_url(&self.endpoint)
            .map_err(|e| ConfigError::invalid_address(&self.endpoint, e.to_string()))?;

        if self.namespace_uri.is_empty() {
            return Err(ConfigError::validation("opcua.namespace_uri", "cannot be empty"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::validation("opcua.connect_timeout_ms", "cannot be zero"));
        }
        self.reconnect
            .validate()
            .map_err(|message| ConfigError::validation("opcua.reconnect", message))?;

        Ok(())
    }

    /// Builds the server settings.
    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            endpoint_url: self.endpoint.clone(),
            server_name: self.server_name.clone(),
            application_uri: self.application_uri.clone(),
            namespace_uri: self.namespace_uri.clone(),
            pki_dir: self.pki_dir.clone(),
            ..Default::default()
        }
    }

    /// Builds the supervisor configuration.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::default()
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_backoff(self.reconnect.clone())
    }
}

// =============================================================================
// MQTT Configuration
// =============================================================================

/// MQTT broker connection and publication options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host.
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Client identifier.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Optional username.
    #[serde(default)]
    pub username: Option<String>,

    /// Optional password.
    #[serde(default)]
    pub password: Option<String>,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Start with a clean session.
    #[serde(default = "default_true")]
    pub clean_session: bool,

    /// Prefix for every topic.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// QoS level, 0 or 1.
    #[serde(default = "default_qos")]
    pub qos: u8,

    /// Publish with the retain flag.
    #[serde(default)]
    pub retain: bool,

    /// Largest MQTT packet sent or accepted, in bytes.
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,

    /// Time allowed for a delivery acknowledgement.
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Time allowed for the broker's CONNACK.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Reconnect backoff.
    #[serde(default = "RetryConfig::reconnect")]
    pub reconnect: RetryConfig,
}

fn default_mqtt_host() -> String {
    "mqtt-broker".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "opcua_mqtt_gateway".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_topic_prefix() -> String {
    "sensors".to_string()
}

fn default_qos() -> u8 {
    1
}

fn default_max_packet_size() -> usize {
    tether_mqtt::client::DEFAULT_MAX_PACKET_SIZE
}

fn default_publish_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive_secs(),
            clean_session: true,
            topic_prefix: default_topic_prefix(),
            qos: default_qos(),
            retain: false,
            max_packet_size: default_max_packet_size(),
            publish_timeout_ms: default_publish_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect: RetryConfig::reconnect(),
        }
    }
}

impl MqttConfig {
    /// Validates the MQTT configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        let address = format!("{}:{}", self.host, self.port);
        if self.host.trim().is_empty() || self.host.contains(char::is_whitespace) {
            return Err(ConfigError::invalid_address(address, "invalid broker host"));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid_address(address, "port cannot be zero"));
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::validation("mqtt.client_id", "cannot be empty"));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(ConfigError::validation("mqtt.password", "requires mqtt.username"));
        }
        if !(1..=u16::MAX as u64).contains(&self.keep_alive_secs) {
            return Err(ConfigError::out_of_range(
                "mqtt.keep_alive_secs",
                self.keep_alive_secs,
                1,
                u16::MAX as u64,
            ));
        }
        if self.topic_prefix.is_empty() {
            return Err(ConfigError::validation("mqtt.topic_prefix", "cannot be empty"));
        }
        if self.topic_prefix.contains(['+', '#', '\0']) {
            return Err(ConfigError::validation(
                "mqtt.topic_prefix",
                "cannot contain wildcards or NUL",
            ));
        }
        self.delivery_guarantee()?;
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&self.max_packet_size) {
            return Err(ConfigError::out_of_range(
                "mqtt.max_packet_size",
                self.max_packet_size,
                MIN_PACKET_SIZE,
                MAX_PACKET_SIZE,
            ));
        }
        if self.publish_timeout_ms == 0 {
            return Err(ConfigError::validation("mqtt.publish_timeout_ms", "cannot be zero"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::validation("mqtt.connect_timeout_ms", "cannot be zero"));
        }
        self.reconnect
            .validate()
            .map_err(|message| ConfigError::validation("mqtt.reconnect", message))?;

        Ok(())
    }

    /// Returns the configured delivery guarantee.
    pub fn delivery_guarantee(&self) -> ConfigResult<DeliveryGuarantee> {
        DeliveryGuarantee::try_from(self.qos).map_err(|message| ConfigError::validation("mqtt.qos", message))
    }

    /// Returns the publish timeout.
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    /// Builds the client settings.
    pub fn settings(&self) -> MqttSettings {
        MqttSettings {
            host: self.host.clone(),
            port: self.port,
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            clean_session: self.clean_session,
            max_packet_size: self.max_packet_size,
            ..Default::default()
        }
    }

    /// Builds the supervisor configuration.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::default()
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_backoff(self.reconnect.clone())
    }
}

// =============================================================================
// Sampling / Publish Configuration
// =============================================================================

/// Change detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Default sampling interval.
    #[serde(default = "default_sampling_interval_ms")]
    pub interval_ms: u64,

    /// Publish each node's state at registration.
    #[serde(default)]
    pub emit_initial: bool,

    /// Capacity of the change channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_sampling_interval_ms() -> u64 {
    1_000
}

fn default_channel_capacity() -> usize {
    tether_core::bus::DEFAULT_CHANNEL_CAPACITY
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_sampling_interval_ms(),
            emit_initial: false,
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl SamplingConfig {
    /// Validates the sampling configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        validate_interval("sampling.interval_ms", self.interval_ms)?;
        if self.channel_capacity == 0 {
            return Err(ConfigError::validation("sampling.channel_capacity", "cannot be zero"));
        }
        Ok(())
    }

    /// Returns the default sampling interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn validate_interval(field: &str, interval_ms: u64) -> ConfigResult<()> {
    if !(MIN_SAMPLING_INTERVAL_MS..=MAX_SAMPLING_INTERVAL_MS).contains(&interval_ms) {
        return Err(ConfigError::out_of_range(
            field,
            interval_ms,
            MIN_SAMPLING_INTERVAL_MS,
            MAX_SAMPLING_INTERVAL_MS,
        ));
    }
    Ok(())
}

/// Publish retries and lanes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Retry policy for failed publications.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Queued events per node lane.
    #[serde(default = "default_lane_capacity")]
    pub lane_capacity: usize,
}

fn default_lane_capacity() -> usize {
    64
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            lane_capacity: default_lane_capacity(),
        }
    }
}

impl PublishConfig {
    /// Validates the publish configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.retry
            .validate()
            .map_err(|message| ConfigError::validation("publish.retry", message))?;
        if self.lane_capacity == 0 {
            return Err(ConfigError::validation("publish.lane_capacity", "cannot be zero"));
        }
        Ok(())
    }
}

// =============================================================================
// Node Configuration
// =============================================================================

/// A scalar as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    /// `true` / `false`.
    Bool(bool),
    /// Integer literal.
    Integer(i64),
    /// Floating-point literal.
    Float(f64),
    /// String literal.
    Text(String),
}

impl ScalarValue {
    /// Converts to a value of `data_type`, or `None` if it does not fit.
    pub fn to_value(&self, data_type: DataType) -> Option<Value> {
        match (self, data_type) {
            (Self::Bool(b), DataType::Boolean) => Some(Value::Boolean(*b)),
            (Self::Integer(i), DataType::Int32) => i32::try_from(*i).ok().map(Value::Int32),
            (Self::Integer(i), DataType::Int64) => Some(Value::Int64(*i)),
            (Self::Integer(i), DataType::UInt32) => u32::try_from(*i).ok().map(Value::UInt32),
            (Self::Integer(i), DataType::UInt64) => u64::try_from(*i).ok().map(Value::UInt64),
            (Self::Integer(i), DataType::Float) => Some(Value::Float(*i as f32)),
            (Self::Integer(i), DataType::Double) => Some(Value::Double(*i as f64)),
            (Self::Float(f), DataType::Float) => Some(Value::Float(*f as f32)),
            (Self::Float(f), DataType::Double) => Some(Value::Double(*f)),
            (Self::Text(s), DataType::String) => Some(Value::String(s.clone())),
            _ => None,
        }
    }
}

/// A node created at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Node identity, e.g. `ns=2;s=Temperature`.
    pub id: NodeId,

    /// Browse name. Defaults to the identifier text.
    #[serde(default)]
    pub browse_name: Option<String>,

    /// Declared type.
    #[serde(default = "default_data_type")]
    pub data_type: DataType,

    /// Initial value. Defaults to the type's zero value.
    #[serde(default)]
    pub initial_value: Option<ScalarValue>,

    /// Whether sessions may write the node.
    #[serde(default = "default_true")]
    pub writable: bool,

    /// Sampling interval override.
    #[serde(default)]
    pub sampling_interval_ms: Option<u64>,

    /// Absolute deadband for numeric values.
    #[serde(default)]
    pub deadband: Option<f64>,

    /// Topic override.
    #[serde(default)]
    pub topic: Option<String>,
}

fn default_data_type() -> DataType {
    DataType::Double
}

fn default_nodes() -> Vec<NodeConfig> {
    ["Temperature", "Pressure"]
        .into_iter()
        .map(|name| NodeConfig::new(NodeId::string(DEFAULT_NAMESPACE_INDEX, name), DataType::Double))
        .collect()
}

impl NodeConfig {
    /// Creates a writable node with default options.
    pub fn new(id: NodeId, data_type: DataType) -> Self {
        Self {
            id,
            browse_name: None,
            data_type,
            initial_value: None,
            writable: true,
            sampling_interval_ms: None,
            deadband: None,
            topic: None,
        }
    }

    /// Validates the node configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        let field = |name: &str| format!("nodes.{}.{}", self.id, name);

        if let Some(interval_ms) = self.sampling_interval_ms {
            validate_interval(&field("sampling_interval_ms"), interval_ms)?;
        }
        if let Some(deadband) = self.deadband {
            if !deadband.is_finite() || deadband < 0.0 {
                return Err(ConfigError::validation(
                    field("deadband"),
                    "must be a finite, non-negative number",
                ));
            }
            if !self.data_type.is_numeric() {
                return Err(ConfigError::validation(
                    field("deadband"),
                    format!("not applicable to {} nodes", self.data_type),
                ));
            }
        }
        if let Some(topic) = &self.topic {
            if topic.is_empty() || topic.contains(['+', '#', '\0']) {
                return Err(ConfigError::validation(
                    field("topic"),
                    "must be non-empty and cannot contain wildcards or NUL",
                ));
            }
        }
        self.initial()?;

        Ok(())
    }

    /// Returns the browse name.
    pub fn browse_name(&self) -> String {
        self.browse_name
            .clone()
            .unwrap_or_else(|| self.id.identifier_text())
    }

    /// Returns the initial value in the declared type.
    pub fn initial(&self) -> ConfigResult<Value> {
        match &self.initial_value {
            None => Ok(self.data_type.default_value()),
            Some(scalar) => scalar.to_value(self.data_type).ok_or_else(|| {
                ConfigError::validation(
                    format!("nodes.{}.initial_value", self.id),
                    format!("{:?} is not a valid {}", scalar, self.data_type),
                )
            }),
        }
    }

    /// Builds the address-space definition.
    pub fn definition(&self) -> ConfigResult<NodeDefinition> {
        let mut definition = NodeDefinition::new(self.id.clone(), self.browse_name(), self.data_type)
            .with_initial_value(self.initial()?);
        if !self.writable {
            definition = definition.read_only();
        }
        Ok(definition)
    }

    /// Builds the monitored item, falling back to `default_interval`.
    pub fn monitored_item(&self, default_interval: Duration) -> MonitoredItemSettings {
        let interval = self
            .sampling_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(default_interval);
        let item = MonitoredItemSettings::new(self.id.clone()).with_sampling_interval(interval);
        match self.deadband {
            Some(deadband) => item.with_deadband(deadband),
            None => item,
        }
    }
}

// =============================================================================
// Simulator Configuration
// =============================================================================

/// Built-in sensor simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Run the simulator.
    #[serde(default)]
    pub enabled: bool,

    /// Interval between readings.
    #[serde(default = "default_simulator_interval_ms")]
    pub interval_ms: u64,

    /// Simulated sensors.
    #[serde(default = "default_sensors")]
    pub sensors: Vec<SensorConfig>,
}

fn default_simulator_interval_ms() -> u64 {
    30_000
}

fn default_sensors() -> Vec<SensorConfig> {
    [
        SensorSpec::temperature(DEFAULT_NAMESPACE_INDEX),
        SensorSpec::pressure(DEFAULT_NAMESPACE_INDEX),
    ]
    .into_iter()
    .map(|spec| SensorConfig {
        node: spec.node_id,
        min: spec.min,
        max: spec.max,
        decimals: spec.decimals,
    })
    .collect()
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: default_simulator_interval_ms(),
            sensors: default_sensors(),
        }
    }
}

impl SimulatorConfig {
    /// Validates the simulator configuration against the configured nodes.
    pub fn validate(&self, node_ids: &HashSet<&NodeId>) -> ConfigResult<()> {
        if self.interval_ms == 0 {
            return Err(ConfigError::validation("simulator.interval_ms", "cannot be zero"));
        }
        for sensor in &self.sensors {
            sensor.validate()?;
            if self.enabled && !node_ids.contains(&sensor.node) {
                return Err(ConfigError::validation(
                    format!("simulator.sensors.{}", sensor.node),
                    "refers to a node that is not configured",
                ));
            }
        }
        Ok(())
    }

    /// Returns the interval between readings.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Builds the sensor specs.
    pub fn sensor_specs(&self) -> Vec<SensorSpec> {
        self.sensors
            .iter()
            .map(|s| SensorSpec::new(s.node.clone(), s.min, s.max).with_decimals(s.decimals))
            .collect()
    }
}

/// One simulated sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorConfig {
    /// Node the readings are written to.
    pub node: NodeId,
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
    /// Decimal places kept.
    #[serde(default = "default_decimals")]
    pub decimals: u32,
}

fn default_decimals() -> u32 {
    2
}

impl SensorConfig {
    fn validate(&self) -> ConfigResult<()> {
        let field = format!("simulator.sensors.{}", self.node);
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(ConfigError::validation(field, "min and max must be finite with min <= max"));
        }
        if self.decimals > 15 {
            return Err(ConfigError::out_of_range(format!("{}.decimals", field), self.decimals, 0, 15));
        }
        Ok(())
    }
}

// =============================================================================
// Shutdown / Health Configuration
// =============================================================================

/// Shutdown behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Time allowed for in-flight publications to drain.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

fn default_grace_period_ms() -> u64 {
    5_000
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

impl ShutdownConfig {
    /// Returns the grace period.
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Periodic health reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Interval between health summaries.
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
}

fn default_report_interval_ms() -> u64 {
    60_000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            report_interval_ms: default_report_interval_ms(),
        }
    }
}

impl HealthConfig {
    /// Validates the health configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.report_interval_ms < MIN_HEALTH_INTERVAL_MS {
            return Err(ConfigError::out_of_range(
                "health.report_interval_ms",
                self.report_interval_ms,
                MIN_HEALTH_INTERVAL_MS,
                u64::MAX,
            ));
        }
        Ok(())
    }

    /// Returns the report interval.
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

// =============================================================================
// Logging Configuration
// =============================================================================

/// Logging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the level as a filter directive.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Parses a level name, accepting `warning` for `warn`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// JSON lines for log aggregation.
    Json,
    /// Compact single-line text.
    Compact,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_reproduce_deployment() {
        let config = TetherConfig::default();
        config.validate().unwrap();

        assert_eq!(config.opcua.endpoint, "opc.tcp://0.0.0.0:4840");
        assert_eq!(config.opcua.server_name, "OPC UA Gateway Server");
        assert_eq!(config.opcua.namespace_uri, "SENSOR_DATA");
        assert_eq!(config.mqtt.settings().broker_address(), "mqtt-broker:1883");
        assert_eq!(config.mqtt.client_id, "opcua_mqtt_gateway");
        assert_eq!(config.mqtt.keep_alive_secs, 60);

        let ids: Vec<String> = config.nodes.iter().map(|n| n.id.to_string()).collect();
        assert_eq!(ids, vec!["ns=2;s=Temperature", "ns=2;s=Pressure"]);
        let definitions = config.node_definitions().unwrap();
        assert_eq!(definitions[0].initial_value, Some(Value::Double(0.0)));
        assert_eq!(definitions[0].browse_name, "Temperature");
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut config = TetherConfig::default();
        config.nodes.push(config.nodes[0].clone());
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateNodeId { .. })));
    }

    #[test]
    fn test_unparseable_endpoint_rejected() {
        let mut config = TetherConfig::default();
        config.opcua.endpoint = "http://localhost:4840".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidAddress { .. })));

        let mut config = TetherConfig::default();
        config.mqtt.host = "bad host".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidAddress { .. })));
    }

    #[test]
    fn test_qos_must_be_zero_or_one() {
        let mut config = TetherConfig::default();
        config.mqtt.qos = 2;
        assert!(matches!(config.validate(), Err(ConfigError::Validation { .. })));

        config.mqtt.qos = 0;
        assert_eq!(config.bridge_config().unwrap().qos, DeliveryGuarantee::AtMostOnce);
    }

    #[test]
    fn test_initial_value_conversion() {
        let mut node = NodeConfig::new(NodeId::string(2, "Count"), DataType::UInt32);
        node.initial_value = Some(ScalarValue::Integer(7));
        assert_eq!(node.initial().unwrap(), Value::UInt32(7));

        node.initial_value = Some(ScalarValue::Integer(-1));
        assert!(node.validate().is_err());

        node.initial_value = Some(ScalarValue::Text("x".to_string()));
        assert!(node.validate().is_err());
    }

    #[test]
    fn test_deadband_only_on_numeric_nodes() {
        let mut node = NodeConfig::new(NodeId::string(2, "Label"), DataType::String);
        node.deadband = Some(0.5);
        assert!(node.validate().is_err());

        let mut node = NodeConfig::new(NodeId::string(2, "Temperature"), DataType::Double);
        node.deadband = Some(0.5);
        node.validate().unwrap();
        let item = node.monitored_item(Duration::from_secs(1));
        assert_eq!(item.deadband, 0.5);
        assert_eq!(item.sampling_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_topic_overrides() {
        let mut config = TetherConfig::default();
        config.nodes[1].topic = Some("plant/pressure".to_string());
        let mapper = config.topic_mapper();

        assert_eq!(mapper.topic_for(&NodeId::string(2, "Temperature")), "sensors/Temperature");
        assert_eq!(mapper.topic_for(&NodeId::string(2, "Pressure")), "plant/pressure");
    }

    #[test]
    fn test_colliding_topics_rejected() {
        // Same identifier in another namespace.
        let mut config = TetherConfig::default();
        let mut other = config.nodes[0].clone();
        other.id = NodeId::string(3, "Temperature");
        config.nodes.push(other);
        match config.validate() {
            Err(ConfigError::Validation { field, message }) => {
                assert_eq!(field, "nodes.ns=3;s=Temperature.topic");
                assert!(message.contains("sensors/Temperature"));
            }
            other => panic!("expected a topic collision, got {other:?}"),
        }

        // An override settles it.
        config.nodes[2].topic = Some("sensors/ns3/Temperature".to_string());
        assert!(config.validate().is_ok());

        // Wildcards flatten to the same segment.
        let mut config = TetherConfig::default();
        for name in ["Line+1", "Line#1"] {
            let mut node = config.nodes[0].clone();
            node.id = NodeId::string(2, name);
            config.nodes.push(node);
        }
        assert!(matches!(config.validate(), Err(ConfigError::Validation { .. })));

        // An override equal to another node's derived topic.
        let mut config = TetherConfig::default();
        config.nodes[1].topic = Some("sensors/Temperature".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_max_packet_size_bounds() {
        let mut config = TetherConfig::default();
        assert_eq!(config.mqtt.settings().max_packet_size, 10 * 1024);

        config.mqtt.max_packet_size = 64;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { .. })));

        config.mqtt.max_packet_size = 256 * 1024;
        assert!(config.validate().is_ok());
        assert_eq!(config.mqtt.settings().max_packet_size, 256 * 1024);
    }

    #[test]
    fn test_simulator_requires_configured_nodes() {
        let mut config = TetherConfig::default();
        config.simulator.enabled = true;
        config.validate().unwrap();

        config.nodes.truncate(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_simulator_sensor_specs() {
        let specs = SimulatorConfig::default().sensor_specs();
        assert_eq!(specs[0], SensorSpec::temperature(2));
        assert_eq!(specs[1], SensorSpec::pressure(2));
    }

    #[test]
    fn test_redacted_masks_password() {
        let mut config = TetherConfig::default();
        config.mqtt.username = Some("gw".to_string());
        config.mqtt.password = Some("secret".to_string());

        let shown = config.redacted();
        assert_eq!(shown.mqtt.password.as_deref(), Some("********"));
        assert_eq!(config.mqtt.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("verbose"), None);
    }
}
