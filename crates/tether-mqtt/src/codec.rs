// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Topic and payload encoding.
//!
//! # Payload format
//!
//! ```json
//! {"node":"ns=2;s=Temperature1","type":"Double","value":21.5,"status":"Good","ts":"2025-01-01T00:00:00.000000000Z","seq":1}
//! ```
//!
//! Non-finite floats are written as the strings `"NaN"`, `"Infinity"` and
//! `"-Infinity"`. Decoding uses `type` to rebuild the exact value, so value,
//! status and timestamp survive a round trip bit for bit.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tether_core::message::ChangeEvent;
use tether_core::types::{DataType, NodeId, StatusCode, Value};
use thiserror::Error;

// =============================================================================
// Errors
// =============================================================================

/// Payload decoding errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload is not valid JSON for the expected shape.
    #[error("Invalid payload JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The node field is not a valid node id.
    #[error("Invalid node id: {0}")]
    Node(String),

    /// The value does not fit the declared type.
    #[error("Invalid {data_type} value: {reason}")]
    Value {
        /// Declared type.
        data_type: DataType,
        /// Why it was rejected.
        reason: String,
    },

    /// The timestamp is not RFC 3339.
    #[error("Invalid timestamp '{0}'")]
    Timestamp(String),
}

impl CodecError {
    fn value(data_type: DataType, reason: impl Into<String>) -> Self {
        Self::Value {
            data_type,
            reason: reason.into(),
        }
    }
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

// =============================================================================
// Delivery guarantee
// =============================================================================

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryGuarantee {
    /// QoS 0.
    AtMostOnce,
    /// QoS 1.
    #[default]
    AtLeastOnce,
}

impl DeliveryGuarantee {
    /// Returns the MQTT QoS level.
    pub fn qos_level(&self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
        }
    }
}

impl TryFrom<u8> for DeliveryGuarantee {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            other => Err(format!("unsupported QoS level {}, expected 0 or 1", other)),
        }
    }
}

impl From<DeliveryGuarantee> for rumqttc::QoS {
    fn from(guarantee: DeliveryGuarantee) -> Self {
        match guarantee {
            DeliveryGuarantee::AtMostOnce => rumqttc::QoS::AtMostOnce,
            DeliveryGuarantee::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        }
    }
}

// =============================================================================
// Topics
// =============================================================================

/// Maps node identities to MQTT topics.
///
/// # Examples
///
/// ```
/// use tether_core::types::NodeId;
/// use tether_mqtt::codec::TopicMapper;
///
/// let mapper = TopicMapper::new("sensors");
/// assert_eq!(mapper.topic_for(&NodeId::string(2, "Temperature1")), "sensors/Temperature1");
/// assert_eq!(mapper.topic_for(&NodeId::string(2, "a+b#c")), "sensors/a_b_c");
/// ```
#[derive(Debug, Clone, Default)]
pub struct TopicMapper {
    prefix: String,
    overrides: HashMap<NodeId, String>,
}

impl TopicMapper {
    /// Creates a mapper publishing under `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            overrides: HashMap::new(),
        }
    }

    /// Uses `topic` for `node_id` instead of the derived topic.
    pub fn with_override(mut self, node_id: NodeId, topic: impl Into<String>) -> Self {
        self.overrides.insert(node_id, topic.into());
        self
    }

    /// Returns the topic prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the topic for a node.
    pub fn topic_for(&self, node_id: &NodeId) -> String {
        if let Some(topic) = self.overrides.get(node_id) {
            return topic.clone();
        }

        let segment = sanitize_segment(&node_id.identifier_text());
        if self.prefix.is_empty() {
            segment
        } else {
            format!("{}/{}", self.prefix, segment)
        }
    }
}

/// Replaces MQTT wildcard and NUL characters with `_`.
pub fn sanitize_segment(identifier: &str) -> String {
    identifier
        .chars()
        .map(|c| match c {
            '+' | '#' | '\0' => '_',
            other => other,
        })
        .collect()
}

// =============================================================================
// Payload
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct WirePayload {
    node: String,
    #[serde(rename = "type")]
    data_type: DataType,
    value: JsonValue,
    status: StatusCode,
    ts: String,
    seq: u64,
}

/// A decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    /// Node identity.
    pub node_id: NodeId,
    /// Value, typed by the payload's `type`.
    pub value: Value,
    /// Status.
    pub status: StatusCode,
    /// Source timestamp.
    pub timestamp: DateTime<Utc>,
    /// Per-node sequence number.
    pub sequence: u64,
}

/// Encodes a change event as a JSON payload.
pub fn encode_payload(event: &ChangeEvent) -> CodecResult<Vec<u8>> {
    let wire = WirePayload {
        node: event.node_id.to_opc_string(),
        data_type: event.value.data_type(),
        value: value_to_json(&event.value),
        status: event.status,
        ts: event.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
        seq: event.sequence,
    };
    Ok(serde_json::to_vec(&wire)?)
}

/// Decodes a JSON payload.
pub fn decode_payload(bytes: &[u8]) -> CodecResult<DecodedPayload> {
    let wire: WirePayload = serde_json::from_slice(bytes)?;

    let node_id = wire
        .node
        .parse::<NodeId>()
        .map_err(|e| CodecError::Node(e.to_string()))?;
    let value = value_from_json(wire.data_type, &wire.value)?;
    let timestamp = DateTime::parse_from_rfc3339(&wire.ts)
        .map_err(|_| CodecError::Timestamp(wire.ts.clone()))?
        .with_timezone(&Utc);

    Ok(DecodedPayload {
        node_id,
        value,
        status: wire.status,
        timestamp,
        sequence: wire.seq,
    })
}

fn float_to_json(v: f64) -> JsonValue {
    match serde_json::Number::from_f64(v) {
        Some(number) => JsonValue::Number(number),
        None if v.is_nan() => JsonValue::String("NaN".to_string()),
        None if v > 0.0 => JsonValue::String("Infinity".to_string()),
        None => JsonValue::String("-Infinity".to_string()),
    }
}

fn float_from_json(data_type: DataType, json: &JsonValue) -> CodecResult<f64> {
    match json {
        JsonValue::Number(n) => n
            .as_f64()
            .ok_or_else(|| CodecError::value(data_type, "number out of range")),
        JsonValue::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => Err(CodecError::value(data_type, format!("unexpected string '{}'", other))),
        },
        _ => Err(CodecError::value(data_type, "expected a number")),
    }
}

fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Boolean(v) => JsonValue::Bool(*v),
        Value::Int32(v) => JsonValue::from(*v),
        Value::Int64(v) => JsonValue::from(*v),
        Value::UInt32(v) => JsonValue::from(*v),
        Value::UInt64(v) => JsonValue::from(*v),
        Value::Float(v) => float_to_json(*v as f64),
        Value::Double(v) => float_to_json(*v),
        Value::String(v) => JsonValue::String(v.clone()),
    }
}

fn value_from_json(data_type: DataType, json: &JsonValue) -> CodecResult<Value> {
    let out_of_range = || CodecError::value(data_type, format!("{} is out of range", json));

    match data_type {
        DataType::Boolean => json
            .as_bool()
            .map(Value::Boolean)
            .ok_or_else(|| CodecError::value(data_type, "expected a boolean")),
        DataType::Int32 => json
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(Value::Int32)
            .ok_or_else(out_of_range),
        DataType::Int64 => json.as_i64().map(Value::Int64).ok_or_else(out_of_range),
        DataType::UInt32 => json
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(Value::UInt32)
            .ok_or_else(out_of_range),
        DataType::UInt64 => json.as_u64().map(Value::UInt64).ok_or_else(out_of_range),
        DataType::Float => float_from_json(data_type, json).map(|v| Value::Float(v as f32)),
        DataType::Double => float_from_json(data_type, json).map(Value::Double),
        DataType::String => json
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(|| CodecError::value(data_type, "expected a string")),
    }
}

// =============================================================================
// PublicationRecord
// =============================================================================

/// One MQTT publication and its delivery state.
#[derive(Debug, Clone)]
pub struct PublicationRecord {
    /// Destination topic.
    pub topic: String,
    /// Encoded payload.
    pub payload: Vec<u8>,
    /// Delivery guarantee.
    pub qos: DeliveryGuarantee,
    /// Retain flag.
    pub retain: bool,
    /// Retries performed so far.
    pub retry_count: u32,
    /// The event this record was built from.
    pub event: ChangeEvent,
}

impl PublicationRecord {
    /// Builds a record for an event.
    pub fn from_event(
        event: ChangeEvent,
        topics: &TopicMapper,
        qos: DeliveryGuarantee,
        retain: bool,
    ) -> CodecResult<Self> {
        Ok(Self {
            topic: topics.topic_for(&event.node_id),
            payload: encode_payload(&event)?,
            qos,
            retain,
            retry_count: 0,
            event,
        })
    }
}

impl fmt::Display for PublicationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes, qos {})", self.topic, self.payload.len(), self.qos.qos_level())
    }
}

// =============================================================================
// Tests
// =============================================================================
