// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core data types for tether.
//!
//! These types model the slice of the OPC UA information model the gateway
//! exposes: node identities, declared data types, typed values, status codes
//! and the `{value, status, timestamp}` snapshot read from a node.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::NodeError;

// =============================================================================
// NodeId
// =============================================================================

/// The identifier part of a [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeIdentifier {
    /// Numeric identifier (`i=`).
    Numeric(u32),
    /// String identifier (`s=`).
    String(String),
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
        }
    }
}

/// Identity of a node in the address space.
///
/// A node identity is a namespace index plus an identifier and is immutable
/// once created.
///
/// # Examples
///
/// ```
/// use tether_core::types::NodeId;
///
/// let node = NodeId::string(2, "Temperature");
/// assert_eq!(node.to_string(), "ns=2;s=Temperature");
///
/// let parsed: NodeId = "ns=2;s=Temperature".parse().unwrap();
/// assert_eq!(parsed, node);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId {
    /// Namespace index (0 = OPC UA standard namespace).
    pub namespace_index: u16,

    /// The node identifier.
    pub identifier: NodeIdentifier,
}

impl NodeId {
    /// Creates a numeric node ID.
    #[inline]
    pub fn numeric(namespace_index: u16, value: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// Creates a string node ID.
    #[inline]
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::String(value.into()),
        }
    }

    /// Returns the identifier rendered without its type prefix.
    ///
    /// This is the part used to derive MQTT topics.
    pub fn identifier_text(&self) -> String {
        self.identifier.to_string()
    }

    /// Converts to the OPC UA string format.
    ///
    /// Format: `ns=<namespace>;{i|s}=<identifier>`, with the namespace part
    /// omitted for namespace 0.
    pub fn to_opc_string(&self) -> String {
        let id_str = match &self.identifier {
            NodeIdentifier::Numeric(v) => format!("i={}", v),
            NodeIdentifier::String(v) => format!("s={}", v),
        };

        if self.namespace_index == 0 {
            id_str
        } else {
            format!("ns={};{}", self.namespace_index, id_str)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_opc_string())
    }
}

impl FromStr for NodeId {
    type Err = NodeError;

    /// Parses a NodeId from OPC UA string format.
    ///
    /// Supported formats: `ns=2;i=1001`, `ns=2;s=MyNode`, `i=1001`, `s=MyNode`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        let (namespace_index, identifier_part) = match s.strip_prefix("ns=") {
            Some(rest) => {
                let (ns_str, id) = rest
                    .split_once(';')
                    .ok_or_else(|| NodeError::invalid_node_id(s, "missing identifier after namespace"))?;
                let ns: u16 = ns_str
                    .parse()
                    .map_err(|_| NodeError::invalid_node_id(s, "invalid namespace index"))?;
                (ns, id)
            }
            None => (0, s),
        };

        let identifier = if let Some(id) = identifier_part.strip_prefix("i=") {
            let value: u32 = id
                .parse()
                .map_err(|_| NodeError::invalid_node_id(s, "invalid numeric identifier"))?;
            NodeIdentifier::Numeric(value)
        } else if let Some(id) = identifier_part.strip_prefix("s=") {
            if id.is_empty() {
                return Err(NodeError::invalid_node_id(s, "empty string identifier"));
            }
            NodeIdentifier::String(id.to_string())
        } else {
            return Err(NodeError::invalid_node_id(
                s,
                "unknown identifier type, expected i= or s=",
            ));
        };

        Ok(Self {
            namespace_index,
            identifier,
        })
    }
}

impl TryFrom<String> for NodeId {
    type Error = NodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeId> for String {
    fn from(node: NodeId) -> Self {
        node.to_opc_string()
    }
}

// =============================================================================
// DataType
// =============================================================================

/// Declared data type of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Boolean.
    Boolean,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit unsigned integer.
    UInt32,
    /// 64-bit unsigned integer.
    UInt64,
    /// 32-bit IEEE float.
    Float,
    /// 64-bit IEEE float.
    Double,
    /// UTF-8 string.
    String,
}

impl DataType {
    /// Returns `true` for numeric types.
    #[inline]
    pub const fn is_numeric(&self) -> bool {
        !matches!(self, Self::Boolean | Self::String)
    }

    /// Returns the default (zero) value for this type.
    pub fn default_value(&self) -> Value {
        match self {
            Self::Boolean => Value::Boolean(false),
            Self::Int32 => Value::Int32(0),
            Self::Int64 => Value::Int64(0),
            Self::UInt32 => Value::UInt32(0),
            Self::UInt64 => Value::UInt64(0),
            Self::Float => Value::Float(0.0),
            Self::Double => Value::Double(0.0),
            Self::String => Value::String(String::new()),
        }
    }

    /// Returns the type name used in payloads and logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Boolean => "Boolean",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::UInt32 => "UInt32",
            Self::UInt64 => "UInt64",
            Self::Float => "Float",
            Self::Double => "Double",
            Self::String => "String",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "boolean" | "bool" => Ok(Self::Boolean),
            "int32" | "i32" => Ok(Self::Int32),
            "int64" | "i64" => Ok(Self::Int64),
            "uint32" | "u32" => Ok(Self::UInt32),
            "uint64" | "u64" => Ok(Self::UInt64),
            "float" | "f32" => Ok(Self::Float),
            "double" | "f64" => Ok(Self::Double),
            "string" => Ok(Self::String),
            other => Err(NodeError::UnknownDataType {
                name: other.to_string(),
            }),
        }
    }
}

// =============================================================================
// Value
// =============================================================================

/// A typed node value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean value.
    Boolean(bool),
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 32-bit unsigned integer.
    UInt32(u32),
    /// 64-bit unsigned integer.
    UInt64(u64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// String value.
    String(String),
}

impl Value {
    /// Returns the data type of this value.
    pub const fn data_type(&self) -> DataType {
        match self {
            Self::Boolean(_) => DataType::Boolean,
            Self::Int32(_) => DataType::Int32,
            Self::Int64(_) => DataType::Int64,
            Self::UInt32(_) => DataType::UInt32,
            Self::UInt64(_) => DataType::UInt64,
            Self::Float(_) => DataType::Float,
            Self::Double(_) => DataType::Double,
            Self::String(_) => DataType::String,
        }
    }

    /// Attempts to get the value as an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int32(v) => Some(*v as f64),
            Self::Int64(v) => Some(*v as f64),
            Self::UInt32(v) => Some(*v as f64),
            Self::UInt64(v) => Some(*v as f64),
            Self::Float(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            Self::Boolean(_) | Self::String(_) => None,
        }
    }

    /// Converts this value to `target` if the conversion is lossless.
    ///
    /// Identity conversions always succeed. The only widenings accepted are
    /// Float→Double, Int32→Int64, UInt32→UInt64 and UInt32→Int64.
    pub fn coerce_to(self, target: DataType) -> Option<Value> {
        if self.data_type() == target {
            return Some(self);
        }

        match (self, target) {
            (Self::Float(v), DataType::Double) => Some(Self::Double(v as f64)),
            (Self::Int32(v), DataType::Int64) => Some(Self::Int64(v as i64)),
            (Self::UInt32(v), DataType::UInt64) => Some(Self::UInt64(v as u64)),
            (Self::UInt32(v), DataType::Int64) => Some(Self::Int64(v as i64)),
            _ => None,
        }
    }

    /// Equality used for change detection.
    ///
    /// Floats compare by bit pattern, so a NaN that stays NaN is not a change.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }

    /// Returns `true` if `other` differs from `self` by more than `deadband`.
    ///
    /// Non-numeric values and values of different types fall back to
    /// [`Value::same_as`].
    pub fn exceeds_deadband(&self, other: &Value, deadband: f64) -> bool {
        if deadband <= 0.0 || self.data_type() != other.data_type() {
            return !self.same_as(other);
        }

        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) if a.is_finite() && b.is_finite() => (a - b).abs() > deadband,
            _ => !self.same_as(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::UInt32(v) => write!(f, "{}", v),
            Self::UInt64(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::UInt32(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

// =============================================================================
// StatusCode
// =============================================================================

/// Quality of a node value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StatusCode {
    /// The value is good and reliable.
    #[default]
    Good,
    /// The value is uncertain but may be usable.
    Uncertain,
    /// The value is bad and should not be used.
    Bad,
}

impl StatusCode {
    /// Returns `true` if the status is good.
    #[inline]
    pub const fn is_good(&self) -> bool {
        matches!(self, Self::Good)
    }

    /// Returns `true` if the status is bad.
    #[inline]
    pub const fn is_bad(&self) -> bool {
        matches!(self, Self::Bad)
    }

    /// Returns the status name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Good => "Good",
            Self::Uncertain => "Uncertain",
            Self::Bad => "Bad",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// DataValue
// =============================================================================

/// A consistent `{value, status, timestamp}` snapshot of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct DataValue {
    /// The value.
    pub value: Value,

    /// The status code.
    pub status: StatusCode,

    /// Source timestamp of the last write.
    pub timestamp: DateTime<Utc>,
}

impl DataValue {
    /// Creates a new snapshot.
    pub fn new(value: Value, status: StatusCode, timestamp: DateTime<Utc>) -> Self {
        Self {
            value,
            status,
            timestamp,
        }
    }

    /// Creates a good-quality snapshot stamped now.
    pub fn good_now(value: Value) -> Self {
        Self::new(value, StatusCode::Good, Utc::now())
    }
}

// =============================================================================
// Tests
// =============================================================================
