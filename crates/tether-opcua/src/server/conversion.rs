// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Conversions between gateway types and `opcua` crate types.

use chrono::Utc;
use opcua::types::{
    DataTypeId, DataValue as UaDataValue, DateTime as UaDateTime, NodeId as UaNodeId,
    StatusCode as UaStatusCode, UAString, Variant,
};
use tether_core::error::NodeError;
use tether_core::types::{DataType, DataValue, NodeId, NodeIdentifier, StatusCode, Value};

/// Converts a node identity.
pub(crate) fn to_ua_node_id(node_id: &NodeId) -> UaNodeId {
    match &node_id.identifier {
        NodeIdentifier::Numeric(v) => UaNodeId::new(node_id.namespace_index, *v),
        NodeIdentifier::String(v) => UaNodeId::new(node_id.namespace_index, v.clone()),
    }
}

/// Returns the OPC UA data type id of a declared type.
pub(crate) fn to_ua_data_type(data_type: DataType) -> DataTypeId {
    match data_type {
        DataType::Boolean => DataTypeId::Boolean,
        DataType::Int32 => DataTypeId::Int32,
        DataType::Int64 => DataTypeId::Int64,
        DataType::UInt32 => DataTypeId::UInt32,
        DataType::UInt64 => DataTypeId::UInt64,
        DataType::Float => DataTypeId::Float,
        DataType::Double => DataTypeId::Double,
        DataType::String => DataTypeId::String,
    }
}

/// Returns the data type a variable advertises to writers.
///
/// Types that accept widened writes are declared as `Number` so the server
/// lets the narrower variant through to the write acceptor, which applies the
/// widening rules. Every other type is declared exactly.
pub(crate) fn to_ua_write_data_type(data_type: DataType) -> DataTypeId {
    match data_type {
        DataType::Double | DataType::Int64 | DataType::UInt64 => DataTypeId::Number,
        other => to_ua_data_type(other),
    }
}

/// Converts a value to a variant.
pub(crate) fn to_variant(value: &Value) -> Variant {
    match value {
        Value::Boolean(v) => Variant::Boolean(*v),
        Value::Int32(v) => Variant::Int32(*v),
        Value::Int64(v) => Variant::Int64(*v),
        Value::UInt32(v) => Variant::UInt32(*v),
        Value::UInt64(v) => Variant::UInt64(*v),
        Value::Float(v) => Variant::Float(*v),
        Value::Double(v) => Variant::Double(*v),
        Value::String(v) => Variant::String(UAString::from(v.as_str())),
    }
}

/// Converts a variant to a value, or `None` for unsupported variants.
pub(crate) fn from_variant(variant: &Variant) -> Option<Value> {
    match variant {
        Variant::Boolean(v) => Some(Value::Boolean(*v)),
        Variant::Int32(v) => Some(Value::Int32(*v)),
        Variant::Int64(v) => Some(Value::Int64(*v)),
        Variant::UInt32(v) => Some(Value::UInt32(*v)),
        Variant::UInt64(v) => Some(Value::UInt64(*v)),
        Variant::Float(v) => Some(Value::Float(*v)),
        Variant::Double(v) => Some(Value::Double(*v)),
        Variant::String(v) => Some(Value::String(v.as_ref().to_string())),
        _ => None,
    }
}

/// Maps a quality onto the generic status code of the same severity.
pub(crate) fn to_ua_status(status: StatusCode) -> UaStatusCode {
    match status {
        StatusCode::Good => UaStatusCode::Good,
        StatusCode::Uncertain => UaStatusCode::IS_UNCERTAIN,
        StatusCode::Bad => UaStatusCode::IS_ERROR,
    }
}

pub(crate) fn from_ua_status(status: Option<UaStatusCode>) -> StatusCode {
    match status {
        None => StatusCode::Good,
        Some(code) if code.is_bad() => StatusCode::Bad,
        Some(code) if code.is_uncertain() => StatusCode::Uncertain,
        Some(_) => StatusCode::Good,
    }
}

/// Builds the data value served to clients.
pub(crate) fn to_ua_data_value(snapshot: &DataValue) -> UaDataValue {
    UaDataValue {
        value: Some(to_variant(&snapshot.value)),
        status: Some(to_ua_status(snapshot.status)),
        source_timestamp: Some(UaDateTime::from(snapshot.timestamp)),
        source_picoseconds: None,
        server_timestamp: Some(UaDateTime::from(Utc::now())),
        server_picoseconds: None,
    }
}

/// Maps a write-path error onto the status returned to the client.
pub(crate) fn node_error_status(error: &NodeError) -> UaStatusCode {
    match error {
        NodeError::NotFound { .. } | NodeError::Stale { .. } => UaStatusCode::BadNodeIdUnknown,
        NodeError::TypeMismatch { .. } => UaStatusCode::BadTypeMismatch,
        NodeError::NotWritable { .. } => UaStatusCode::BadNotWritable,
        NodeError::EndpointUnavailable => UaStatusCode::BadServerNotConnected,
        NodeError::DuplicateIdentity { .. }
        | NodeError::InvalidNodeId { .. }
        | NodeError::UnknownDataType { .. } => UaStatusCode::BadInternalError,
    }
}
