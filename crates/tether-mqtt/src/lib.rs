// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! MQTT side of the tether gateway.
//!
//! # Features
//!
//! - Topic mapping and a self-describing JSON payload codec
//! - rumqttc-backed broker link with QoS 1 acknowledgement tracking
//! - Supervised publisher that fails fast while the broker is unreachable
//! - Protocol bridge with per-node lanes, bounded retries and drop accounting
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use tether_core::message::ChangeEvent;
//! use tether_core::types::{NodeId, StatusCode, Value};
//! use tether_mqtt::codec::{decode_payload, encode_payload};
//!
//! let event = ChangeEvent {
//!     node_id: NodeId::string(2, "Temperature1"),
//!     value: Value::Double(21.5),
//!     status: StatusCode::Good,
//!     timestamp: Utc::now(),
//!     sequence: 1,
//! };
//!
//! let bytes = encode_payload(&event).unwrap();
//! let decoded = decode_payload(&bytes).unwrap();
//! assert_eq!(decoded.value, Value::Double(21.5));
//! assert_eq!(decoded.timestamp, event.timestamp);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod bridge;
pub mod client;
pub mod codec;
pub mod publisher;

pub use bridge::{BridgeConfig, BridgeStats, ProtocolBridge};
pub use client::{MqttEndpoint, MqttLink, MqttSettings};
pub use codec::{
    decode_payload, encode_payload, CodecError, CodecResult, DecodedPayload, DeliveryGuarantee,
    PublicationRecord, TopicMapper,
};
pub use publisher::{Publisher, SupervisedPublisher, DEFAULT_PUBLISH_TIMEOUT};
