// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Change events flowing from the subscription engine to the bridge.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::types::{DataValue, NodeId, StatusCode, Value};

// =============================================================================
// ChangeEvent
// =============================================================================

/// An immutable record of a detected change on one node.
///
/// `sequence` increases by one for every event emitted for the same node,
/// starting at 1. Consumers use it to check per-node ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// The node that changed.
    pub node_id: NodeId,

    /// New value.
    pub value: Value,

    /// New status.
    pub status: StatusCode,

    /// Source timestamp of the write that produced the change.
    pub timestamp: DateTime<Utc>,

    /// Per-node sequence number.
    pub sequence: u64,
}

impl ChangeEvent {
    /// Creates a change event from a node snapshot.
    pub fn from_snapshot(node_id: NodeId, snapshot: DataValue, sequence: u64) -> Self {
        Self {
            node_id,
            value: snapshot.value,
            status: snapshot.status,
            timestamp: snapshot.timestamp,
            sequence,
        }
    }

    /// Returns the `{value, status, timestamp}` carried by this event.
    pub fn data_value(&self) -> DataValue {
        DataValue::new(self.value.clone(), self.status, self.timestamp)
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} = {} ({}) #{}",
            self.node_id, self.value, self.status, self.sequence
        )
    }
}
