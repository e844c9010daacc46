// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session-facing write entry point.
//!
//! Every write that reaches the address space from outside the gateway goes
//! through a [`WriteAcceptor`]. The acceptor fails fast with
//! [`NodeError::EndpointUnavailable`] while the OPC UA endpoint is not
//! connected.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tether_core::error::{NodeError, NodeResult};
use tether_core::supervisor::ConnectionState;
use tether_core::types::{DataValue, NodeId, StatusCode, Value};
use tokio::sync::watch;
use tracing::debug;

use crate::address_space::AddressSpace;

/// Write counters.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    /// Writes applied to the address space.
    pub accepted: u64,
    /// Writes refused by the address space.
    pub rejected: u64,
    /// Writes refused because the endpoint was not connected.
    pub unavailable: u64,
}

#[derive(Debug, Default)]
struct AtomicWriteStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    unavailable: AtomicU64,
}

/// Gates writes on the OPC UA endpoint state.
#[derive(Debug)]
pub struct WriteAcceptor {
    space: Arc<AddressSpace>,
    endpoint_state: watch::Receiver<ConnectionState>,
    stats: AtomicWriteStats,
}

impl WriteAcceptor {
    /// Creates an acceptor following the given endpoint state.
    pub fn new(space: Arc<AddressSpace>, endpoint_state: watch::Receiver<ConnectionState>) -> Self {
        Self {
            space,
            endpoint_state,
            stats: AtomicWriteStats::default(),
        }
    }

    /// Creates an acceptor that is always open.
    pub fn ungated(space: Arc<AddressSpace>) -> Self {
        let (_tx, rx) = watch::channel(ConnectionState::Connected);
        Self::new(space, rx)
    }

    /// Returns the address space.
    pub fn address_space(&self) -> &Arc<AddressSpace> {
        &self.space
    }

    /// Returns `true` if writes are currently accepted.
    pub fn is_open(&self) -> bool {
        self.endpoint_state.borrow().is_connected()
    }

    /// Writes a value with `Good` status.
    pub fn write(&self, node_id: &NodeId, value: Value, timestamp: DateTime<Utc>) -> NodeResult<()> {
        self.write_with_status(node_id, value, StatusCode::Good, timestamp)
    }

    /// Writes a value with an explicit status.
    pub fn write_with_status(
        &self,
        node_id: &NodeId,
        value: Value,
        status: StatusCode,
        timestamp: DateTime<Utc>,
    ) -> NodeResult<()> {
        if !self.is_open() {
            self.stats.unavailable.fetch_add(1, Ordering::Relaxed);
            return Err(NodeError::EndpointUnavailable);
        }

        match self.space.write_data_value(node_id, value, status, timestamp) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(error) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(node = %node_id, error = %error, "Write rejected");
                Err(error)
            }
        }
    }

    /// Reads a node snapshot.
    pub fn read(&self, node_id: &NodeId) -> NodeResult<DataValue> {
        self.space.read_value(node_id)
    }

    /// Returns current statistics.
    pub fn stats(&self) -> WriteStats {
        WriteStats {
            accepted: self.stats.accepted.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            unavailable: self.stats.unavailable.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::types::DataType;

    fn setup() -> (Arc<AddressSpace>, NodeId) {
        let space = Arc::new(AddressSpace::new());
        let node = NodeId::string(2, "Pressure");
        space
            .create_node(node.clone(), "Pressure", DataType::Double, Value::Double(0.0))
            .unwrap();
        (space, node)
    }

    #[test]
    fn test_write_fails_fast_when_not_connected() {
        let (space, node) = setup();
        let (tx, rx) = watch::channel(ConnectionState::Connecting);
        let acceptor = WriteAcceptor::new(space.clone(), rx);

        let err = acceptor.write(&node, Value::Double(1000.0), Utc::now()).unwrap_err();
        assert_eq!(err, NodeError::EndpointUnavailable);
        assert_eq!(space.read_value(&node).unwrap().value, Value::Double(0.0));

        tx.send(ConnectionState::Connected).unwrap();
        acceptor.write(&node, Value::Double(1000.0), Utc::now()).unwrap();
        assert_eq!(space.read_value(&node).unwrap().value, Value::Double(1000.0));

        tx.send(ConnectionState::Failing).unwrap();
        assert!(!acceptor.is_open());

        let stats = acceptor.stats();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.unavailable, 1);
    }

    #[test]
    fn test_rejected_writes_counted() {
        let (space, node) = setup();
        let acceptor = WriteAcceptor::ungated(space);

        assert!(acceptor.write(&node, Value::Boolean(true), Utc::now()).is_err());
        assert!(acceptor
            .write(&NodeId::string(2, "Missing"), Value::Double(1.0), Utc::now())
            .is_err());
        assert_eq!(acceptor.stats().rejected, 2);
    }
}
