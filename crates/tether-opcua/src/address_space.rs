// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The gateway's address space.
//!
//! The address space owns every [`Node`]. Node identities are unique and
//! immutable. Each node guards its `{value, status, timestamp}` with its own
//! lock, so writes to one node are serialised while independent nodes can be
//! written concurrently, and a read always returns a consistent snapshot.
//!
//! Writes never emit events. Change detection happens by sampling, see
//! [`crate::subscription`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tether_core::error::{NodeError, NodeResult};
use tether_core::types::{DataType, DataValue, NodeId, StatusCode, Value};
use tracing::debug;

// =============================================================================
// NodeDefinition
// =============================================================================

/// Everything needed to create a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDefinition {
    /// Node identity.
    pub node_id: NodeId,
    /// Browse name.
    pub browse_name: String,
    /// Declared type.
    pub data_type: DataType,
    /// Initial value. Defaults to the type's zero value.
    pub initial_value: Option<Value>,
    /// Whether sessions may write the node.
    pub writable: bool,
}

impl NodeDefinition {
    /// Creates a writable node definition with the type's zero value.
    pub fn new(node_id: NodeId, browse_name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            node_id,
            browse_name: browse_name.into(),
            data_type,
            initial_value: None,
            writable: true,
        }
    }

    /// Sets the initial value.
    pub fn with_initial_value(mut self, value: Value) -> Self {
        self.initial_value = Some(value);
        self
    }

    /// Marks the node read-only.
    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }
}

// =============================================================================
// Node
// =============================================================================

/// A variable node.
pub struct Node {
    node_id: NodeId,
    browse_name: String,
    data_type: DataType,
    writable: bool,
    current: Mutex<DataValue>,
}

impl Node {
    fn new(definition: NodeDefinition) -> NodeResult<Self> {
        let declared = definition.data_type;
        let value = match definition.initial_value {
            Some(value) => {
                let actual = value.data_type();
                value
                    .coerce_to(declared)
                    .ok_or_else(|| NodeError::type_mismatch(&definition.node_id, declared, actual))?
            }
            None => declared.default_value(),
        };

        Ok(Self {
            node_id: definition.node_id,
            browse_name: definition.browse_name,
            data_type: declared,
            writable: definition.writable,
            current: Mutex::new(DataValue::new(value, StatusCode::Good, Utc::now())),
        })
    }

    /// Returns the node identity.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Returns the browse name.
    pub fn browse_name(&self) -> &str {
        &self.browse_name
    }

    /// Returns the declared type.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Returns `true` if sessions may write this node.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Returns a consistent snapshot of the node.
    pub fn read(&self) -> DataValue {
        self.current.lock().clone()
    }

    /// Replaces value, status and timestamp atomically.
    ///
    /// The value must match the declared type or widen to it losslessly.
    pub fn write(
        &self,
        value: Value,
        status: StatusCode,
        timestamp: DateTime<Utc>,
    ) -> NodeResult<()> {
        if !self.writable {
            return Err(NodeError::not_writable(&self.node_id));
        }

        let actual = value.data_type();
        let value = value
            .coerce_to(self.data_type)
            .ok_or_else(|| NodeError::type_mismatch(&self.node_id, self.data_type, actual))?;

        *self.current.lock() = DataValue::new(value, status, timestamp);
        Ok(())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("node_id", &self.node_id)
            .field("browse_name", &self.browse_name)
            .field("data_type", &self.data_type)
            .field("writable", &self.writable)
            .finish()
    }
}

// =============================================================================
// AddressSpace
// =============================================================================

#[derive(Default)]
struct Inner {
    order: Vec<NodeId>,
    nodes: HashMap<NodeId, Arc<Node>>,
}

/// Insertion-ordered set of nodes keyed by identity.
#[derive(Default)]
pub struct AddressSpace {
    inner: RwLock<Inner>,
}

impl AddressSpace {
    /// Creates an empty address space.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a writable node.
    pub fn create_node(
        &self,
        node_id: NodeId,
        browse_name: impl Into<String>,
        data_type: DataType,
        initial_value: Value,
    ) -> NodeResult<Arc<Node>> {
        self.add_node(
            NodeDefinition::new(node_id, browse_name, data_type).with_initial_value(initial_value),
        )
    }

    /// Creates a node from a full definition.
    pub fn add_node(&self, definition: NodeDefinition) -> NodeResult<Arc<Node>> {
        let node = Arc::new(Node::new(definition)?);

        let mut inner = self.inner.write();
        if inner.nodes.contains_key(&node.node_id) {
            return Err(NodeError::duplicate(&node.node_id));
        }
        inner.order.push(node.node_id.clone());
        inner.nodes.insert(node.node_id.clone(), node.clone());

        debug!(node = %node.node_id, data_type = %node.data_type, "Node created");
        Ok(node)
    }

    /// Removes a node.
    pub fn remove_node(&self, node_id: &NodeId) -> Option<Arc<Node>> {
        let mut inner = self.inner.write();
        let node = inner.nodes.remove(node_id)?;
        inner.order.retain(|id| id != node_id);
        debug!(node = %node_id, "Node removed");
        Some(node)
    }

    /// Returns a node by identity.
    pub fn get(&self, node_id: &NodeId) -> Option<Arc<Node>> {
        self.inner.read().nodes.get(node_id).cloned()
    }

    /// Returns `true` if the node exists.
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.inner.read().nodes.contains_key(node_id)
    }

    /// Writes a value with `Good` status.
    pub fn write_value(
        &self,
        node_id: &NodeId,
        value: Value,
        timestamp: DateTime<Utc>,
    ) -> NodeResult<()> {
        self.write_data_value(node_id, value, StatusCode::Good, timestamp)
    }

    /// Writes value, status and timestamp.
    pub fn write_data_value(
        &self,
        node_id: &NodeId,
        value: Value,
        status: StatusCode,
        timestamp: DateTime<Utc>,
    ) -> NodeResult<()> {
        let node = self.get(node_id).ok_or_else(|| NodeError::not_found(node_id))?;
        node.write(value, status, timestamp)
    }

    /// Reads a consistent snapshot of a node.
    pub fn read_value(&self, node_id: &NodeId) -> NodeResult<DataValue> {
        self.get(node_id)
            .map(|node| node.read())
            .ok_or_else(|| NodeError::not_found(node_id))
    }

    /// Returns all nodes in insertion order.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.nodes.get(id).cloned())
            .collect()
    }

    /// Returns the number of nodes.
    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    /// Returns `true` if there are no nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("nodes", &self.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
