// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Change detection by sampling.
//!
//! A single [`SubscriptionEngine`] sweeps all monitored items. On every tick
//! it samples the items that are due, compares each node's `{value, status}`
//! with the last reported snapshot and emits a [`ChangeEvent`] on difference.
//!
//! # Rules
//!
//! - Floats compare by bit pattern. A status change always counts. A deadband
//!   applies to numeric values only while the status is unchanged.
//! - Events are sent with `try_send`. The snapshot only advances once the
//!   event was accepted, so a full channel defers detection to the next tick
//!   instead of losing it.
//! - An item whose node disappears turns `Stale` (one warning, no events) and
//!   returns to `Active` when the node comes back, comparing against the
//!   snapshot it had.
//! - An item's baseline is the node state at registration, unless
//!   `emit_initial` is set.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tether_core::bus::ChangeSender;
use tether_core::error::{BusError, NodeError, NodeResult};
use tether_core::message::ChangeEvent;
use tether_core::shutdown::ShutdownToken;
use tether_core::types::{NodeId, StatusCode, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::address_space::AddressSpace;

/// Default sampling interval.
pub const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_millis(1000);

// =============================================================================
// Settings
// =============================================================================

/// Settings for one monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemSettings {
    /// The node to watch.
    pub node_id: NodeId,
    /// How often the node is sampled.
    pub sampling_interval: Duration,
    /// Absolute deadband for numeric values. Zero means exact equality.
    pub deadband: f64,
}

impl MonitoredItemSettings {
    /// Creates settings with the default interval and no deadband.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            sampling_interval: DEFAULT_SAMPLING_INTERVAL,
            deadband: 0.0,
        }
    }

    /// Sets the sampling interval.
    pub fn with_sampling_interval(mut self, interval: Duration) -> Self {
        self.sampling_interval = interval;
        self
    }

    /// Sets the deadband.
    pub fn with_deadband(mut self, deadband: f64) -> Self {
        self.deadband = deadband.max(0.0);
        self
    }
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Publish the node's state at registration as the first event.
    pub emit_initial: bool,
    /// Tick used while no items are registered.
    pub idle_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            emit_initial: false,
            idle_interval: DEFAULT_SAMPLING_INTERVAL,
        }
    }
}

// =============================================================================
// Monitored Item
// =============================================================================

/// State of a monitored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// The node exists and is being sampled.
    Active,
    /// The node is missing.
    Stale,
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Stale => f.write_str("stale"),
        }
    }
}

#[derive(Debug)]
struct MonitoredItem {
    settings: MonitoredItemSettings,
    last_reported: Option<(Value, StatusCode)>,
    state: ItemState,
    next_due: Instant,
    sequence: u64,
}

impl MonitoredItem {
    fn has_changed(&self, value: &Value, status: StatusCode) -> bool {
        match &self.last_reported {
            None => true,
            Some((last_value, last_status)) => {
                *last_status != status
                    || last_value.exceeds_deadband(value, self.settings.deadband)
            }
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Engine counters.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Sweeps performed.
    pub ticks: u64,
    /// Individual node samples taken.
    pub samples: u64,
    /// Events accepted by the channel.
    pub events_emitted: u64,
    /// Samples equal to the last report.
    pub suppressed: u64,
    /// Active to stale transitions.
    pub stale_transitions: u64,
    /// Detections deferred because the channel was full.
    pub backpressure_deferrals: u64,
}

#[derive(Debug, Default)]
struct AtomicEngineStats {
    ticks: AtomicU64,
    samples: AtomicU64,
    events_emitted: AtomicU64,
    suppressed: AtomicU64,
    stale_transitions: AtomicU64,
    backpressure_deferrals: AtomicU64,
}

// =============================================================================
// SubscriptionEngine
// =============================================================================

/// Samples monitored nodes and emits change events.
pub struct SubscriptionEngine {
    space: Arc<AddressSpace>,
    sender: ChangeSender,
    config: EngineConfig,
    items: Mutex<HashMap<NodeId, MonitoredItem>>,
    stats: AtomicEngineStats,
}

impl SubscriptionEngine {
    /// Creates an engine with no items.
    pub fn new(space: Arc<AddressSpace>, sender: ChangeSender, config: EngineConfig) -> Self {
        Self {
            space,
            sender,
            config,
            items: Mutex::new(HashMap::new()),
            stats: AtomicEngineStats::default(),
        }
    }

    /// Registers a monitored item.
    ///
    /// The node's current state becomes the baseline. A node that does not
    /// exist yet is registered `Stale`, and its first observed state becomes
    /// the baseline.
    pub fn add_item(&self, settings: MonitoredItemSettings) -> NodeResult<()> {
        let mut items = self.items.lock();
        if items.contains_key(&settings.node_id) {
            return Err(NodeError::duplicate(&settings.node_id));
        }

        let (state, last_reported) = match self.space.read_value(&settings.node_id) {
            Ok(snapshot) if !self.config.emit_initial => {
                (ItemState::Active, Some((snapshot.value, snapshot.status)))
            }
            Ok(_) => (ItemState::Active, None),
            Err(_) => {
                warn!(node = %settings.node_id, "Monitored node does not exist yet");
                (ItemState::Stale, None)
            }
        };

        debug!(
            node = %settings.node_id,
            interval_ms = settings.sampling_interval.as_millis() as u64,
            deadband = settings.deadband,
            "Monitored item registered"
        );

        items.insert(
            settings.node_id.clone(),
            MonitoredItem {
                settings,
                last_reported,
                state,
                next_due: Instant::now(),
                sequence: 0,
            },
        );
        Ok(())
    }

    /// Removes a monitored item.
    pub fn remove_item(&self, node_id: &NodeId) -> bool {
        self.items.lock().remove(node_id).is_some()
    }

    /// Returns the state of an item.
    pub fn item_state(&self, node_id: &NodeId) -> Option<ItemState> {
        self.items.lock().get(node_id).map(|item| item.state)
    }

    /// Returns the number of items.
    pub fn item_count(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns the sweep period: the smallest item sampling interval.
    pub fn tick_interval(&self) -> Duration {
        self.items
            .lock()
            .values()
            .map(|item| item.settings.sampling_interval)
            .min()
            .unwrap_or(self.config.idle_interval)
            .max(Duration::from_millis(1))
    }

    /// Performs one sweep, sampling every item due at `now`.
    ///
    /// Returns the number of events emitted.
    pub fn sweep(&self, now: Instant) -> usize {
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
        let mut emitted = 0;
        let mut items = self.items.lock();

        for item in items.values_mut() {
            if item.next_due > now {
                continue;
            }
            item.next_due = now + item.settings.sampling_interval;
            self.stats.samples.fetch_add(1, Ordering::Relaxed);

            let node_id = &item.settings.node_id;
            let snapshot = match self.space.read_value(node_id) {
                Ok(snapshot) => snapshot,
                Err(_) => {
                    if item.state == ItemState::Active {
                        item.state = ItemState::Stale;
                        self.stats.stale_transitions.fetch_add(1, Ordering::Relaxed);
                        warn!(node = %node_id, "Monitored node disappeared, item is stale");
                    }
                    continue;
                }
            };

            if item.state == ItemState::Stale {
                item.state = ItemState::Active;
                info!(node = %node_id, "Monitored node is back, item is active");
                if item.last_reported.is_none() && !self.config.emit_initial {
                    item.last_reported = Some((snapshot.value, snapshot.status));
                    continue;
                }
            }

            if !item.has_changed(&snapshot.value, snapshot.status) {
                self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let sequence = item.sequence + 1;
            let event = ChangeEvent::from_snapshot(node_id.clone(), snapshot.clone(), sequence);

            match self.sender.try_send(event) {
                Ok(()) => {
                    item.sequence = sequence;
                    item.last_reported = Some((snapshot.value, snapshot.status));
                    self.stats.events_emitted.fetch_add(1, Ordering::Relaxed);
                    emitted += 1;
                }
                Err(BusError::Full) => {
                    // Sample again on the next sweep.
                    item.next_due = now;
                    self.stats.backpressure_deferrals.fetch_add(1, Ordering::Relaxed);
                    debug!(node = %node_id, "Change channel full, detection deferred");
                }
                Err(BusError::Closed) => {
                    debug!(node = %node_id, "Change channel closed");
                }
            }
        }

        emitted
    }

    /// Sweeps on every tick until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: ShutdownToken) {
        info!(
            items = self.item_count(),
            tick_ms = self.tick_interval().as_millis() as u64,
            "Subscription engine started"
        );

        let mut next_tick = Instant::now();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep_until(next_tick) => {}
            }

            if self.sender.is_closed() {
                warn!("Change channel closed, subscription engine stopping");
                break;
            }

            let now = Instant::now();
            self.sweep(now);
            next_tick += self.tick_interval();
            if next_tick < now {
                next_tick = now + self.tick_interval();
            }
        }

        info!("Subscription engine stopped");
    }

    /// Returns current statistics.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            ticks: self.stats.ticks.load(Ordering::Relaxed),
            samples: self.stats.samples.load(Ordering::Relaxed),
            events_emitted: self.stats.events_emitted.load(Ordering::Relaxed),
            suppressed: self.stats.suppressed.load(Ordering::Relaxed),
            stale_transitions: self.stats.stale_transitions.load(Ordering::Relaxed),
            backpressure_deferrals: self.stats.backpressure_deferrals.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for SubscriptionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEngine")
            .field("items", &self.item_count())
            .field("config", &self.config)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tether_core::bus::{change_channel, ChangeReceiver};
    use tether_core::types::DataType;

    fn node() -> NodeId {
        NodeId::string(2, "Temperature1")
    }

    fn setup(capacity: usize, config: EngineConfig) -> (Arc<AddressSpace>, SubscriptionEngine, ChangeReceiver) {
        let space = Arc::new(AddressSpace::new());
        space
            .create_node(node(), "Temperature1", DataType::Double, Value::Double(0.0))
            .unwrap();
        let (tx, rx) = change_channel(capacity);
        let engine = SubscriptionEngine::new(space.clone(), tx, config);
        engine.add_item(MonitoredItemSettings::new(node())).unwrap();
        (space, engine, rx)
    }

    fn later(steps: u32) -> Instant {
        Instant::now() + DEFAULT_SAMPLING_INTERVAL * steps
    }

    #[tokio::test]
    async fn test_baseline_not_published() {
        let (_space, engine, mut rx) = setup(8, EngineConfig::default());
        assert_eq!(engine.sweep(later(0)), 0);
        assert!(rx.try_recv().is_none());
        assert_eq!(engine.stats().suppressed, 1);
    }

    #[tokio::test]
    async fn test_emit_initial() {
        let config = EngineConfig {
            emit_initial: true,
            ..Default::default()
        };
        let (_space, engine, mut rx) = setup(8, config);
        assert_eq!(engine.sweep(later(0)), 1);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.value, Value::Double(0.0));
        assert_eq!(event.sequence, 1);
    }

    #[tokio::test]
    async fn test_write_then_sweep_emits_exact_snapshot() {
        let (space, engine, mut rx) = setup(8, EngineConfig::default());
        let ts = Utc::now();
        space.write_value(&node(), Value::Double(21.5), ts).unwrap();

        assert_eq!(engine.sweep(later(0)), 1);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.node_id, node());
        assert_eq!(event.value, Value::Double(21.5));
        assert_eq!(event.status, StatusCode::Good);
        assert_eq!(event.timestamp, ts);
    }

    #[tokio::test]
    async fn test_equal_rewrite_suppressed() {
        let (space, engine, mut rx) = setup(8, EngineConfig::default());
        space.write_value(&node(), Value::Double(21.5), Utc::now()).unwrap();
        engine.sweep(later(0));
        assert!(rx.try_recv().is_some());

        space.write_value(&node(), Value::Double(21.5), Utc::now()).unwrap();
        assert_eq!(engine.sweep(later(1)), 0);
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_status_change_counts() {
        let (space, engine, mut rx) = setup(8, EngineConfig::default());
        space
            .write_data_value(&node(), Value::Double(0.0), StatusCode::Bad, Utc::now())
            .unwrap();
        assert_eq!(engine.sweep(later(0)), 1);
        assert_eq!(rx.try_recv().unwrap().status, StatusCode::Bad);
    }

    #[tokio::test]
    async fn test_only_latest_of_two_writes() {
        let (space, engine, mut rx) = setup(8, EngineConfig::default());
        space.write_value(&node(), Value::Double(1.0), Utc::now()).unwrap();
        space.write_value(&node(), Value::Double(2.0), Utc::now()).unwrap();

        assert_eq!(engine.sweep(later(0)), 1);
        assert_eq!(rx.try_recv().unwrap().value, Value::Double(2.0));
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_not_due_items_skipped() {
        let (space, engine, mut rx) = setup(8, EngineConfig::default());
        engine.sweep(later(0));
        space.write_value(&node(), Value::Double(5.0), Utc::now()).unwrap();

        // Sampled at t0, next due one interval later.
        assert_eq!(engine.sweep(later(0)), 0);
        assert_eq!(engine.sweep(later(1)), 1);
        assert!(rx.try_recv().is_some());
    }

    #[tokio::test]
    async fn test_deadband() {
        let space = Arc::new(AddressSpace::new());
        space
            .create_node(node(), "Temperature1", DataType::Double, Value::Double(20.0))
            .unwrap();
        let (tx, mut rx) = change_channel(8);
        let engine = SubscriptionEngine::new(space.clone(), tx, EngineConfig::default());
        engine
            .add_item(MonitoredItemSettings::new(node()).with_deadband(0.001))
            .unwrap();

        space.write_value(&node(), Value::Double(20.0005), Utc::now()).unwrap();
        assert_eq!(engine.sweep(later(0)), 0);

        space.write_value(&node(), Value::Double(20.5), Utc::now()).unwrap();
        assert_eq!(engine.sweep(later(1)), 1);
        assert_eq!(rx.try_recv().unwrap().value, Value::Double(20.5));
    }

    #[tokio::test]
    async fn test_backpressure_defers_without_loss() {
        let (space, engine, mut rx) = setup(1, EngineConfig::default());
        let other = NodeId::string(2, "Pressure");
        space
            .create_node(other.clone(), "Pressure", DataType::Double, Value::Double(0.0))
            .unwrap();
        engine.add_item(MonitoredItemSettings::new(other.clone())).unwrap();

        space.write_value(&node(), Value::Double(1.0), Utc::now()).unwrap();
        space.write_value(&other, Value::Double(1000.0), Utc::now()).unwrap();

        assert_eq!(engine.sweep(later(0)), 1);
        assert_eq!(engine.stats().backpressure_deferrals, 1);

        let first = rx.try_recv().unwrap();
        // The deferred item is due again right away.
        assert_eq!(engine.sweep(later(0)), 1);
        let second = rx.try_recv().unwrap();

        let mut nodes = vec![first.node_id, second.node_id];
        nodes.sort();
        let mut expected = vec![node(), other];
        expected.sort();
        assert_eq!(nodes, expected);
    }

    #[tokio::test]
    async fn test_stale_and_recovery() {
        let (space, engine, mut rx) = setup(8, EngineConfig::default());
        space.write_value(&node(), Value::Double(3.0), Utc::now()).unwrap();
        engine.sweep(later(0));
        assert_eq!(rx.try_recv().unwrap().sequence, 1);

        space.remove_node(&node());
        assert_eq!(engine.sweep(later(1)), 0);
        assert_eq!(engine.sweep(later(2)), 0);
        assert_eq!(engine.item_state(&node()), Some(ItemState::Stale));
        assert_eq!(engine.stats().stale_transitions, 1);

        // Recreated with the last reported value: nothing to report.
        space
            .create_node(node(), "Temperature1", DataType::Double, Value::Double(3.0))
            .unwrap();
        assert_eq!(engine.sweep(later(3)), 0);
        assert_eq!(engine.item_state(&node()), Some(ItemState::Active));

        space.write_value(&node(), Value::Double(4.0), Utc::now()).unwrap();
        assert_eq!(engine.sweep(later(4)), 1);
        assert_eq!(rx.try_recv().unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_duplicate_item_rejected() {
        let (_space, engine, _rx) = setup(8, EngineConfig::default());
        assert!(engine.add_item(MonitoredItemSettings::new(node())).is_err());
        assert!(engine.remove_item(&node()));
        assert_eq!(engine.item_count(), 0);
    }

    #[tokio::test]
    async fn test_tick_interval_is_smallest() {
        let (_space, engine, _rx) = setup(8, EngineConfig::default());
        engine
            .add_item(
                MonitoredItemSettings::new(NodeId::string(2, "Fast"))
                    .with_sampling_interval(Duration::from_millis(250)),
            )
            .unwrap();
        assert_eq!(engine.tick_interval(), Duration::from_millis(250));
        assert_eq!(engine.item_state(&NodeId::string(2, "Fast")), Some(ItemState::Stale));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_emits_and_stops() {
        let (space, engine, mut rx) = setup(8, EngineConfig::default());
        let engine = Arc::new(engine);
        let coordinator = tether_core::shutdown::ShutdownCoordinator::new();
        let task = tokio::spawn(engine.clone().run(coordinator.token()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        space.write_value(&node(), Value::Double(9.0), Utc::now()).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.value, Value::Double(9.0));

        coordinator.initiate_shutdown();
        task.await.unwrap();
        assert!(engine.stats().ticks >= 2);
    }
}
