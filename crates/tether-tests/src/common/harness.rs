// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Harness
//!
//! An in-process gateway pipeline: address space, ungated write acceptor,
//! subscription engine and protocol bridge, publishing into a
//! [`RecordingPublisher`].
//!
//! The engine is not spawned; tests call [`PipelineHarness::sweep`] to take
//! one sample, which keeps the "between ticks" scenarios deterministic. The
//! bridge runs as a task and is meant to be driven under paused time.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use tether_core::bus::change_channel;
use tether_core::error::NodeResult;
use tether_core::retry::RetryConfig;
use tether_core::shutdown::ShutdownCoordinator;
use tether_core::types::{NodeId, Value};
use tether_mqtt::bridge::{BridgeConfig, BridgeStats, ProtocolBridge};
use tether_mqtt::codec::TopicMapper;
use tether_opcua::address_space::{AddressSpace, NodeDefinition};
use tether_opcua::subscription::{EngineConfig, MonitoredItemSettings, SubscriptionEngine};
use tether_opcua::write_acceptor::WriteAcceptor;

use super::fixtures::NodeFixtures;
use super::mocks::RecordingPublisher;

// =============================================================================
// Harness Configuration
// =============================================================================

/// Configuration for [`PipelineHarness`].
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Nodes created in the address space and monitored.
    pub nodes: Vec<NodeDefinition>,
    /// Topic prefix.
    pub topic_prefix: String,
    /// Change channel capacity.
    pub channel_capacity: usize,
    /// Bridge settings.
    pub bridge: BridgeConfig,
    /// Engine settings.
    pub engine: EngineConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            nodes: NodeFixtures::plant(),
            topic_prefix: "sensors".to_string(),
            channel_capacity: 64,
            bridge: BridgeConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Sets the nodes.
    pub fn nodes(mut self, nodes: Vec<NodeDefinition>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Sets the publish retry policy.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.bridge = self.bridge.with_retry(retry);
        self
    }

    /// Sets the lane capacity.
    pub fn lane_capacity(mut self, capacity: usize) -> Self {
        self.bridge = self.bridge.with_lane_capacity(capacity);
        self
    }

    /// Sets the shutdown grace period.
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.bridge = self.bridge.with_grace_period(grace_period);
        self
    }

    /// Sets the change channel capacity.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

// =============================================================================
// PipelineHarness
// =============================================================================

/// The gateway pipeline without its network endpoints.
pub struct PipelineHarness {
    space: Arc<AddressSpace>,
    acceptor: Arc<WriteAcceptor>,
    engine: Arc<SubscriptionEngine>,
    bridge: Arc<ProtocolBridge>,
    publisher: Arc<RecordingPublisher>,
    shutdown: ShutdownCoordinator,
    bridge_task: Option<JoinHandle<()>>,
    sweep_clock: Mutex<Instant>,
}

/// Step of the virtual sweep clock; no sampling interval exceeds it.
const SWEEP_STEP: Duration = Duration::from_secs(3_600);

impl PipelineHarness {
    /// Builds the pipeline with a publisher that accepts everything.
    pub fn new(config: HarnessConfig) -> Self {
        Self::with_publisher(config, Arc::new(RecordingPublisher::new()))
    }

    /// Builds the pipeline around the given publisher and starts the bridge.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_publisher(config: HarnessConfig, publisher: Arc<RecordingPublisher>) -> Self {
        let space = Arc::new(AddressSpace::new());
        for definition in config.nodes.iter().cloned() {
            space.add_node(definition).expect("fixture nodes are unique");
        }
        let acceptor = Arc::new(WriteAcceptor::ungated(space.clone()));

        let (sender, receiver) = change_channel(config.channel_capacity);
        let engine = Arc::new(SubscriptionEngine::new(space.clone(), sender, config.engine));
        for definition in &config.nodes {
            engine
                .add_item(MonitoredItemSettings::new(definition.node_id.clone()))
                .expect("fixture nodes are unique");
        }

        let bridge = Arc::new(ProtocolBridge::new(
            publisher.clone(),
            TopicMapper::new(config.topic_prefix),
            config.bridge,
        ));

        let shutdown = ShutdownCoordinator::new();
        let bridge_task = tokio::spawn(bridge.clone().run(receiver, shutdown.token()));

        Self {
            space,
            acceptor,
            engine,
            bridge,
            publisher,
            shutdown,
            bridge_task: Some(bridge_task),
            sweep_clock: Mutex::new(Instant::now()),
        }
    }

    /// Returns the address space.
    pub fn space(&self) -> &Arc<AddressSpace> {
        &self.space
    }

    /// Returns the write acceptor.
    pub fn acceptor(&self) -> &Arc<WriteAcceptor> {
        &self.acceptor
    }

    /// Returns the subscription engine.
    pub fn engine(&self) -> &Arc<SubscriptionEngine> {
        &self.engine
    }

    /// Returns the recording publisher.
    pub fn publisher(&self) -> &Arc<RecordingPublisher> {
        &self.publisher
    }

    /// Returns bridge statistics.
    pub fn bridge_stats(&self) -> BridgeStats {
        self.bridge.stats()
    }

    /// Writes through the acceptor with `Good` status.
    pub fn write(&self, node_id: &NodeId, value: Value, timestamp: DateTime<Utc>) -> NodeResult<()> {
        self.acceptor.write(node_id, value, timestamp)
    }

    /// Samples every item now, regardless of its interval.
    ///
    /// Returns the number of events emitted.
    pub fn sweep(&self) -> usize {
        let now = {
            let mut clock = self.sweep_clock.lock();
            *clock = (*clock + SWEEP_STEP).max(Instant::now());
            *clock
        };
        self.engine.sweep(now)
    }

    /// Lets the bridge and its lanes run until idle.
    ///
    /// Under paused time this returns once every other task is blocked.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    /// Stops the bridge and waits for it to drain or give up.
    pub async fn shutdown(&mut self) -> BridgeStats {
        self.shutdown.initiate_shutdown();
        if let Some(task) = self.bridge_task.take() {
            task.await.expect("bridge task panicked");
        }
        self.bridge.stats()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Runs `test` under a timeout, panicking if it elapses.
pub async fn with_timeout<F, T>(timeout: Duration, test: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(timeout, test).await {
        Ok(value) => value,
        Err(_) => panic!("Test timed out after {:?}", timeout),
    }
}

/// Polls `condition` every 10 ms until it holds or `timeout` elapses.
pub async fn wait_until<F>(description: &str, timeout: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            panic!("Timed out after {:?} waiting for {}", timeout, description);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
