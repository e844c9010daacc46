// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol bridge: change events in, MQTT publications out.
//!
//! # Lanes
//!
//! Every node gets its own bounded FIFO lane and worker task. A node whose
//! publications keep failing only delays its own lane. Within a lane, events
//! are attempted strictly in detection order.
//!
//! When a lane is full the oldest *queued* event is evicted; the event that is
//! currently being delivered is never touched.
//!
//! # Shutdown
//!
//! On shutdown the bridge stops taking events from the channel, lets every
//! lane drain for up to the grace period and then abandons what is left.
//! Abandoned events are counted as dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tether_core::bus::ChangeReceiver;
use tether_core::message::ChangeEvent;
use tether_core::retry::{ExponentialBackoff, RetryConfig, RetryDecision, RetryStrategy};
use tether_core::shutdown::ShutdownToken;
use tether_core::types::NodeId;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use crate::codec::{DeliveryGuarantee, PublicationRecord, TopicMapper};
use crate::publisher::Publisher;

// =============================================================================
// Configuration
// =============================================================================

/// Bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Queued events per node before the oldest is evicted.
    #[serde(default = "default_lane_capacity")]
    pub lane_capacity: usize,

    /// Publish retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Time allowed for lanes to drain on shutdown.
    #[serde(default = "default_grace_period", with = "tether_core::retry::duration_millis")]
    pub grace_period: Duration,

    /// Delivery guarantee for every publication.
    #[serde(default)]
    pub qos: DeliveryGuarantee,

    /// Retain flag for every publication.
    #[serde(default)]
    pub retain: bool,
}

fn default_lane_capacity() -> usize {
    64
}

fn default_grace_period() -> Duration {
    Duration::from_secs(5)
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            lane_capacity: default_lane_capacity(),
            retry: RetryConfig::default(),
            grace_period: default_grace_period(),
            qos: DeliveryGuarantee::default(),
            retain: false,
        }
    }
}

impl BridgeConfig {
    /// Sets the lane capacity.
    pub fn with_lane_capacity(mut self, capacity: usize) -> Self {
        self.lane_capacity = capacity;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the shutdown grace period.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Sets the delivery guarantee.
    pub fn with_qos(mut self, qos: DeliveryGuarantee) -> Self {
        self.qos = qos;
        self
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Bridge counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    /// Events taken from the change channel.
    pub received: u64,
    /// Records acknowledged by the broker.
    pub published: u64,
    /// Retry attempts performed.
    pub retries: u64,
    /// Records dropped after the retry budget ran out.
    pub dropped_exhausted: u64,
    /// Records dropped on a non-retryable error.
    pub dropped_rejected: u64,
    /// Queued events evicted by newer ones.
    pub dropped_overflow: u64,
    /// Events abandoned at shutdown.
    pub dropped_shutdown: u64,
    /// Lanes created so far.
    pub active_lanes: usize,
    /// Lanes with a delivery in progress.
    pub in_flight: usize,
}

impl BridgeStats {
    /// Total dropped, any reason.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_exhausted + self.dropped_rejected + self.dropped_overflow + self.dropped_shutdown
    }
}

#[derive(Debug, Default)]
struct AtomicBridgeStats {
    received: AtomicU64,
    published: AtomicU64,
    retries: AtomicU64,
    dropped_exhausted: AtomicU64,
    dropped_rejected: AtomicU64,
    dropped_overflow: AtomicU64,
    dropped_shutdown: AtomicU64,
}

// =============================================================================
// Lane
// =============================================================================

#[derive(Debug)]
struct Lane {
    node_id: NodeId,
    queue: Mutex<VecDeque<ChangeEvent>>,
    notify: Notify,
    closing: AtomicBool,
    busy: AtomicBool,
}

impl Lane {
    fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closing: AtomicBool::new(false),
            busy: AtomicBool::new(false),
        }
    }

    /// Appends an event, returning the evicted one if the lane was full.
    fn push(&self, event: ChangeEvent, capacity: usize) -> Option<ChangeEvent> {
        let mut queue = self.queue.lock();
        queue.push_back(event);
        let evicted = if queue.len() > capacity.max(1) {
            queue.pop_front()
        } else {
            None
        };
        drop(queue);
        self.notify.notify_one();
        evicted
    }

    fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Events that would be lost if the worker stopped now.
    fn pending(&self) -> u64 {
        self.queue.lock().len() as u64 + u64::from(self.busy.load(Ordering::SeqCst))
    }
}

// =============================================================================
// Courier
// =============================================================================

/// Delivery logic shared by all lane workers.
struct Courier {
    publisher: Arc<dyn Publisher>,
    topics: TopicMapper,
    strategy: ExponentialBackoff,
    qos: DeliveryGuarantee,
    retain: bool,
    stats: AtomicBridgeStats,
}

impl Courier {
    async fn work(self: Arc<Self>, lane: Arc<Lane>) {
        trace!(node = %lane.node_id, "Lane worker started");
        loop {
            let next = lane.queue.lock().pop_front();
            match next {
                Some(event) => {
                    lane.busy.store(true, Ordering::SeqCst);
                    self.deliver(event).await;
                    lane.busy.store(false, Ordering::SeqCst);
                }
                None if lane.closing.load(Ordering::SeqCst) => break,
                None => lane.notify.notified().await,
            }
        }
        trace!(node = %lane.node_id, "Lane worker stopped");
    }

    async fn deliver(&self, event: ChangeEvent) {
        let mut record = match PublicationRecord::from_event(event, &self.topics, self.qos, self.retain) {
            Ok(record) => record,
            Err(e) => {
                self.stats.dropped_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Change event could not be encoded, dropped");
                return;
            }
        };

        let mut attempt = 1;
        loop {
            let error = match self.publisher.publish(&record).await {
                Ok(()) => {
                    self.stats.published.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        topic = %record.topic,
                        seq = record.event.sequence,
                        retries = record.retry_count,
                        "Published"
                    );
                    return;
                }
                Err(e) => e,
            };

            match self.strategy.should_retry(&error, attempt) {
                RetryDecision::Retry(delay) => {
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    record.retry_count += 1;
                    debug!(
                        topic = %record.topic,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::DoNotRetry => {
                    if error.is_retryable() {
                        self.stats.dropped_exhausted.fetch_add(1, Ordering::Relaxed);
                    } else {
                        self.stats.dropped_rejected.fetch_add(1, Ordering::Relaxed);
                    }
                    warn!(
                        topic = %record.topic,
                        seq = record.event.sequence,
                        attempts = attempt,
                        error = %error,
                        error_type = error.error_type(),
                        "Publication dropped"
                    );
                    return;
                }
            }
        }
    }
}

// =============================================================================
// ProtocolBridge
// =============================================================================

/// Maps change events onto MQTT publications.
pub struct ProtocolBridge {
    courier: Arc<Courier>,
    lane_capacity: usize,
    grace_period: Duration,
    lanes: DashMap<NodeId, Arc<Lane>>,
    workers: Mutex<JoinSet<()>>,
    accepting: AtomicBool,
}

impl ProtocolBridge {
    /// Creates a bridge.
    pub fn new(publisher: Arc<dyn Publisher>, topics: TopicMapper, config: BridgeConfig) -> Self {
        Self {
            courier: Arc::new(Courier {
                publisher,
                topics,
                strategy: ExponentialBackoff::new(config.retry),
                qos: config.qos,
                retain: config.retain,
                stats: AtomicBridgeStats::default(),
            }),
            lane_capacity: config.lane_capacity,
            grace_period: config.grace_period,
            lanes: DashMap::new(),
            workers: Mutex::new(JoinSet::new()),
            accepting: AtomicBool::new(true),
        }
    }

    /// Returns the topic mapper.
    pub fn topics(&self) -> &TopicMapper {
        &self.courier.topics
    }

    /// Routes one event to its node's lane.
    ///
    /// Must be called from within a tokio runtime; the first event for a node
    /// spawns that node's worker.
    pub fn dispatch(&self, event: ChangeEvent) {
        let stats = &self.courier.stats;
        stats.received.fetch_add(1, Ordering::Relaxed);

        if !self.accepting.load(Ordering::SeqCst) {
            stats.dropped_shutdown.fetch_add(1, Ordering::Relaxed);
            debug!(node = %event.node_id, "Bridge closed, event dropped");
            return;
        }

        let lane = self.lane_for(&event.node_id);
        if let Some(evicted) = lane.push(event, self.lane_capacity) {
            stats.dropped_overflow.fetch_add(1, Ordering::Relaxed);
            warn!(
                node = %evicted.node_id,
                seq = evicted.sequence,
                capacity = self.lane_capacity,
                "Lane full, oldest queued event dropped"
            );
        }
    }

    fn lane_for(&self, node_id: &NodeId) -> Arc<Lane> {
        if let Some(lane) = self.lanes.get(node_id) {
            return lane.clone();
        }

        self.lanes
            .entry(node_id.clone())
            .or_insert_with(|| {
                let lane = Arc::new(Lane::new(node_id.clone()));
                self.workers
                    .lock()
                    .spawn(self.courier.clone().work(lane.clone()));
                debug!(node = %node_id, "Lane created");
                lane
            })
            .clone()
    }

    /// Consumes the change channel until shutdown or until it closes, then
    /// drains.
    pub async fn run(self: Arc<Self>, mut events: ChangeReceiver, shutdown: ShutdownToken) {
        info!(
            lane_capacity = self.lane_capacity,
            grace_period_ms = self.grace_period.as_millis() as u64,
            "Protocol bridge started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => break,
                },
            }
        }

        // Take what was already accepted by the channel, refuse the rest.
        events.close();
        while let Some(event) = events.try_recv() {
            self.dispatch(event);
        }

        self.shutdown().await;
    }

    /// Stops accepting events and drains the lanes within the grace period.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        for lane in self.lanes.iter() {
            lane.close();
        }

        let mut workers = std::mem::replace(&mut *self.workers.lock(), JoinSet::new());
        let drained = tokio::time::timeout(self.grace_period, async {
            while workers.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        if drained {
            info!(stats = ?self.stats(), "Protocol bridge drained");
            return;
        }

        workers.abort_all();
        while workers.join_next().await.is_some() {}

        let abandoned: u64 = self.lanes.iter().map(|lane| lane.pending()).sum();
        self.courier
            .stats
            .dropped_shutdown
            .fetch_add(abandoned, Ordering::Relaxed);
        for lane in self.lanes.iter() {
            lane.queue.lock().clear();
            lane.busy.store(false, Ordering::SeqCst);
        }

        warn!(
            abandoned,
            grace_period_ms = self.grace_period.as_millis() as u64,
            "Grace period elapsed, remaining publications abandoned"
        );
    }

    /// Returns current statistics.
    pub fn stats(&self) -> BridgeStats {
        let stats = &self.courier.stats;
        BridgeStats {
            received: stats.received.load(Ordering::Relaxed),
            published: stats.published.load(Ordering::Relaxed),
            retries: stats.retries.load(Ordering::Relaxed),
            dropped_exhausted: stats.dropped_exhausted.load(Ordering::Relaxed),
            dropped_rejected: stats.dropped_rejected.load(Ordering::Relaxed),
            dropped_overflow: stats.dropped_overflow.load(Ordering::Relaxed),
            dropped_shutdown: stats.dropped_shutdown.load(Ordering::Relaxed),
            active_lanes: self.lanes.len(),
            in_flight: self
                .lanes
                .iter()
                .filter(|lane| lane.busy.load(Ordering::SeqCst))
                .count(),
        }
    }
}

impl std::fmt::Debug for ProtocolBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolBridge")
            .field("lane_capacity", &self.lane_capacity)
            .field("lanes", &self.lanes.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_payload;
    use async_trait::async_trait;
    use chrono::Utc;
    use tether_core::bus::change_channel;
    use tether_core::error::{PublishError, PublishResult};
    use tether_core::shutdown::ShutdownCoordinator;
    use tether_core::types::{StatusCode, Value};
    use tokio::time::Instant;

    #[derive(Default)]
    struct ScriptedPublisher {
        script: Mutex<VecDeque<PublishResult<()>>>,
        hang_topic: Option<String>,
        calls: Mutex<Vec<(Instant, PublicationRecord)>>,
    }

    impl ScriptedPublisher {
        fn failing(errors: Vec<PublishError>) -> Self {
            Self {
                script: Mutex::new(errors.into_iter().map(Err).collect()),
                ..Default::default()
            }
        }

        fn hanging_on(topic: &str) -> Self {
            Self {
                hang_topic: Some(topic.to_string()),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(Instant, PublicationRecord)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Publisher for ScriptedPublisher {
        async fn publish(&self, record: &PublicationRecord) -> PublishResult<()> {
            self.calls.lock().push((Instant::now(), record.clone()));
            if self.hang_topic.as_deref() == Some(record.topic.as_str()) {
                std::future::pending::<()>().await;
            }
            self.script.lock().pop_front().unwrap_or(Ok(()))
        }
    }

    fn event(name: &str, value: f64, sequence: u64) -> ChangeEvent {
        ChangeEvent {
            node_id: NodeId::string(2, name),
            value: Value::Double(value),
            status: StatusCode::Good,
            timestamp: Utc::now(),
            sequence,
        }
    }

    fn bridge(publisher: Arc<ScriptedPublisher>, config: BridgeConfig) -> Arc<ProtocolBridge> {
        Arc::new(ProtocolBridge::new(publisher, TopicMapper::new("sensors"), config))
    }

    // With paused time this returns once every other task is idle.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_to_node_topic() {
        let publisher = Arc::new(ScriptedPublisher::default());
        let bridge = bridge(publisher.clone(), BridgeConfig::default());

        let ev = event("Temperature1", 21.5, 1);
        bridge.dispatch(ev.clone());
        settle().await;

        let calls = publisher.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.topic, "sensors/Temperature1");
        let decoded = decode_payload(&calls[0].1.payload).unwrap();
        assert_eq!(decoded.value, Value::Double(21.5));
        assert_eq!(decoded.timestamp, ev.timestamp);
        assert_eq!(bridge.stats().published, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_backoff_then_succeeds() {
        let publisher = Arc::new(ScriptedPublisher::failing(vec![
            PublishError::BrokerUnavailable,
            PublishError::BrokerUnavailable,
            PublishError::BrokerUnavailable,
        ]));
        let bridge = bridge(publisher.clone(), BridgeConfig::default());

        let ev = event("Temperature", 22.0, 1);
        bridge.dispatch(ev.clone());
        tokio::time::sleep(Duration::from_secs(10)).await;

        let calls = publisher.calls();
        assert_eq!(calls.len(), 4);
        let gaps: Vec<u64> = calls
            .windows(2)
            .map(|w| (w[1].0 - w[0].0).as_secs())
            .collect();
        assert_eq!(gaps, vec![1, 2, 4]);
        assert_eq!(calls[3].1.retry_count, 3);
        assert_eq!(calls[3].1.event.timestamp, ev.timestamp);

        let stats = bridge.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.retries, 3);
        assert_eq!(stats.dropped_total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drops_after_max_attempts() {
        let publisher = Arc::new(ScriptedPublisher::failing(vec![PublishError::BrokerUnavailable; 10]));
        let bridge = bridge(publisher.clone(), BridgeConfig::default());

        bridge.dispatch(event("Temperature", 22.0, 1));
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(publisher.calls().len(), 5);
        let stats = bridge.stats();
        assert_eq!(stats.dropped_exhausted, 1);
        assert_eq!(stats.published, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_is_not_retried() {
        let publisher = Arc::new(ScriptedPublisher::failing(vec![PublishError::rejected("too large")]));
        let bridge = bridge(publisher.clone(), BridgeConfig::default());

        bridge.dispatch(event("Temperature", 22.0, 1));
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(publisher.calls().len(), 1);
        assert_eq!(bridge.stats().dropped_rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_lane_does_not_block_others() {
        let publisher = Arc::new(ScriptedPublisher::hanging_on("sensors/Pressure"));
        let bridge = bridge(publisher.clone(), BridgeConfig::default());

        bridge.dispatch(event("Pressure", 1000.0, 1));
        bridge.dispatch(event("Temperature", 22.0, 1));
        bridge.dispatch(event("Temperature", 23.0, 2));
        settle().await;

        let stats = bridge.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.active_lanes, 2);
        assert_eq!(stats.in_flight, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_evicts_oldest_queued() {
        let publisher = Arc::new(ScriptedPublisher::default());
        let bridge = bridge(publisher.clone(), BridgeConfig::default().with_lane_capacity(2));

        for seq in 1..=4 {
            bridge.dispatch(event("Temperature", seq as f64, seq));
        }
        assert_eq!(bridge.stats().dropped_overflow, 2);
        settle().await;

        let seqs: Vec<u64> = publisher.calls().iter().map(|(_, r)| r.event.sequence).collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lane_order_follows_detection_order() {
        let publisher = Arc::new(ScriptedPublisher::failing(vec![PublishError::BrokerUnavailable]));
        let bridge = bridge(publisher.clone(), BridgeConfig::default());

        bridge.dispatch(event("Temperature", 1.0, 1));
        bridge.dispatch(event("Temperature", 2.0, 2));
        tokio::time::sleep(Duration::from_secs(5)).await;

        let seqs: Vec<u64> = publisher.calls().iter().map(|(_, r)| r.event.sequence).collect();
        assert_eq!(seqs, vec![1, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_then_abandons() {
        let publisher = Arc::new(ScriptedPublisher::hanging_on("sensors/Pressure"));
        let bridge = bridge(
            publisher.clone(),
            BridgeConfig::default().with_grace_period(Duration::from_secs(2)),
        );
        let (tx, rx) = change_channel(16);
        let coordinator = ShutdownCoordinator::new();
        let task = tokio::spawn(bridge.clone().run(rx, coordinator.token()));

        tx.try_send(event("Pressure", 1000.0, 1)).unwrap();
        tx.try_send(event("Pressure", 1001.0, 2)).unwrap();
        tx.try_send(event("Temperature", 22.0, 1)).unwrap();
        settle().await;

        let started = Instant::now();
        coordinator.initiate_shutdown();
        task.await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));

        let stats = bridge.stats();
        assert_eq!(stats.received, 3);
        assert_eq!(stats.published, 1);
        assert_eq!(stats.dropped_shutdown, 2);
        assert_eq!(stats.in_flight, 0);

        bridge.dispatch(event("Temperature", 23.0, 2));
        assert_eq!(bridge.stats().dropped_shutdown, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_shutdown_within_grace_period() {
        let publisher = Arc::new(ScriptedPublisher::default());
        let bridge = bridge(publisher.clone(), BridgeConfig::default());
        let (tx, rx) = change_channel(16);
        let coordinator = ShutdownCoordinator::new();

        tx.try_send(event("Temperature", 22.0, 1)).unwrap();
        coordinator.initiate_shutdown();
        bridge.clone().run(rx, coordinator.token()).await;

        let stats = bridge.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.dropped_total(), 0);
    }
}
