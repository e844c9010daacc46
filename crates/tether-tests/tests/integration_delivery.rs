// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Delivery Integration Tests
//!
//! Retry, drop accounting and connection supervision.
//!
//! ## Test Categories
//!
//! - `test_retry_*`: Publish retry schedule and bounds
//! - `test_broker_*`: Publishing through an unconnected MQTT supervisor
//! - `test_lane_*`: Per-node isolation and overflow
//! - `test_shutdown_*`: Drain and abandonment
//! - `test_supervisor_*`: Reconnect behaviour and write gating

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;

use tether_core::error::{EndpointError, NodeError, PublishError};
use tether_core::retry::RetryConfig;
use tether_core::shutdown::ShutdownCoordinator;
use tether_core::supervisor::{ConnectionState, Supervisor, SupervisorConfig};
use tether_core::types::{StatusCode, Value};
use tether_mqtt::bridge::{BridgeConfig, ProtocolBridge};
use tether_mqtt::client::{MqttEndpoint, MqttSettings};
use tether_mqtt::codec::{DeliveryGuarantee, PublicationRecord, TopicMapper};
use tether_mqtt::publisher::{Publisher, SupervisedPublisher};
use tether_opcua::address_space::AddressSpace;
use tether_opcua::write_acceptor::WriteAcceptor;
use tether_tests::prelude::*;

fn no_jitter_reconnect() -> SupervisorConfig {
    SupervisorConfig::default().with_backoff(RetryConfig {
        max_attempts: u32::MAX,
        jitter: 0.0,
        ..RetryConfig::default()
    })
}

// =============================================================================
// Retry Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_retry_backoff_then_success() {
    init_test_logging();
    let publisher = Arc::new(RecordingPublisher::failing_first(
        3,
        PublishError::BrokerUnavailable,
    ));
    let harness = PipelineHarness::with_publisher(HarnessConfig::default(), publisher.clone());
    let t1 = EventFixtures::t1();

    harness
        .write(&NodeFixtures::temperature1(), Value::Double(21.5), t1)
        .unwrap();
    harness.sweep();
    tokio::time::sleep(Duration::from_secs(10)).await;

    let attempts = publisher.attempts();
    assert_eq!(attempts.len(), 4);
    assert_attempt_gaps(
        &attempts,
        &[
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4),
        ],
    );

    let publications = publisher.publications();
    assert_eq!(publications.len(), 1);
    assert_eq!(publications[0].record.retry_count, 3);
    assert_publication(
        &publications[0],
        "sensors/Temperature1",
        &Value::Double(21.5),
        StatusCode::Good,
        t1,
    );

    let stats = harness.bridge_stats();
    assert_eq!(stats.published, 1);
    assert_eq!(stats.retries, 3);
    assert_accounted(&stats);
}

#[tokio::test(start_paused = true)]
async fn test_retry_bounded_then_dropped() {
    let publisher = Arc::new(RecordingPublisher::always_failing(PublishError::timeout(
        Duration::from_secs(10),
    )));
    let harness = PipelineHarness::with_publisher(HarnessConfig::default(), publisher.clone());

    harness
        .write(&NodeFixtures::temperature1(), Value::Double(21.5), Utc::now())
        .unwrap();
    harness.sweep();
    tokio::time::sleep(Duration::from_secs(60)).await;

    let attempts = publisher.attempts();
    assert_eq!(attempts.len(), 5);
    assert_attempt_gaps(
        &attempts,
        &[
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(8),
        ],
    );

    let stats = harness.bridge_stats();
    assert_eq!(stats.published, 0);
    assert_eq!(stats.dropped_exhausted, 1);
    assert_accounted(&stats);
}

#[tokio::test(start_paused = true)]
async fn test_retry_rejected_is_not_retried() {
    let publisher = Arc::new(RecordingPublisher::failing_first(
        1,
        PublishError::rejected("payload too large"),
    ));
    let harness = PipelineHarness::with_publisher(HarnessConfig::default(), publisher.clone());

    harness
        .write(&NodeFixtures::pressure1(), Value::Double(2.0), Utc::now())
        .unwrap();
    harness.sweep();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(publisher.attempt_count(), 1);
    let stats = harness.bridge_stats();
    assert_eq!(stats.dropped_rejected, 1);
    assert_eq!(stats.retries, 0);
    assert_accounted(&stats);
}

#[tokio::test(start_paused = true)]
async fn test_retry_custom_policy() {
    let retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(200),
        max_delay: Duration::from_millis(300),
        ..RetryConfig::default()
    };
    let publisher = Arc::new(RecordingPublisher::always_failing(
        PublishError::BrokerUnavailable,
    ));
    let harness =
        PipelineHarness::with_publisher(HarnessConfig::default().retry(retry), publisher.clone());

    harness
        .write(&NodeFixtures::temperature1(), Value::Double(1.0), Utc::now())
        .unwrap();
    harness.sweep();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_attempt_gaps(
        &publisher.attempts(),
        &[Duration::from_millis(200), Duration::from_millis(300)],
    );
    assert_eq!(harness.bridge_stats().dropped_exhausted, 1);
}

// =============================================================================
// Broker Availability Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_broker_unavailable_fails_fast() {
    let supervisor = Supervisor::new(
        MqttEndpoint::new(MqttSettings::new("127.0.0.1", 1)),
        SupervisorConfig::default(),
    );
    let publisher = SupervisedPublisher::new(supervisor.handle());
    let record = PublicationRecord::from_event(
        EventFixtures::double(NodeFixtures::temperature1(), 21.5, 1),
        &TopicMapper::new("sensors"),
        DeliveryGuarantee::AtLeastOnce,
        false,
    )
    .unwrap();

    let started = Instant::now();
    let result = publisher.publish(&record).await;
    assert!(matches!(result, Err(PublishError::BrokerUnavailable)));
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_broker_unavailable_events_retried_until_bound() {
    let supervisor = Supervisor::new(
        MqttEndpoint::new(MqttSettings::new("127.0.0.1", 1)),
        SupervisorConfig::default(),
    );
    let bridge = Arc::new(ProtocolBridge::new(
        Arc::new(SupervisedPublisher::new(supervisor.handle())),
        TopicMapper::new("sensors"),
        BridgeConfig::default(),
    ));

    for event in EventFixtures::series(&NodeFixtures::temperature1(), &[20.0, 21.0]) {
        bridge.dispatch(event);
    }
    tokio::time::sleep(Duration::from_secs(60)).await;

    let stats = bridge.stats();
    assert_eq!(stats.received, 2);
    assert_eq!(stats.published, 0);
    assert_eq!(stats.dropped_exhausted, 2);
    assert_eq!(stats.retries, 2 * 4);
    assert_accounted(&stats);
}

// =============================================================================
// Lane Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_lane_stalled_node_does_not_block_others() {
    let publisher = Arc::new(RecordingPublisher::new());
    publisher.hang_on("sensors/Pressure1");
    let harness = PipelineHarness::with_publisher(HarnessConfig::default(), publisher.clone());
    let now = Utc::now();

    harness.write(&NodeFixtures::pressure1(), Value::Double(1.0), now).unwrap();
    harness.write(&NodeFixtures::temperature1(), Value::Double(21.5), now).unwrap();
    assert_eq!(harness.sweep(), 2);
    harness.settle().await;

    assert_eq!(publisher.publications_to("sensors/Temperature1").len(), 1);
    assert!(publisher.publications_to("sensors/Pressure1").is_empty());

    let stats = harness.bridge_stats();
    assert_eq!(stats.active_lanes, 2);
    assert_eq!(stats.in_flight, 1);
}

#[tokio::test(start_paused = true)]
async fn test_lane_overflow_drops_oldest() {
    let publisher = Arc::new(RecordingPublisher::new());
    publisher.hang_on("sensors/Temperature1");
    let mut harness = PipelineHarness::with_publisher(
        HarnessConfig::default()
            .lane_capacity(2)
            .grace_period(Duration::from_secs(1)),
        publisher.clone(),
    );
    let node = NodeFixtures::temperature1();

    // The first event occupies the worker, the rest queue behind it.
    for value in [1.0, 2.0, 3.0, 4.0] {
        harness.write(&node, Value::Double(value), Utc::now()).unwrap();
        harness.sweep();
        harness.settle().await;
    }

    let stats = harness.bridge_stats();
    assert_eq!(stats.received, 4);
    assert_eq!(stats.dropped_overflow, 1);

    let stats = harness.shutdown().await;
    assert_eq!(stats.dropped_shutdown, 3);
    assert_accounted(&stats);
}

// =============================================================================
// Shutdown Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_pending_publications() {
    let mut harness = PipelineHarness::new(HarnessConfig::default());
    let now = Utc::now();

    harness.write(&NodeFixtures::temperature1(), Value::Double(21.5), now).unwrap();
    harness.write(&NodeFixtures::pressure1(), Value::Double(1.2), now).unwrap();
    harness.write(&NodeFixtures::valve1(), Value::Boolean(true), now).unwrap();
    assert_eq!(harness.sweep(), 3);

    let stats = harness.shutdown().await;
    assert_eq!(stats.published, 3);
    assert_eq!(stats.dropped_total(), 0);
    assert_accounted(&stats);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_out_retries_within_grace() {
    let publisher = Arc::new(RecordingPublisher::failing_first(
        2,
        PublishError::BrokerUnavailable,
    ));
    let mut harness = PipelineHarness::with_publisher(
        HarnessConfig::default().grace_period(Duration::from_secs(5)),
        publisher.clone(),
    );

    harness
        .write(&NodeFixtures::temperature1(), Value::Double(3.0), Utc::now())
        .unwrap();
    harness.sweep();
    harness.settle().await;

    let started = Instant::now();
    let stats = harness.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(stats.published, 1);
    assert_accounted(&stats);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_abandons_after_grace() {
    let publisher = Arc::new(RecordingPublisher::always_failing(
        PublishError::BrokerUnavailable,
    ));
    let mut harness = PipelineHarness::with_publisher(
        HarnessConfig::default().grace_period(Duration::from_secs(2)),
        publisher.clone(),
    );

    harness
        .write(&NodeFixtures::temperature1(), Value::Double(3.0), Utc::now())
        .unwrap();
    harness.sweep();
    harness.settle().await;

    let started = Instant::now();
    let stats = harness.shutdown().await;
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    assert_eq!(stats.dropped_shutdown, 1);
    assert_accounted(&stats);
}

// =============================================================================
// Supervisor Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_supervisor_reconnects_with_backoff() {
    let endpoint = MockEndpoint::new("mock").with_script(vec![
        Err(EndpointError::refused("mock", "not yet")),
        Err(EndpointError::refused("mock", "still not")),
    ]);
    let supervisor = Supervisor::new(endpoint.clone(), no_jitter_reconnect());
    let coordinator = ShutdownCoordinator::new();

    let started = Instant::now();
    let (handle, task) = supervisor.spawn(coordinator.token());
    handle.wait_for(ConnectionState::Connected).await;

    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(endpoint.connect_attempts(), 3);
    let health = handle.health();
    assert_eq!(health.total_failures, 2);
    assert_eq!(health.consecutive_failures, 0);
    assert_eq!(health.last_error.as_deref().map(|e| e.contains("still not")), Some(true));

    coordinator.initiate_shutdown();
    task.await.unwrap();
    assert_eq!(endpoint.closes(), 1);
    assert_eq!(handle.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_recovers_from_link_loss() {
    let endpoint = MockEndpoint::new("mock");
    let supervisor = Supervisor::new(endpoint.clone(), no_jitter_reconnect());
    let coordinator = ShutdownCoordinator::new();
    let (handle, task) = supervisor.spawn(coordinator.token());

    handle.wait_for(ConnectionState::Connected).await;
    assert_eq!(handle.connection().map(|c| c.id), Some(1));

    endpoint.drop_link();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!handle.is_connected());
    assert!(handle.connection().is_none());

    handle.wait_for(ConnectionState::Connected).await;
    assert_eq!(handle.connection().map(|c| c.id), Some(2));
    assert_eq!(handle.health().total_disconnects, 1);

    coordinator.initiate_shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_gates_writes() {
    let space = Arc::new(AddressSpace::new());
    for definition in NodeFixtures::plant() {
        space.add_node(definition).unwrap();
    }

    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let acceptor = WriteAcceptor::new(space.clone(), state_rx);
    let endpoint = MockEndpoint::new("opcua");
    let supervisor = Supervisor::with_state(endpoint.clone(), no_jitter_reconnect(), state_tx);
    let node = NodeFixtures::temperature1();

    let err = acceptor.write(&node, Value::Double(1.0), Utc::now()).unwrap_err();
    assert!(matches!(err, NodeError::EndpointUnavailable));

    let coordinator = ShutdownCoordinator::new();
    let (handle, task) = supervisor.spawn(coordinator.token());
    handle.wait_for(ConnectionState::Connected).await;
    acceptor.write(&node, Value::Double(2.0), Utc::now()).unwrap();

    endpoint.refuse_all(true);
    endpoint.drop_link();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let err = acceptor.write(&node, Value::Double(3.0), Utc::now()).unwrap_err();
    assert!(matches!(err, NodeError::EndpointUnavailable));
    assert_eq!(space.read_value(&node).unwrap().value, Value::Double(2.0));

    let stats = acceptor.stats();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.unavailable, 2);

    coordinator.initiate_shutdown();
    task.await.unwrap();
}
