// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock Implementations
//!
//! Mocks for the two seams of the gateway: the MQTT [`Publisher`] and the
//! supervised [`Endpoint`].
//!
//! Both record every interaction and can be scripted to fail, so tests can
//! verify retry schedules and supervision without a broker or a socket.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use tether_core::error::{EndpointError, EndpointResult, PublishError, PublishResult};
use tether_core::supervisor::Endpoint;
use tether_mqtt::codec::{decode_payload, DecodedPayload, PublicationRecord};
use tether_mqtt::publisher::Publisher;

// =============================================================================
// Recording Publisher
// =============================================================================

/// One publish attempt seen by [`RecordingPublisher`].
#[derive(Debug, Clone)]
pub struct PublishAttempt {
    /// When the attempt was made.
    pub at: Instant,
    /// The record as handed over by the bridge.
    pub record: PublicationRecord,
    /// Whether the attempt was reported as delivered.
    pub delivered: bool,
}

impl PublishAttempt {
    /// Decodes the attempt's payload.
    pub fn decoded(&self) -> DecodedPayload {
        decode_payload(&self.record.payload).expect("payload should decode")
    }
}

/// A scriptable publisher that records every attempt.
///
/// Results are taken from the script in order; once the script is empty the
/// fallback result is used (success unless [`RecordingPublisher::always_failing`]).
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    script: Mutex<VecDeque<PublishResult<()>>>,
    fallback: Mutex<Option<PublishError>>,
    hang_topics: Mutex<HashSet<String>>,
    attempts: Mutex<Vec<PublishAttempt>>,
}

impl RecordingPublisher {
    /// Creates a publisher that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the first `count` attempts with `error`, then succeeds.
    pub fn failing_first(count: usize, error: PublishError) -> Self {
        let publisher = Self::default();
        publisher
            .script
            .lock()
            .extend((0..count).map(|_| Err(error.clone())));
        publisher
    }

    /// Fails every attempt with `error`.
    pub fn always_failing(error: PublishError) -> Self {
        let publisher = Self::default();
        *publisher.fallback.lock() = Some(error);
        publisher
    }

    /// Never completes attempts for `topic`.
    pub fn hang_on(&self, topic: impl Into<String>) {
        self.hang_topics.lock().insert(topic.into());
    }

    /// Appends results to the script.
    pub fn push_results(&self, results: impl IntoIterator<Item = PublishResult<()>>) {
        self.script.lock().extend(results);
    }

    /// Returns every attempt in order.
    pub fn attempts(&self) -> Vec<PublishAttempt> {
        self.attempts.lock().clone()
    }

    /// Returns the delivered publications in order.
    pub fn publications(&self) -> Vec<PublishAttempt> {
        self.attempts
            .lock()
            .iter()
            .filter(|attempt| attempt.delivered)
            .cloned()
            .collect()
    }

    /// Returns the delivered publications for one topic.
    pub fn publications_to(&self, topic: &str) -> Vec<PublishAttempt> {
        self.publications()
            .into_iter()
            .filter(|attempt| attempt.record.topic == topic)
            .collect()
    }

    /// Returns the number of attempts.
    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, record: &PublicationRecord) -> PublishResult<()> {
        let hang = self.hang_topics.lock().contains(&record.topic);
        let result = if hang {
            None
        } else {
            let scripted = self.script.lock().pop_front();
            Some(scripted.unwrap_or_else(|| match &*self.fallback.lock() {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            }))
        };

        self.attempts.lock().push(PublishAttempt {
            at: Instant::now(),
            record: record.clone(),
            delivered: matches!(result, Some(Ok(()))),
        });

        match result {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }
}

// =============================================================================
// Mock Endpoint
// =============================================================================

/// Connection handed out by [`MockEndpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockConnection {
    /// 1-based connection number.
    pub id: u64,
}

#[derive(Debug, Default)]
struct MockEndpointState {
    script: Mutex<VecDeque<EndpointResult<()>>>,
    refuse_all: AtomicBool,
    drop_link: Notify,
    connect_attempts: AtomicU64,
    connects: AtomicU64,
    closes: AtomicU64,
}

/// A scriptable endpoint for supervisor tests.
///
/// Cloning shares state, so a test keeps one clone to drive the endpoint
/// while the supervisor owns the other.
#[derive(Debug, Clone, Default)]
pub struct MockEndpoint {
    name: String,
    state: Arc<MockEndpointState>,
}

impl MockEndpoint {
    /// Creates an endpoint that connects on every attempt.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::default(),
        }
    }

    /// Scripts the outcome of the next connection attempts.
    pub fn with_script(self, script: Vec<EndpointResult<()>>) -> Self {
        self.state.script.lock().extend(script);
        self
    }

    /// Refuses every attempt once the script is exhausted.
    pub fn refuse_all(&self, refuse: bool) {
        self.state.refuse_all.store(refuse, Ordering::SeqCst);
    }

    /// Drops the current connection as if the transport had failed.
    pub fn drop_link(&self) {
        self.state.drop_link.notify_one();
    }

    /// Returns the number of connection attempts.
    pub fn connect_attempts(&self) -> u64 {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    /// Returns the number of successful connects.
    pub fn connects(&self) -> u64 {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Returns the number of clean closes.
    pub fn closes(&self) -> u64 {
        self.state.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Endpoint for MockEndpoint {
    type Connection = MockConnection;

    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> EndpointResult<MockConnection> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let scripted = self.state.script.lock().pop_front();
        let outcome = match scripted {
            Some(outcome) => outcome,
            None if self.state.refuse_all.load(Ordering::SeqCst) => {
                Err(EndpointError::refused(&self.name, "refused by test"))
            }
            None => Ok(()),
        };

        outcome.map(|()| MockConnection {
            id: self.state.connects.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    async fn wait_closed(&self, _connection: &MockConnection) -> EndpointError {
        self.state.drop_link.notified().await;
        EndpointError::io(&self.name, "link dropped by test")
    }

    async fn close(&self, _connection: &MockConnection) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}
