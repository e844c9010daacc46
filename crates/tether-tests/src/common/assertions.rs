// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Custom Assertions
//!
//! Checks on publications and bridge accounting with readable failure
//! messages.

use std::time::Duration;

use chrono::{DateTime, Utc};

use tether_core::types::{StatusCode, Value};
use tether_mqtt::bridge::BridgeStats;

use super::mocks::PublishAttempt;

/// Asserts topic and decoded `{value, status, timestamp}` of a publication.
pub fn assert_publication(
    attempt: &PublishAttempt,
    topic: &str,
    value: &Value,
    status: StatusCode,
    timestamp: DateTime<Utc>,
) {
    assert_eq!(attempt.record.topic, topic, "topic of {}", attempt.record);

    let decoded = attempt.decoded();
    assert_eq!(&decoded.value, value, "value published to {}", topic);
    assert_eq!(decoded.status, status, "status published to {}", topic);
    assert_eq!(decoded.timestamp, timestamp, "timestamp published to {}", topic);
}

/// Asserts the gaps between consecutive attempts.
pub fn assert_attempt_gaps(attempts: &[PublishAttempt], expected: &[Duration]) {
    let gaps: Vec<Duration> = attempts
        .windows(2)
        .map(|pair| pair[1].at.duration_since(pair[0].at))
        .collect();
    assert_eq!(gaps, expected, "delays between publish attempts");
}

/// Asserts every received event was either published or counted as dropped.
pub fn assert_accounted(stats: &BridgeStats) {
    assert_eq!(stats.in_flight, 0, "bridge still has work in flight: {:?}", stats);
    assert_eq!(
        stats.received,
        stats.published + stats.dropped_total(),
        "unaccounted events: {:?}",
        stats
    );
}

/// Asserts the decoded sequence numbers of attempts, in order.
pub fn assert_sequences(attempts: &[PublishAttempt], expected: &[u64]) {
    let sequences: Vec<u64> = attempts.iter().map(|a| a.decoded().sequence).collect();
    assert_eq!(sequences, expected, "sequence numbers");
}
