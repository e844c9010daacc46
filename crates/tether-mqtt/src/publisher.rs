// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Publication sinks.
//!
//! The bridge talks to a [`Publisher`]. In production that is a
//! [`SupervisedPublisher`], which publishes over whatever link the MQTT
//! supervisor currently holds and fails fast while there is none.

use std::time::Duration;

use async_trait::async_trait;
use tether_core::error::{PublishError, PublishResult};
use tether_core::supervisor::SupervisorHandle;
use tracing::trace;

use crate::client::MqttLink;
use crate::codec::PublicationRecord;

/// Default time allowed for a delivery acknowledgement.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Something that can deliver a publication record.
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    /// Delivers one record.
    ///
    /// Returns once the broker acknowledged the record (QoS 1) or the client
    /// handed it to the network (QoS 0).
    async fn publish(&self, record: &PublicationRecord) -> PublishResult<()>;
}

// =============================================================================
// SupervisedPublisher
// =============================================================================

/// Publishes through the MQTT supervisor's current link.
#[derive(Debug, Clone)]
pub struct SupervisedPublisher {
    handle: SupervisorHandle<MqttLink>,
    publish_timeout: Duration,
}

impl SupervisedPublisher {
    /// Creates a publisher over a supervisor handle.
    pub fn new(handle: SupervisorHandle<MqttLink>) -> Self {
        Self {
            handle,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    /// Sets the acknowledgement timeout.
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Returns the acknowledgement timeout.
    pub fn publish_timeout(&self) -> Duration {
        self.publish_timeout
    }
}

#[async_trait]
impl Publisher for SupervisedPublisher {
    async fn publish(&self, record: &PublicationRecord) -> PublishResult<()> {
        let link = self
            .handle
            .connection()
            .ok_or(PublishError::BrokerUnavailable)?;

        let delivery = link.publish(&record.topic, record.qos, record.retain, record.payload.clone());
        match tokio::time::timeout(self.publish_timeout, delivery).await {
            Ok(result) => {
                if result.is_ok() {
                    trace!(topic = %record.topic, seq = record.event.sequence, "Publication acknowledged");
                }
                result
            }
            Err(_) => Err(PublishError::timeout(self.publish_timeout)),
        }
    }
}
