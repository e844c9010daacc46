// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! rumqttc-backed MQTT endpoint.
//!
//! [`MqttEndpoint::connect`] drives a fresh event loop until the broker's
//! CONNACK, then hands the event loop to a driver task. The driver keeps
//! polling, resolves publish acknowledgements and reports the first
//! connection error. It never reconnects on its own: once the link is closed
//! the supervisor creates a new one.
//!
//! # Acknowledgements
//!
//! Every publish registers a waiter before its request is queued. The driver
//! pops waiters in order as `Outgoing::Publish(pkid)` events come out of the
//! event loop. QoS 0 packets (pkid 0) resolve on hand-off; QoS 1 packets
//! resolve on the matching `PUBACK`.
//!
//! # Refused publications
//!
//! rumqttc tears down the whole event loop when asked to send a packet over
//! the size limit or to a wildcard topic. Such publications are refused with
//! [`PublishError::Rejected`] before they reach the request queue.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet,
};
use tether_core::error::{EndpointError, EndpointResult, PublishError, PublishResult};
use tether_core::supervisor::Endpoint;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::MqttSettings;
use crate::codec::DeliveryGuarantee;

const ENDPOINT_NAME: &str = "mqtt";
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Ack tracking
// =============================================================================

#[derive(Default)]
struct AckTracker {
    queued: Mutex<VecDeque<oneshot::Sender<()>>>,
    inflight: Mutex<HashMap<u16, oneshot::Sender<()>>>,
}

impl AckTracker {
    fn on_outgoing_publish(&self, pkid: u16) {
        let Some(waiter) = self.queued.lock().pop_front() else {
            return;
        };
        if pkid == 0 {
            let _ = waiter.send(());
        } else {
            self.inflight.lock().insert(pkid, waiter);
        }
    }

    fn on_puback(&self, pkid: u16) {
        if let Some(waiter) = self.inflight.lock().remove(&pkid) {
            let _ = waiter.send(());
        }
    }

    fn fail_all(&self) {
        self.queued.lock().clear();
        self.inflight.lock().clear();
    }
}

// =============================================================================
// Outgoing checks
// =============================================================================

/// Encoded size of a PUBLISH packet, packet identifier included for QoS 1.
fn publish_packet_size(topic: &str, qos: DeliveryGuarantee, payload_len: usize) -> usize {
    let mut remaining = 2 + topic.len() + payload_len;
    if qos == DeliveryGuarantee::AtLeastOnce {
        remaining += 2;
    }
    let length_bytes = match remaining {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    };
    1 + length_bytes + remaining
}

fn check_outgoing(
    topic: &str,
    qos: DeliveryGuarantee,
    payload_len: usize,
    max_packet_size: usize,
) -> PublishResult<()> {
    if topic.is_empty() || topic.contains(['+', '#', '\0']) {
        return Err(PublishError::rejected(format!("invalid topic '{}'", topic)));
    }
    let size = publish_packet_size(topic, qos, payload_len);
    if size > max_packet_size {
        return Err(PublishError::rejected(format!(
            "packet of {} bytes exceeds the {} byte limit",
            size, max_packet_size
        )));
    }
    Ok(())
}

// =============================================================================
// MqttLink
// =============================================================================

/// A live broker connection.
pub struct MqttLink {
    client: AsyncClient,
    tracker: Arc<AckTracker>,
    closed: watch::Receiver<Option<String>>,
    order: tokio::sync::Mutex<()>,
    driver: JoinHandle<()>,
    max_packet_size: usize,
}

impl MqttLink {
    /// Queues a publication and returns a receiver resolved on delivery.
    ///
    /// The receiver errors if the link closes before delivery. Publications
    /// the event loop would refuse are rejected without touching the link.
    pub async fn enqueue(
        &self,
        topic: &str,
        qos: DeliveryGuarantee,
        retain: bool,
        payload: Vec<u8>,
    ) -> PublishResult<oneshot::Receiver<()>> {
        check_outgoing(topic, qos, payload.len(), self.max_packet_size)?;
        if self.is_closed() {
            return Err(PublishError::BrokerUnavailable);
        }

        let (tx, rx) = oneshot::channel();
        // Waiters and requests must enter their queues in the same order.
        let _order = self.order.lock().await;
        self.tracker.queued.lock().push_back(tx);

        if let Err(e) = self.client.publish(topic, qos.into(), retain, payload).await {
            self.tracker.queued.lock().pop_back();
            debug!(topic, error = %e, "MQTT request queue closed");
            return Err(PublishError::BrokerUnavailable);
        }
        Ok(rx)
    }

    /// Publishes and waits for the delivery acknowledgement.
    pub async fn publish(
        &self,
        topic: &str,
        qos: DeliveryGuarantee,
        retain: bool,
        payload: Vec<u8>,
    ) -> PublishResult<()> {
        let ack = self.enqueue(topic, qos, retain, payload).await?;
        ack.await.map_err(|_| PublishError::BrokerUnavailable)
    }

    /// Returns `true` once the driver has stopped.
    pub fn is_closed(&self) -> bool {
        self.closed.borrow().is_some()
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl fmt::Debug for MqttLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttLink")
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn drive(
    mut eventloop: EventLoop,
    tracker: Arc<AckTracker>,
    closed: watch::Sender<Option<String>>,
) {
    let reason = loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => tracker.on_outgoing_publish(pkid),
            Ok(Event::Incoming(Packet::PubAck(ack))) => tracker.on_puback(ack.pkid),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break "disconnected".to_string(),
            Ok(_) => {}
            Err(e) => break e.to_string(),
        }
    };

    tracker.fail_all();
    closed.send_replace(Some(reason));
}

// =============================================================================
// MqttEndpoint
// =============================================================================

/// The broker as a supervised endpoint.
#[derive(Debug, Clone)]
pub struct MqttEndpoint {
    settings: MqttSettings,
}

impl MqttEndpoint {
    /// Creates an endpoint.
    pub fn new(settings: MqttSettings) -> Self {
        Self { settings }
    }

    /// Returns the settings.
    pub fn settings(&self) -> &MqttSettings {
        &self.settings
    }
}

fn map_connection_error(error: ConnectionError) -> EndpointError {
    match error {
        ConnectionError::ConnectionRefused(code) => {
            EndpointError::refused(ENDPOINT_NAME, format!("{:?}", code))
        }
        ConnectionError::Io(e) => EndpointError::from_io(ENDPOINT_NAME, &e),
        ConnectionError::NetworkTimeout => EndpointError::io(ENDPOINT_NAME, "network timeout"),
        other => EndpointError::io(ENDPOINT_NAME, other.to_string()),
    }
}

#[async_trait]
impl Endpoint for MqttEndpoint {
    type Connection = MqttLink;

    fn name(&self) -> &str {
        ENDPOINT_NAME
    }

    async fn connect(&self) -> EndpointResult<MqttLink> {
        let (client, mut eventloop) =
            AsyncClient::new(self.settings.to_options(), self.settings.request_capacity.max(1));

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(EndpointError::refused(ENDPOINT_NAME, format!("{:?}", ack.code)));
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => return Err(map_connection_error(e)),
            }
        }

        info!(broker = %self.settings.broker_address(), client_id = %self.settings.client_id, "Connected to MQTT broker");

        let tracker = Arc::new(AckTracker::default());
        let (closed_tx, closed) = watch::channel(None);
        let driver = tokio::spawn(drive(eventloop, tracker.clone(), closed_tx));

        Ok(MqttLink {
            client,
            tracker,
            closed,
            order: tokio::sync::Mutex::new(()),
            driver,
            max_packet_size: self.settings.max_packet_size,
        })
    }

    async fn wait_closed(&self, connection: &MqttLink) -> EndpointError {
        let mut closed = connection.closed.clone();
        let reason = match closed.wait_for(|reason| reason.is_some()).await {
            Ok(reason) => reason.clone().unwrap_or_default(),
            Err(_) => "driver stopped".to_string(),
        };
        EndpointError::io(ENDPOINT_NAME, reason)
    }

    async fn close(&self, connection: &MqttLink) {
        if let Err(e) = connection.client.disconnect().await {
            debug!(error = %e, "MQTT disconnect request not queued");
        }

        let mut closed = connection.closed.clone();
        if tokio::time::timeout(DISCONNECT_TIMEOUT, closed.wait_for(|reason| reason.is_some()))
            .await
            .is_err()
        {
            warn!("MQTT driver did not stop in time");
        }
        connection.driver.abort();
        info!(broker = %self.settings.broker_address(), "Disconnected from MQTT broker");
    }
}
