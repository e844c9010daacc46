// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! MQTT client plumbing.
//!
//! - [`link`]: the rumqttc-backed [`MqttEndpoint`] and its live [`MqttLink`]
//! - [`MqttSettings`]: broker address, identity and session options

use std::time::Duration;

pub mod link;

pub use link::{MqttEndpoint, MqttLink};

/// Largest packet rumqttc sends or accepts unless configured otherwise.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 10 * 1024;

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Client identifier.
    pub client_id: String,
    /// Optional username.
    pub username: Option<String>,
    /// Optional password.
    pub password: Option<String>,
    /// Keep-alive interval.
    pub keep_alive: Duration,
    /// Start with a clean session.
    pub clean_session: bool,
    /// Capacity of the client's request queue.
    pub request_capacity: usize,
    /// Largest packet sent or accepted, in bytes.
    pub max_packet_size: usize,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "mqtt-broker".to_string(),
            port: 1883,
            client_id: "opcua_mqtt_gateway".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            clean_session: true,
            request_capacity: 64,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

impl MqttSettings {
    /// Creates settings for `host:port` with default options.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Sets the client identifier.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Sets credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Sets the packet size limit.
    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    /// Returns `host:port`.
    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn to_options(&self) -> rumqttc::MqttOptions {
        let mut options = rumqttc::MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(self.clean_session);
        options.set_max_packet_size(self.max_packet_size, self.max_packet_size);
        if let Some(username) = &self.username {
            options.set_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }
        options
    }
}
