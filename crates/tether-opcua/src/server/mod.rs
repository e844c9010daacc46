// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA server endpoints.
//!
//! Two endpoints implement [`Endpoint`]:
//!
//! - [`LoopbackEndpoint`]: in-process, connects immediately and only closes
//!   on request. Used for simulator-only runs and tests.
//! - `UaServerEndpoint` (feature `real-transport`): hosts the address space
//!   on an OPC UA TCP endpoint.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tether_core::error::{EndpointError, EndpointResult};
use tether_core::supervisor::Endpoint;
use tokio::sync::Notify;

#[cfg(feature = "real-transport")]
mod conversion;
#[cfg(feature = "real-transport")]
mod real_transport;

#[cfg(feature = "real-transport")]
pub use real_transport::{UaServerConnection, UaServerEndpoint};

/// Default OPC UA TCP port.
pub const DEFAULT_PORT: u16 = 4840;

// =============================================================================
// ServerSettings
// =============================================================================

/// Identity and address of the hosted server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    /// Endpoint URL, e.g. `opc.tcp://0.0.0.0:4840`.
    pub endpoint_url: String,
    /// Application name shown to clients.
    pub server_name: String,
    /// Application URI.
    pub application_uri: String,
    /// Namespace URI registered for gateway nodes.
    pub namespace_uri: String,
    /// Folder under `Objects` holding the variables.
    pub folder_name: String,
    /// Directory for the server's PKI material.
    pub pki_dir: PathBuf,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            endpoint_url: format!("opc.tcp://0.0.0.0:{}", DEFAULT_PORT),
            server_name: "OPC UA Gateway Server".to_string(),
            application_uri: "urn:tether:gateway".to_string(),
            namespace_uri: "SENSOR_DATA".to_string(),
            folder_name: "Sensors".to_string(),
            pki_dir: PathBuf::from("pki"),
        }
    }
}

impl ServerSettings {
    /// Returns the `(host, port)` of the endpoint URL.
    pub fn socket_address(&self) -> EndpointResult<(String, u16)> {
        parse_endpoint_url(&self.endpoint_url)
    }
}

/// Splits an `opc.tcp://host[:port][/path]` URL into host and port.
///
/// # Examples
///
/// ```
/// use tether_opcua::server::parse_endpoint_url;
///
/// assert_eq!(
///     parse_endpoint_url("opc.tcp://0.0.0.0:4840").unwrap(),
///     ("0.0.0.0".to_string(), 4840)
/// );
/// assert_eq!(
///     parse_endpoint_url("opc.tcp://gateway/UA/Server").unwrap(),
///     ("gateway".to_string(), 4840)
/// );
/// assert!(parse_endpoint_url("http://gateway:80").is_err());
/// ```
pub fn parse_endpoint_url(url: &str) -> EndpointResult<(String, u16)> {
    let rest = url
        .trim()
        .strip_prefix("opc.tcp://")
        .ok_or_else(|| EndpointError::invalid_address(url, "expected opc.tcp:// scheme"))?;

    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(EndpointError::invalid_address(url, "missing host"));
    }

    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| EndpointError::invalid_address(url, "unterminated IPv6 literal"))?;
        let port = match tail.strip_prefix(':') {
            Some(port) => Some(port),
            None if tail.is_empty() => None,
            None => return Err(EndpointError::invalid_address(url, "unexpected text after host")),
        };
        (host, port)
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if host.is_empty() {
        return Err(EndpointError::invalid_address(url, "missing host"));
    }

    let port = match port {
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| EndpointError::invalid_address(url, "invalid port"))?,
        None => DEFAULT_PORT,
    };

    Ok((host.to_string(), port))
}

// =============================================================================
// LoopbackEndpoint
// =============================================================================

/// An in-process endpoint that is connected until told otherwise.
#[derive(Debug, Clone, Default)]
pub struct LoopbackEndpoint {
    close_requested: Arc<Notify>,
}

/// The loopback "session".
#[derive(Debug)]
pub struct LoopbackSession;

impl LoopbackEndpoint {
    /// Creates a loopback endpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the current connection as if the transport had failed.
    pub fn drop_connection(&self) {
        self.close_requested.notify_one();
    }
}

#[async_trait]
impl Endpoint for LoopbackEndpoint {
    type Connection = LoopbackSession;

    fn name(&self) -> &str {
        "opcua-loopback"
    }

    async fn connect(&self) -> EndpointResult<LoopbackSession> {
        Ok(LoopbackSession)
    }

    async fn wait_closed(&self, _connection: &LoopbackSession) -> EndpointError {
        self.close_requested.notified().await;
        EndpointError::closed(self.name())
    }

    async fn close(&self, _connection: &LoopbackSession) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::shutdown::ShutdownCoordinator;
    use tether_core::supervisor::{ConnectionState, Supervisor, SupervisorConfig};

    #[test]
    fn test_parse_endpoint_url() {
        assert_eq!(
            parse_endpoint_url("opc.tcp://[::1]:4841/path").unwrap(),
            ("::1".to_string(), 4841)
        );
        assert!(parse_endpoint_url("opc.tcp://").is_err());
        assert!(parse_endpoint_url("opc.tcp://host:notaport").is_err());
        assert!(parse_endpoint_url("opc.tcp://:4840").is_err());
    }

    #[test]
    fn test_default_settings() {
        let settings = ServerSettings::default();
        assert_eq!(settings.socket_address().unwrap(), ("0.0.0.0".to_string(), 4840));
        assert_eq!(settings.namespace_uri, "SENSOR_DATA");
    }

    #[tokio::test(start_paused = true)]
    async fn test_loopback_reconnects_after_drop() {
        let endpoint = LoopbackEndpoint::new();
        let supervisor = Supervisor::new(endpoint.clone(), SupervisorConfig::default());
        let coordinator = ShutdownCoordinator::new();
        let (handle, _task) = supervisor.spawn(coordinator.token());

        handle.wait_for(ConnectionState::Connected).await;
        endpoint.drop_connection();
        handle.wait_for(ConnectionState::Disconnected).await;
        handle.wait_for(ConnectionState::Connected).await;
        assert_eq!(handle.health().total_disconnects, 1);

        coordinator.initiate_shutdown();
    }
}
