// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA server endpoint backed by the `opcua` crate.
//!
//! Each successful connect builds a fresh anonymous server (security policy
//! `None`), registers the gateway namespace, creates the variables folder
//! under `Objects` and one variable per address space node. Variable reads go
//! straight to the address space snapshot, writes go through the
//! [`WriteAcceptor`].
//!
//! The server runs on its own thread with its own runtime. The endpoint is
//! considered closed once that thread exits.
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_opcua::server::{ServerSettings, UaServerEndpoint};
//!
//! let endpoint = UaServerEndpoint::new(ServerSettings::default(), space, acceptor);
//! let supervisor = Supervisor::new(endpoint, SupervisorConfig::default());
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opcua::server::prelude::{
    AttrFnGetter, AttrFnSetter, NodeId as UaNodeId, Server, ServerBuilder, VariableBuilder,
};
use opcua::sync::RwLock as OpcUaRwLock;
use tether_core::error::{EndpointError, EndpointResult};
use tether_core::supervisor::Endpoint;
use tether_core::types::NodeId;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::conversion::{
    from_ua_status, from_variant, node_error_status, to_ua_data_value, to_ua_node_id,
    to_ua_write_data_type, to_variant,
};
use super::ServerSettings;
use crate::address_space::{AddressSpace, Node};
use crate::write_acceptor::WriteAcceptor;

const ENDPOINT_NAME: &str = "opcua-server";
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// UaServerEndpoint
// =============================================================================

/// Hosts the address space on an OPC UA TCP endpoint.
pub struct UaServerEndpoint {
    settings: ServerSettings,
    space: Arc<AddressSpace>,
    acceptor: Arc<WriteAcceptor>,
}

/// A running server.
pub struct UaServerConnection {
    server: Arc<OpcUaRwLock<Server>>,
    stopped: watch::Receiver<bool>,
}

/// Marks the server thread as finished, also on panic.
struct StopSignal(watch::Sender<bool>);

impl Drop for StopSignal {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

impl UaServerEndpoint {
    /// Creates a new endpoint.
    pub fn new(
        settings: ServerSettings,
        space: Arc<AddressSpace>,
        acceptor: Arc<WriteAcceptor>,
    ) -> Self {
        Self {
            settings,
            space,
            acceptor,
        }
    }

    /// Returns the server settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    fn build_server(&self, host: &str, port: u16) -> EndpointResult<Server> {
        let server = ServerBuilder::new_anonymous(self.settings.server_name.as_str())
            .application_uri(self.settings.application_uri.as_str())
            .product_uri(self.settings.application_uri.as_str())
            .host_and_port(host, port)
            .discovery_urls(vec![self.settings.endpoint_url.clone()])
            .pki_dir(self.settings.pki_dir.clone())
            .create_sample_keypair(true)
            .server()
            .ok_or_else(|| {
                EndpointError::invalid_address(
                    self.settings.endpoint_url.as_str(),
                    "OPC UA server configuration rejected",
                )
            })?;

        self.populate(&server)?;
        Ok(server)
    }

    fn populate(&self, server: &Server) -> EndpointResult<()> {
        let address_space = server.address_space();
        let mut address_space = address_space.write();

        let namespace = address_space
            .register_namespace(&self.settings.namespace_uri)
            .map_err(|_| EndpointError::io(ENDPOINT_NAME, "failed to register namespace"))?;

        let folder = address_space
            .add_folder(
                self.settings.folder_name.as_str(),
                self.settings.folder_name.as_str(),
                &UaNodeId::objects_folder_id(),
            )
            .map_err(|_| EndpointError::io(ENDPOINT_NAME, "failed to create variables folder"))?;

        for node in self.space.nodes() {
            if node.node_id().namespace_index != namespace {
                warn!(
                    node = %node.node_id(),
                    registered = namespace,
                    uri = %self.settings.namespace_uri,
                    "Node namespace differs from the registered namespace index"
                );
            }
            self.add_variable(&mut address_space, &folder, &node);
        }

        info!(
            namespace,
            variables = self.space.len(),
            folder = %self.settings.folder_name,
            "OPC UA address space populated"
        );
        Ok(())
    }

    fn add_variable(
        &self,
        address_space: &mut opcua::server::prelude::AddressSpace,
        folder: &UaNodeId,
        node: &Arc<Node>,
    ) {
        let ua_id = to_ua_node_id(node.node_id());
        let snapshot = node.read();

        let getter_space = self.space.clone();
        let getter_id = node.node_id().clone();
        let getter = AttrFnGetter::new_boxed(move |_, _, _, _, _, _| {
            getter_space
                .read_value(&getter_id)
                .map(|snapshot| Some(to_ua_data_value(&snapshot)))
                .map_err(|e| node_error_status(&e))
        });

        let acceptor = self.acceptor.clone();
        let setter_id: NodeId = node.node_id().clone();
        let setter = AttrFnSetter::new_boxed(move |_, _, _, data_value| {
            let value = data_value
                .value
                .as_ref()
                .and_then(from_variant)
                .ok_or(opcua::types::StatusCode::BadTypeMismatch)?;
            let status = from_ua_status(data_value.status);
            let timestamp = data_value
                .source_timestamp
                .map(|ts| ts.as_chrono())
                .unwrap_or_else(chrono::Utc::now);

            acceptor
                .write_with_status(&setter_id, value, status, timestamp)
                .map_err(|e| {
                    debug!(node = %setter_id, error = %e, "OPC UA write rejected");
                    node_error_status(&e)
                })
        });

        let mut builder = VariableBuilder::new(&ua_id, node.browse_name(), node.browse_name())
            .data_type(to_ua_write_data_type(node.data_type()))
            .value(to_variant(&snapshot.value))
            .organized_by(folder)
            .value_getter(getter)
            .value_setter(setter);
        if node.is_writable() {
            builder = builder.writable();
        }
        builder.insert(address_space);
    }
}

#[async_trait]
impl Endpoint for UaServerEndpoint {
    type Connection = UaServerConnection;

    fn name(&self) -> &str {
        ENDPOINT_NAME
    }

    async fn connect(&self) -> EndpointResult<UaServerConnection> {
        let (host, port) = self.settings.socket_address()?;

        // Bind failures surface here instead of inside the server thread.
        let probe = tokio::net::TcpListener::bind((host.as_str(), port))
            .await
            .map_err(|e| EndpointError::from_io(ENDPOINT_NAME, &e))?;
        drop(probe);

        let server = Arc::new(OpcUaRwLock::new(self.build_server(&host, port)?));
        let (stopped_tx, stopped) = watch::channel(false);

        let thread_server = server.clone();
        std::thread::Builder::new()
            .name("opcua-server".to_string())
            .spawn(move || {
                let _signal = StopSignal(stopped_tx);
                Server::run_server(thread_server);
            })
            .map_err(|e| EndpointError::from_io(ENDPOINT_NAME, &e))?;

        info!(endpoint = %self.settings.endpoint_url, "OPC UA server listening");
        Ok(UaServerConnection { server, stopped })
    }

    async fn wait_closed(&self, connection: &UaServerConnection) -> EndpointError {
        let mut stopped = connection.stopped.clone();
        let _ = stopped.wait_for(|done| *done).await;
        EndpointError::io(ENDPOINT_NAME, "OPC UA server stopped")
    }

    async fn close(&self, connection: &UaServerConnection) {
        connection.server.write().abort();

        let mut stopped = connection.stopped.clone();
        if tokio::time::timeout(STOP_TIMEOUT, stopped.wait_for(|done| *done))
            .await
            .is_err()
        {
            warn!("OPC UA server did not stop in time");
        } else {
            info!("OPC UA server stopped");
        }
    }
}
