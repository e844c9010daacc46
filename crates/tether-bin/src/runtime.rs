// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Gateway runtime orchestration.
//!
//! The runtime wires the gateway together from a validated configuration:
//!
//! - Address space, write acceptor and OPC UA endpoint supervisor
//! - MQTT endpoint supervisor and the supervised publisher
//! - Change channel, subscription engine and protocol bridge
//! - Optional sensor simulator and the periodic health reporter
//!
//! Shutdown runs in two phases. The pipeline (engine, simulator, health
//! reporter, bridge) stops first and the bridge drains within the grace
//! period while the broker link is still up. Only then are both endpoint
//! supervisors told to close their connections.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use tether_config::{load_config, TetherConfig};
use tether_core::bus::{change_channel, ChangeReceiver};
use tether_core::shutdown::{ShutdownCoordinator, ShutdownToken};
use tether_core::supervisor::{ConnectionState, Endpoint, Supervisor, SupervisorHandle};
use tether_mqtt::{MqttEndpoint, MqttLink, ProtocolBridge, SupervisedPublisher};
use tether_opcua::{AddressSpace, SensorSimulator, SubscriptionEngine, WriteAcceptor};

use crate::error::{BinError, BinResult};

#[cfg(feature = "opcua-server")]
type OpcUaEndpoint = tether_opcua::UaServerEndpoint;

#[cfg(not(feature = "opcua-server"))]
type OpcUaEndpoint = tether_opcua::LoopbackEndpoint;

// =============================================================================
// GatewayRuntime
// =============================================================================

/// The main gateway runtime.
pub struct GatewayRuntime {
    config: Arc<TetherConfig>,
    shutdown: ShutdownCoordinator,
    simulate: bool,
}

impl GatewayRuntime {
    /// Creates a new gateway runtime.
    pub fn new(config: TetherConfig) -> Self {
        Self {
            config: Arc::new(config),
            shutdown: ShutdownCoordinator::new(),
            simulate: false,
        }
    }

    /// Forces the sensor simulator on regardless of the configuration.
    pub fn with_simulator(mut self, enabled: bool) -> Self {
        self.simulate = enabled;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &TetherConfig {
        &self.config
    }

    /// Returns `true` if the simulator will run.
    pub fn simulator_enabled(&self) -> bool {
        self.simulate || self.config.simulator.enabled
    }

    /// Returns the coordinator that stops [`GatewayRuntime::run`].
    pub fn shutdown_coordinator(&self) -> ShutdownCoordinator {
        self.shutdown.clone()
    }

    /// Runs the gateway until a termination signal or until shutdown is
    /// initiated through [`GatewayRuntime::shutdown_coordinator`].
    pub async fn run(self) -> BinResult<()> {
        info!(
            version = crate::VERSION,
            gateway_id = %self.config.gateway.id,
            "Starting tether gateway"
        );

        let gateway = self.assemble(opcua_endpoint)?;
        let running = gateway.start(&self.shutdown);

        info!(
            opcua = %self.config.opcua.endpoint,
            mqtt = %self.config.mqtt.settings().broker_address(),
            nodes = self.config.nodes.len(),
            simulator = self.simulator_enabled(),
            "tether gateway is ready"
        );

        let signal = self.shutdown.wait_for_signal().await;
        running.stop().await;

        info!("tether gateway shutdown complete");
        signal.map_err(|e| BinError::io(format!("Signal handler failed: {}", e)))
    }

    /// Builds every component without starting any task.
    ///
    /// `make_endpoint` receives the populated address space and the write
    /// acceptor the endpoint must route session writes through.
    pub fn assemble<E, F>(&self, make_endpoint: F) -> BinResult<Gateway<E>>
    where
        E: Endpoint,
        F: FnOnce(&TetherConfig, Arc<AddressSpace>, Arc<WriteAcceptor>) -> E,
    {
        let config = &*self.config;

        let space = Arc::new(AddressSpace::new());
        for definition in config.node_definitions()? {
            space.add_node(definition)?;
        }

        // Writes are gated on the OPC UA endpoint, whose supervisor does not
        // exist yet; share the state channel up front.
        let (opcua_state_tx, opcua_state_rx) = watch::channel(ConnectionState::Disconnected);
        let acceptor = Arc::new(WriteAcceptor::new(space.clone(), opcua_state_rx));
        let opcua = Supervisor::with_state(
            make_endpoint(config, space.clone(), acceptor.clone()),
            config.opcua.supervisor_config(),
            opcua_state_tx,
        );

        let mqtt = Supervisor::new(
            MqttEndpoint::new(config.mqtt.settings()),
            config.mqtt.supervisor_config(),
        );
        let publisher = SupervisedPublisher::new(mqtt.handle())
            .with_publish_timeout(config.mqtt.publish_timeout());

        let (sender, events) = change_channel(config.sampling.channel_capacity);
        let engine = Arc::new(SubscriptionEngine::new(
            space.clone(),
            sender,
            config.engine_config(),
        ));
        for item in config.monitored_items() {
            engine.add_item(item)?;
        }

        let bridge = Arc::new(ProtocolBridge::new(
            Arc::new(publisher),
            config.topic_mapper(),
            config.bridge_config()?,
        ));

        let simulator = self.simulator_enabled().then(|| {
            Arc::new(SensorSimulator::new(
                acceptor.clone(),
                config.simulator.sensor_specs(),
                config.simulator.interval(),
            ))
        });

        info!(
            nodes = space.len(),
            items = engine.item_count(),
            simulator = simulator.is_some(),
            "Gateway components initialized"
        );

        Ok(Gateway {
            space,
            acceptor,
            opcua,
            mqtt,
            engine,
            bridge,
            events,
            simulator,
            health_interval: config.health.report_interval(),
        })
    }
}

#[cfg(feature = "opcua-server")]
fn opcua_endpoint(
    config: &TetherConfig,
    space: Arc<AddressSpace>,
    acceptor: Arc<WriteAcceptor>,
) -> OpcUaEndpoint {
    OpcUaEndpoint::new(config.opcua.server_settings(), space, acceptor)
}

#[cfg(not(feature = "opcua-server"))]
fn opcua_endpoint(
    _config: &TetherConfig,
    _space: Arc<AddressSpace>,
    _acceptor: Arc<WriteAcceptor>,
) -> OpcUaEndpoint {
    warn!("Built without the opcua-server feature, serving the address space in-process only");
    OpcUaEndpoint::new()
}

// =============================================================================
// Gateway
// =============================================================================

/// Assembled, not yet started, gateway components.
pub struct Gateway<E: Endpoint> {
    space: Arc<AddressSpace>,
    acceptor: Arc<WriteAcceptor>,
    opcua: Supervisor<E>,
    mqtt: Supervisor<MqttEndpoint>,
    engine: Arc<SubscriptionEngine>,
    bridge: Arc<ProtocolBridge>,
    events: ChangeReceiver,
    simulator: Option<Arc<SensorSimulator>>,
    health_interval: Duration,
}

impl<E: Endpoint> Gateway<E> {
    /// Returns the address space.
    pub fn address_space(&self) -> &Arc<AddressSpace> {
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

    /// Returns the protocol bridge.
    pub fn bridge(&self) -> &Arc<ProtocolBridge> {
        &self.bridge
    }

    /// Returns the simulator, if enabled.
    pub fn simulator(&self) -> Option<&Arc<SensorSimulator>> {
        self.simulator.as_ref()
    }

    /// Spawns every task. `shutdown` stops the pipeline; the endpoint
    /// supervisors follow once the bridge has drained.
    pub fn start(self, shutdown: &ShutdownCoordinator) -> RunningGateway<E::Connection> {
        let transport = ShutdownCoordinator::new();

        let (opcua, opcua_task) = self.opcua.spawn(transport.token());
        let (mqtt, mqtt_task) = self.mqtt.spawn(transport.token());

        let mut pipeline = vec![(
            "subscription engine",
            tokio::spawn(self.engine.clone().run(shutdown.token())),
        )];

        if let Some(simulator) = &self.simulator {
            pipeline.push((
                "sensor simulator",
                tokio::spawn(simulator.clone().run(shutdown.token())),
            ));
        }

        let reporter = HealthReporter {
            opcua: opcua.clone(),
            mqtt: mqtt.clone(),
            engine: self.engine.clone(),
            bridge: self.bridge.clone(),
            acceptor: self.acceptor.clone(),
            simulator: self.simulator.clone(),
        };
        pipeline.push((
            "health reporter",
            tokio::spawn(reporter.run(self.health_interval, shutdown.token())),
        ));

        let bridge_task = tokio::spawn(self.bridge.clone().run(self.events, shutdown.token()));

        RunningGateway {
            shutdown: shutdown.clone(),
            transport,
            opcua,
            mqtt,
            acceptor: self.acceptor,
            bridge: self.bridge,
            pipeline,
            bridge_task,
            supervisors: vec![("opcua supervisor", opcua_task), ("mqtt supervisor", mqtt_task)],
        }
    }
}

// =============================================================================
// RunningGateway
// =============================================================================

/// Handles to a started gateway.
pub struct RunningGateway<C> {
    shutdown: ShutdownCoordinator,
    transport: ShutdownCoordinator,
    opcua: SupervisorHandle<C>,
    mqtt: SupervisorHandle<MqttLink>,
    acceptor: Arc<WriteAcceptor>,
    bridge: Arc<ProtocolBridge>,
    pipeline: Vec<(&'static str, JoinHandle<()>)>,
    bridge_task: JoinHandle<()>,
    supervisors: Vec<(&'static str, JoinHandle<()>)>,
}

impl<C: Send + Sync + 'static> RunningGateway<C> {
    /// Returns the OPC UA supervisor handle.
    pub fn opcua(&self) -> &SupervisorHandle<C> {
        &self.opcua
    }

    /// Returns the MQTT supervisor handle.
    pub fn mqtt(&self) -> &SupervisorHandle<MqttLink> {
        &self.mqtt
    }

    /// Returns the write acceptor.
    pub fn acceptor(&self) -> &Arc<WriteAcceptor> {
        &self.acceptor
    }

    /// Returns the protocol bridge.
    pub fn bridge(&self) -> &Arc<ProtocolBridge> {
        &self.bridge
    }

    /// Stops the pipeline, waits for the bridge to drain, then closes both
    /// endpoint connections.
    pub async fn stop(self) {
        self.shutdown.initiate_shutdown();

        for (name, task) in self.pipeline {
            join_logged(name, task).await;
        }
        join_logged("protocol bridge", self.bridge_task).await;

        self.transport.initiate_shutdown();
        for (name, task) in self.supervisors {
            join_logged(name, task).await;
        }

        info!(bridge = ?self.bridge.stats(), writes = ?self.acceptor.stats(), "Gateway stopped");
    }
}

async fn join_logged(name: &str, task: JoinHandle<()>) {
    if let Err(e) = task.await {
        warn!(task = name, error = %e, "Task ended abnormally");
    }
}

// =============================================================================
// HealthReporter
// =============================================================================

struct HealthReporter<C> {
    opcua: SupervisorHandle<C>,
    mqtt: SupervisorHandle<MqttLink>,
    engine: Arc<SubscriptionEngine>,
    bridge: Arc<ProtocolBridge>,
    acceptor: Arc<WriteAcceptor>,
    simulator: Option<Arc<SensorSimulator>>,
}

impl<C: Send + Sync + 'static> HealthReporter<C> {
    async fn run(self, interval: Duration, shutdown: ShutdownToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.report(),
            }
        }
    }

    fn report(&self) {
        let opcua = self.opcua.health();
        let mqtt = self.mqtt.health();
        let engine = self.engine.stats();
        let bridge = self.bridge.stats();
        let writes = self.acceptor.stats();

        info!(
            opcua = %opcua,
            mqtt = %mqtt,
            events = engine.events_emitted,
            suppressed = engine.suppressed,
            deferred = engine.backpressure_deferrals,
            published = bridge.published,
            retries = bridge.retries,
            dropped = bridge.dropped_total(),
            in_flight = bridge.in_flight,
            writes_accepted = writes.accepted,
            writes_refused = writes.rejected + writes.unavailable,
            simulated = self.simulator.as_ref().map(|s| s.stats().writes),
            "Gateway health"
        );

        for report in [&opcua, &mqtt] {
            if !report.state.is_connected() {
                warn!(
                    endpoint = %report.endpoint,
                    state = %report.state,
                    failures = report.consecutive_failures,
                    last_error = report.last_error.as_deref().unwrap_or("-"),
                    "Endpoint not connected"
                );
            }
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for constructing the gateway runtime.
#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    config_path: Option<PathBuf>,
    config: Option<TetherConfig>,
    simulate: bool,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration file path.
    pub fn config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the configuration directly.
    pub fn config(mut self, config: TetherConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Forces the sensor simulator on.
    pub fn simulate(mut self, enabled: bool) -> Self {
        self.simulate = enabled;
        self
    }

    /// Builds the runtime.
    pub fn build(self) -> BinResult<GatewayRuntime> {
        let config = match self.config {
            Some(cfg) => {
                cfg.validate()?;
                cfg
            }
            None => {
                let path = self
                    .config_path
                    .ok_or_else(|| BinError::config("No configuration provided"))?;

                load_config(&path).map_err(|e| {
                    BinError::from(e)
                        .with_context(format!("Failed to load config from {}", path.display()))
                })?
            }
        };

        Ok(GatewayRuntime::new(config).with_simulator(self.simulate))
    }
}

// =============================================================================
// Tests
// =============================================================================
