// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection supervision.
//!
//! A [`Supervisor`] owns one [`Endpoint`] and keeps it connected for the
//! lifetime of the process:
//!
//! ```text
//!                 connect ok
//!   Disconnected ──────────► Connecting ──────────► Connected
//!        ▲                       │                      │
//!        │ backoff               │ refused / timeout    │ I/O error
//!        │                       ▼                      │
//!        └──────────────────── Failing                  │
//!        ▲                                              │
//!        └──────────────────────────────────────────────┘
//! ```
//!
//! The current state is published through a `watch` channel. While
//! `Connected`, the live connection sits in a shared slot that other tasks
//! read through [`SupervisorHandle::connection`]. The slot is cleared by an
//! RAII guard on every exit from `Connected`, including task cancellation.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{EndpointError, EndpointResult};
use crate::retry::{Backoff, RetryConfig};
use crate::shutdown::ShutdownToken;

// =============================================================================
// ConnectionState
// =============================================================================

/// Connection state of a supervised endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected. Initial state and the state after a loss or close.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Connected. The only state that permits traffic.
    Connected,
    /// The last attempt failed; waiting out the backoff delay.
    Failing,
}

impl ConnectionState {
    /// Returns `true` if connected.
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns the state name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failing => "failing",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Endpoint
// =============================================================================

/// A remote or local endpoint a supervisor can keep connected.
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    /// The live connection produced by [`Endpoint::connect`].
    type Connection: Send + Sync + 'static;

    /// Returns the endpoint name for logs and health reports.
    fn name(&self) -> &str;

    /// Establishes a connection.
    async fn connect(&self) -> EndpointResult<Self::Connection>;

    /// Resolves when the connection is lost, with the reason.
    async fn wait_closed(&self, connection: &Self::Connection) -> EndpointError;

    /// Closes the connection cleanly.
    async fn close(&self, connection: &Self::Connection);
}

// =============================================================================
// Configuration
// =============================================================================

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Upper bound for one connection attempt.
    pub connect_timeout: Duration,

    /// Reconnect delays.
    pub backoff: RetryConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            backoff: RetryConfig::reconnect(),
        }
    }
}

impl SupervisorConfig {
    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the reconnect policy.
    pub fn with_backoff(mut self, backoff: RetryConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

// =============================================================================
// Statistics & Health
// =============================================================================

#[derive(Debug, Default)]
struct AtomicSupervisorStats {
    connects: AtomicU64,
    failures: AtomicU64,
    disconnects: AtomicU64,
    consecutive_failures: AtomicU32,
}

#[derive(Debug)]
struct StateClock {
    since: Instant,
    since_wall: DateTime<Utc>,
    last_error: Option<String>,
}

/// Point-in-time health of a supervised endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Endpoint name.
    pub endpoint: String,
    /// Current state.
    pub state: ConnectionState,
    /// Wall-clock time the current state was entered.
    pub since: DateTime<Utc>,
    /// Time spent in the current state.
    pub time_in_state: Duration,
    /// Failed connection attempts since the last successful connect.
    pub consecutive_failures: u32,
    /// Successful connects.
    pub total_connects: u64,
    /// Failed connection attempts.
    pub total_failures: u64,
    /// Losses of an established connection.
    pub total_disconnects: u64,
    /// Most recent error, if any.
    pub last_error: Option<String>,
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} for {:?} (connects={}, failures={}, disconnects={})",
            self.endpoint,
            self.state,
            self.time_in_state,
            self.total_connects,
            self.total_failures,
            self.total_disconnects
        )
    }
}

// =============================================================================
// Shared state
// =============================================================================

struct Shared<C> {
    name: String,
    state_tx: watch::Sender<ConnectionState>,
    slot: RwLock<Option<Arc<C>>>,
    stats: AtomicSupervisorStats,
    clock: Mutex<StateClock>,
}

impl<C> Shared<C> {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            let mut clock = self.clock.lock();
            clock.since = Instant::now();
            clock.since_wall = Utc::now();
            debug!(endpoint = %self.name, from = %previous, to = %state, "Connection state changed");
        }
    }

    fn record_error(&self, error: &EndpointError) {
        self.clock.lock().last_error = Some(error.to_string());
    }
}

/// Holds the live connection in the shared slot while `Connected`.
struct ConnectionGuard<'a, C> {
    shared: &'a Shared<C>,
}

impl<'a, C> ConnectionGuard<'a, C> {
    fn install(shared: &'a Shared<C>, connection: Arc<C>) -> Self {
        *shared.slot.write() = Some(connection);
        shared.set_state(ConnectionState::Connected);
        Self { shared }
    }
}

impl<C> Drop for ConnectionGuard<'_, C> {
    fn drop(&mut self) {
        self.shared.slot.write().take();
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Keeps one endpoint connected with capped exponential backoff.
pub struct Supervisor<E: Endpoint> {
    endpoint: Arc<E>,
    config: SupervisorConfig,
    shared: Arc<Shared<E::Connection>>,
}

impl<E: Endpoint> Supervisor<E> {
    /// Creates a supervisor in the `Disconnected` state.
    pub fn new(endpoint: E, config: SupervisorConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self::with_state(endpoint, config, state_tx)
    }

    /// Creates a supervisor publishing its state on an existing channel.
    ///
    /// Lets components that the endpoint itself depends on observe the state
    /// before the supervisor exists.
    pub fn with_state(
        endpoint: E,
        config: SupervisorConfig,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let name = endpoint.name().to_string();
        state_tx.send_replace(ConnectionState::Disconnected);

        Self {
            endpoint: Arc::new(endpoint),
            config,
            shared: Arc::new(Shared {
                name,
                state_tx,
                slot: RwLock::new(None),
                stats: AtomicSupervisorStats::default(),
                clock: Mutex::new(StateClock {
                    since: Instant::now(),
                    since_wall: Utc::now(),
                    last_error: None,
                }),
            }),
        }
    }

    /// Returns a handle for observing this supervisor.
    pub fn handle(&self) -> SupervisorHandle<E::Connection> {
        SupervisorHandle {
            shared: self.shared.clone(),
        }
    }

    /// Returns the supervised endpoint.
    pub fn endpoint(&self) -> &Arc<E> {
        &self.endpoint
    }

    /// Spawns the supervisor loop onto the current runtime.
    pub fn spawn(
        self,
        shutdown: ShutdownToken,
    ) -> (SupervisorHandle<E::Connection>, tokio::task::JoinHandle<()>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run(shutdown));
        (handle, task)
    }

    /// Runs until shutdown. Never returns on its own.
    pub async fn run(self, shutdown: ShutdownToken) {
        let shared = &*self.shared;
        let mut backoff = Backoff::new(self.config.backoff.clone());

        info!(endpoint = %shared.name, "Supervisor started");

        while !shutdown.is_cancelled() {
            shared.set_state(ConnectionState::Connecting);

            let attempt = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = tokio::time::timeout(self.config.connect_timeout, self.endpoint.connect()) => result,
            };

            let result = match attempt {
                Ok(result) => result,
                Err(_) => Err(EndpointError::timeout(
                    shared.name.clone(),
                    self.config.connect_timeout,
                )),
            };

            match result {
                Ok(connection) => {
                    let connection = Arc::new(connection);
                    backoff.reset();
                    shared.stats.connects.fetch_add(1, Ordering::Relaxed);
                    shared.stats.consecutive_failures.store(0, Ordering::Relaxed);
                    info!(endpoint = %shared.name, "Connected");

                    let lost = {
                        let _guard = ConnectionGuard::install(shared, connection.clone());
                        tokio::select! {
                            _ = shutdown.cancelled() => None,
                            error = self.endpoint.wait_closed(&connection) => Some(error),
                        }
                    };

                    match lost {
                        None => {
                            self.endpoint.close(&connection).await;
                            break;
                        }
                        Some(error) => {
                            shared.stats.disconnects.fetch_add(1, Ordering::Relaxed);
                            shared.record_error(&error);
                            warn!(endpoint = %shared.name, error = %error, "Connection lost");
                        }
                    }
                }
                Err(error) => {
                    shared.stats.failures.fetch_add(1, Ordering::Relaxed);
                    let consecutive = shared.stats.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    shared.record_error(&error);
                    shared.set_state(ConnectionState::Failing);
                    warn!(
                        endpoint = %shared.name,
                        error = %error,
                        consecutive_failures = consecutive,
                        "Connection attempt failed"
                    );
                }
            }

            let delay = backoff.next_delay();
            debug!(endpoint = %shared.name, delay_ms = delay.as_millis() as u64, "Reconnecting after backoff");

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        shared.set_state(ConnectionState::Disconnected);
        info!(endpoint = %shared.name, "Supervisor stopped");
    }
}

impl<E: Endpoint> fmt::Debug for Supervisor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("endpoint", &self.shared.name)
            .field("state", &*self.shared.state_tx.borrow())
            .finish()
    }
}

// =============================================================================
// SupervisorHandle
// =============================================================================

/// A cloneable view of a running supervisor.
pub struct SupervisorHandle<C> {
    shared: Arc<Shared<C>>,
}

impl<C> Clone for SupervisorHandle<C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<C> SupervisorHandle<C> {
    /// Returns the endpoint name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Returns `true` if connected.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Returns the live connection while `Connected`.
    pub fn connection(&self) -> Option<Arc<C>> {
        self.shared.slot.read().clone()
    }

    /// Waits until the supervisor reaches `state`.
    pub async fn wait_for(&self, state: ConnectionState) {
        let mut receiver = self.subscribe();
        let _ = receiver.wait_for(|current| *current == state).await;
    }

    /// Returns a health report.
    pub fn health(&self) -> HealthReport {
        let clock = self.shared.clock.lock();
        let stats = &self.shared.stats;

        HealthReport {
            endpoint: self.shared.name.clone(),
            state: self.state(),
            since: clock.since_wall,
            time_in_state: clock.since.elapsed(),
            consecutive_failures: stats.consecutive_failures.load(Ordering::Relaxed),
            total_connects: stats.connects.load(Ordering::Relaxed),
            total_failures: stats.failures.load(Ordering::Relaxed),
            total_disconnects: stats.disconnects.load(Ordering::Relaxed),
            last_error: clock.last_error.clone(),
        }
    }
}

impl<C> fmt::Debug for SupervisorHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorHandle")
            .field("endpoint", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownCoordinator;
    use std::collections::VecDeque;
    use tokio::sync::Notify;

    struct ScriptedEndpoint {
        script: Mutex<VecDeque<EndpointResult<()>>>,
        drop_link: Notify,
        closed: AtomicU32,
    }

    impl ScriptedEndpoint {
        fn new(script: Vec<EndpointResult<()>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                drop_link: Notify::new(),
                closed: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Endpoint for Arc<ScriptedEndpoint> {
        type Connection = u32;

        fn name(&self) -> &str {
            "scripted"
        }

        async fn connect(&self) -> EndpointResult<u32> {
            let next = self.script.lock().pop_front();
            match next {
                Some(Ok(())) | None => Ok(7),
                Some(Err(e)) => Err(e),
            }
        }

        async fn wait_closed(&self, _connection: &u32) -> EndpointError {
            self.drop_link.notified().await;
            EndpointError::io("scripted", "link dropped")
        }

        async fn close(&self, _connection: &u32) {
            self.closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Failing.to_string(), "failing");
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert_eq!(
            serde_json::to_string(&ConnectionState::Disconnected).unwrap(),
            "\"disconnected\""
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_state_publishes_on_existing_channel() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Failing);
        let endpoint = Arc::new(ScriptedEndpoint::new(vec![]));
        let supervisor =
            Supervisor::with_state(endpoint, SupervisorConfig::default(), state_tx);
        assert_eq!(*state_rx.borrow(), ConnectionState::Disconnected);

        let coordinator = ShutdownCoordinator::new();
        let (handle, task) = supervisor.spawn(coordinator.token());
        handle.wait_for(ConnectionState::Connected).await;
        assert_eq!(*state_rx.borrow(), ConnectionState::Connected);

        coordinator.initiate_shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_and_exposes_connection() {
        let endpoint = Arc::new(ScriptedEndpoint::new(vec![]));
        let supervisor = Supervisor::new(endpoint.clone(), SupervisorConfig::default());
        let coordinator = ShutdownCoordinator::new();
        let (handle, task) = supervisor.spawn(coordinator.token());

        handle.wait_for(ConnectionState::Connected).await;
        assert_eq!(handle.connection().as_deref(), Some(&7));
        assert_eq!(handle.health().total_connects, 1);

        coordinator.initiate_shutdown();
        task.await.unwrap();
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert!(handle.connection().is_none());
        assert_eq!(endpoint.closed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_enter_failing_then_recover() {
        let endpoint = Arc::new(ScriptedEndpoint::new(vec![
            Err(EndpointError::refused("scripted", "no listener")),
            Err(EndpointError::refused("scripted", "no listener")),
        ]));
        let supervisor = Supervisor::new(endpoint, SupervisorConfig::default());
        let coordinator = ShutdownCoordinator::new();
        let (handle, _task) = supervisor.spawn(coordinator.token());

        handle.wait_for(ConnectionState::Failing).await;
        assert!(handle.connection().is_none());

        let started = Instant::now();
        handle.wait_for(ConnectionState::Connected).await;
        // 1 s + 2 s of backoff, each jittered by at most 20%.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(2400), "{:?}", waited);

        let health = handle.health();
        assert_eq!(health.total_failures, 2);
        assert_eq!(health.consecutive_failures, 0);
        assert!(health.last_error.unwrap().contains("no listener"));

        coordinator.initiate_shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_counts_as_failure() {
        struct Hanging;

        #[async_trait]
        impl Endpoint for Hanging {
            type Connection = ();

            fn name(&self) -> &str {
                "hanging"
            }

            async fn connect(&self) -> EndpointResult<()> {
                std::future::pending().await
            }

            async fn wait_closed(&self, _connection: &()) -> EndpointError {
                std::future::pending().await
            }

            async fn close(&self, _connection: &()) {}
        }

        let config = SupervisorConfig::default().with_connect_timeout(Duration::from_secs(2));
        let supervisor = Supervisor::new(Hanging, config);
        let coordinator = ShutdownCoordinator::new();
        let (handle, _task) = supervisor.spawn(coordinator.token());

        handle.wait_for(ConnectionState::Failing).await;
        let health = handle.health();
        assert_eq!(health.total_failures, 1);
        assert!(health.last_error.unwrap().contains("timed out"));

        coordinator.initiate_shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loss_clears_slot_and_reconnects() {
        let endpoint = Arc::new(ScriptedEndpoint::new(vec![]));
        let supervisor = Supervisor::new(endpoint.clone(), SupervisorConfig::default());
        let coordinator = ShutdownCoordinator::new();
        let (handle, _task) = supervisor.spawn(coordinator.token());

        handle.wait_for(ConnectionState::Connected).await;
        endpoint.drop_link.notify_one();
        handle.wait_for(ConnectionState::Disconnected).await;
        assert!(handle.connection().is_none());

        handle.wait_for(ConnectionState::Connected).await;
        let health = handle.health();
        assert_eq!(health.total_disconnects, 1);
        assert_eq!(health.total_connects, 2);

        coordinator.initiate_shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_releases_connection() {
        let endpoint = Arc::new(ScriptedEndpoint::new(vec![]));
        let supervisor = Supervisor::new(endpoint, SupervisorConfig::default());
        let coordinator = ShutdownCoordinator::new();
        let (handle, task) = supervisor.spawn(coordinator.token());

        handle.wait_for(ConnectionState::Connected).await;
        task.abort();
        let _ = task.await;
        settle().await;

        assert!(handle.connection().is_none());
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }
}
