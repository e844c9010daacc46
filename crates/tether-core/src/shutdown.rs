// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Graceful shutdown coordination.
//!
//! A [`ShutdownCoordinator`] is owned by the runtime. Every long-running task
//! gets a [`ShutdownToken`] and selects on [`ShutdownToken::cancelled`]. The
//! flag is held in a `watch` channel, so a token created or polled after
//! shutdown was initiated still observes it.
//!
//! # Example
//!
//! ```
//! use tether_core::shutdown::ShutdownCoordinator;
//!
//! # tokio_test_block_on(async {
//! let coordinator = ShutdownCoordinator::new();
//! let token = coordinator.token();
//!
//! coordinator.initiate_shutdown();
//! token.cancelled().await;
//! assert!(token.is_cancelled());
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::io;

use tokio::sync::watch;
use tracing::info;

// =============================================================================
// ShutdownCoordinator
// =============================================================================

/// Coordinates graceful shutdown across the gateway's tasks.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    sender: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    /// Creates a new shutdown coordinator.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Returns a token observing this coordinator.
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            receiver: self.sender.subscribe(),
        }
    }

    /// Initiates shutdown. Later calls are no-ops.
    pub fn initiate_shutdown(&self) {
        let changed = self.sender.send_if_modified(|flag| {
            if *flag {
                false
            } else {
                *flag = true;
                true
            }
        });
        if changed {
            info!("Shutdown initiated");
        }
    }

    /// Returns `true` if shutdown has been initiated.
    pub fn is_shutdown_initiated(&self) -> bool {
        *self.sender.borrow()
    }

    /// Waits for SIGTERM, SIGINT or SIGQUIT (Ctrl+C elsewhere), then
    /// initiates shutdown.
    ///
    /// Returns early if shutdown is initiated by other means.
    pub async fn wait_for_signal(&self) -> io::Result<()> {
        let token = self.token();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigquit = signal(SignalKind::quit())?;

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
                _ = sigquit.recv() => info!("Received SIGQUIT"),
                _ = token.cancelled() => return Ok(()),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result?;
                    info!("Received Ctrl+C");
                }
                _ = token.cancelled() => return Ok(()),
            }
        }

        self.initiate_shutdown();
        Ok(())
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ShutdownToken
// =============================================================================

/// A cloneable handle that observes shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    receiver: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Resolves once shutdown has been initiated.
    ///
    /// Also resolves if the coordinator is dropped.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        let _ = receiver.wait_for(|flag| *flag).await;
    }

    /// Returns `true` if shutdown has been initiated.
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }
}
