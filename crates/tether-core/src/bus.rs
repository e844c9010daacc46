// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Bounded change-event channel.
//!
//! The subscription engine sends with [`ChangeSender::try_send`] and never
//! waits. A full channel is reported back so the caller can defer the
//! detection to its next tick instead of losing it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{BusError, BusResult};
use crate::message::ChangeEvent;

/// Default capacity of the change channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// Statistics
// =============================================================================

/// Statistics for the change channel.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BusStats {
    /// Events accepted into the channel.
    pub events_sent: u64,
    /// Events taken out by the receiver.
    pub events_received: u64,
    /// Sends refused because the channel was full.
    pub full_rejections: u64,
    /// Sends refused because the receiver was gone.
    pub closed_rejections: u64,
}

#[derive(Debug, Default)]
struct AtomicBusStats {
    events_sent: AtomicU64,
    events_received: AtomicU64,
    full_rejections: AtomicU64,
    closed_rejections: AtomicU64,
}

impl AtomicBusStats {
    fn snapshot(&self) -> BusStats {
        BusStats {
            events_sent: self.events_sent.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            full_rejections: self.full_rejections.load(Ordering::Relaxed),
            closed_rejections: self.closed_rejections.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Channel
// =============================================================================

/// Creates a bounded change channel.
pub fn change_channel(capacity: usize) -> (ChangeSender, ChangeReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let stats = Arc::new(AtomicBusStats::default());

    (
        ChangeSender {
            inner: tx,
            stats: stats.clone(),
        },
        ChangeReceiver { inner: rx, stats },
    )
}

/// Sending half of the change channel.
#[derive(Debug, Clone)]
pub struct ChangeSender {
    inner: mpsc::Sender<ChangeEvent>,
    stats: Arc<AtomicBusStats>,
}

impl ChangeSender {
    /// Sends an event without waiting.
    pub fn try_send(&self, event: ChangeEvent) -> BusResult<()> {
        match self.inner.try_send(event) {
            Ok(()) => {
                self.stats.events_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.full_rejections.fetch_add(1, Ordering::Relaxed);
                Err(BusError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.closed_rejections.fetch_add(1, Ordering::Relaxed);
                Err(BusError::Closed)
            }
        }
    }

    /// Returns `true` once the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Returns current statistics.
    pub fn stats(&self) -> BusStats {
        self.stats.snapshot()
    }
}

/// Receiving half of the change channel.
#[derive(Debug)]
pub struct ChangeReceiver {
    inner: mpsc::Receiver<ChangeEvent>,
    stats: Arc<AtomicBusStats>,
}

impl ChangeReceiver {
    /// Receives the next event, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        let event = self.inner.recv().await;
        if event.is_some() {
            self.stats.events_received.fetch_add(1, Ordering::Relaxed);
        }
        event
    }

    /// Receives an event if one is ready.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        let event = self.inner.try_recv().ok();
        if event.is_some() {
            self.stats.events_received.fetch_add(1, Ordering::Relaxed);
        }
        event
    }

    /// Stops accepting new events while leaving queued ones receivable.
    pub fn close(&mut self) {
        self.inner.close();
    }

    /// Returns current statistics.
    pub fn stats(&self) -> BusStats {
        self.stats.snapshot()
    }
}
