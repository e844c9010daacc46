// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Simulated field device.
//!
//! Produces uniformly random readings for each configured sensor and writes
//! them through the [`WriteAcceptor`], the same path an OPC UA client write
//! takes. Failed writes are logged and simply tried again on the next tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use tether_core::error::NodeResult;
use tether_core::shutdown::ShutdownToken;
use tether_core::types::{DataType, NodeId, Value};
use tracing::{debug, info, warn};

use crate::write_acceptor::WriteAcceptor;

/// Default interval between readings.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

// =============================================================================
// SensorSpec
// =============================================================================

/// One simulated sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSpec {
    /// Node the readings are written to.
    pub node_id: NodeId,
    /// Lower bound, inclusive.
    pub min: f64,
    /// Upper bound, inclusive.
    pub max: f64,
    /// Decimal places kept.
    pub decimals: u32,
}

impl SensorSpec {
    /// Creates a sensor spec with two decimals.
    pub fn new(node_id: NodeId, min: f64, max: f64) -> Self {
        Self {
            node_id,
            min,
            max,
            decimals: 2,
        }
    }

    /// Sets the number of decimals.
    pub fn with_decimals(mut self, decimals: u32) -> Self {
        self.decimals = decimals;
        self
    }

    /// Temperature sensor, 20 to 35 °C.
    pub fn temperature(namespace_index: u16) -> Self {
        Self::new(NodeId::string(namespace_index, "Temperature"), 20.0, 35.0)
    }

    /// Pressure sensor, 995 to 1025 hPa.
    pub fn pressure(namespace_index: u16) -> Self {
        Self::new(NodeId::string(namespace_index, "Pressure"), 995.0, 1025.0)
    }

    /// Draws a reading in `[min, max]` rounded to `decimals`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let raw = if self.max > self.min {
            rng.gen_range(self.min..=self.max)
        } else {
            self.min
        };
        let factor = 10f64.powi(self.decimals.min(15) as i32);
        ((raw * factor).round() / factor).clamp(self.min, self.max.max(self.min))
    }
}

/// Converts a reading to a value of the node's declared type.
pub fn reading_as(data_type: DataType, reading: f64) -> Option<Value> {
    match data_type {
        DataType::Double => Some(Value::Double(reading)),
        DataType::Float => Some(Value::Float(reading as f32)),
        DataType::Int32 => Some(Value::Int32(reading.round() as i32)),
        DataType::Int64 => Some(Value::Int64(reading.round() as i64)),
        DataType::UInt32 if reading >= 0.0 => Some(Value::UInt32(reading.round() as u32)),
        DataType::UInt64 if reading >= 0.0 => Some(Value::UInt64(reading.round() as u64)),
        DataType::String => Some(Value::String(reading.to_string())),
        _ => None,
    }
}

// =============================================================================
// SensorSimulator
// =============================================================================

/// Simulator counters.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SimulatorStats {
    /// Readings written.
    pub writes: u64,
    /// Readings refused.
    pub failures: u64,
}

/// Writes random readings on a fixed interval.
pub struct SensorSimulator {
    acceptor: Arc<WriteAcceptor>,
    sensors: Vec<SensorSpec>,
    interval: Duration,
    writes: AtomicU64,
    failures: AtomicU64,
}

impl SensorSimulator {
    /// Creates a simulator.
    pub fn new(acceptor: Arc<WriteAcceptor>, sensors: Vec<SensorSpec>, interval: Duration) -> Self {
        Self {
            acceptor,
            sensors,
            interval,
            writes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Returns the configured sensors.
    pub fn sensors(&self) -> &[SensorSpec] {
        &self.sensors
    }

    /// Writes one reading per sensor. Returns the number written.
    pub fn tick(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut written = 0;

        for sensor in &self.sensors {
            let reading = sensor.sample(&mut rng);
            match self.write_reading(sensor, reading) {
                Ok(()) => {
                    self.writes.fetch_add(1, Ordering::Relaxed);
                    written += 1;
                    debug!(node = %sensor.node_id, reading, "Simulated reading written");
                }
                Err(error) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(node = %sensor.node_id, error = %error, "Simulated reading not written");
                }
            }
        }

        written
    }

    fn write_reading(&self, sensor: &SensorSpec, reading: f64) -> NodeResult<()> {
        let value = self
            .acceptor
            .address_space()
            .get(&sensor.node_id)
            .and_then(|node| reading_as(node.data_type(), reading))
            .unwrap_or(Value::Double(reading));
        self.acceptor.write(&sensor.node_id, value, Utc::now())
    }

    /// Writes readings every interval until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: ShutdownToken) {
        info!(
            sensors = self.sensors.len(),
            interval_ms = self.interval.as_millis() as u64,
            "Sensor simulator started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }

        info!("Sensor simulator stopped");
    }

    /// Returns current statistics.
    pub fn stats(&self) -> SimulatorStats {
        SimulatorStats {
            writes: self.writes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}
