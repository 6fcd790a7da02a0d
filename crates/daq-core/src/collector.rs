//! Scoped connection of device trees.
//!
//! A [`DeviceCollector`] is the explicit scope devices are created in:
//! every device passed to [`DeviceCollector::register`] is connected as a
//! unit when the scope ends with [`DeviceCollector::finish`].
//!
//! - all devices connect concurrently, with the configured backend kind
//! - success means every signal of every device is connected
//! - on failure, every registered device is disconnected and one
//!   [`DaqError::Connection`] lists each failing signal
//! - dropping a collector that never finished (an error in the scope, or a
//!   cancelled `finish`) disconnects everything it registered
//!
//! # Example
//!
//! ```rust,ignore
//! let mut collector = DeviceCollector::new(ConnectConfig::sim());
//! let stage = collector.register(build_stage()?);
//! let det = collector.register(build_detector()?);
//! collector.finish().await?;
//! ```

use crate::config::ConnectConfig;
use crate::device::Device;
use crate::error::{ConnectFailure, ConnectionFailures, DaqError, DaqResult};
use futures::future::join_all;
use tracing::{info, warn};

/// Scope that connects every device created inside it.
#[derive(Debug)]
pub struct DeviceCollector {
    config: ConnectConfig,
    devices: Vec<Device>,
    finished: bool,
}

impl Default for DeviceCollector {
    fn default() -> Self {
        Self::new(ConnectConfig::sim())
    }
}

impl DeviceCollector {
    /// Empty scope connecting with `config`.
    pub fn new(config: ConnectConfig) -> Self {
        Self {
            config,
            devices: Vec::new(),
            finished: false,
        }
    }

    /// Connection settings in use.
    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }

    /// Track a device; returns it for the caller to keep.
    pub fn register(&mut self, device: Device) -> Device {
        self.devices.push(device.clone());
        device
    }

    /// Devices registered so far, in registration order.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Connect every registered device, all or nothing.
    pub async fn finish(mut self) -> DaqResult<()> {
        let kind = self.config.backend;
        info!(
            devices = self.devices.len(),
            backend = %kind,
            "Connecting collected devices"
        );

        let connects = join_all(self.devices.iter().map(|device| device.connect_all(kind)));
        let failures = match tokio::time::timeout(self.config.timeout, connects).await {
            Ok(results) => {
                let mut failures = ConnectionFailures::new();
                for (device, result) in self.devices.iter().zip(results) {
                    match result {
                        Ok(()) => {}
                        Err(DaqError::Connection(inner)) => failures.extend(inner),
                        Err(other) => failures.push(ConnectFailure::new(device.name(), other.to_string())),
                    }
                }
                failures
            }
            Err(_) => self.pending_failures(),
        };

        if failures.is_empty() {
            self.finished = true;
            return Ok(());
        }

        warn!(failed = ?failures.paths(), "Collected devices failed to connect, tearing down");
        join_all(self.devices.iter().map(Device::disconnect_all)).await;
        self.finished = true;
        Err(DaqError::Connection(failures))
    }

    // Every signal still not connected when the timeout elapsed.
    fn pending_failures(&self) -> ConnectionFailures {
        let reason = format!("timed out after {:?}", self.config.timeout);
        let mut failures = ConnectionFailures::new();
        for device in &self.devices {
            for (_, signal) in device.walk() {
                if !signal.is_connected() {
                    failures.push(ConnectFailure::new(signal.name(), reason.clone()));
                }
            }
        }
        failures
    }

    /// Run `build` inside a collector scope, then connect what it registered.
    ///
    /// If `build` fails nothing stays connected and its error is returned.
    pub async fn collect<T, F>(config: ConnectConfig, build: F) -> DaqResult<T>
    where
        F: FnOnce(&mut DeviceCollector) -> DaqResult<T>,
    {
        let mut collector = DeviceCollector::new(config);
        let value = build(&mut collector)?;
        collector.finish().await?;
        Ok(value)
    }
}

impl Drop for DeviceCollector {
    fn drop(&mut self) {
        if self.finished || self.devices.is_empty() {
            return;
        }
        warn!(
            devices = self.devices.len(),
            "Collector dropped before finishing, releasing connections"
        );
        for device in &self.devices {
            for (_, signal) in device.walk() {
                signal.release();
            }
        }
    }
}
