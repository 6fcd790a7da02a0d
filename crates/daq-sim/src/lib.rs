//! Sim test utilities for `daq-core` signals and devices.
//!
//! Signals connected with [`BackendKind::Sim`](daq_core::BackendKind) keep
//! their value in memory. This crate provides the tools tests use to drive
//! them as if hardware were attached:
//!
//! - [`set_sim_value`] - emulate an external actor changing a value
//!   (works on read-only signals)
//! - [`set_sim_callback`] - couple signals (e.g. readback follows setpoint)
//! - [`set_sim_put_proceeds`] - hold `set()` completion
//! - [`set_sim_connect_failure`] - make the next connect fail
//! - [`observe_value`] / [`wait_for_value`] - follow a value over time
//! - `assert_*` helpers for values, readings, configuration, and the
//!   emitted document stream
//!
//! # Ready-made devices
//!
//! - [`SimMotor`] - setpoint/readback/velocity motor whose readback follows
//!   the setpoint
//! - [`SimDetector`] - read-only `value` plus `exposure` configuration
//!
//! # Example
//!
//! ```rust,ignore
//! let mut collector = DeviceCollector::default();
//! let det = collector.register(SimDetector::new("det")?.into_device());
//! collector.finish().await?;
//!
//! let value = det.signal("value").ok_or_else(|| anyhow!("no value"))?;
//! set_sim_value(&value, 7.0)?;
//! assert_value(&value, 7.0);
//! ```

pub mod assertions;
mod devices;
pub mod observe;
pub mod sim;

pub use assertions::{
    assert_configuration, assert_emitted, assert_reading, assert_value, check_configuration,
    check_emitted, check_reading, check_value, AssertionFailure,
};
pub use devices::{SimDetector, SimMotor, SimMotorConfig};
pub use observe::{observe_value, set_and_wait_for_value, wait_for_value, ValueObserver};
pub use sim::{set_sim_callback, set_sim_connect_failure, set_sim_put_proceeds, set_sim_value};
