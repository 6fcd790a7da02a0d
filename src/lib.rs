//! # sim_daq
//!
//! Simulated device and signal testing framework for data acquisition.
//!
//! This crate re-exports the workspace crates under one name:
//!
//! - **`core`** ([`daq_core`]): values, signals, backends, devices, the
//!   device collector, connection configuration and run documents
//! - **`experiment`** ([`daq_experiment`]): plans and the run engine that
//!   turns device reads into a document stream
//! - **`sim`** ([`daq_sim`]): sim test utilities, assertion helpers and
//!   ready-made simulated devices
//! - **`logging`**: `tracing-subscriber` setup for binaries and tests
//!
//! Most tests only need the [`prelude`]:
//!
//! ```rust,no_run
//! use sim_daq::prelude::*;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let dev = DeviceCollector::collect(ConnectConfig::sim(), |collector| {
//!     Ok(collector.register(
//!         Device::builder("dev")
//!             .read("sensor", soft_signal_r("", ValueType::Float))
//!             .read("mover", soft_signal_rw("", ValueType::Float))
//!             .build()?,
//!     ))
//! })
//! .await?;
//!
//! let sensor = dev.signal("sensor").ok_or_else(|| anyhow::anyhow!("no sensor"))?;
//! set_sim_value(&sensor, 7.0)?;
//! assert_value(&sensor, 7.0);
//! # Ok(())
//! # }
//! ```

pub mod logging;

pub use daq_core as core;
pub use daq_experiment as experiment;
pub use daq_sim as sim;

/// Everything a test usually needs.
pub mod prelude {
    pub use daq_core::{
        soft_signal_r, soft_signal_rw, Access, BackendKind, ConnectConfig, ConnectionState,
        DaqError, DaqResult, Device, DeviceCollector, Document, DocumentKind, ExitStatus,
        Readable, Reading, Signal, SignalValue, ValueType,
    };
    pub use daq_experiment::{Count, DocumentRecorder, LineScan, Plan, RunEngine, RunSummary};
    pub use daq_sim::{
        assert_configuration, assert_emitted, assert_reading, assert_value, observe_value,
        set_sim_callback, set_sim_connect_failure, set_sim_put_proceeds, set_sim_value,
        wait_for_value, SimDetector, SimMotor,
    };
}
