//! `daq-core`
//!
//! Signal and device model for simulated and real data acquisition.
//!
//! This crate provides the building blocks that test code and the run engine
//! work against: typed signals with pluggable backends, device trees that
//! connect as a unit, and the document types a run emits.
//!
//! ## Layers
//!
//! - **Signal**: one named, typed value with an access flag ([`signal`])
//! - **Backend**: simulated in-memory store or external protocol ([`backend`])
//! - **Device**: named tree of signals and sub-devices ([`device`])
//! - **DeviceCollector**: scope that connects devices all-or-nothing ([`collector`])
//!
//! ## Key Types
//!
//! - [`Signal`]: cheap-clone handle to a value endpoint
//! - [`Device`]: cheap-clone handle to a device tree
//! - [`DaqError`]: error taxonomy shared by every operation
//! - [`Document`]: start / descriptor / event / stop
//!
//! ## Example
//!
//! ```rust,no_run
//! use daq_core::{soft_signal_r, soft_signal_rw, Device, DeviceCollector, ValueType};
//! # async fn example() -> daq_core::DaqResult<()> {
//! let mut collector = DeviceCollector::default();
//! let dev = collector.register(
//!     Device::builder("dev")
//!         .read("sensor", soft_signal_r("", ValueType::Float))
//!         .read("mover", soft_signal_rw("", ValueType::Float))
//!         .build()?,
//! );
//! collector.finish().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod capabilities;
pub mod collector;
pub mod config;
pub mod device;
pub mod error;
pub mod experiment;
pub mod observable;
pub mod signal;
pub mod value;

pub use backend::{Backend, BackendKind, ConnectionState, RealBackend, SimBackend};
pub use capabilities::Readable;
pub use collector::DeviceCollector;
pub use config::ConnectConfig;
pub use device::{Device, DeviceBuilder, DeviceField, FieldKind};
pub use error::{ConnectFailure, ConnectionFailures, DaqError, DaqResult};
pub use experiment::document::{
    DataKey, DescriptorDoc, Document, DocumentKind, EventDoc, ExitStatus, StartDoc, StopDoc,
};
pub use observable::{Observer, ObserverHandle, ObserverList};
pub use signal::{soft_signal_r, soft_signal_rw, Access, Location, Signal, SignalBuilder};
pub use value::{Reading, SignalValue, ValueType};
