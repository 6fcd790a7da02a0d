//! Experiment orchestration for `daq-core` signals and devices.
//!
//! - [`plans`]: declarative command sequences (count, line scan)
//! - [`run_engine`]: executes plans and emits the run documents
//! - [`recorder`]: captures emitted documents for inspection

pub mod plans;
pub mod recorder;
pub mod run_engine;

pub use plans::{Count, LineScan, Plan, PlanCommand, PRIMARY_STREAM};
pub use recorder::DocumentRecorder;
pub use run_engine::{DocumentCallback, EngineState, RunEngine, RunSummary, SubscriptionId};
