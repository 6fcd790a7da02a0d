//! Ready-made simulated devices.

use daq_core::{
    DaqError, DaqResult, DataKey, Device, Readable, Reading, Signal, ValueType,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::warn;

use crate::sim::{set_sim_callback, set_sim_value};

// =============================================================================
// SimMotor
// =============================================================================

/// Configuration for [`SimMotor`]
#[derive(Debug, Clone, Deserialize)]
pub struct SimMotorConfig {
    /// Initial position (default: 0.0)
    #[serde(default)]
    pub initial_position: f64,

    /// Velocity in units/sec (default: 1.0)
    #[serde(default = "default_velocity")]
    pub velocity: f64,

    /// Engineering units (default: "mm")
    #[serde(default = "default_units")]
    pub units: String,
}

fn default_velocity() -> f64 {
    1.0
}

fn default_units() -> String {
    "mm".to_string()
}

impl Default for SimMotorConfig {
    fn default() -> Self {
        Self {
            initial_position: 0.0,
            velocity: default_velocity(),
            units: default_units(),
        }
    }
}

/// Simulated motor.
///
/// Fields:
///
/// | Child | Kind | Access |
/// |-------|------|--------|
/// | `readback` | read | read-only |
/// | `setpoint` | omitted | read-write |
/// | `velocity` | config | read-write |
/// | `units` | config | read-only |
///
/// Every setpoint change is copied to the readback, so a move completes
/// as soon as the setpoint is written.
#[derive(Debug, Clone)]
pub struct SimMotor {
    device: Device,
    setpoint: Signal,
    readback: Signal,
    velocity: Signal,
}

impl SimMotor {
    /// Motor with default configuration.
    pub fn new(name: &str) -> DaqResult<Self> {
        Self::with_config(name, SimMotorConfig::default())
    }

    /// Motor with custom configuration.
    pub fn with_config(name: &str, config: SimMotorConfig) -> DaqResult<Self> {
        if !config.velocity.is_finite() || config.velocity <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "velocity must be positive, got {}",
                config.velocity
            )));
        }

        let setpoint = Signal::builder("", ValueType::Float)
            .units(config.units.clone())
            .initial(config.initial_position)
            .build()?;
        let readback = Signal::builder("", ValueType::Float)
            .read_only()
            .units(config.units.clone())
            .initial(config.initial_position)
            .build()?;
        let velocity = Signal::builder("", ValueType::Float)
            .units(format!("{}/s", config.units))
            .initial(config.velocity)
            .build()?;
        let units = Signal::builder("", ValueType::String)
            .read_only()
            .initial(config.units)
            .build()?;

        let device = Device::builder(name)
            .read("readback", readback.clone())
            .signal("setpoint", setpoint.clone())
            .config("velocity", velocity.clone())
            .config("units", units)
            .build()?;

        let follower = readback.clone();
        set_sim_callback(&setpoint, move |_old, new| {
            if let Err(err) = set_sim_value(&follower, new.clone()) {
                warn!(signal = %follower.name(), error = %err, "Readback did not follow setpoint");
            }
        })?;

        Ok(Self {
            device,
            setpoint,
            readback,
            velocity,
        })
    }

    /// Move to `position` and wait for completion.
    pub async fn move_to(&self, position: f64) -> DaqResult<()> {
        self.setpoint.set(position).await
    }

    /// Current readback position.
    pub fn position(&self) -> DaqResult<f64> {
        let value = self.readback.get_value()?;
        value.as_f64().ok_or_else(|| DaqError::TypeMismatch {
            signal: self.readback.name(),
            expected: ValueType::Float.to_string(),
            actual: value.type_name().to_string(),
        })
    }

    /// The device tree.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Consume the wrapper, keeping the device tree.
    pub fn into_device(self) -> Device {
        self.device
    }

    /// Setpoint signal.
    pub fn setpoint(&self) -> &Signal {
        &self.setpoint
    }

    /// Readback signal.
    pub fn readback(&self) -> &Signal {
        &self.readback
    }

    /// Velocity signal.
    pub fn velocity(&self) -> &Signal {
        &self.velocity
    }
}

impl Readable for SimMotor {
    fn name(&self) -> String {
        self.device.name()
    }

    fn read(&self) -> DaqResult<BTreeMap<String, Reading>> {
        self.device.read()
    }

    fn describe(&self) -> DaqResult<BTreeMap<String, DataKey>> {
        self.device.describe()
    }

    fn read_configuration(&self) -> DaqResult<BTreeMap<String, Reading>> {
        self.device.read_configuration()
    }

    fn describe_configuration(&self) -> DaqResult<BTreeMap<String, DataKey>> {
        self.device.describe_configuration()
    }
}

// =============================================================================
// SimDetector
// =============================================================================

/// Simulated point detector: read-only `value`, configuration `exposure`.
///
/// Tests drive `value` with [`SimDetector::set_value`].
#[derive(Debug, Clone)]
pub struct SimDetector {
    device: Device,
    value: Signal,
    exposure: Signal,
}

impl SimDetector {
    /// Detector with a 0.1 s exposure.
    pub fn new(name: &str) -> DaqResult<Self> {
        let value = Signal::builder("", ValueType::Float).read_only().build()?;
        let exposure = Signal::builder("", ValueType::Float)
            .units("s")
            .initial(0.1)
            .build()?;
        let device = Device::builder(name)
            .read("value", value.clone())
            .config("exposure", exposure.clone())
            .build()?;
        Ok(Self {
            device,
            value,
            exposure,
        })
    }

    /// Emulate a new measurement.
    pub fn set_value(&self, value: f64) -> DaqResult<()> {
        set_sim_value(&self.value, value)
    }

    /// The device tree.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Consume the wrapper, keeping the device tree.
    pub fn into_device(self) -> Device {
        self.device
    }

    /// Measured value signal.
    pub fn value(&self) -> &Signal {
        &self.value
    }

    /// Exposure time signal.
    pub fn exposure(&self) -> &Signal {
        &self.exposure
    }
}

impl Readable for SimDetector {
    fn name(&self) -> String {
        self.device.name()
    }

    fn read(&self) -> DaqResult<BTreeMap<String, Reading>> {
        self.device.read()
    }

    fn describe(&self) -> DaqResult<BTreeMap<String, DataKey>> {
        self.device.describe()
    }

    fn read_configuration(&self) -> DaqResult<BTreeMap<String, Reading>> {
        self.device.read_configuration()
    }

    fn describe_configuration(&self) -> DaqResult<BTreeMap<String, DataKey>> {
        self.device.describe_configuration()
    }
}
