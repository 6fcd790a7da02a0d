//! Plan system for declarative run definitions.
//!
//! Plans are generators that yield commands for the RunEngine to execute.
//! Plans don't touch hardware themselves; they describe what should happen,
//! and the RunEngine orchestrates execution and document emission.
//!
//! # Plan Commands
//!
//! Plans yield a sequence of `PlanCommand` values:
//! - `Set` - Write a value to a signal and wait for completion
//! - `Trigger` - Fire an executable signal
//! - `Read` - Read a signal or device into the pending event
//! - `Wait` - Wait for a duration
//! - `Checkpoint` - Mark a pause/resume point
//! - `EmitEvent` - Turn everything read since the last event into an EventDoc
//!
//! # Example Plan
//!
//! ```rust,ignore
//! let plan = LineScan::new(stage.signal("x.setpoint")?, 0.0, 10.0, 11)
//!     .with_detector(det.clone());
//!
//! // Plan yields commands like:
//! // Set(stage-x-setpoint, 0.0)
//! // Checkpoint
//! // Read(det)
//! // Read(stage-x-setpoint)
//! // EmitEvent("primary")
//! // Set(stage-x-setpoint, 1.0)
//! // ...
//! ```

use daq_core::{DaqError, DaqResult, Readable, Signal, SignalValue, ValueType};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Commands that plans yield for the RunEngine to execute
#[derive(Clone)]
pub enum PlanCommand {
    /// Write a value and wait until the backend reports completion
    Set {
        /// Target signal
        signal: Signal,
        /// Value to write
        value: SignalValue,
    },
    /// Fire an executable signal
    Trigger {
        /// Target signal
        signal: Signal,
    },
    /// Read a signal or device into the pending event
    Read {
        /// What to read
        target: Arc<dyn Readable>,
    },
    /// Wait for a duration in seconds
    Wait {
        /// Duration in seconds
        seconds: f64,
    },
    /// Checkpoint - safe point for pause/resume
    Checkpoint {
        /// Checkpoint label
        label: String,
    },
    /// Emit an event document with everything read since the last one
    EmitEvent {
        /// Stream name (e.g., "primary")
        stream: String,
    },
}

impl fmt::Debug for PlanCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanCommand::Set { signal, value } => f
                .debug_struct("Set")
                .field("signal", &signal.name())
                .field("value", value)
                .finish(),
            PlanCommand::Trigger { signal } => f
                .debug_struct("Trigger")
                .field("signal", &signal.name())
                .finish(),
            PlanCommand::Read { target } => {
                f.debug_struct("Read").field("target", &target.name()).finish()
            }
            PlanCommand::Wait { seconds } => {
                f.debug_struct("Wait").field("seconds", seconds).finish()
            }
            PlanCommand::Checkpoint { label } => {
                f.debug_struct("Checkpoint").field("label", label).finish()
            }
            PlanCommand::EmitEvent { stream } => {
                f.debug_struct("EmitEvent").field("stream", stream).finish()
            }
        }
    }
}

impl PlanCommand {
    /// `Read` command for any readable handle.
    pub fn read(target: impl Readable + 'static) -> Self {
        PlanCommand::Read {
            target: Arc::new(target),
        }
    }

    /// `EmitEvent` on the primary stream.
    pub fn emit_primary() -> Self {
        PlanCommand::EmitEvent {
            stream: PRIMARY_STREAM.to_string(),
        }
    }
}

/// Stream name used by the built-in plans.
pub const PRIMARY_STREAM: &str = "primary";

// Delays must be representable as a `Duration`.
fn checked_seconds(what: &str, seconds: f64) -> DaqResult<f64> {
    Duration::try_from_secs_f64(seconds)
        .map(|_| seconds)
        .map_err(|_| {
            DaqError::Configuration(format!(
                "{what} must be a finite, non-negative number of seconds, got {seconds}"
            ))
        })
}

/// Plan trait - all plans implement this to generate commands
pub trait Plan: Send + Sync {
    /// Plan type identifier (e.g., "line_scan", "count")
    fn plan_type(&self) -> &str;

    /// Human-readable plan name
    fn plan_name(&self) -> &str;

    /// Plan arguments for documentation
    fn plan_args(&self) -> HashMap<String, String>;

    /// Names of signals that will be moved (for hints)
    fn movers(&self) -> Vec<String>;

    /// Names of things that will be read (for hints)
    fn detectors(&self) -> Vec<String>;

    /// Total number of points in the plan
    fn num_points(&self) -> usize;

    /// Generate the next command, returning None when complete
    fn next_command(&mut self) -> Option<PlanCommand>;

    /// Reset the plan to start from the beginning
    fn reset(&mut self);
}

/// Line scan - scan a single axis with one or more detectors
///
/// `Int` axes are written the rounded position; every other axis is
/// written a `Float`, so a non-numeric axis fails the run on the first move.
#[derive(Clone)]
pub struct LineScan {
    axis: Signal,
    start: f64,
    stop: f64,
    num_points: usize,
    detectors: Vec<Arc<dyn Readable>>,
    settle_time: f64,

    // Execution state
    current_point: usize,
    current_step: LineScanStep,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LineScanStep {
    Move,
    Settle,
    Checkpoint,
    ReadDetectors { detector_idx: usize },
    ReadAxis,
    EmitEvent,
}

impl fmt::Debug for LineScan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineScan")
            .field("axis", &self.axis.name())
            .field("start", &self.start)
            .field("stop", &self.stop)
            .field("num_points", &self.num_points)
            .field("detectors", &self.detectors())
            .finish_non_exhaustive()
    }
}

impl LineScan {
    /// Create a new LineScan
    pub fn new(axis: Signal, start: f64, stop: f64, num_points: usize) -> Self {
        Self {
            axis,
            start,
            stop,
            num_points,
            detectors: Vec::new(),
            settle_time: 0.0,
            current_point: 0,
            current_step: LineScanStep::Move,
        }
    }

    /// Add a detector to the scan
    pub fn with_detector(mut self, detector: impl Readable + 'static) -> Self {
        self.detectors.push(Arc::new(detector));
        self
    }

    /// Set settle time in seconds
    pub fn with_settle_time(mut self, seconds: f64) -> DaqResult<Self> {
        self.settle_time = checked_seconds("settle time", seconds)?;
        Ok(self)
    }

    /// Axis position of point `point`.
    pub fn position_at(&self, point: usize) -> f64 {
        if self.num_points <= 1 {
            self.start
        } else {
            let step = (self.stop - self.start) / (self.num_points - 1) as f64;
            self.start + step * point as f64
        }
    }

    fn axis_value(&self, position: f64) -> SignalValue {
        match self.axis.value_type() {
            ValueType::Int => SignalValue::Int(position.round() as i64),
            _ => SignalValue::Float(position),
        }
    }
}

impl Plan for LineScan {
    fn plan_type(&self) -> &str {
        "line_scan"
    }

    fn plan_name(&self) -> &str {
        "Line Scan"
    }

    fn plan_args(&self) -> HashMap<String, String> {
        let mut args = HashMap::new();
        args.insert("axis".to_string(), self.axis.name());
        args.insert("start".to_string(), self.start.to_string());
        args.insert("stop".to_string(), self.stop.to_string());
        args.insert("num_points".to_string(), self.num_points.to_string());
        args.insert("detectors".to_string(), self.detectors().join(","));
        args
    }

    fn movers(&self) -> Vec<String> {
        vec![self.axis.name()]
    }

    fn detectors(&self) -> Vec<String> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    fn num_points(&self) -> usize {
        self.num_points
    }

    fn next_command(&mut self) -> Option<PlanCommand> {
        if self.current_point >= self.num_points {
            return None;
        }

        let cmd = match self.current_step {
            LineScanStep::Move => {
                let pos = self.position_at(self.current_point);
                self.current_step = if self.settle_time > 0.0 {
                    LineScanStep::Settle
                } else {
                    LineScanStep::Checkpoint
                };
                PlanCommand::Set {
                    signal: self.axis.clone(),
                    value: self.axis_value(pos),
                }
            }
            LineScanStep::Settle => {
                self.current_step = LineScanStep::Checkpoint;
                PlanCommand::Wait {
                    seconds: self.settle_time,
                }
            }
            LineScanStep::Checkpoint => {
                self.current_step = LineScanStep::ReadDetectors { detector_idx: 0 };
                PlanCommand::Checkpoint {
                    label: format!("point_{}", self.current_point),
                }
            }
            LineScanStep::ReadDetectors { detector_idx } => {
                if let Some(det) = self.detectors.get(detector_idx) {
                    self.current_step = LineScanStep::ReadDetectors {
                        detector_idx: detector_idx + 1,
                    };
                    PlanCommand::Read {
                        target: det.clone(),
                    }
                } else {
                    self.current_step = LineScanStep::ReadAxis;
                    return self.next_command();
                }
            }
            LineScanStep::ReadAxis => {
                self.current_step = LineScanStep::EmitEvent;
                PlanCommand::Read {
                    target: Arc::new(self.axis.clone()),
                }
            }
            LineScanStep::EmitEvent => {
                self.current_point += 1;
                self.current_step = LineScanStep::Move;
                PlanCommand::emit_primary()
            }
        };

        Some(cmd)
    }

    fn reset(&mut self) {
        self.current_point = 0;
        self.current_step = LineScanStep::Move;
    }
}

/// Count - read detectors repeatedly without moving anything
#[derive(Clone)]
pub struct Count {
    num_points: usize,
    delay: f64,
    detectors: Vec<Arc<dyn Readable>>,
    current_point: usize,
    current_step: CountStep,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CountStep {
    Checkpoint,
    Read { detector_idx: usize },
    Emit,
    Wait,
}

impl fmt::Debug for Count {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Count")
            .field("num_points", &self.num_points)
            .field("delay", &self.delay)
            .field("detectors", &self.detectors())
            .finish_non_exhaustive()
    }
}

impl Count {
    /// Create a new Count plan
    pub fn new(num_points: usize) -> Self {
        Self {
            num_points,
            delay: 0.0,
            detectors: Vec::new(),
            current_point: 0,
            current_step: CountStep::Checkpoint,
        }
    }

    /// Add a detector to the count
    pub fn with_detector(mut self, detector: impl Readable + 'static) -> Self {
        self.detectors.push(Arc::new(detector));
        self
    }

    /// Set delay between points in seconds
    pub fn with_delay(mut self, seconds: f64) -> DaqResult<Self> {
        self.delay = checked_seconds("delay", seconds)?;
        Ok(self)
    }
}

impl Plan for Count {
    fn plan_type(&self) -> &str {
        "count"
    }

    fn plan_name(&self) -> &str {
        "Count"
    }

    fn plan_args(&self) -> HashMap<String, String> {
        let mut args = HashMap::new();
        args.insert("num_points".to_string(), self.num_points.to_string());
        args.insert("delay".to_string(), self.delay.to_string());
        args.insert("detectors".to_string(), self.detectors().join(","));
        args
    }

    fn movers(&self) -> Vec<String> {
        Vec::new()
    }

    fn detectors(&self) -> Vec<String> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    fn num_points(&self) -> usize {
        self.num_points
    }

    fn next_command(&mut self) -> Option<PlanCommand> {
        if self.current_point >= self.num_points {
            return None;
        }

        let cmd = match self.current_step {
            CountStep::Checkpoint => {
                self.current_step = CountStep::Read { detector_idx: 0 };
                PlanCommand::Checkpoint {
                    label: format!("count_{}", self.current_point),
                }
            }
            CountStep::Read { detector_idx } => {
                if let Some(det) = self.detectors.get(detector_idx) {
                    self.current_step = CountStep::Read {
                        detector_idx: detector_idx + 1,
                    };
                    PlanCommand::Read {
                        target: det.clone(),
                    }
                } else {
                    self.current_step = CountStep::Emit;
                    return self.next_command();
                }
            }
            CountStep::Emit => {
                self.current_step = CountStep::Wait;
                PlanCommand::emit_primary()
            }
            CountStep::Wait => {
                self.current_point += 1;
                self.current_step = CountStep::Checkpoint;
                let last = self.current_point >= self.num_points;
                if self.delay > 0.0 && !last {
                    PlanCommand::Wait {
                        seconds: self.delay,
                    }
                } else {
                    return self.next_command();
                }
            }
        };

        Some(cmd)
    }

    fn reset(&mut self) {
        self.current_point = 0;
        self.current_step = CountStep::Checkpoint;
    }
}
