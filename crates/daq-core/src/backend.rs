//! Signal backends.
//!
//! A connected signal holds exactly one [`Backend`], chosen when it connects:
//!
//! - [`Backend::Sim`]: an in-memory [`SimBackend`]. Never suspends, never
//!   fails unless a failure was injected beforehand.
//! - [`Backend::Real`]: an external implementation of [`RealBackend`]
//!   talking to hardware. May suspend and fail on I/O.
//!
//! The backend kind is requested with [`BackendKind`], usually taken from a
//! [`ConnectConfig`](crate::config::ConnectConfig).

use crate::error::{DaqError, DaqResult};
use crate::observable::Observer;
use crate::value::{Reading, SignalValue, ValueType};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Which kind of backend to connect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-memory simulated backend, no external I/O.
    #[default]
    Sim,
    /// External protocol backend.
    Real,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Sim => write!(f, "sim"),
            BackendKind::Real => write!(f, "real"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sim" => Ok(BackendKind::Sim),
            "real" => Ok(BackendKind::Real),
            other => Err(DaqError::Configuration(format!(
                "unknown backend kind '{}', expected 'sim' or 'real'",
                other
            ))),
        }
    }
}

/// Lifecycle state of a signal, or the fold over a device tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No active backend.
    #[default]
    Disconnected,
    /// A real backend connect is in flight.
    Connecting,
    /// Backend ready.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// External protocol backend.
///
/// Implemented outside this crate for real hardware. The signal drives the
/// lifecycle: `connect` is awaited under the signal's timeout, `disconnect`
/// on teardown. Reads and writes are synchronous against the backend's
/// cached state.
#[async_trait]
pub trait RealBackend: Send + Sync + fmt::Debug {
    /// Establish the connection.
    async fn connect(&self) -> DaqResult<()>;

    /// Release the connection. Must not fail.
    async fn disconnect(&self);

    /// Latest value known to the backend.
    fn reading(&self) -> DaqResult<Reading>;

    /// Send a value to the hardware.
    fn put(&self, value: SignalValue) -> DaqResult<()>;

    /// Address of the value on the external protocol.
    fn source(&self) -> String;

    /// Install (or remove) the callback for values changed by the hardware.
    ///
    /// The default implementation ignores the monitor, for backends whose
    /// values only change through `put`.
    fn set_monitor(&self, monitor: Option<Observer>) {
        let _ = monitor;
    }

    /// Whether successful `put` calls are reported through the monitor.
    ///
    /// When `true` the signal leaves notification of its own writes to the
    /// monitor, so observers see each write once. Defaults to `false`: the
    /// signal notifies observers after `put` returns.
    fn monitors_puts(&self) -> bool {
        false
    }
}

#[derive(Debug)]
struct SimState {
    value: SignalValue,
    setpoint: SignalValue,
    timestamp_ns: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PutGate {
    Open,
    Held,
    // The owning signal disconnected; pending sets fail.
    Closed,
}

/// How a wait on the put gate ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PutCompletion {
    Completed,
    TimedOut,
    Disconnected,
}

/// In-memory backend used for simulation.
///
/// Holds the current value, the last written setpoint (reported separately
/// by `locate`), and the put-completion gate used by `set`.
///
/// Values only change through the owning [`Signal`](crate::Signal), which
/// checks access and type and notifies observers. The handle returned by
/// `Signal::sim_backend` exposes the reading and the gate, not the store:
///
/// ```compile_fail
/// use daq_core::{soft_signal_r, SignalValue, ValueType};
///
/// let sensor = soft_signal_r("sensor", ValueType::Float);
/// let sim = sensor.sim_backend().unwrap();
/// sim.put(SignalValue::from("not a float"));
/// ```
#[derive(Debug, Clone)]
pub struct SimBackend {
    value_type: ValueType,
    state: Arc<RwLock<SimState>>,
    put_gate: Arc<watch::Sender<PutGate>>,
}

impl SimBackend {
    /// New backend holding `initial`, or the type default.
    pub fn new(value_type: ValueType, initial: Option<SignalValue>) -> Self {
        let value = initial.unwrap_or_else(|| value_type.default_value());
        let (put_gate, _) = watch::channel(PutGate::Open);
        Self {
            value_type,
            state: Arc::new(RwLock::new(SimState {
                setpoint: value.clone(),
                value,
                timestamp_ns: crate::experiment::document::now_ns(),
            })),
            put_gate: Arc::new(put_gate),
        }
    }

    /// Declared value type.
    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    /// Current value with its timestamp.
    pub fn reading(&self) -> Reading {
        let state = self.state.read();
        Reading {
            value: state.value.clone(),
            timestamp_ns: state.timestamp_ns,
            alarm_severity: 0,
        }
    }

    /// Last value written through `put`.
    pub fn setpoint(&self) -> SignalValue {
        self.state.read().setpoint.clone()
    }

    /// Normal write: updates setpoint and value. Returns `(old, new)`.
    pub(crate) fn put(&self, value: SignalValue) -> (SignalValue, SignalValue) {
        let mut state = self.state.write();
        state.setpoint = value.clone();
        Self::store(&mut state, value)
    }

    /// External-actor write: updates the value only. Returns `(old, new)`.
    pub(crate) fn inject(&self, value: SignalValue) -> (SignalValue, SignalValue) {
        let mut state = self.state.write();
        Self::store(&mut state, value)
    }

    fn store(state: &mut SimState, value: SignalValue) -> (SignalValue, SignalValue) {
        let old = std::mem::replace(&mut state.value, value.clone());
        state.timestamp_ns = crate::experiment::document::now_ns();
        (old, value)
    }

    /// Allow or block completion of pending and future `set` calls.
    ///
    /// No effect once the backend has been disconnected.
    pub fn set_put_proceeds(&self, proceeds: bool) {
        let next = if proceeds { PutGate::Open } else { PutGate::Held };
        self.put_gate.send_if_modified(|gate| {
            if *gate == PutGate::Closed || *gate == next {
                return false;
            }
            *gate = next;
            true
        });
    }

    /// Whether `set` currently completes.
    pub fn put_proceeds(&self) -> bool {
        *self.put_gate.borrow() == PutGate::Open
    }

    /// Release every pending wait with [`PutCompletion::Disconnected`].
    pub(crate) fn close(&self) {
        self.put_gate.send_replace(PutGate::Closed);
    }

    /// Wait until puts may proceed, the backend closes, or `timeout` passes.
    pub(crate) async fn wait_put_proceeds(&self, timeout: Duration) -> PutCompletion {
        let mut rx = self.put_gate.subscribe();
        let outcome =
            tokio::time::timeout(timeout, rx.wait_for(|gate| *gate != PutGate::Held)).await;
        match outcome {
            Err(_) => PutCompletion::TimedOut,
            Ok(Ok(gate)) if *gate == PutGate::Open => PutCompletion::Completed,
            Ok(_) => PutCompletion::Disconnected,
        }
    }
}

/// The backend a connected signal is using.
#[derive(Debug, Clone)]
pub enum Backend {
    /// In-memory simulation.
    Sim(SimBackend),
    /// External protocol.
    Real(Arc<dyn RealBackend>),
}

impl Backend {
    /// Which kind this is.
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Sim(_) => BackendKind::Sim,
            Backend::Real(_) => BackendKind::Real,
        }
    }

    /// Current reading.
    pub fn reading(&self) -> DaqResult<Reading> {
        match self {
            Backend::Sim(sim) => Ok(sim.reading()),
            Backend::Real(real) => real.reading(),
        }
    }

    /// Source string for a signal with the given full name.
    pub fn source(&self, signal_name: &str) -> String {
        match self {
            Backend::Sim(_) => format!("sim://{}", signal_name),
            Backend::Real(real) => real.source(),
        }
    }

    /// The simulated backend, if this is one.
    pub fn as_sim(&self) -> Option<&SimBackend> {
        match self {
            Backend::Sim(sim) => Some(sim),
            Backend::Real(_) => None,
        }
    }
}
