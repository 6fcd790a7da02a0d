//! Signals: named, typed value endpoints.
//!
//! A [`Signal`] is a cheap-to-clone handle. All clones share one value
//! store, one observer list and one connection.
//!
//! # Lifecycle
//!
//! Signals are created disconnected. [`Signal::connect`] attaches a backend
//! of the requested [`BackendKind`]:
//!
//! - connecting twice with the same kind is a no-op
//! - connecting with a different kind disconnects first, then switches
//! - soft signals (no real backend attached) always get a simulated store,
//!   even when `real` is requested
//!
//! A freshly connected simulated signal holds its initial value if one was
//! given, otherwise the type default (see [`ValueType::default_value`]).
//!
//! # Writes
//!
//! [`Signal::write`] checks, in order: the access flag, the value type, the
//! connection. Only then is the backend updated and every observer called
//! with `(old, new)`. [`Signal::inject_value`] is the privileged path that
//! skips the access check; it is how simulated hardware changes read-only
//! values.
//!
//! An observer may write to other signals, but writing to the signal that is
//! currently notifying it fails with [`DaqError::ReentrantWrite`].

use crate::backend::{
    Backend, BackendKind, ConnectionState, PutCompletion, RealBackend, SimBackend,
};
use crate::capabilities::Readable;
use crate::error::{DaqError, DaqResult};
use crate::experiment::document::DataKey;
use crate::observable::{ObserverHandle, ObserverList};
use crate::value::{Reading, SignalValue, ValueType};
use parking_lot::{ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for real connects and `set` completion.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// What a signal allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Readable; changes only through injection.
    ReadOnly,
    /// Readable and writable.
    ReadWrite,
    /// Writable, not readable.
    WriteOnly,
    /// An action: `trigger()` only.
    Execute,
}

impl Access {
    /// Whether `read` is allowed.
    pub fn is_readable(&self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }

    /// Whether `write` / `set` are allowed.
    pub fn is_writable(&self) -> bool {
        matches!(self, Access::ReadWrite | Access::WriteOnly)
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::ReadOnly => write!(f, "read-only"),
            Access::ReadWrite => write!(f, "read-write"),
            Access::WriteOnly => write!(f, "write-only"),
            Access::Execute => write!(f, "execute"),
        }
    }
}

/// Setpoint and readback of a read-write signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Last value written.
    pub setpoint: SignalValue,
    /// Current value.
    pub readback: SignalValue,
}

#[derive(Clone, Copy)]
enum Origin {
    Put,
    Inject,
}

struct SignalInner {
    name: RwLock<String>,
    value_type: ValueType,
    access: Access,
    units: String,
    precision: Option<f64>,
    timeout: Duration,
    initial: Option<SignalValue>,
    // None for soft signals
    real: Option<Arc<dyn RealBackend>>,
    active: RwLock<Option<Backend>>,
    state: RwLock<ConnectionState>,
    sim_connect_failure: RwLock<Option<String>>,
    observers: ObserverList,
    // true while observers of this signal are running
    notifying: ReentrantMutex<Cell<bool>>,
}

/// A single named, typed value endpoint.
#[derive(Clone)]
pub struct Signal {
    inner: Arc<SignalInner>,
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name())
            .field("value_type", &self.inner.value_type)
            .field("access", &self.inner.access)
            .field("state", &self.connection_state())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Signal`].
#[derive(Debug, Clone)]
pub struct SignalBuilder {
    name: String,
    value_type: ValueType,
    access: Access,
    units: String,
    precision: Option<f64>,
    timeout: Duration,
    initial: Option<SignalValue>,
    real: Option<Arc<dyn RealBackend>>,
}

impl SignalBuilder {
    /// Set the access flag (default read-write).
    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// Shortcut for `access(Access::ReadOnly)`.
    pub fn read_only(self) -> Self {
        self.access(Access::ReadOnly)
    }

    /// Physical units.
    pub fn units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    /// Display precision.
    pub fn precision(mut self, precision: f64) -> Self {
        self.precision = Some(precision);
        self
    }

    /// Timeout for real connects and `set` completion.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Value held by the simulated store after connect.
    pub fn initial(mut self, value: impl Into<SignalValue>) -> Self {
        self.initial = Some(value.into());
        self
    }

    /// Backend used when connecting with [`BackendKind::Real`].
    pub fn real_backend(mut self, backend: Arc<dyn RealBackend>) -> Self {
        self.real = Some(backend);
        self
    }

    /// Create the signal. Fails if the initial value does not fit the type.
    pub fn build(mut self) -> DaqResult<Signal> {
        let initial = match self.initial.take() {
            Some(value) => Some(self.value_type.coerce(value).map_err(|actual| {
                DaqError::TypeMismatch {
                    signal: self.name.clone(),
                    expected: self.value_type.to_string(),
                    actual,
                }
            })?),
            None => None,
        };
        Ok(self.assemble(initial))
    }

    fn assemble(self, initial: Option<SignalValue>) -> Signal {
        Signal {
            inner: Arc::new(SignalInner {
                name: RwLock::new(self.name),
                value_type: self.value_type,
                access: self.access,
                units: self.units,
                precision: self.precision,
                timeout: self.timeout,
                initial,
                real: self.real,
                active: RwLock::new(None),
                state: RwLock::new(ConnectionState::Disconnected),
                sim_connect_failure: RwLock::new(None),
                observers: ObserverList::new(),
                notifying: ReentrantMutex::new(Cell::new(false)),
            }),
        }
    }
}

/// Read-write signal backed by a simulated store in every mode.
pub fn soft_signal_rw(name: impl Into<String>, value_type: ValueType) -> Signal {
    Signal::soft(name.into(), value_type, Access::ReadWrite)
}

/// Read-only signal backed by a simulated store in every mode.
///
/// Its value changes only through `inject_value` (or `set_sim_value`).
pub fn soft_signal_r(name: impl Into<String>, value_type: ValueType) -> Signal {
    Signal::soft(name.into(), value_type, Access::ReadOnly)
}

impl Signal {
    /// Start building a signal. Unnamed signals (`""`) are named by their device.
    pub fn builder(name: impl Into<String>, value_type: ValueType) -> SignalBuilder {
        SignalBuilder {
            name: name.into(),
            value_type,
            access: Access::ReadWrite,
            units: String::new(),
            precision: None,
            timeout: DEFAULT_TIMEOUT,
            initial: None,
            real: None,
        }
    }

    fn soft(name: String, value_type: ValueType, access: Access) -> Self {
        Self::builder(name, value_type).access(access).assemble(None)
    }

    /// Full name, e.g. `stage-x-readback`.
    pub fn name(&self) -> String {
        self.inner.name.read().clone()
    }

    /// Rename. Called by the owning device when its name is set.
    pub fn set_name(&self, name: impl Into<String>) {
        *self.inner.name.write() = name.into();
    }

    /// Declared value type.
    pub fn value_type(&self) -> &ValueType {
        &self.inner.value_type
    }

    /// Access flag.
    pub fn access(&self) -> Access {
        self.inner.access
    }

    /// Physical units (may be empty).
    pub fn units(&self) -> &str {
        &self.inner.units
    }

    /// Timeout for real connects and `set` completion.
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Whether this signal always uses a simulated store.
    pub fn is_soft(&self) -> bool {
        self.inner.real.is_none()
    }

    /// Whether two handles refer to the same signal.
    pub fn ptr_eq(&self, other: &Signal) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Current lifecycle state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Whether a backend is active.
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Kind of the active backend.
    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.inner.active.read().as_ref().map(Backend::kind)
    }

    /// The active backend.
    pub fn backend(&self) -> DaqResult<Backend> {
        self.inner
            .active
            .read()
            .clone()
            .ok_or_else(|| DaqError::NotConnected { signal: self.name() })
    }

    /// The active simulated backend.
    pub fn sim_backend(&self) -> DaqResult<SimBackend> {
        match self.backend()? {
            Backend::Sim(sim) => Ok(sim),
            Backend::Real(_) => Err(DaqError::NotSimulated { signal: self.name() }),
        }
    }

    /// Make the next simulated connects fail with `reason`, or clear it.
    ///
    /// Used to emulate unreachable hardware; has no effect on real connects.
    pub fn set_sim_connect_failure(&self, reason: Option<String>) {
        *self.inner.sim_connect_failure.write() = reason;
    }

    fn effective_kind(&self, requested: BackendKind) -> BackendKind {
        match self.inner.real {
            None => BackendKind::Sim,
            Some(_) => requested,
        }
    }

    /// Connect to a backend of the requested kind.
    ///
    /// Idempotent for the kind already connected. Fails with
    /// [`DaqError::Connection`] naming this signal; the signal is left
    /// disconnected.
    pub async fn connect(&self, kind: BackendKind) -> DaqResult<()> {
        let kind = self.effective_kind(kind);
        let current = self.backend_kind();
        if current == Some(kind) {
            return Ok(());
        }
        if let Some(previous) = current {
            debug!(signal = %self.name(), from = %previous, to = %kind, "Switching backend");
            self.disconnect().await;
        }

        match kind {
            BackendKind::Sim => self.connect_sim(),
            BackendKind::Real => self.connect_real().await,
        }
    }

    fn connect_sim(&self) -> DaqResult<()> {
        let name = self.name();
        if let Some(reason) = self.inner.sim_connect_failure.read().clone() {
            debug!(signal = %name, %reason, "Simulated connect failure");
            return Err(DaqError::connection(name, reason));
        }
        let sim = SimBackend::new(self.inner.value_type.clone(), self.inner.initial.clone());
        *self.inner.active.write() = Some(Backend::Sim(sim));
        *self.inner.state.write() = ConnectionState::Connected;
        debug!(signal = %name, backend = "sim", "Signal connected");
        Ok(())
    }

    async fn connect_real(&self) -> DaqResult<()> {
        let name = self.name();
        let Some(real) = self.inner.real.clone() else {
            return Err(DaqError::connection(name, "no real backend attached"));
        };

        *self.inner.state.write() = ConnectionState::Connecting;
        let outcome = tokio::time::timeout(self.inner.timeout, real.connect()).await;
        let reason = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some(format!("timed out after {:?}", self.inner.timeout)),
        };
        if let Some(reason) = reason {
            *self.inner.state.write() = ConnectionState::Disconnected;
            warn!(signal = %name, source = %real.source(), %reason, "Signal failed to connect");
            return Err(DaqError::connection(name, reason));
        }

        real.set_monitor(Some(self.monitor()));
        *self.inner.active.write() = Some(Backend::Real(real));
        *self.inner.state.write() = ConnectionState::Connected;
        debug!(signal = %name, backend = "real", "Signal connected");
        Ok(())
    }

    // Observer handed to a real backend for hardware-driven changes.
    fn monitor(&self) -> crate::observable::Observer {
        let weak: Weak<SignalInner> = Arc::downgrade(&self.inner);
        Arc::new(move |old: &SignalValue, new: &SignalValue| {
            if let Some(inner) = weak.upgrade() {
                let signal = Signal { inner };
                if let Err(err) = signal.notify(old, new) {
                    warn!(signal = %signal.name(), error = %err, "Dropped monitor update");
                }
            }
        })
    }

    /// Release the backend. Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        let previous = self.inner.active.write().take();
        *self.inner.state.write() = ConnectionState::Disconnected;
        if let Some(backend) = previous {
            match &backend {
                Backend::Sim(sim) => sim.close(),
                Backend::Real(real) => {
                    real.set_monitor(None);
                    real.disconnect().await;
                }
            }
            debug!(signal = %self.name(), backend = %backend.kind(), "Signal disconnected");
        }
    }

    /// Disconnect without waiting.
    ///
    /// Real backends are disconnected on the current tokio runtime when
    /// there is one. Used where `await` is not possible (`Drop`).
    pub fn release(&self) {
        let previous = self.inner.active.write().take();
        *self.inner.state.write() = ConnectionState::Disconnected;
        match previous {
            Some(Backend::Sim(sim)) => sim.close(),
            Some(Backend::Real(real)) => {
                real.set_monitor(None);
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move { real.disconnect().await });
                    }
                    Err(_) => {
                        warn!(signal = %self.name(), "No runtime to disconnect real backend")
                    }
                }
            }
            None => {}
        }
    }

    /// Current reading.
    pub fn reading(&self) -> DaqResult<Reading> {
        if !self.inner.access.is_readable() {
            return Err(DaqError::NotReadable { signal: self.name() });
        }
        self.backend()?.reading()
    }

    /// Current value.
    pub fn get_value(&self) -> DaqResult<SignalValue> {
        self.reading().map(|r| r.value)
    }

    /// Setpoint and readback.
    pub fn locate(&self) -> DaqResult<Location> {
        let readback = self.get_value()?;
        let setpoint = match self.backend()? {
            Backend::Sim(sim) => sim.setpoint(),
            Backend::Real(_) => readback.clone(),
        };
        Ok(Location { setpoint, readback })
    }

    /// Address of the value: `sim://<name>` when simulated, the real
    /// backend's source otherwise, empty before connect.
    pub fn source(&self) -> String {
        self.inner
            .active
            .read()
            .as_ref()
            .map(|backend| backend.source(&self.name()))
            .unwrap_or_default()
    }

    /// Schema of this signal's field.
    pub fn data_key(&self) -> DaqResult<DataKey> {
        let value_type = &self.inner.value_type;
        let reading = self.reading()?;
        let shape = reading.value.len().map(|n| vec![n]).unwrap_or_default();
        let mut key = DataKey::scalar(&self.source(), &self.inner.units)
            .with_dtype(value_type.dtype());
        key.shape = shape;
        if let ValueType::Enum(choices) = value_type {
            key = key.with_choices(choices.clone());
        }
        if let Some(precision) = self.inner.precision {
            key = key.with_precision(precision);
        }
        Ok(key)
    }

    fn coerce(&self, value: SignalValue) -> DaqResult<SignalValue> {
        self.inner
            .value_type
            .coerce(value)
            .map_err(|actual| DaqError::TypeMismatch {
                signal: self.name(),
                expected: self.inner.value_type.to_string(),
                actual,
            })
    }

    /// Write a value through the normal path.
    pub fn write(&self, value: impl Into<SignalValue>) -> DaqResult<()> {
        match self.inner.access {
            Access::ReadOnly => {
                debug!(signal = %self.name(), "Rejected write to read-only signal");
                return Err(DaqError::ReadOnly { signal: self.name() });
            }
            Access::Execute => {
                return Err(DaqError::NotWritable {
                    signal: self.name(),
                    operation: "write",
                })
            }
            Access::ReadWrite | Access::WriteOnly => {}
        }
        let value = self.coerce(value.into())?;
        self.apply(value, Origin::Put)
    }

    /// Privileged write that bypasses the access check.
    ///
    /// Emulates an external actor (hardware) changing the value. Only
    /// simulated backends accept it.
    pub fn inject_value(&self, value: impl Into<SignalValue>) -> DaqResult<()> {
        let value = self.coerce(value.into())?;
        self.apply(value, Origin::Inject)
    }

    /// Write, then wait until the backend reports completion.
    ///
    /// Simulated completion is gated by `set_sim_put_proceeds`. Bounded by
    /// the signal timeout. A pending `set` fails with
    /// [`DaqError::NotConnected`] if the signal disconnects while it waits.
    pub async fn set(&self, value: impl Into<SignalValue>) -> DaqResult<()> {
        self.write(value)?;
        self.wait_complete("set").await
    }

    /// Fire an executable signal (writes the type default).
    pub async fn trigger(&self) -> DaqResult<()> {
        if self.inner.access != Access::Execute {
            return Err(DaqError::NotWritable {
                signal: self.name(),
                operation: "trigger",
            });
        }
        let value = self.inner.value_type.default_value();
        self.apply(value, Origin::Put)?;
        self.wait_complete("trigger").await
    }

    async fn wait_complete(&self, operation: &'static str) -> DaqResult<()> {
        let Backend::Sim(sim) = self.backend()? else {
            return Ok(());
        };
        match sim.wait_put_proceeds(self.inner.timeout).await {
            PutCompletion::Completed => Ok(()),
            PutCompletion::TimedOut => Err(DaqError::Timeout {
                signal: self.name(),
                operation,
                timeout: self.inner.timeout,
            }),
            PutCompletion::Disconnected => {
                debug!(signal = %self.name(), operation, "Disconnected while waiting for completion");
                Err(DaqError::NotConnected { signal: self.name() })
            }
        }
    }

    fn apply(&self, value: SignalValue, origin: Origin) -> DaqResult<()> {
        let guard = self.inner.notifying.lock();
        if guard.get() {
            return Err(DaqError::ReentrantWrite { signal: self.name() });
        }
        let (old, new) = match (self.backend()?, origin) {
            (Backend::Sim(sim), Origin::Put) => sim.put(value),
            (Backend::Sim(sim), Origin::Inject) => sim.inject(value),
            (Backend::Real(real), Origin::Put) if real.monitors_puts() => {
                // The monitor reports the change from inside `put`.
                drop(guard);
                return real.put(value);
            }
            (Backend::Real(real), Origin::Put) => {
                let old = real
                    .reading()
                    .map(|r| r.value)
                    .unwrap_or_else(|_| self.inner.value_type.default_value());
                real.put(value.clone())?;
                (old, value)
            }
            (Backend::Real(_), Origin::Inject) => {
                return Err(DaqError::NotSimulated { signal: self.name() })
            }
        };
        let _flag = NotifyingFlag::set(&guard);
        self.inner.observers.notify(&old, &new);
        Ok(())
    }

    fn notify(&self, old: &SignalValue, new: &SignalValue) -> DaqResult<()> {
        let guard = self.inner.notifying.lock();
        if guard.get() {
            return Err(DaqError::ReentrantWrite { signal: self.name() });
        }
        let _flag = NotifyingFlag::set(&guard);
        self.inner.observers.notify(old, new);
        Ok(())
    }

    /// Register a callback for every value change, called with `(old, new)`.
    pub fn register_observer<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&SignalValue, &SignalValue) + Send + Sync + 'static,
    {
        self.inner.observers.register(observer)
    }

    /// Remove a callback. Returns `false` if the handle was unknown.
    pub fn unregister_observer(&self, handle: ObserverHandle) -> bool {
        self.inner.observers.unregister(handle)
    }

    /// Number of registered callbacks.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }
}

// Resets the notifying flag even if an observer panics.
struct NotifyingFlag<'a>(&'a Cell<bool>);

impl<'a> NotifyingFlag<'a> {
    fn set(cell: &'a Cell<bool>) -> Self {
        cell.set(true);
        Self(cell)
    }
}

impl Drop for NotifyingFlag<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Readable for Signal {
    fn name(&self) -> String {
        Signal::name(self)
    }

    fn read(&self) -> DaqResult<BTreeMap<String, Reading>> {
        Ok(BTreeMap::from([(self.name(), self.reading()?)]))
    }

    fn describe(&self) -> DaqResult<BTreeMap<String, DataKey>> {
        Ok(BTreeMap::from([(self.name(), self.data_key()?)]))
    }
}
