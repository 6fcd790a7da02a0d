//! Devices: named trees of signals and sub-devices.
//!
//! A [`Device`] is declared once with a [`DeviceBuilder`] and never changes
//! shape afterwards. Children keep their declaration order, which is the
//! order used by [`Device::walk`], by connection and by error reporting.
//!
//! # Naming
//!
//! Setting a device's name renames every descendant: a signal declared as
//! `readback` inside child `x` of device `stage` is named `stage-x-readback`.
//! Those full names are the field names of readings. Lookups inside a tree
//! use dotted relative paths instead (`x.readback`).
//!
//! # Connection
//!
//! [`Device::connect_all`] connects every signal concurrently. If any of
//! them fails, every signal of the tree is disconnected again and one
//! [`DaqError::Connection`] lists all failing signals.

use crate::backend::{BackendKind, ConnectionState};
use crate::capabilities::Readable;
use crate::error::{ConnectFailure, ConnectionFailures, DaqError, DaqResult};
use crate::experiment::document::DataKey;
use crate::signal::Signal;
use crate::value::Reading;
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// How a signal child takes part in readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Included in `read()` / `describe()`.
    Read,
    /// Included in `read_configuration()` / `describe_configuration()`.
    Config,
    /// Connected with the tree but not part of any aggregate read.
    Omitted,
}

#[derive(Debug, Clone)]
enum Child {
    Signal(Signal, FieldKind),
    Device(Device),
}

struct DeviceInner {
    name: RwLock<String>,
    children: Vec<(String, Child)>,
}

/// A named, recursively composed tree of signals and sub-devices.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name())
            .field("children", &self.child_names())
            .finish()
    }
}

/// Declarative constructor for [`Device`].
#[derive(Debug)]
pub struct DeviceBuilder {
    name: String,
    children: Vec<(String, Child)>,
}

impl DeviceBuilder {
    /// Start declaring a device.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    /// Add a signal that is part of `read()`.
    pub fn read(mut self, name: impl Into<String>, signal: Signal) -> Self {
        self.children
            .push((name.into(), Child::Signal(signal, FieldKind::Read)));
        self
    }

    /// Add a signal that is part of `read_configuration()`.
    pub fn config(mut self, name: impl Into<String>, signal: Signal) -> Self {
        self.children
            .push((name.into(), Child::Signal(signal, FieldKind::Config)));
        self
    }

    /// Add a signal that is connected with the device but never read.
    pub fn signal(mut self, name: impl Into<String>, signal: Signal) -> Self {
        self.children
            .push((name.into(), Child::Signal(signal, FieldKind::Omitted)));
        self
    }

    /// Add a sub-device.
    pub fn child(mut self, name: impl Into<String>, device: Device) -> Self {
        self.children.push((name.into(), Child::Device(device)));
        self
    }

    /// Finish the tree and name every descendant.
    pub fn build(self) -> DaqResult<Device> {
        let mut seen = HashSet::new();
        for (child, _) in &self.children {
            if !seen.insert(child.as_str()) {
                return Err(DaqError::DuplicateChild {
                    device: self.name.clone(),
                    child: child.clone(),
                });
            }
        }
        let device = Device {
            inner: Arc::new(DeviceInner {
                name: RwLock::new(String::new()),
                children: self.children,
            }),
        };
        device.set_name(&self.name);
        Ok(device)
    }
}

fn join_name(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}-{}", parent, child)
    }
}

fn join_path(prefix: &str, child: &str) -> String {
    if prefix.is_empty() {
        child.to_string()
    } else {
        format!("{}.{}", prefix, child)
    }
}

/// One signal reached by walking a device.
#[derive(Debug, Clone)]
pub struct DeviceField {
    /// Dotted path relative to the walked device.
    pub path: String,
    /// The signal.
    pub signal: Signal,
    /// How the field takes part in readings.
    pub kind: FieldKind,
}

/// Depth-first iterator over the signals of a device tree.
#[derive(Debug, Clone)]
pub struct Fields {
    // (path prefix, device, next child index)
    stack: Vec<(String, Device, usize)>,
}

impl Iterator for Fields {
    type Item = DeviceField;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (prefix, device, index) = self.stack.last_mut()?;
            let Some((name, child)) = device.inner.children.get(*index).cloned() else {
                self.stack.pop();
                continue;
            };
            *index += 1;
            let path = join_path(prefix, &name);
            match child {
                Child::Signal(signal, kind) => return Some(DeviceField { path, signal, kind }),
                Child::Device(sub) => self.stack.push((path, sub, 0)),
            }
        }
    }
}

impl Device {
    /// Start declaring a device.
    pub fn builder(name: impl Into<String>) -> DeviceBuilder {
        DeviceBuilder::new(name)
    }

    /// Device name (prefix of every descendant signal name).
    pub fn name(&self) -> String {
        self.inner.name.read().clone()
    }

    /// Rename this device and every descendant.
    pub fn set_name(&self, name: &str) {
        *self.inner.name.write() = name.to_string();
        for (child, node) in &self.inner.children {
            let full = join_name(name, child);
            match node {
                Child::Signal(signal, _) => signal.set_name(full),
                Child::Device(device) => device.set_name(&full),
            }
        }
    }

    /// Names of the immediate children, in declaration order.
    pub fn child_names(&self) -> Vec<String> {
        self.inner
            .children
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Whether two handles refer to the same device.
    pub fn ptr_eq(&self, other: &Device) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Every signal in the tree with its kind, in declaration order.
    pub fn fields(&self) -> Fields {
        Fields {
            stack: vec![(String::new(), self.clone(), 0)],
        }
    }

    /// Lazy `(path, signal)` sequence over the whole tree.
    ///
    /// Deterministic and finite; call again (or clone the iterator) to
    /// restart.
    pub fn walk(&self) -> impl Iterator<Item = (String, Signal)> + Clone {
        self.fields().map(|field| (field.path, field.signal))
    }

    /// Look up a signal by dotted path (`x.readback`).
    pub fn signal(&self, path: &str) -> Option<Signal> {
        let (parent, leaf) = match path.rsplit_once('.') {
            Some((parent, leaf)) => (self.device(parent)?, leaf),
            None => (self.clone(), path),
        };
        parent
            .inner
            .children
            .iter()
            .find_map(|(name, child)| match child {
                Child::Signal(signal, _) if name == leaf => Some(signal.clone()),
                _ => None,
            })
    }

    /// Look up a sub-device by dotted path.
    pub fn device(&self, path: &str) -> Option<Device> {
        path.split('.').try_fold(self.clone(), |current, segment| {
            current
                .inner
                .children
                .iter()
                .find_map(|(name, child)| match child {
                    Child::Device(device) if name == segment => Some(device.clone()),
                    _ => None,
                })
        })
    }

    /// Connect every signal in the tree.
    ///
    /// All-or-nothing: on any failure the whole tree is disconnected and the
    /// error names every signal that failed.
    pub async fn connect_all(&self, kind: BackendKind) -> DaqResult<()> {
        let signals: Vec<Signal> = self.walk().map(|(_, signal)| signal).collect();
        let results = join_all(signals.iter().map(|signal| signal.connect(kind))).await;

        let mut failures = ConnectionFailures::new();
        for (signal, result) in signals.iter().zip(results) {
            match result {
                Ok(()) => {}
                Err(DaqError::Connection(inner)) => failures.extend(inner),
                Err(other) => failures.push(ConnectFailure::new(signal.name(), other.to_string())),
            }
        }

        if failures.is_empty() {
            debug!(device = %self.name(), signals = signals.len(), backend = %kind, "Device connected");
            return Ok(());
        }
        warn!(
            device = %self.name(),
            failed = ?failures.paths(),
            "Device failed to connect, tearing down"
        );
        self.disconnect_all().await;
        Err(DaqError::Connection(failures))
    }

    /// Disconnect every signal in the tree.
    pub async fn disconnect_all(&self) {
        let signals: Vec<Signal> = self.walk().map(|(_, signal)| signal).collect();
        join_all(signals.iter().map(Signal::disconnect)).await;
    }

    /// Fold of every descendant signal's state.
    ///
    /// Connecting if any signal is connecting, connected if all are
    /// (vacuously true for a device without signals), disconnected otherwise.
    pub fn connection_state(&self) -> ConnectionState {
        let mut all_connected = true;
        for (_, signal) in self.walk() {
            match signal.connection_state() {
                ConnectionState::Connecting => return ConnectionState::Connecting,
                ConnectionState::Disconnected => all_connected = false,
                ConnectionState::Connected => {}
            }
        }
        if all_connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    fn collect<T>(
        &self,
        kind: FieldKind,
        f: impl Fn(&Signal) -> DaqResult<T>,
    ) -> DaqResult<BTreeMap<String, T>> {
        self.fields()
            .filter(|field| field.kind == kind && field.signal.access().is_readable())
            .map(|field| Ok((field.signal.name(), f(&field.signal)?)))
            .collect()
    }
}

impl Readable for Device {
    fn name(&self) -> String {
        Device::name(self)
    }

    fn read(&self) -> DaqResult<BTreeMap<String, Reading>> {
        self.collect(FieldKind::Read, Signal::reading)
    }

    fn describe(&self) -> DaqResult<BTreeMap<String, DataKey>> {
        self.collect(FieldKind::Read, Signal::data_key)
    }

    fn read_configuration(&self) -> DaqResult<BTreeMap<String, Reading>> {
        self.collect(FieldKind::Config, Signal::reading)
    }

    fn describe_configuration(&self) -> DaqResult<BTreeMap<String, DataKey>> {
        self.collect(FieldKind::Config, Signal::data_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{soft_signal_r, soft_signal_rw, Access};
    use crate::value::{SignalValue, ValueType};

    fn stage() -> Device {
        let x = Device::builder("")
            .read("readback", soft_signal_r("", ValueType::Float))
            .config("velocity", soft_signal_rw("", ValueType::Float))
            .build()
            .unwrap();
        let y = Device::builder("")
            .read("readback", soft_signal_r("", ValueType::Float))
            .build()
            .unwrap();
        Device::builder("stage")
            .child("x", x)
            .child("y", y)
            .read("temperature", soft_signal_r("", ValueType::Float))
            .build()
            .unwrap()
    }

    #[test]
    fn test_names_are_joined_with_dash() {
        let dev = stage();
        let names: Vec<String> = dev.walk().map(|(_, s)| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "stage-x-readback",
                "stage-x-velocity",
                "stage-y-readback",
                "stage-temperature"
            ]
        );
    }

    #[test]
    fn test_walk_is_restartable_and_ordered() {
        let dev = stage();
        let walk = dev.walk();
        let first: Vec<String> = walk.clone().map(|(p, _)| p).collect();
        let second: Vec<String> = walk.map(|(p, _)| p).collect();
        assert_eq!(first, second);
        assert_eq!(
            first,
            vec!["x.readback", "x.velocity", "y.readback", "temperature"]
        );
    }

    #[test]
    fn test_duplicate_child_rejected() {
        let err = Device::builder("det")
            .read("value", soft_signal_r("", ValueType::Float))
            .config("value", soft_signal_rw("", ValueType::Float))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            DaqError::DuplicateChild {
                device: "det".into(),
                child: "value".into()
            }
        );
    }

    #[test]
    fn test_lookup_by_path() {
        let dev = stage();
        assert_eq!(dev.signal("x.velocity").unwrap().name(), "stage-x-velocity");
        assert_eq!(dev.signal("temperature").unwrap().name(), "stage-temperature");
        assert_eq!(dev.device("y").unwrap().name(), "stage-y");
        assert!(dev.signal("x").is_none());
        assert!(dev.signal("z.readback").is_none());
    }

    #[test]
    fn test_renaming_parent_renames_children() {
        let dev = stage();
        dev.set_name("table");
        assert_eq!(dev.signal("x.readback").unwrap().name(), "table-x-readback");
    }

    #[tokio::test]
    async fn test_read_and_configuration_split() {
        let dev = stage();
        dev.connect_all(BackendKind::Sim).await.unwrap();
        assert_eq!(dev.connection_state(), ConnectionState::Connected);

        let read = dev.read().unwrap();
        assert_eq!(
            read.keys().cloned().collect::<Vec<_>>(),
            vec!["stage-temperature", "stage-x-readback", "stage-y-readback"]
        );
        let config = dev.read_configuration().unwrap();
        assert_eq!(config.keys().collect::<Vec<_>>(), vec!["stage-x-velocity"]);

        let described = dev.describe().unwrap();
        assert_eq!(
            described.keys().collect::<Vec<_>>(),
            read.keys().collect::<Vec<_>>()
        );
        assert_eq!(described["stage-x-readback"].source, "sim://stage-x-readback");
    }

    #[tokio::test]
    async fn test_read_is_repeatable() {
        let dev = stage();
        dev.connect_all(BackendKind::Sim).await.unwrap();
        dev.signal("x.readback").unwrap().inject_value(1.5).unwrap();
        assert_eq!(dev.read().unwrap(), dev.read().unwrap());
    }

    #[tokio::test]
    async fn test_write_only_fields_skipped() {
        let cmd = Signal::builder("", ValueType::String)
            .access(Access::WriteOnly)
            .build()
            .unwrap();
        let dev = Device::builder("ctrl")
            .read("command", cmd)
            .read("status", soft_signal_r("", ValueType::String))
            .build()
            .unwrap();
        dev.connect_all(BackendKind::Sim).await.unwrap();
        assert_eq!(
            dev.read().unwrap().keys().collect::<Vec<_>>(),
            vec!["ctrl-status"]
        );
    }

    #[tokio::test]
    async fn test_omitted_fields_connect_but_not_read() {
        let dev = Device::builder("m")
            .read("readback", soft_signal_r("", ValueType::Float))
            .signal("setpoint", soft_signal_rw("", ValueType::Float))
            .build()
            .unwrap();
        dev.connect_all(BackendKind::Sim).await.unwrap();
        assert!(dev.signal("setpoint").unwrap().is_connected());
        assert_eq!(dev.read().unwrap().keys().collect::<Vec<_>>(), vec!["m-readback"]);
        assert!(dev.read_configuration().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_failure_tears_down_tree() {
        let dev = stage();
        dev.signal("y.readback")
            .unwrap()
            .set_sim_connect_failure(Some("no response".into()));

        let err = dev.connect_all(BackendKind::Sim).await.unwrap_err();
        assert_eq!(err.failed_paths(), vec!["stage-y-readback"]);
        assert!(dev.walk().all(|(_, s)| !s.is_connected()));
        assert_eq!(dev.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_all_idempotent() {
        let dev = stage();
        dev.connect_all(BackendKind::Sim).await.unwrap();
        let mover = dev.signal("x.velocity").unwrap();
        mover.write(2.0).unwrap();
        dev.connect_all(BackendKind::Sim).await.unwrap();
        assert_eq!(mover.get_value().unwrap(), SignalValue::Float(2.0));
    }

    #[tokio::test]
    async fn test_disconnect_all() {
        let dev = stage();
        dev.connect_all(BackendKind::Sim).await.unwrap();
        dev.disconnect_all().await;
        assert_eq!(dev.connection_state(), ConnectionState::Disconnected);
        assert!(matches!(dev.read(), Err(DaqError::NotConnected { .. })));
    }
}
