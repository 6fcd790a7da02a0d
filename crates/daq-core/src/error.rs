//! Error types for signals, devices and their backends.
//!
//! `DaqError` is the single error type returned by every operation in this
//! crate. It is built with `thiserror` so callers can match on the variant
//! or simply propagate it with `?`.
//!
//! ## Error Categories
//!
//! - **Connection**: `Connection`, `NotConnected`, `Timeout`. A backend could
//!   not be reached, or an operation ran before `connect()`. Connection
//!   failures are aggregated: one `DaqError::Connection` lists every failing
//!   signal path instead of only the first.
//! - **Capability**: `ReadOnly`, `NotWritable`, `NotReadable`. The signal's
//!   access flag forbids the operation. Never retried, never suppressed.
//! - **Type**: `TypeMismatch`. The value does not fit the signal's declared
//!   value type.
//! - **Usage**: `ReentrantWrite`, `NotSimulated`, `DuplicateChild`,
//!   `Configuration`. The caller used the API in a way it does not support.
//!
//! Nothing in this crate retries on error; every failure propagates
//! synchronously to the caller.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using [`DaqError`].
pub type DaqResult<T> = std::result::Result<T, DaqError>;

/// One signal that failed to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectFailure {
    /// Full name of the signal (e.g. `stage-x-readback`).
    pub path: String,
    /// Backend-provided reason.
    pub reason: String,
}

impl ConnectFailure {
    /// Create a failure entry.
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// Every signal that failed during one connection attempt.
///
/// Kept in the order the failures were observed, which is the declaration
/// order of the device tree for device and collector connects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionFailures(Vec<ConnectFailure>);

impl ConnectionFailures {
    /// Create an empty failure list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure.
    pub fn push(&mut self, failure: ConnectFailure) {
        self.0.push(failure);
    }

    /// Append every failure from another list.
    pub fn extend(&mut self, other: ConnectionFailures) {
        self.0.extend(other.0);
    }

    /// Whether nothing failed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of failing signals.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Failing signal paths, in order.
    pub fn paths(&self) -> Vec<&str> {
        self.0.iter().map(|f| f.path.as_str()).collect()
    }

    /// Iterate over the failures.
    pub fn iter(&self) -> impl Iterator<Item = &ConnectFailure> {
        self.0.iter()
    }

    /// Turn a non-empty list into an error.
    pub fn into_result(self) -> DaqResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(DaqError::Connection(self))
        }
    }
}

impl fmt::Display for ConnectionFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", entries.join("; "))
    }
}

impl From<ConnectFailure> for ConnectionFailures {
    fn from(failure: ConnectFailure) -> Self {
        Self(vec![failure])
    }
}

/// Primary error type for signal and device operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DaqError {
    /// One or more signals could not connect.
    ///
    /// Raised by `Signal::connect`, `Device::connect_all` and
    /// `DeviceCollector::finish`. When raised by a device or collector, every
    /// signal that did connect has already been torn down again.
    ///
    /// **Recovery Strategy**: Fix the backend (or the injected sim failure) and
    /// connect again. Not retried automatically.
    #[error("Failed to connect {} signal(s): {}", .0.len(), .0)]
    Connection(ConnectionFailures),

    /// The signal has no active backend.
    #[error("Signal '{signal}' is not connected")]
    NotConnected {
        /// Full signal name.
        signal: String,
    },

    /// A write was attempted on a read-only signal.
    ///
    /// Read-only signals only change through the privileged injection path
    /// (`inject_value` / `set_sim_value`).
    #[error("Signal '{signal}' is read-only")]
    ReadOnly {
        /// Full signal name.
        signal: String,
    },

    /// The signal's access flag does not allow this kind of write.
    #[error("Signal '{signal}' does not support {operation}")]
    NotWritable {
        /// Full signal name.
        signal: String,
        /// The rejected operation (`write`, `trigger`).
        operation: &'static str,
    },

    /// The signal is write-only or an executable action.
    #[error("Signal '{signal}' cannot be read")]
    NotReadable {
        /// Full signal name.
        signal: String,
    },

    /// The value does not match the signal's declared value type.
    #[error("Type mismatch on '{signal}': expected {expected}, got {actual}")]
    TypeMismatch {
        /// Full signal name.
        signal: String,
        /// Declared value type.
        expected: String,
        /// Offending value (type and content).
        actual: String,
    },

    /// An observer tried to change the signal that is notifying it.
    #[error("Reentrant write to '{signal}' from inside one of its observers")]
    ReentrantWrite {
        /// Full signal name.
        signal: String,
    },

    /// A sim-only utility was used on a signal that is not sim-connected.
    #[error("Signal '{signal}' is not connected to a simulated backend")]
    NotSimulated {
        /// Full signal name.
        signal: String,
    },

    /// An operation did not complete within its timeout.
    #[error("Timed out after {timeout:?} waiting for {operation} on '{signal}'")]
    Timeout {
        /// Full signal name.
        signal: String,
        /// What was being waited for.
        operation: &'static str,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// Two children of one device share a name.
    #[error("Device '{device}' already has a child named '{child}'")]
    DuplicateChild {
        /// Device being built.
        device: String,
        /// Repeated child name.
        child: String,
    },

    /// Connection configuration is invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl DaqError {
    /// Connection error for a single signal.
    pub fn connection(path: impl Into<String>, reason: impl Into<String>) -> Self {
        DaqError::Connection(ConnectFailure::new(path, reason).into())
    }

    /// Failing paths if this is a connection error.
    pub fn failed_paths(&self) -> Vec<&str> {
        match self {
            DaqError::Connection(failures) => failures.paths(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_lists_every_path() {
        let mut failures = ConnectionFailures::new();
        failures.push(ConnectFailure::new("stage-x", "unreachable"));
        failures.push(ConnectFailure::new("stage-y", "timeout"));
        let err = failures.into_result().unwrap_err();

        assert_eq!(err.failed_paths(), vec!["stage-x", "stage-y"]);
        let msg = err.to_string();
        assert!(msg.starts_with("Failed to connect 2 signal(s)"));
        assert!(msg.contains("stage-x: unreachable"));
        assert!(msg.contains("stage-y: timeout"));
    }

    #[test]
    fn test_empty_failures_are_ok() {
        assert!(ConnectionFailures::new().into_result().is_ok());
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = DaqError::TypeMismatch {
            signal: "det-value".into(),
            expected: "float".into(),
            actual: "string \"x\"".into(),
        };
        assert_eq!(
            err.to_string(),
            "Type mismatch on 'det-value': expected float, got string \"x\""
        );
    }
}
