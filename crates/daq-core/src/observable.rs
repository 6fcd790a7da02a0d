//! Change observers for signals.
//!
//! Every [`Signal`](crate::signal::Signal) owns one [`ObserverList`]. Each
//! value change (a write, a privileged injection, or an update pushed by a
//! real backend) calls every registered observer with `(old, new)`:
//!
//! - synchronously, inside the call that changed the value
//! - in registration order
//! - once per change, without batching
//!
//! The list is snapshotted before notification and no lock is held while an
//! observer runs, so observers may register or unregister other observers
//! (including themselves) without deadlocking.
//!
//! # Example
//!
//! ```rust,ignore
//! let log = Arc::new(Mutex::new(Vec::new()));
//! let sink = log.clone();
//! let handle = signal.register_observer(move |old, new| {
//!     sink.lock().push((old.clone(), new.clone()));
//! });
//! signal.write(1.0)?;
//! signal.unregister_observer(handle);
//! ```

use crate::value::SignalValue;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback invoked with `(old, new)` on every value change.
pub type Observer = Arc<dyn Fn(&SignalValue, &SignalValue) + Send + Sync>;

/// Handle returned when registering an observer, used for unregistration.
///
/// This is an opaque handle; ids are unique within one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(pub u64);

impl ObserverHandle {
    /// Create a new observer handle with the given ID.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the internal ID (for debugging/logging).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Ordered list of observers.
#[derive(Default)]
pub struct ObserverList {
    next_id: AtomicU64,
    entries: RwLock<Vec<(ObserverHandle, Observer)>>,
}

impl std::fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl ObserverList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observer; it fires after every observer registered before it.
    pub fn register<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&SignalValue, &SignalValue) + Send + Sync + 'static,
    {
        self.register_arc(Arc::new(observer))
    }

    /// Append an already shared observer.
    pub fn register_arc(&self, observer: Observer) -> ObserverHandle {
        let handle = ObserverHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((handle, observer));
        handle
    }

    /// Remove an observer. Returns `false` if the handle was unknown.
    pub fn unregister(&self, handle: ObserverHandle) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(h, _)| *h != handle);
        entries.len() != before
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Call every observer in registration order.
    pub fn notify(&self, old: &SignalValue, new: &SignalValue) {
        let snapshot: Vec<Observer> = self
            .entries
            .read()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in snapshot {
            observer(old, new);
        }
    }
}
