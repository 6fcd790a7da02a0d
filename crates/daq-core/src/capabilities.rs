//! Capability traits shared by signals and devices.
//!
//! Code that only needs to read things (the run engine, assertion helpers)
//! works against [`Readable`] instead of a concrete type:
//!
//! - a [`Signal`](crate::signal::Signal) reads as a single-entry map
//! - a [`Device`](crate::device::Device) reads as the union of every read
//!   signal in its tree
//!
//! # Contract
//!
//! - `read()` has no side effects and may be called any number of times
//! - the set of keys returned by `read()` and `describe()` is identical and
//!   stable for as long as the tree stays connected
//! - keys are full signal names (e.g. `stage-x-readback`)
//!
//! # Example
//!
//! ```rust,ignore
//! fn snapshot(target: &dyn Readable) -> DaqResult<Vec<String>> {
//!     Ok(target.read()?.keys().cloned().collect())
//! }
//! ```

use crate::error::DaqResult;
use crate::experiment::document::DataKey;
use crate::value::Reading;
use std::collections::BTreeMap;

/// Capability: aggregate readout.
pub trait Readable: Send + Sync {
    /// Name used as the key prefix (and descriptor configuration key).
    fn name(&self) -> String;

    /// Field name → reading for every readable field.
    fn read(&self) -> DaqResult<BTreeMap<String, Reading>>;

    /// Field name → schema, same keys as [`Readable::read`].
    fn describe(&self) -> DaqResult<BTreeMap<String, DataKey>>;

    /// Field name → reading for configuration fields.
    ///
    /// # Default Implementation
    ///
    /// Returns an empty map.
    fn read_configuration(&self) -> DaqResult<BTreeMap<String, Reading>> {
        Ok(BTreeMap::new())
    }

    /// Field name → schema for configuration fields.
    ///
    /// # Default Implementation
    ///
    /// Returns an empty map.
    fn describe_configuration(&self) -> DaqResult<BTreeMap<String, DataKey>> {
        Ok(BTreeMap::new())
    }
}
