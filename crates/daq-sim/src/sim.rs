//! Drive simulated signals from test code.
//!
//! All functions fail with [`DaqError::NotSimulated`] when the signal is
//! connected to a real backend.

use daq_core::{BackendKind, DaqError, DaqResult, ObserverHandle, Signal, SignalValue};
use tracing::debug;

fn ensure_sim(signal: &Signal) -> DaqResult<()> {
    if signal.backend_kind() == Some(BackendKind::Real) {
        return Err(DaqError::NotSimulated {
            signal: signal.name(),
        });
    }
    Ok(())
}

/// Set the simulated value, bypassing the read-only check.
///
/// Observers fire as for a normal write. Fails with
/// [`DaqError::TypeMismatch`] when `value` does not fit the signal type.
pub fn set_sim_value(signal: &Signal, value: impl Into<SignalValue>) -> DaqResult<()> {
    let value = value.into();
    debug!(signal = %signal.name(), value = %value, "Injecting sim value");
    signal.inject_value(value)
}

/// Call `callback(old, new)` on every later change of `signal`.
///
/// May be registered before the signal connects. The callback stays
/// registered until removed with [`Signal::unregister_observer`].
pub fn set_sim_callback<F>(signal: &Signal, callback: F) -> DaqResult<ObserverHandle>
where
    F: Fn(&SignalValue, &SignalValue) + Send + Sync + 'static,
{
    ensure_sim(signal)?;
    Ok(signal.register_observer(callback))
}

/// Allow (`true`) or hold (`false`) completion of `set()` on `signal`.
///
/// The value is written immediately either way; only the wait for
/// completion is gated. Applies to the current connection.
pub fn set_sim_put_proceeds(signal: &Signal, proceeds: bool) -> DaqResult<()> {
    signal.sim_backend()?.set_put_proceeds(proceeds);
    debug!(signal = %signal.name(), proceeds, "Sim put gate changed");
    Ok(())
}

/// Make simulated connects of `signal` fail with `reason`, or clear with `None`.
pub fn set_sim_connect_failure(signal: &Signal, reason: Option<&str>) -> DaqResult<()> {
    ensure_sim(signal)?;
    signal.set_sim_connect_failure(reason.map(str::to_string));
    Ok(())
}
