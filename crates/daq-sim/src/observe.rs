//! Follow signal values over time.

use daq_core::{DaqError, DaqResult, ObserverHandle, Signal, SignalValue};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Stream of a signal's values: the current value, then every change.
///
/// Unregisters its observer when dropped.
#[derive(Debug)]
pub struct ValueObserver {
    signal: Signal,
    handle: ObserverHandle,
    rx: mpsc::UnboundedReceiver<SignalValue>,
}

impl ValueObserver {
    /// Next value, or `None` if the observer was removed.
    pub async fn recv(&mut self) -> Option<SignalValue> {
        self.rx.recv().await
    }

    /// Next value, waiting at most `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> DaqResult<SignalValue> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(value)) => Ok(value),
            _ => Err(DaqError::Timeout {
                signal: self.signal.name(),
                operation: "observe",
                timeout,
            }),
        }
    }

    /// The observed signal.
    pub fn signal(&self) -> &Signal {
        &self.signal
    }
}

impl Stream for ValueObserver {
    type Item = SignalValue;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for ValueObserver {
    fn drop(&mut self) {
        self.signal.unregister_observer(self.handle);
    }
}

/// Observe `signal`; the first item is its current value.
///
/// Fails if the signal cannot be read.
pub fn observe_value(signal: &Signal) -> DaqResult<ValueObserver> {
    let (tx, rx) = mpsc::unbounded_channel();
    let current = signal.get_value()?;
    // The receiver is alive while the observer is registered.
    let _ = tx.send(current);
    let handle = signal.register_observer(move |_old, new| {
        let _ = tx.send(new.clone());
    });
    Ok(ValueObserver {
        signal: signal.clone(),
        handle,
        rx,
    })
}

/// Wait until `signal` holds a value for which `matcher` returns `true`.
///
/// On timeout the error names the signal, and the log carries the last
/// value seen.
pub async fn wait_for_value<F>(signal: &Signal, matcher: F, timeout: Duration) -> DaqResult<()>
where
    F: Fn(&SignalValue) -> bool,
{
    let mut observer = observe_value(signal)?;
    let mut last = None;
    let outcome = tokio::time::timeout(timeout, async {
        while let Some(value) = observer.recv().await {
            if matcher(&value) {
                return true;
            }
            last = Some(value);
        }
        false
    })
    .await;

    match outcome {
        Ok(true) => Ok(()),
        _ => {
            let last = last.map(|v| v.to_string()).unwrap_or_default();
            debug!(signal = %signal.name(), last_value = %last, "No matching value");
            Err(DaqError::Timeout {
                signal: format!("{} (last value {})", signal.name(), last),
                operation: "wait_for_value",
                timeout,
            })
        }
    }
}

/// Start `set(value)` and return once the signal reads back `value`.
///
/// The returned task resolves when the set completes, which for simulated
/// signals is gated by `set_sim_put_proceeds`. If the set fails before the
/// value is seen (read-only, not connected), its error is returned at once.
pub async fn set_and_wait_for_value(
    signal: &Signal,
    value: impl Into<SignalValue>,
    timeout: Duration,
) -> DaqResult<JoinHandle<DaqResult<()>>> {
    let value = signal
        .value_type()
        .coerce(value.into())
        .map_err(|actual| DaqError::TypeMismatch {
            signal: signal.name(),
            expected: signal.value_type().to_string(),
            actual,
        })?;
    let target = value.clone();
    let mut observer = observe_value(signal)?;

    let setter = signal.clone();
    let (failed_tx, mut failed_rx) = oneshot::channel();
    let status = tokio::spawn(async move {
        let result = setter.set(value).await;
        if let Err(err) = &result {
            let _ = failed_tx.send(err.clone());
        }
        result
    });

    let outcome = tokio::time::timeout(timeout, async {
        let mut set_pending = true;
        loop {
            tokio::select! {
                current = observer.recv() => match current {
                    Some(current) if current == target => return Ok(()),
                    Some(_) => {}
                    None => return Err(None),
                },
                // Dropped unsent when the set succeeded.
                failed = &mut failed_rx, if set_pending => match failed {
                    Ok(err) => return Err(Some(err)),
                    Err(_) => set_pending = false,
                },
            }
        }
    })
    .await;

    match outcome {
        Ok(Ok(())) => Ok(status),
        Ok(Err(Some(err))) => Err(err),
        Ok(Err(None)) | Err(_) => Err(DaqError::Timeout {
            signal: signal.name(),
            operation: "set_and_wait_for_value",
            timeout,
        }),
    }
}
