//! Assertion helpers for signals, devices, and document streams.
//!
//! Every check comes in two forms:
//!
//! - `check_*` returns `Result<(), AssertionFailure>` for callers that want
//!   to inspect the failure
//! - `assert_*` panics with the failure message, so a mismatch fails the
//!   test at the caller's line
//!
//! Failure messages name the signal or device and show expected vs actual.

use daq_core::{DaqError, Document, DocumentKind, Readable, Reading, Signal, SignalValue};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use thiserror::Error;

/// A failed test assertion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssertionFailure {
    /// The target could not be read at all.
    #[error("Could not read '{target}': {source}")]
    Unreadable {
        /// Signal or device name
        target: String,
        /// Underlying error
        #[source]
        source: DaqError,
    },

    /// A single value differs.
    #[error("Value of '{signal}' mismatch: expected {expected}, actual {actual}")]
    Value {
        /// Signal name
        signal: String,
        /// Expected value
        expected: String,
        /// Value read
        actual: String,
    },

    /// A field map differs.
    #[error("{what} of '{target}' mismatch:{details}")]
    Fields {
        /// `Reading` or `Configuration`
        what: &'static str,
        /// Signal or device name
        target: String,
        /// One line per missing, extra, or differing field
        details: String,
    },

    /// Per-kind document counts differ.
    #[error("Emitted documents mismatch: expected {expected}, actual {actual}")]
    Counts {
        /// Expected `kind=count` list
        expected: String,
        /// Observed `kind=count` list
        actual: String,
    },

    /// The stream breaks the start/descriptor/event/stop ordering.
    #[error("Emitted documents out of order: {0}")]
    Order(String),
}

/// Check that `signal` currently holds `expected`.
///
/// `expected` is converted to the signal type first, so `7` matches a float
/// signal holding `7.0`.
pub fn check_value(signal: &Signal, expected: impl Into<SignalValue>) -> Result<(), AssertionFailure> {
    let expected = expected.into();
    let expected = signal
        .value_type()
        .coerce(expected.clone())
        .unwrap_or(expected);
    let actual = signal.get_value().map_err(|source| AssertionFailure::Unreadable {
        target: signal.name(),
        source,
    })?;
    if actual != expected {
        return Err(AssertionFailure::Value {
            signal: signal.name(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Panic unless `signal` currently holds `expected`.
#[track_caller]
pub fn assert_value(signal: &Signal, expected: impl Into<SignalValue>) {
    if let Err(failure) = check_value(signal, expected) {
        panic!("{failure}");
    }
}

/// Check that reading `target` yields exactly the `expected` field values.
///
/// Timestamps are not compared. A missing or extra field is a mismatch.
pub fn check_reading<K, V>(
    target: &dyn Readable,
    expected: impl IntoIterator<Item = (K, V)>,
) -> Result<(), AssertionFailure>
where
    K: Into<String>,
    V: Into<SignalValue>,
{
    let actual = target.read().map_err(|source| AssertionFailure::Unreadable {
        target: target.name(),
        source,
    })?;
    compare_fields("Reading", &target.name(), expected, &actual)
}

/// Panic unless reading `target` yields exactly the `expected` field values.
#[track_caller]
pub fn assert_reading<K, V>(target: &dyn Readable, expected: impl IntoIterator<Item = (K, V)>)
where
    K: Into<String>,
    V: Into<SignalValue>,
{
    if let Err(failure) = check_reading(target, expected) {
        panic!("{failure}");
    }
}

/// Check that the configuration of `target` is exactly `expected`.
pub fn check_configuration<K, V>(
    target: &dyn Readable,
    expected: impl IntoIterator<Item = (K, V)>,
) -> Result<(), AssertionFailure>
where
    K: Into<String>,
    V: Into<SignalValue>,
{
    let actual = target
        .read_configuration()
        .map_err(|source| AssertionFailure::Unreadable {
            target: target.name(),
            source,
        })?;
    compare_fields("Configuration", &target.name(), expected, &actual)
}

/// Panic unless the configuration of `target` is exactly `expected`.
#[track_caller]
pub fn assert_configuration<K, V>(target: &dyn Readable, expected: impl IntoIterator<Item = (K, V)>)
where
    K: Into<String>,
    V: Into<SignalValue>,
{
    if let Err(failure) = check_configuration(target, expected) {
        panic!("{failure}");
    }
}

fn compare_fields<K, V>(
    what: &'static str,
    target: &str,
    expected: impl IntoIterator<Item = (K, V)>,
    actual: &BTreeMap<String, Reading>,
) -> Result<(), AssertionFailure>
where
    K: Into<String>,
    V: Into<SignalValue>,
{
    let expected: BTreeMap<String, SignalValue> = expected
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();

    let mut details = String::new();
    for (field, want) in &expected {
        match actual.get(field) {
            None => {
                let _ = write!(details, "\n  missing {field}: expected {want}");
            }
            Some(reading) if !values_match(want, &reading.value) => {
                let _ = write!(
                    details,
                    "\n  {field}: expected {want}, actual {}",
                    reading.value
                );
            }
            Some(_) => {}
        }
    }
    for (field, reading) in actual {
        if !expected.contains_key(field) {
            let _ = write!(details, "\n  extra {field}: actual {}", reading.value);
        }
    }

    if details.is_empty() {
        Ok(())
    } else {
        Err(AssertionFailure::Fields {
            what,
            target: target.to_string(),
            details,
        })
    }
}

// Int expectations match float readings of the same value.
fn values_match(expected: &SignalValue, actual: &SignalValue) -> bool {
    match (expected, actual) {
        (SignalValue::Int(i), SignalValue::Float(_)) => SignalValue::Float(*i as f64) == *actual,
        _ => expected == actual,
    }
}

/// Check the kinds and ordering of a document stream.
///
/// `expected` lists `(kind, count)` in the order each kind first appears.
/// Every kind present in `docs` must be listed and every count must match.
/// The stream must also be well formed: `start` first, `stop` last, one run
/// uid throughout, and every event referencing a descriptor emitted before
/// it.
pub fn check_emitted(
    docs: &[Document],
    expected: &[(DocumentKind, usize)],
) -> Result<(), AssertionFailure> {
    let mut actual: Vec<(DocumentKind, usize)> = Vec::new();
    for doc in docs {
        let kind = doc.kind();
        match actual.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, count)) => *count += 1,
            None => actual.push((kind, 1)),
        }
    }
    if actual != expected {
        return Err(AssertionFailure::Counts {
            expected: format_counts(expected),
            actual: format_counts(&actual),
        });
    }
    check_order(docs)
}

/// Panic unless `docs` matches `expected` (see [`check_emitted`]).
#[track_caller]
pub fn assert_emitted(docs: &[Document], expected: &[(DocumentKind, usize)]) {
    if let Err(failure) = check_emitted(docs, expected) {
        panic!("{failure}");
    }
}

fn format_counts(counts: &[(DocumentKind, usize)]) -> String {
    let parts: Vec<String> = counts
        .iter()
        .map(|(kind, count)| format!("{kind}={count}"))
        .collect();
    format!("{{{}}}", parts.join(", "))
}

fn check_order(docs: &[Document]) -> Result<(), AssertionFailure> {
    let (Some(first), Some(last)) = (docs.first(), docs.last()) else {
        return Ok(());
    };
    if first.kind() != DocumentKind::Start {
        return Err(AssertionFailure::Order(format!(
            "first document is {}, not start",
            first.kind()
        )));
    }
    if last.kind() != DocumentKind::Stop {
        return Err(AssertionFailure::Order(format!(
            "last document is {}, not stop",
            last.kind()
        )));
    }

    let run_uid = first.run_uid();
    let mut descriptors = HashSet::new();
    for (index, doc) in docs.iter().enumerate() {
        if doc.run_uid() != run_uid {
            return Err(AssertionFailure::Order(format!(
                "document {index} ({}) belongs to run {}, expected {run_uid}",
                doc.kind(),
                doc.run_uid()
            )));
        }
        match doc {
            Document::Start(_) if index != 0 => {
                return Err(AssertionFailure::Order(format!(
                    "second start at document {index}"
                )))
            }
            Document::Stop(_) if index != docs.len() - 1 => {
                return Err(AssertionFailure::Order(format!(
                    "stop at document {index} is not last"
                )))
            }
            Document::Descriptor(descriptor) => {
                descriptors.insert(descriptor.uid.as_str());
            }
            Document::Event(event) if !descriptors.contains(event.descriptor_uid.as_str()) => {
                return Err(AssertionFailure::Order(format!(
                    "event {} references unknown descriptor {}",
                    event.seq_num, event.descriptor_uid
                )))
            }
            _ => {}
        }
    }
    Ok(())
}
