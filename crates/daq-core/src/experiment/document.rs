//! Document model for data-acquisition runs.
//!
//! A run is described by an ordered stream of documents:
//!
//! - **StartDoc**: run intent and metadata; its `uid` is the run identifier
//! - **DescriptorDoc**: schema of one reading configuration (stream + fields)
//! - **EventDoc**: one reading, referencing the descriptor it conforms to
//! - **StopDoc**: completion status, always last
//!
//! # Document Flow
//!
//! ```text
//! StartDoc (1)
//!    │
//!    ├── DescriptorDoc (1+, one per distinct reading configuration)
//!    │       │
//!    │       └── EventDoc (N, readings)
//!    │
//! StopDoc (1)
//! ```
//!
//! Every document carries the run identifier (`run_uid`, or `uid` for the
//! start document) so consumers can correlate a stream without relying on
//! arrival order.

use crate::value::{Reading, SignalValue};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

/// Generate a new unique document ID
pub fn new_uid() -> String {
    Uuid::new_v4().to_string()
}

/// Current timestamp in nanoseconds since Unix epoch
pub fn now_ns() -> u64 {
    Utc::now()
        .timestamp_nanos_opt()
        .and_then(|ns| u64::try_from(ns).ok())
        .unwrap_or_default()
}

/// The four document kinds, in the order a run emits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Run start.
    Start,
    /// Stream schema.
    Descriptor,
    /// One reading.
    Event,
    /// Run end.
    Stop,
}

impl DocumentKind {
    /// Lowercase document name as used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Start => "start",
            DocumentKind::Descriptor => "descriptor",
            DocumentKind::Event => "event",
            DocumentKind::Stop => "stop",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document types for run data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Document {
    /// Run start document - intent and metadata
    Start(StartDoc),
    /// Data stream descriptor - schema definition
    Descriptor(DescriptorDoc),
    /// Event document - one reading
    Event(EventDoc),
    /// Run stop document - completion status
    Stop(StopDoc),
}

impl Document {
    /// Which kind of document this is.
    pub fn kind(&self) -> DocumentKind {
        match self {
            Document::Start(_) => DocumentKind::Start,
            Document::Descriptor(_) => DocumentKind::Descriptor,
            Document::Event(_) => DocumentKind::Event,
            Document::Stop(_) => DocumentKind::Stop,
        }
    }

    /// Get the document UID
    pub fn uid(&self) -> &str {
        match self {
            Document::Start(d) => &d.uid,
            Document::Descriptor(d) => &d.uid,
            Document::Event(d) => &d.uid,
            Document::Stop(d) => &d.uid,
        }
    }

    /// Get the run UID this document belongs to
    pub fn run_uid(&self) -> &str {
        match self {
            Document::Start(d) => &d.uid, // Start doc UID is the run UID
            Document::Descriptor(d) => &d.run_uid,
            Document::Event(d) => &d.run_uid,
            Document::Stop(d) => &d.run_uid,
        }
    }

    /// Get the timestamp in nanoseconds
    pub fn timestamp_ns(&self) -> u64 {
        match self {
            Document::Start(d) => d.time_ns,
            Document::Descriptor(d) => d.time_ns,
            Document::Event(d) => d.time_ns,
            Document::Stop(d) => d.time_ns,
        }
    }
}

/// Start document - emitted at the beginning of a run
///
/// Contains run intent, plan configuration, and user-provided metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartDoc {
    /// Unique run identifier (this IS the run_uid)
    pub uid: String,
    /// Plan type that generated this run
    pub plan_type: String,
    /// User-friendly plan name
    pub plan_name: String,
    /// Plan arguments/configuration
    pub plan_args: HashMap<String, String>,
    /// User-provided metadata
    pub metadata: HashMap<String, String>,
    /// Visualization hints (e.g., preferred plot axes)
    pub hints: Vec<String>,
    /// Timestamp when run started
    pub time_ns: u64,
}

impl StartDoc {
    /// Start document with a fresh run uid.
    pub fn new(plan_type: &str, plan_name: &str) -> Self {
        Self {
            uid: new_uid(),
            plan_type: plan_type.to_string(),
            plan_name: plan_name.to_string(),
            plan_args: HashMap::new(),
            metadata: HashMap::new(),
            hints: Vec::new(),
            time_ns: now_ns(),
        }
    }

    /// Record a plan argument.
    pub fn with_arg(mut self, key: &str, value: &str) -> Self {
        self.plan_args.insert(key.to_string(), value.to_string());
        self
    }

    /// Record user metadata.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Add a plotting hint.
    pub fn with_hint(mut self, hint: &str) -> Self {
        self.hints.push(hint.to_string());
        self
    }
}

/// Descriptor document - defines schema for event data
///
/// Each descriptor defines one reading configuration: a stream name and the
/// exact set of fields read into it. A run has one descriptor per distinct
/// configuration (e.g. "primary" for main data, "baseline" for background
/// readings, or a second "primary" descriptor if the field set changes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorDoc {
    /// Unique descriptor ID
    pub uid: String,
    /// Links to StartDoc
    pub run_uid: String,
    /// Stream name (e.g., "primary", "baseline", "monitor")
    pub name: String,
    /// Schema for data fields
    pub data_keys: BTreeMap<String, DataKey>,
    /// Configuration readings of the devices in this stream, per device
    pub configuration: BTreeMap<String, BTreeMap<String, Reading>>,
    /// Timestamp
    pub time_ns: u64,
}

impl DescriptorDoc {
    /// Empty descriptor for a stream of the given run.
    pub fn new(run_uid: &str, name: &str) -> Self {
        Self {
            uid: new_uid(),
            run_uid: run_uid.to_string(),
            name: name.to_string(),
            data_keys: BTreeMap::new(),
            configuration: BTreeMap::new(),
            time_ns: now_ns(),
        }
    }

    /// Add a field schema.
    pub fn with_data_key(mut self, name: &str, key: DataKey) -> Self {
        self.data_keys.insert(name.to_string(), key);
        self
    }

    /// Add the configuration readings of one device.
    pub fn with_configuration(
        mut self,
        device: &str,
        readings: BTreeMap<String, Reading>,
    ) -> Self {
        self.configuration.insert(device.to_string(), readings);
        self
    }
}

/// Schema for a data field within events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataKey {
    /// Data type: "boolean", "number", "integer", "string", "array"
    pub dtype: String,
    /// Shape for arrays (empty for scalars)
    pub shape: Vec<usize>,
    /// Where the value comes from (e.g. `sim://stage-x`)
    pub source: String,
    /// Physical units
    #[serde(default)]
    pub units: String,
    /// Allowed values for enumerated fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    /// Measurement precision (optional)
    pub precision: Option<f64>,
    /// Lower limit (for validation/plotting)
    pub lower_limit: Option<f64>,
    /// Upper limit (for validation/plotting)
    pub upper_limit: Option<f64>,
}

impl DataKey {
    /// Create a scalar number data key
    pub fn scalar(source: &str, units: &str) -> Self {
        Self {
            dtype: "number".to_string(),
            shape: vec![],
            source: source.to_string(),
            units: units.to_string(),
            choices: Vec::new(),
            precision: None,
            lower_limit: None,
            upper_limit: None,
        }
    }

    /// Create an array data key
    pub fn array(source: &str, shape: Vec<usize>) -> Self {
        Self {
            dtype: "array".to_string(),
            shape,
            source: source.to_string(),
            units: String::new(),
            choices: Vec::new(),
            precision: None,
            lower_limit: None,
            upper_limit: None,
        }
    }

    /// Override the dtype.
    pub fn with_dtype(mut self, dtype: &str) -> Self {
        self.dtype = dtype.to_string();
        self
    }

    /// Set the enumerated choices.
    pub fn with_choices(mut self, choices: Vec<String>) -> Self {
        self.choices = choices;
        self
    }

    /// Set the display precision.
    pub fn with_precision(mut self, precision: f64) -> Self {
        self.precision = Some(precision);
        self
    }
}

/// Event document - one reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDoc {
    /// Unique event ID
    pub uid: String,
    /// Links to StartDoc (for quick run lookup)
    pub run_uid: String,
    /// Links to DescriptorDoc that defines schema
    pub descriptor_uid: String,
    /// Event sequence number within this descriptor, starting at 1
    pub seq_num: u32,
    /// Timestamp
    pub time_ns: u64,
    /// Field values (field name -> value)
    pub data: BTreeMap<String, SignalValue>,
    /// Per-field timestamps (field name -> timestamp_ns)
    pub timestamps: BTreeMap<String, u64>,
}

impl EventDoc {
    /// Empty event referencing a descriptor.
    pub fn new(run_uid: &str, descriptor_uid: &str, seq_num: u32) -> Self {
        Self {
            uid: new_uid(),
            run_uid: run_uid.to_string(),
            descriptor_uid: descriptor_uid.to_string(),
            seq_num,
            time_ns: now_ns(),
            data: BTreeMap::new(),
            timestamps: BTreeMap::new(),
        }
    }

    /// Add a value stamped now.
    pub fn with_datum(mut self, field: &str, value: impl Into<SignalValue>) -> Self {
        let ts = now_ns();
        self.data.insert(field.to_string(), value.into());
        self.timestamps.insert(field.to_string(), ts);
        self
    }

    /// Add a reading, keeping its own timestamp.
    pub fn with_reading(mut self, field: &str, reading: &Reading) -> Self {
        self.data.insert(field.to_string(), reading.value.clone());
        self.timestamps
            .insert(field.to_string(), reading.timestamp_ns);
        self
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Plan completed.
    Success,
    /// Stopped on request.
    Abort,
    /// A command failed.
    Fail,
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Success => write!(f, "success"),
            ExitStatus::Abort => write!(f, "abort"),
            ExitStatus::Fail => write!(f, "fail"),
        }
    }
}

/// Stop document - emitted at the end of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopDoc {
    /// Unique stop doc ID
    pub uid: String,
    /// Links to StartDoc
    pub run_uid: String,
    /// Exit status
    pub exit_status: ExitStatus,
    /// Reason for abort/failure
    pub reason: String,
    /// Timestamp when run ended
    pub time_ns: u64,
    /// Events emitted per stream name
    pub num_events: BTreeMap<String, u32>,
}

impl StopDoc {
    fn with_status(
        run_uid: &str,
        exit_status: ExitStatus,
        reason: &str,
        num_events: BTreeMap<String, u32>,
    ) -> Self {
        Self {
            uid: new_uid(),
            run_uid: run_uid.to_string(),
            exit_status,
            reason: reason.to_string(),
            time_ns: now_ns(),
            num_events,
        }
    }

    /// Run finished normally.
    pub fn success(run_uid: &str, num_events: BTreeMap<String, u32>) -> Self {
        Self::with_status(run_uid, ExitStatus::Success, "", num_events)
    }

    /// Run stopped on request.
    pub fn abort(run_uid: &str, reason: &str, num_events: BTreeMap<String, u32>) -> Self {
        Self::with_status(run_uid, ExitStatus::Abort, reason, num_events)
    }

    /// Run stopped by an error.
    pub fn fail(run_uid: &str, reason: &str, num_events: BTreeMap<String, u32>) -> Self {
        Self::with_status(run_uid, ExitStatus::Fail, reason, num_events)
    }

    /// Total events over all streams.
    pub fn total_events(&self) -> u32 {
        self.num_events.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_doc_builder() {
        let doc = StartDoc::new("count", "My Count")
            .with_arg("num", "3")
            .with_metadata("operator", "Alice")
            .with_hint("det-value");

        assert_eq!(doc.plan_type, "count");
        assert_eq!(doc.plan_name, "My Count");
        assert_eq!(doc.plan_args.get("num"), Some(&"3".to_string()));
        assert_eq!(doc.metadata.get("operator"), Some(&"Alice".to_string()));
        assert!(doc.hints.contains(&"det-value".to_string()));
    }

    #[test]
    fn test_descriptor_doc() {
        let run_uid = new_uid();
        let desc = DescriptorDoc::new(&run_uid, "primary")
            .with_data_key("power", DataKey::scalar("sim://power", "W"))
            .with_data_key("trace", DataKey::array("sim://trace", vec![128]));

        assert_eq!(desc.name, "primary");
        assert_eq!(desc.run_uid, run_uid);
        assert_eq!(desc.data_keys["trace"].shape, vec![128]);
    }

    #[test]
    fn test_event_doc_keeps_reading_timestamp() {
        let reading = Reading {
            value: SignalValue::Float(0.042),
            timestamp_ns: 1234,
            alarm_severity: 0,
        };
        let event = EventDoc::new("run", "desc", 1)
            .with_reading("power", &reading)
            .with_datum("count", 3);

        assert_eq!(event.seq_num, 1);
        assert_eq!(event.data.get("power"), Some(&SignalValue::Float(0.042)));
        assert_eq!(event.timestamps.get("power"), Some(&1234));
        assert_eq!(event.data.get("count"), Some(&SignalValue::Int(3)));
    }

    #[test]
    fn test_document_enum() {
        let start = StartDoc::new("test", "Test Run");
        let run_uid = start.uid.clone();
        let doc = Document::Start(start);

        assert_eq!(doc.run_uid(), run_uid);
        assert_eq!(doc.kind(), DocumentKind::Start);

        let stop = Document::Stop(StopDoc::abort(&run_uid, "user", BTreeMap::new()));
        assert_eq!(stop.run_uid(), run_uid);
        assert_eq!(stop.kind().as_str(), "stop");
    }

    #[test]
    fn test_document_serialization_tag() {
        let doc = Document::Stop(StopDoc::success("run-1", BTreeMap::new()));
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["type"], "stop");
        assert_eq!(json["exit_status"], "success");
    }

    #[test]
    fn test_stop_total_events() {
        let mut counts = BTreeMap::new();
        counts.insert("primary".to_string(), 3);
        counts.insert("baseline".to_string(), 2);
        assert_eq!(StopDoc::success("run", counts).total_events(), 5);
    }

    #[test]
    fn test_now_ns_is_positive() {
        assert!(now_ns() > 0);
    }
}
