//! Signal values and their declared types.
//!
//! A signal declares a [`ValueType`] when it is constructed. Every value that
//! reaches it (normal writes, privileged injection, JSON) is passed through
//! [`ValueType::coerce`], which is the only place type compatibility is
//! decided.
//!
//! # Defaults
//!
//! A freshly connected simulated signal holds [`ValueType::default_value`]:
//!
//! | Type | Default |
//! |------|---------|
//! | `Bool` | `false` |
//! | `Int` | `0` |
//! | `Float` | `0.0` |
//! | `String` | `""` |
//! | `Enum(choices)` | first choice, or `""` when there are none |
//! | arrays | empty |
//!
//! # Widening
//!
//! `Float` signals accept `Int` values and `FloatArray` signals accept
//! `IntArray` values; the value is stored widened. No other implicit
//! conversion exists.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared value type of a signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "choices", rename_all = "snake_case")]
pub enum ValueType {
    /// Boolean flag.
    Bool,
    /// Signed 64-bit integer.
    Int,
    /// 64-bit float.
    Float,
    /// Free-form text.
    String,
    /// Text restricted to a fixed set of choices.
    Enum(Vec<String>),
    /// Waveform of floats.
    FloatArray,
    /// Waveform of integers.
    IntArray,
    /// Waveform of strings.
    StringArray,
}

impl ValueType {
    /// Enum type from any list of choices.
    pub fn choices<I, S>(choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ValueType::Enum(choices.into_iter().map(Into::into).collect())
    }

    /// Value held by a signal that was never written.
    pub fn default_value(&self) -> SignalValue {
        match self {
            ValueType::Bool => SignalValue::Bool(false),
            ValueType::Int => SignalValue::Int(0),
            ValueType::Float => SignalValue::Float(0.0),
            ValueType::String => SignalValue::String(String::new()),
            ValueType::Enum(choices) => {
                SignalValue::String(choices.first().cloned().unwrap_or_default())
            }
            ValueType::FloatArray => SignalValue::FloatArray(Vec::new()),
            ValueType::IntArray => SignalValue::IntArray(Vec::new()),
            ValueType::StringArray => SignalValue::StringArray(Vec::new()),
        }
    }

    /// Check `value` against this type, widening where allowed.
    ///
    /// On mismatch returns a description of the offending value for the
    /// error message.
    pub fn coerce(&self, value: SignalValue) -> Result<SignalValue, String> {
        match (self, value) {
            (ValueType::Bool, v @ SignalValue::Bool(_)) => Ok(v),
            (ValueType::Int, v @ SignalValue::Int(_)) => Ok(v),
            (ValueType::Float, v @ SignalValue::Float(_)) => Ok(v),
            (ValueType::Float, SignalValue::Int(i)) => Ok(SignalValue::Float(i as f64)),
            (ValueType::String, v @ SignalValue::String(_)) => Ok(v),
            (ValueType::Enum(choices), SignalValue::String(s)) => {
                if choices.iter().any(|c| c == &s) {
                    Ok(SignalValue::String(s))
                } else {
                    Err(format!("{:?} (not one of {:?})", s, choices))
                }
            }
            (ValueType::FloatArray, v @ SignalValue::FloatArray(_)) => Ok(v),
            (ValueType::FloatArray, SignalValue::IntArray(values)) => Ok(SignalValue::FloatArray(
                values.into_iter().map(|i| i as f64).collect(),
            )),
            (ValueType::IntArray, v @ SignalValue::IntArray(_)) => Ok(v),
            (ValueType::StringArray, v @ SignalValue::StringArray(_)) => Ok(v),
            (_, other) => Err(other.describe()),
        }
    }

    /// Document dtype (`boolean`, `integer`, `number`, `string`, `array`).
    pub fn dtype(&self) -> &'static str {
        match self {
            ValueType::Bool => "boolean",
            ValueType::Int => "integer",
            ValueType::Float => "number",
            ValueType::String | ValueType::Enum(_) => "string",
            ValueType::FloatArray | ValueType::IntArray | ValueType::StringArray => "array",
        }
    }

    /// Whether values of this type are waveforms.
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            ValueType::FloatArray | ValueType::IntArray | ValueType::StringArray
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Bool => write!(f, "bool"),
            ValueType::Int => write!(f, "int"),
            ValueType::Float => write!(f, "float"),
            ValueType::String => write!(f, "string"),
            ValueType::Enum(choices) => write!(f, "enum{:?}", choices),
            ValueType::FloatArray => write!(f, "[float]"),
            ValueType::IntArray => write!(f, "[int]"),
            ValueType::StringArray => write!(f, "[string]"),
        }
    }
}

/// A value held by a signal.
///
/// Serialized untagged, as plain JSON. Deserialization tries the integer
/// variants before the float ones, so `3` and `[1, 2]` come back as `Int`
/// and `IntArray` while `3.0` and `[1.0, 2.0]` stay floats. An empty array
/// carries no element type and comes back as an empty `IntArray`, which a
/// `FloatArray` signal accepts through widening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Float.
    Float(f64),
    /// Text (also used for enum signals).
    String(String),
    /// Integer waveform.
    IntArray(Vec<i64>),
    /// Float waveform.
    FloatArray(Vec<f64>),
    /// String waveform.
    StringArray(Vec<String>),
}

impl SignalValue {
    /// Name of the storage type, for messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            SignalValue::Bool(_) => "bool",
            SignalValue::Int(_) => "int",
            SignalValue::Float(_) => "float",
            SignalValue::String(_) => "string",
            SignalValue::FloatArray(_) => "[float]",
            SignalValue::IntArray(_) => "[int]",
            SignalValue::StringArray(_) => "[string]",
        }
    }

    /// Type and content, e.g. `string "abc"`.
    pub fn describe(&self) -> String {
        format!("{} {}", self.type_name(), self)
    }

    /// Number of elements for waveforms, `None` for scalars.
    pub fn len(&self) -> Option<usize> {
        match self {
            SignalValue::FloatArray(v) => Some(v.len()),
            SignalValue::IntArray(v) => Some(v.len()),
            SignalValue::StringArray(v) => Some(v.len()),
            _ => None,
        }
    }

    /// Whether this is an empty waveform.
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Value as f64 if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SignalValue::Float(f) => Some(*f),
            SignalValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Value as a string slice if it is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SignalValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Bool(b) => write!(f, "{}", b),
            SignalValue::Int(i) => write!(f, "{}", i),
            SignalValue::Float(x) => write!(f, "{:?}", x),
            SignalValue::String(s) => write!(f, "{:?}", s),
            SignalValue::FloatArray(v) => write!(f, "{:?}", v),
            SignalValue::IntArray(v) => write!(f, "{:?}", v),
            SignalValue::StringArray(v) => write!(f, "{:?}", v),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for SignalValue {
                fn from(value: $ty) -> Self {
                    SignalValue::$variant(value.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i64 => Int,
    i32 => Int,
    u32 => Int,
    f64 => Float,
    f32 => Float,
    String => String,
    &str => String,
    Vec<f64> => FloatArray,
    Vec<i64> => IntArray,
    Vec<String> => StringArray,
}

impl From<Vec<&str>> for SignalValue {
    fn from(value: Vec<&str>) -> Self {
        SignalValue::StringArray(value.into_iter().map(str::to_string).collect())
    }
}

macro_rules! impl_try_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl TryFrom<SignalValue> for $ty {
                type Error = SignalValue;

                fn try_from(value: SignalValue) -> Result<Self, Self::Error> {
                    match value {
                        SignalValue::$variant(v) => Ok(v),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

impl_try_from! {
    bool => Bool,
    i64 => Int,
    f64 => Float,
    String => String,
    Vec<f64> => FloatArray,
    Vec<i64> => IntArray,
    Vec<String> => StringArray,
}

/// One timestamped sample of a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// The value.
    pub value: SignalValue,
    /// When the value was produced, nanoseconds since the Unix epoch.
    pub timestamp_ns: u64,
    /// Alarm severity (0 = no alarm, -1 = invalid/undefined).
    pub alarm_severity: i32,
}

impl Reading {
    /// Reading stamped now with no alarm.
    pub fn now(value: SignalValue) -> Self {
        Self {
            value,
            timestamp_ns: crate::experiment::document::now_ns(),
            alarm_severity: 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_per_type() {
        assert_eq!(ValueType::Bool.default_value(), SignalValue::Bool(false));
        assert_eq!(ValueType::Int.default_value(), SignalValue::Int(0));
        assert_eq!(ValueType::Float.default_value(), SignalValue::Float(0.0));
        assert_eq!(ValueType::String.default_value(), SignalValue::from(""));
        assert_eq!(
            ValueType::choices(["Open", "Closed"]).default_value(),
            SignalValue::from("Open")
        );
        assert_eq!(ValueType::Enum(vec![]).default_value(), SignalValue::from(""));
        assert!(ValueType::FloatArray.default_value().is_empty());
    }

    #[test]
    fn test_coerce_widens_int_to_float() {
        assert_eq!(
            ValueType::Float.coerce(SignalValue::Int(3)),
            Ok(SignalValue::Float(3.0))
        );
        assert_eq!(
            ValueType::FloatArray.coerce(SignalValue::IntArray(vec![1, 2])),
            Ok(SignalValue::FloatArray(vec![1.0, 2.0]))
        );
    }

    #[test]
    fn test_coerce_rejects_mismatch() {
        let err = ValueType::Int.coerce(SignalValue::Float(1.5)).unwrap_err();
        assert_eq!(err, "float 1.5");
        assert!(ValueType::Bool.coerce(SignalValue::from("true")).is_err());
    }

    #[test]
    fn test_enum_checks_choices() {
        let shutter = ValueType::choices(["Open", "Closed"]);
        assert!(shutter.coerce("Closed".into()).is_ok());
        let err = shutter.coerce("Ajar".into()).unwrap_err();
        assert!(err.contains("Ajar"));
    }

    #[test]
    fn test_dtype_mapping() {
        assert_eq!(ValueType::Float.dtype(), "number");
        assert_eq!(ValueType::Int.dtype(), "integer");
        assert_eq!(ValueType::choices(["a"]).dtype(), "string");
        assert_eq!(ValueType::IntArray.dtype(), "array");
    }

    #[test]
    fn test_value_conversions() {
        let v: SignalValue = 2.5.into();
        assert_eq!(f64::try_from(v.clone()), Ok(2.5));
        assert_eq!(i64::try_from(v.clone()), Err(v));
        assert_eq!(SignalValue::from(vec!["a", "b"]).len(), Some(2));
    }

    #[test]
    fn test_untagged_json() {
        let v: SignalValue = serde_json::from_value(serde_json::json!(3)).unwrap();
        assert_eq!(v, SignalValue::Int(3));
        let v: SignalValue = serde_json::from_value(serde_json::json!(3.5)).unwrap();
        assert_eq!(v, SignalValue::Float(3.5));
    }

    #[test]
    fn test_waveforms_keep_element_type_through_json() {
        for value in [
            SignalValue::IntArray(vec![1, 2]),
            SignalValue::FloatArray(vec![1.0, 2.0]),
            SignalValue::FloatArray(vec![0.5]),
            SignalValue::StringArray(vec!["a".into(), "b".into()]),
            SignalValue::Float(2.0),
        ] {
            let json = serde_json::to_string(&value).unwrap();
            let back: SignalValue = serde_json::from_str(&json).unwrap();
            assert_eq!(back, value, "{json}");
        }

        let empty: SignalValue = serde_json::from_str("[]").unwrap();
        assert_eq!(empty, SignalValue::IntArray(Vec::new()));
        assert_eq!(
            ValueType::FloatArray.coerce(empty),
            Ok(SignalValue::FloatArray(Vec::new()))
        );
    }
}
