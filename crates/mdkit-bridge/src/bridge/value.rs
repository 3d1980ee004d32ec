//! Owned structured values handed back to host callers.

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value};

/// A host value materialised out of the reference table.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredValue {
    /// The undefined singleton
    Undefined,
    /// The null singleton
    Null,
    /// Boolean
    Bool(bool),
    /// Double-precision number
    Number(f64),
    /// Unsigned 64-bit integer
    BigInt(u64),
    /// Text
    String(String),
    /// Ordered sequence
    Array(Vec<StructuredValue>),
    /// Record with named properties, in insertion order
    Object(IndexMap<String, StructuredValue>),
    /// Key-unique mapping, in insertion order
    Map(Vec<(StructuredValue, StructuredValue)>),
    /// Error carrying a message
    Error(String),
}

impl StructuredValue {
    /// Short name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::BigInt(_) => "bigint",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Map(_) => "map",
            Self::Error(_) => "error",
        }
    }

    /// Whether a container holds nothing. Scalars are never empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Array(items) => items.is_empty(),
            Self::Object(props) => props.is_empty(),
            Self::Map(entries) => entries.is_empty(),
            Self::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Look up a named property of a record or a string-keyed map entry.
    pub fn get(&self, key: &str) -> Option<&StructuredValue> {
        match self {
            Self::Object(props) => props.get(key),
            Self::Map(entries) => entries.iter().find_map(|(k, v)| match k {
                Self::String(s) if s == key => Some(v),
                _ => None,
            }),
            _ => None,
        }
    }

    /// Element `index` of an array.
    pub fn at(&self, index: usize) -> Option<&StructuredValue> {
        match self {
            Self::Array(items) => items.get(index),
            _ => None,
        }
    }

    /// Borrow as text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Read as a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Render as JSON.
    ///
    /// `undefined` and non-finite numbers become `null`. Maps whose keys
    /// are all strings become objects; other maps become arrays of
    /// `[key, value]` pairs. Errors become `{"name": "Error", "message": ...}`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Undefined | Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::BigInt(n) => Value::from(*n),
            Self::String(s) => Value::String(s.clone()),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(props) => Value::Object(
                props
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::Map(entries) => {
                if entries.iter().all(|(k, _)| matches!(k, Self::String(_))) {
                    let mut object = Map::new();
                    for (k, v) in entries {
                        if let Self::String(key) = k {
                            object.insert(key.clone(), v.to_json());
                        }
                    }
                    Value::Object(object)
                } else {
                    Value::Array(
                        entries
                            .iter()
                            .map(|(k, v)| Value::Array(vec![k.to_json(), v.to_json()]))
                            .collect(),
                    )
                }
            }
            Self::Error(message) => {
                let mut object = Map::new();
                object.insert("name".to_string(), Value::String("Error".to_string()));
                object.insert("message".to_string(), Value::String(message.clone()));
                Value::Object(object)
            }
        }
    }
}

fn number_to_json(n: f64) -> Value {
    // Integral values print without a fractional part.
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return Value::from(n as i64);
    }
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

impl Serialize for StructuredValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
