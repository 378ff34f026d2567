//! Attribute values
//!
//! [`AttributeValue`] is what callers read and write. [`StoredValue`] is the
//! persisted form: json payloads are kept as text and only parsed back on
//! read, which is where corruption is detected.

use crate::error::{GraphError, GraphResult};
use crate::types::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Datatype tag recorded with every attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// `true` / `false`
    Bool,
    /// Signed 64-bit integer
    Int,
    /// Finite 64-bit float
    Float,
    /// UTF-8 string
    Text,
    /// Serialized json text
    Json,
}

impl DataType {
    /// Lowercase tag as persisted
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Text => "text",
            DataType::Json => "json",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute value as seen by callers
///
/// Variants never compare equal across datatypes: `Bool(true) != Int(1)` and
/// `Float(1.0) != Int(1)`.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// Boolean flag
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float; must be finite to be stored
    Float(f64),
    /// String
    Text(String),
    /// Structured metadata (arrays, objects, null)
    Json(serde_json::Value),
}

impl AttributeValue {
    /// Datatype tag this value is stored under
    #[must_use]
    pub fn datatype(&self) -> DataType {
        match self {
            AttributeValue::Bool(_) => DataType::Bool,
            AttributeValue::Int(_) => DataType::Int,
            AttributeValue::Float(_) => DataType::Float,
            AttributeValue::Text(_) => DataType::Text,
            AttributeValue::Json(_) => DataType::Json,
        }
    }

    /// Classify a json value into the narrowest variant
    ///
    /// Booleans, integers that fit `i64`, other numbers and strings map to the
    /// scalar variants; everything else is kept as json.
    #[must_use]
    pub fn classify(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Bool(b) => AttributeValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => AttributeValue::Int(i),
                None => match n.as_f64() {
                    Some(f) => AttributeValue::Float(f),
                    None => AttributeValue::Json(Value::Number(n)),
                },
            },
            Value::String(s) => AttributeValue::Text(s),
            other => AttributeValue::Json(other),
        }
    }

    /// Serialize any `serde` value and classify the result
    ///
    /// # Errors
    /// [`GraphError::UnserializableValue`] if the value has no json form
    pub fn from_serializable<T: Serialize + ?Sized>(value: &T) -> GraphResult<Self> {
        serde_json::to_value(value)
            .map(Self::classify)
            .map_err(|e| GraphError::UnserializableValue(e.to_string()))
    }

    /// Convert back into a json value
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttributeValue::Bool(b) => serde_json::Value::Bool(*b),
            AttributeValue::Int(i) => serde_json::Value::from(*i),
            AttributeValue::Float(f) => serde_json::Value::from(*f),
            AttributeValue::Text(s) => serde_json::Value::String(s.clone()),
            AttributeValue::Json(v) => v.clone(),
        }
    }

    /// The flag, for `Bool` values
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer, for `Int` values
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The float, for `Float` values
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttributeValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The string, for `Text` values
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Int(i64::from(value))
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        AttributeValue::Int(i64::from(value))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<serde_json::Value> for AttributeValue {
    fn from(value: serde_json::Value) -> Self {
        AttributeValue::classify(value)
    }
}

/// Persisted attribute payload, tagged by datatype
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "datatype", content = "value", rename_all = "lowercase")]
pub enum StoredValue {
    /// Boolean flag
    Bool(bool),
    /// Integer
    Int(i64),
    /// Finite float
    Float(f64),
    /// String
    Text(String),
    /// Serialized json text
    Json(String),
}

impl StoredValue {
    /// Encode a caller value for storage
    ///
    /// # Errors
    /// [`GraphError::UnserializableValue`] for non-finite floats, which have
    /// no json representation
    pub fn encode(value: AttributeValue) -> GraphResult<Self> {
        Ok(match value {
            AttributeValue::Bool(b) => StoredValue::Bool(b),
            AttributeValue::Int(i) => StoredValue::Int(i),
            AttributeValue::Float(f) if !f.is_finite() => {
                return Err(GraphError::UnserializableValue(format!(
                    "non-finite float {f}"
                )));
            }
            AttributeValue::Float(f) => StoredValue::Float(f),
            AttributeValue::Text(s) => StoredValue::Text(s),
            AttributeValue::Json(v) => StoredValue::Json(v.to_string()),
        })
    }

    /// Datatype tag of the payload
    #[must_use]
    pub fn datatype(&self) -> DataType {
        match self {
            StoredValue::Bool(_) => DataType::Bool,
            StoredValue::Int(_) => DataType::Int,
            StoredValue::Float(_) => DataType::Float,
            StoredValue::Text(_) => DataType::Text,
            StoredValue::Json(_) => DataType::Json,
        }
    }

    /// Rebuild the caller value from its datatype tag
    ///
    /// # Errors
    /// Returns the json parse failure message for corrupt json text
    pub fn decode(&self) -> Result<AttributeValue, String> {
        Ok(match self {
            StoredValue::Bool(b) => AttributeValue::Bool(*b),
            StoredValue::Int(i) => AttributeValue::Int(*i),
            StoredValue::Float(f) => AttributeValue::Float(*f),
            StoredValue::Text(s) => AttributeValue::Text(s.clone()),
            StoredValue::Json(text) => {
                AttributeValue::Json(serde_json::from_str(text).map_err(|e| e.to_string())?)
            }
        })
    }
}

/// One row of the attribute table; `(node, key)` is unique
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRecord {
    /// Owning node
    pub node: NodeId,
    /// Attribute key; internal keys start with the configured prefix
    pub key: String,
    /// Tagged payload
    pub value: StoredValue,
    /// Time of the last write
    pub updated_at: DateTime<Utc>,
}
