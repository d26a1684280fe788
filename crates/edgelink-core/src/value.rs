//! Typed values exchanged between the runtime and protocol drivers.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Value type of a device resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    String,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Binary,
    Object,
    BoolArray,
    StringArray,
    Uint8Array,
    Uint16Array,
    Uint32Array,
    Uint64Array,
    Int8Array,
    Int16Array,
    Int32Array,
    Int64Array,
    Float32Array,
    Float64Array,
    ObjectArray,
}

impl ValueType {
    /// All recognized value types.
    pub const ALL: [ValueType; 27] = [
        Self::Bool,
        Self::String,
        Self::Uint8,
        Self::Uint16,
        Self::Uint32,
        Self::Uint64,
        Self::Int8,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::Float32,
        Self::Float64,
        Self::Binary,
        Self::Object,
        Self::BoolArray,
        Self::StringArray,
        Self::Uint8Array,
        Self::Uint16Array,
        Self::Uint32Array,
        Self::Uint64Array,
        Self::Int8Array,
        Self::Int16Array,
        Self::Int32Array,
        Self::Int64Array,
        Self::Float32Array,
        Self::Float64Array,
        Self::ObjectArray,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "Bool",
            Self::String => "String",
            Self::Uint8 => "Uint8",
            Self::Uint16 => "Uint16",
            Self::Uint32 => "Uint32",
            Self::Uint64 => "Uint64",
            Self::Int8 => "Int8",
            Self::Int16 => "Int16",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::Float32 => "Float32",
            Self::Float64 => "Float64",
            Self::Binary => "Binary",
            Self::Object => "Object",
            Self::BoolArray => "BoolArray",
            Self::StringArray => "StringArray",
            Self::Uint8Array => "Uint8Array",
            Self::Uint16Array => "Uint16Array",
            Self::Uint32Array => "Uint32Array",
            Self::Uint64Array => "Uint64Array",
            Self::Int8Array => "Int8Array",
            Self::Int16Array => "Int16Array",
            Self::Int32Array => "Int32Array",
            Self::Int64Array => "Int64Array",
            Self::Float32Array => "Float32Array",
            Self::Float64Array => "Float64Array",
            Self::ObjectArray => "ObjectArray",
        }
    }

    /// Whether the type is a scalar integer or float.
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Uint8
                | Self::Uint16
                | Self::Uint32
                | Self::Uint64
                | Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::Float32
                | Self::Float64
        )
    }

    /// Whether the type is an array of integers or floats.
    pub const fn is_numeric_array(self) -> bool {
        matches!(
            self,
            Self::Uint8Array
                | Self::Uint16Array
                | Self::Uint32Array
                | Self::Uint64Array
                | Self::Int8Array
                | Self::Int16Array
                | Self::Int32Array
                | Self::Int64Array
                | Self::Float32Array
                | Self::Float64Array
        )
    }

    pub const fn is_array(self) -> bool {
        matches!(
            self,
            Self::BoolArray | Self::StringArray | Self::ObjectArray
        ) || self.is_numeric_array()
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Element type of an array type; scalar types map to themselves.
    pub const fn element_type(self) -> ValueType {
        match self {
            Self::BoolArray => Self::Bool,
            Self::StringArray => Self::String,
            Self::Uint8Array => Self::Uint8,
            Self::Uint16Array => Self::Uint16,
            Self::Uint32Array => Self::Uint32,
            Self::Uint64Array => Self::Uint64,
            Self::Int8Array => Self::Int8,
            Self::Int16Array => Self::Int16,
            Self::Int32Array => Self::Int32,
            Self::Int64Array => Self::Int64,
            Self::Float32Array => Self::Float32,
            Self::Float64Array => Self::Float64,
            Self::ObjectArray => Self::Object,
            other => other,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::contract_invalid(format!("unrecognized value type {s}")))
    }
}

impl Serialize for ValueType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ValueType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    String(String),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Binary(Vec<u8>),
    Object(serde_json::Value),
    BoolArray(Vec<bool>),
    StringArray(Vec<String>),
    Uint8Array(Vec<u8>),
    Uint16Array(Vec<u16>),
    Uint32Array(Vec<u32>),
    Uint64Array(Vec<u64>),
    Int8Array(Vec<i8>),
    Int16Array(Vec<i16>),
    Int32Array(Vec<i32>),
    Int64Array(Vec<i64>),
    Float32Array(Vec<f32>),
    Float64Array(Vec<f64>),
    ObjectArray(Vec<serde_json::Value>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::String(_) => ValueType::String,
            Self::Uint8(_) => ValueType::Uint8,
            Self::Uint16(_) => ValueType::Uint16,
            Self::Uint32(_) => ValueType::Uint32,
            Self::Uint64(_) => ValueType::Uint64,
            Self::Int8(_) => ValueType::Int8,
            Self::Int16(_) => ValueType::Int16,
            Self::Int32(_) => ValueType::Int32,
            Self::Int64(_) => ValueType::Int64,
            Self::Float32(_) => ValueType::Float32,
            Self::Float64(_) => ValueType::Float64,
            Self::Binary(_) => ValueType::Binary,
            Self::Object(_) => ValueType::Object,
            Self::BoolArray(_) => ValueType::BoolArray,
            Self::StringArray(_) => ValueType::StringArray,
            Self::Uint8Array(_) => ValueType::Uint8Array,
            Self::Uint16Array(_) => ValueType::Uint16Array,
            Self::Uint32Array(_) => ValueType::Uint32Array,
            Self::Uint64Array(_) => ValueType::Uint64Array,
            Self::Int8Array(_) => ValueType::Int8Array,
            Self::Int16Array(_) => ValueType::Int16Array,
            Self::Int32Array(_) => ValueType::Int32Array,
            Self::Int64Array(_) => ValueType::Int64Array,
            Self::Float32Array(_) => ValueType::Float32Array,
            Self::Float64Array(_) => ValueType::Float64Array,
            Self::ObjectArray(_) => ValueType::ObjectArray,
        }
    }

    /// Scalar numeric value widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Uint8(v) => Some(f64::from(*v)),
            Self::Uint16(v) => Some(f64::from(*v)),
            Self::Uint32(v) => Some(f64::from(*v)),
            Self::Uint64(v) => Some(*v as f64),
            Self::Int8(v) => Some(f64::from(*v)),
            Self::Int16(v) => Some(f64::from(*v)),
            Self::Int32(v) => Some(f64::from(*v)),
            Self::Int64(v) => Some(*v as f64),
            Self::Float32(v) => Some(f64::from(*v)),
            Self::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Components of a numeric array widened to `f64`.
    pub fn numeric_components(&self) -> Option<Vec<f64>> {
        fn widen<T: Copy + Into<f64>>(values: &[T]) -> Vec<f64> {
            values.iter().map(|v| (*v).into()).collect()
        }
        match self {
            Self::Uint8Array(v) => Some(widen(v)),
            Self::Uint16Array(v) => Some(widen(v)),
            Self::Uint32Array(v) => Some(widen(v)),
            Self::Uint64Array(v) => Some(v.iter().map(|x| *x as f64).collect()),
            Self::Int8Array(v) => Some(widen(v)),
            Self::Int16Array(v) => Some(widen(v)),
            Self::Int32Array(v) => Some(widen(v)),
            Self::Int64Array(v) => Some(v.iter().map(|x| *x as f64).collect()),
            Self::Float32Array(v) => Some(widen(v)),
            Self::Float64Array(v) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(v) => Some(v),
            _ => None,
        }
    }

    /// String form used in readings and for mapping lookups.
    pub fn to_reading_string(&self) -> String {
        fn json<T: Serialize>(v: &T) -> String {
            serde_json::to_string(v).unwrap_or_default()
        }
        match self {
            Self::Bool(v) => v.to_string(),
            Self::String(v) => v.clone(),
            Self::Uint8(v) => v.to_string(),
            Self::Uint16(v) => v.to_string(),
            Self::Uint32(v) => v.to_string(),
            Self::Uint64(v) => v.to_string(),
            Self::Int8(v) => v.to_string(),
            Self::Int16(v) => v.to_string(),
            Self::Int32(v) => v.to_string(),
            Self::Int64(v) => v.to_string(),
            Self::Float32(v) => v.to_string(),
            Self::Float64(v) => v.to_string(),
            Self::Binary(v) => format!("Binary: [{} bytes]", v.len()),
            Self::Object(v) => v.to_string(),
            Self::BoolArray(v) => json(v),
            Self::StringArray(v) => json(v),
            Self::Uint8Array(v) => json(v),
            Self::Uint16Array(v) => json(v),
            Self::Uint32Array(v) => json(v),
            Self::Uint64Array(v) => json(v),
            Self::Int8Array(v) => json(v),
            Self::Int16Array(v) => json(v),
            Self::Int32Array(v) => json(v),
            Self::Int64Array(v) => json(v),
            Self::Float32Array(v) => json(v),
            Self::Float64Array(v) => json(v),
            Self::ObjectArray(v) => json(v),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_reading_string())
    }
}

/// A value read from, or written to, a single device resource.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandValue {
    /// Name of the device resource this value belongs to.
    pub device_resource_name: String,
    pub value: Value,
    /// Origin timestamp in nanoseconds; zero means "stamp on event creation".
    pub origin: i64,
    pub tags: HashMap<String, String>,
}

impl CommandValue {
    pub fn new(device_resource_name: impl Into<String>, value: Value) -> Self {
        Self {
            device_resource_name: device_resource_name.into(),
            value,
            origin: 0,
            tags: HashMap::new(),
        }
    }

    pub fn with_origin(mut self, origin: i64) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn value_type(&self) -> ValueType {
        self.value.value_type()
    }

    pub fn value_to_string(&self) -> String {
        self.value.to_reading_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_round_trip_names() {
        for t in ValueType::ALL {
            assert_eq!(t.as_str().parse::<ValueType>().unwrap(), t);
        }
        assert!("Float128".parse::<ValueType>().is_err());
    }

    #[test]
    fn test_value_type_classes() {
        assert!(ValueType::Float32.is_numeric());
        assert!(!ValueType::Binary.is_numeric());
        assert!(ValueType::Int16Array.is_numeric_array());
        assert!(ValueType::ObjectArray.is_array());
        assert!(!ValueType::Object.is_array());
        assert_eq!(ValueType::Uint32Array.element_type(), ValueType::Uint32);
    }

    #[test]
    fn test_reading_strings() {
        assert_eq!(Value::Float32(23.7).to_reading_string(), "23.7");
        assert_eq!(Value::Bool(true).to_reading_string(), "true");
        assert_eq!(Value::Int16Array(vec![1, -2, 3]).to_reading_string(), "[1,-2,3]");
        assert_eq!(
            Value::StringArray(vec!["a".into(), "b".into()]).to_reading_string(),
            r#"["a","b"]"#
        );
    }

    #[test]
    fn test_numeric_widening() {
        assert_eq!(Value::Uint8(7).as_f64(), Some(7.0));
        assert_eq!(Value::String("7".into()).as_f64(), None);
        assert_eq!(
            Value::Int8Array(vec![1, 2]).numeric_components(),
            Some(vec![1.0, 2.0])
        );
    }

    #[test]
    fn test_command_value_type_follows_value() {
        let cv = CommandValue::new("temp", Value::Float32(1.5)).with_tag("unit", "C");
        assert_eq!(cv.value_type(), ValueType::Float32);
        assert_eq!(cv.tags.get("unit").map(String::as_str), Some("C"));
    }
}
