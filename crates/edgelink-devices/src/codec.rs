//! Parsing raw strings into typed values and turning command values into events.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use edgelink_core::models::{now_nanos, Device, DeviceResource, Event, Reading};
use edgelink_core::{CommandValue, Error, ErrorKind, Result, Value, ValueType};

use crate::cache::ProfileCache;
use crate::transform;

/// Reading tag set when transformation or assertion fails.
pub const ASSERTION_TAG: &str = "assertion";

/// Coerces `raw` into a command value for `resource`.
pub fn create_command_value(resource: &DeviceResource, raw: &str) -> Result<CommandValue> {
    let value = parse_value(resource.properties.value_type, raw).map_err(|e| {
        e.context(format!(
            "failed to parse value for resource {}",
            resource.name
        ))
    })?;
    Ok(CommandValue::new(resource.name.clone(), value).with_origin(now_nanos()))
}

/// Parses `raw` as a value of type `value_type`.
pub fn parse_value(value_type: ValueType, raw: &str) -> Result<Value> {
    if raw.is_empty() && value_type != ValueType::String {
        return Err(Error::contract_invalid(format!(
            "empty string is invalid for {value_type}"
        )));
    }
    if value_type.is_array() {
        return parse_array(value_type, raw);
    }
    parse_scalar(value_type, raw)
}

fn invalid(value_type: ValueType, raw: &str) -> Error {
    Error::contract_invalid(format!("{raw:?} is not a valid {value_type}"))
}

fn parse_int<T: std::str::FromStr>(value_type: ValueType, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| invalid(value_type, raw))
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(invalid(ValueType::Bool, raw)),
    }
}

fn looks_infinite(raw: &str) -> bool {
    let lower = raw.trim().trim_start_matches(['+', '-']).to_ascii_lowercase();
    lower == "inf" || lower == "infinity"
}

fn decode_float_bytes(value_type: ValueType, raw: &str) -> Result<f64> {
    let bytes = STANDARD
        .decode(raw.trim())
        .map_err(|_| invalid(value_type, raw))?;
    match (value_type, bytes.len()) {
        (ValueType::Float32, 4) => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes);
            Ok(f64::from(f32::from_be_bytes(buf)))
        }
        (ValueType::Float64, 8) => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes);
            Ok(f64::from_be_bytes(buf))
        }
        _ => Err(invalid(value_type, raw)),
    }
}

/// Decimal first, then base64 of the big-endian bytes.
fn parse_float(value_type: ValueType, raw: &str) -> Result<f64> {
    let decoded = match raw.trim().parse::<f64>() {
        Ok(v) => {
            let out_of_range = match value_type {
                ValueType::Float32 => v.is_finite() && v.abs() > f64::from(f32::MAX),
                _ => false,
            } || (v.is_infinite() && !looks_infinite(raw));
            if out_of_range {
                return Err(Error::server(format!("{raw} is out of range for {value_type}")));
            }
            v
        }
        Err(_) => decode_float_bytes(value_type, raw)?,
    };
    if decoded.is_nan() {
        return Err(Error::contract_invalid(format!(
            "{raw:?} decodes to NaN for {value_type}"
        )));
    }
    Ok(decoded)
}

fn parse_scalar(value_type: ValueType, raw: &str) -> Result<Value> {
    Ok(match value_type {
        ValueType::Bool => Value::Bool(parse_bool(raw)?),
        ValueType::String => Value::String(raw.to_string()),
        ValueType::Uint8 => Value::Uint8(parse_int(value_type, raw)?),
        ValueType::Uint16 => Value::Uint16(parse_int(value_type, raw)?),
        ValueType::Uint32 => Value::Uint32(parse_int(value_type, raw)?),
        ValueType::Uint64 => Value::Uint64(parse_int(value_type, raw)?),
        ValueType::Int8 => Value::Int8(parse_int(value_type, raw)?),
        ValueType::Int16 => Value::Int16(parse_int(value_type, raw)?),
        ValueType::Int32 => Value::Int32(parse_int(value_type, raw)?),
        ValueType::Int64 => Value::Int64(parse_int(value_type, raw)?),
        ValueType::Float32 => Value::Float32(parse_float(value_type, raw)? as f32),
        ValueType::Float64 => Value::Float64(parse_float(value_type, raw)?),
        ValueType::Binary => Value::Binary(
            STANDARD
                .decode(raw.trim())
                .map_err(|_| invalid(value_type, raw))?,
        ),
        ValueType::Object => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(v @ serde_json::Value::Object(_)) => Value::Object(v),
            _ => return Err(invalid(value_type, raw)),
        },
        array => return parse_array(array, raw),
    })
}

/// Splits an array literal into element strings.
///
/// Accepts a JSON array or the bracketed comma-separated form `[a, b, c]`.
fn split_array(value_type: ValueType, raw: &str) -> Result<Vec<String>> {
    if let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(raw) {
        return Ok(items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .collect());
    }
    let inner = raw
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| invalid(value_type, raw))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(inner
        .split(',')
        .map(|item| {
            let item = item.trim();
            item.strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(item)
                .to_string()
        })
        .collect())
}

fn parse_array(value_type: ValueType, raw: &str) -> Result<Value> {
    if value_type == ValueType::ObjectArray {
        return match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Array(items)) => Ok(Value::ObjectArray(items)),
            _ => Err(invalid(value_type, raw)),
        };
    }

    let items = split_array(value_type, raw)?;
    let element = value_type.element_type();
    if element == ValueType::String {
        return Ok(Value::StringArray(items));
    }
    let scalars = items
        .iter()
        .map(|item| parse_scalar(element, item))
        .collect::<Result<Vec<Value>>>()
        .map_err(|e| e.context(format!("invalid element in {value_type} {raw:?}")))?;

    // Every element was parsed as `element`, so the filter never drops one.
    macro_rules! gather {
        ($scalar:ident => $array:ident) => {
            Value::$array(
                scalars
                    .into_iter()
                    .filter_map(|v| match v {
                        Value::$scalar(x) => Some(x),
                        _ => None,
                    })
                    .collect(),
            )
        };
    }

    Ok(match element {
        ValueType::Bool => gather!(Bool => BoolArray),
        ValueType::Uint8 => gather!(Uint8 => Uint8Array),
        ValueType::Uint16 => gather!(Uint16 => Uint16Array),
        ValueType::Uint32 => gather!(Uint32 => Uint32Array),
        ValueType::Uint64 => gather!(Uint64 => Uint64Array),
        ValueType::Int8 => gather!(Int8 => Int8Array),
        ValueType::Int16 => gather!(Int16 => Int16Array),
        ValueType::Int32 => gather!(Int32 => Int32Array),
        ValueType::Int64 => gather!(Int64 => Int64Array),
        ValueType::Float32 => gather!(Float32 => Float32Array),
        ValueType::Float64 => gather!(Float64 => Float64Array),
        other => return Err(invalid(other, raw)),
    })
}

/// Which post-processing steps to run while building an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventOptions {
    /// Apply numeric transforms and assertions.
    pub transform: bool,
    /// Replace raw values through resource-operation mapping tables.
    pub map_values: bool,
}

impl EventOptions {
    /// Options for values read from the driver.
    pub fn read(data_transform: bool) -> Self {
        Self {
            transform: data_transform,
            map_values: true,
        }
    }

    /// Options for values that were written; readings echo what the driver got.
    pub fn written() -> Self {
        Self {
            transform: false,
            map_values: false,
        }
    }
}

/// Builds an event from driver values.
///
/// Transform and assertion failures do not abort the event; the affected
/// reading keeps its raw value and carries an [`ASSERTION_TAG`] tag.
pub fn command_values_to_event(
    values: Vec<CommandValue>,
    device: &Device,
    source: &str,
    profiles: &ProfileCache,
    options: EventOptions,
) -> Result<Event> {
    let mut event = Event::new(&device.profile_name, &device.name, source);
    for cv in values {
        let resource = profiles
            .device_resource(&device.profile_name, &cv.device_resource_name)
            .ok_or_else(|| {
                Error::not_found(format!(
                    "resource {} not found in profile {}",
                    cv.device_resource_name, device.profile_name
                ))
            })?;
        let reading = build_reading(cv, &resource, device, event.origin, profiles, options)?;
        event.readings.push(reading);
    }
    Ok(event)
}

fn build_reading(
    cv: CommandValue,
    resource: &DeviceResource,
    device: &Device,
    event_origin: i64,
    profiles: &ProfileCache,
    options: EventOptions,
) -> Result<Reading> {
    let props = &resource.properties;
    if cv.value_type() != props.value_type {
        return Err(Error::new(
            ErrorKind::ServerError,
            format!(
                "driver returned {} for resource {} of type {}",
                cv.value_type(),
                resource.name,
                props.value_type
            ),
        ));
    }

    let mut value = cv.value;
    let mut failures = Vec::new();
    if options.transform {
        if value.value_type().is_numeric() {
            match transform::transform_read_value(&value, props) {
                Ok(transformed) => value = transformed,
                Err(e) => failures.push(e.to_string()),
            }
        }
        if let Some(assertion) = props.assertion.as_deref().filter(|a| !a.is_empty()) {
            if let Err(e) = transform::check_assertion(&value, assertion) {
                failures.push(e.to_string());
            }
        }
    }
    if options.map_values {
        if let Some(ro) = profiles.resource_operation(&device.profile_name, &resource.name) {
            if let Some(mapped) = transform::map_read_value(&value.to_reading_string(), &ro.mappings) {
                value = Value::String(mapped);
            }
        }
    }

    let origin = if cv.origin > 0 { cv.origin } else { event_origin };
    let (d, p, r) = (&device.name, &device.profile_name, &resource.name);
    let mut reading = match value {
        Value::Binary(bytes) => Reading::binary(d, p, r, bytes, props.media_type.clone(), origin),
        Value::Object(object) => Reading::object(d, p, r, ValueType::Object, object, origin),
        Value::ObjectArray(items) => Reading::object(
            d,
            p,
            r,
            ValueType::ObjectArray,
            serde_json::Value::Array(items),
            origin,
        ),
        other => Reading::simple(d, p, r, other.value_type(), other.to_reading_string(), origin),
    };
    reading.units = props.units.clone();
    reading.tags = resource.tags.clone();
    reading.tags.extend(cv.tags);
    if !failures.is_empty() {
        reading.tags.insert(ASSERTION_TAG.to_string(), failures.join("; "));
    }
    Ok(reading)
}
