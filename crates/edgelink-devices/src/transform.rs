//! Per-resource value transformation.
//!
//! Reads apply, in order: `base^value`, `* scale`, `+ offset`, `& mask`,
//! shift. Writes undo the same steps in reverse. Mask and shift only apply
//! to integer types. A parameter that is absent or zero is skipped.

use std::collections::HashMap;

use edgelink_core::models::ResourceProperties;
use edgelink_core::{Error, Result, Value, ValueType};

fn param(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0)
}

fn overflow(value_type: ValueType, detail: impl std::fmt::Display) -> Error {
    Error::contract_invalid(format!("transformed value {detail} overflows {value_type}"))
}

fn integer_of(value: &Value) -> Option<i128> {
    Some(match value {
        Value::Uint8(v) => i128::from(*v),
        Value::Uint16(v) => i128::from(*v),
        Value::Uint32(v) => i128::from(*v),
        Value::Uint64(v) => i128::from(*v),
        Value::Int8(v) => i128::from(*v),
        Value::Int16(v) => i128::from(*v),
        Value::Int32(v) => i128::from(*v),
        Value::Int64(v) => i128::from(*v),
        _ => return None,
    })
}

fn integer_value(value_type: ValueType, v: i128) -> Result<Value> {
    let err = || overflow(value_type, v);
    Ok(match value_type {
        ValueType::Uint8 => Value::Uint8(v.try_into().map_err(|_| err())?),
        ValueType::Uint16 => Value::Uint16(v.try_into().map_err(|_| err())?),
        ValueType::Uint32 => Value::Uint32(v.try_into().map_err(|_| err())?),
        ValueType::Uint64 => Value::Uint64(v.try_into().map_err(|_| err())?),
        ValueType::Int8 => Value::Int8(v.try_into().map_err(|_| err())?),
        ValueType::Int16 => Value::Int16(v.try_into().map_err(|_| err())?),
        ValueType::Int32 => Value::Int32(v.try_into().map_err(|_| err())?),
        ValueType::Int64 => Value::Int64(v.try_into().map_err(|_| err())?),
        other => return Err(Error::contract_invalid(format!("{other} is not an integer type"))),
    })
}

fn float_value(value_type: ValueType, v: f64) -> Result<Value> {
    if !v.is_finite() {
        return Err(overflow(value_type, v));
    }
    match value_type {
        ValueType::Float32 if v.abs() > f64::from(f32::MAX) => Err(overflow(value_type, v)),
        ValueType::Float32 => Ok(Value::Float32(v as f32)),
        _ => Ok(Value::Float64(v)),
    }
}

fn integer_from_float(value_type: ValueType, v: f64) -> Result<i128> {
    if !v.is_finite() || v.abs() >= 1.7e38 {
        return Err(overflow(value_type, v));
    }
    Ok(v.trunc() as i128)
}

fn shift_left(value_type: ValueType, v: i128, bits: i64) -> Result<i128> {
    let bits = u32::try_from(bits).map_err(|_| overflow(value_type, v))?;
    let factor = 1i128
        .checked_shl(bits)
        .filter(|f| *f > 0)
        .ok_or_else(|| overflow(value_type, v))?;
    v.checked_mul(factor)
        .ok_or_else(|| overflow(value_type, v))
}

fn shift_right(v: i128, bits: i64) -> i128 {
    v.checked_shr(bits.min(127) as u32).unwrap_or(0)
}

/// Applies the read-side transform to a numeric scalar.
pub fn transform_read_value(value: &Value, props: &ResourceProperties) -> Result<Value> {
    let value_type = value.value_type();
    let (base, scale, offset) = (param(props.base), param(props.scale), param(props.offset));

    if value_type.is_float() {
        let Some(mut v) = value.as_f64() else {
            return Ok(value.clone());
        };
        if let Some(base) = base {
            v = base.powf(v);
        }
        if let Some(scale) = scale {
            v *= scale;
        }
        if let Some(offset) = offset {
            v += offset;
        }
        return float_value(value_type, v);
    }

    let Some(mut v) = integer_of(value) else {
        return Ok(value.clone());
    };
    if base.is_some() || scale.is_some() || offset.is_some() {
        let mut f = v as f64;
        if let Some(base) = base {
            f = base.powf(f);
        }
        if let Some(scale) = scale {
            f *= scale;
        }
        if let Some(offset) = offset {
            f += offset;
        }
        v = integer_from_float(value_type, f)?;
    }
    if let Some(mask) = props.mask.filter(|m| *m != 0) {
        v &= i128::from(mask);
    }
    match props.shift.unwrap_or(0) {
        0 => {}
        s if s > 0 => v = shift_left(value_type, v, s)?,
        s => v = shift_right(v, -s),
    }
    integer_value(value_type, v)
}

/// Undoes the read-side transform before a value is written to the device.
pub fn transform_write_value(value: &Value, props: &ResourceProperties) -> Result<Value> {
    let value_type = value.value_type();
    let (base, scale, offset) = (param(props.base), param(props.scale), param(props.offset));

    if value_type.is_float() {
        let Some(mut v) = value.as_f64() else {
            return Ok(value.clone());
        };
        if let Some(offset) = offset {
            v -= offset;
        }
        if let Some(scale) = scale {
            v /= scale;
        }
        if let Some(base) = base {
            v = v.ln() / base.ln();
        }
        return float_value(value_type, v);
    }

    let Some(mut v) = integer_of(value) else {
        return Ok(value.clone());
    };
    match props.shift.unwrap_or(0) {
        0 => {}
        s if s > 0 => v = shift_right(v, s),
        s => v = shift_left(value_type, v, -s)?,
    }
    if let Some(mask) = props.mask.filter(|m| *m != 0) {
        v &= i128::from(mask);
    }
    if base.is_some() || scale.is_some() || offset.is_some() {
        let mut f = v as f64;
        if let Some(offset) = offset {
            f -= offset;
        }
        if let Some(scale) = scale {
            f /= scale;
        }
        if let Some(base) = base {
            f = f.ln() / base.ln();
        }
        v = integer_from_float(value_type, f)?;
    }
    integer_value(value_type, v)
}

/// Fails unless the value's string form equals `assertion`.
pub fn check_assertion(value: &Value, assertion: &str) -> Result<()> {
    let actual = value.to_reading_string();
    if actual == assertion {
        Ok(())
    } else {
        Err(Error::contract_invalid(format!(
            "assertion failed: value {actual} does not equal {assertion}"
        )))
    }
}

/// Enforces the resource's minimum and maximum on a numeric scalar.
pub fn check_range(value: &Value, props: &ResourceProperties) -> Result<()> {
    let Some(v) = value.as_f64() else {
        return Ok(());
    };
    if let Some(min) = props.minimum.filter(|min| v < *min) {
        return Err(Error::contract_invalid(format!("value {v} is below minimum {min}")));
    }
    if let Some(max) = props.maximum.filter(|max| v > *max) {
        return Err(Error::contract_invalid(format!("value {v} is above maximum {max}")));
    }
    Ok(())
}

/// Maps a raw reading through a mapping table.
///
/// Keys are matched first; a table written the other way round is matched
/// on its values.
pub fn map_read_value(raw: &str, mappings: &HashMap<String, String>) -> Option<String> {
    mappings.get(raw).cloned().or_else(|| {
        mappings
            .iter()
            .find(|(_, v)| v.as_str() == raw)
            .map(|(k, _)| k.clone())
    })
}

/// Maps a requested value back to the raw device value.
///
/// The inverse of [`map_read_value`]: values are matched first, then keys.
pub fn map_write_value(requested: &str, mappings: &HashMap<String, String>) -> Option<String> {
    mappings
        .iter()
        .find(|(_, v)| v.as_str() == requested)
        .map(|(k, _)| k.clone())
        .or_else(|| mappings.get(requested).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgelink_core::models::ReadWrite;
    use edgelink_core::ErrorKind;

    fn props(value_type: ValueType) -> ResourceProperties {
        ResourceProperties::new(value_type, ReadWrite::ReadWrite)
    }

    #[test]
    fn test_scale_and_offset_float32() {
        let mut p = props(ValueType::Float32);
        p.scale = Some(0.1);
        p.offset = Some(2.0);
        let out = transform_read_value(&Value::Float32(217.0), &p).unwrap();
        assert_eq!(out.to_reading_string(), "23.7");

        let back = transform_write_value(&out, &p).unwrap();
        match back {
            Value::Float32(v) => assert!((v - 217.0).abs() < 1e-3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_zero_parameters_are_noops() {
        let mut p = props(ValueType::Int32);
        p.scale = Some(0.0);
        p.offset = Some(0.0);
        p.mask = Some(0);
        p.shift = Some(0);
        assert_eq!(
            transform_read_value(&Value::Int32(-7), &p).unwrap(),
            Value::Int32(-7)
        );
    }

    #[test]
    fn test_integer_pipeline() {
        let mut p = props(ValueType::Uint16);
        p.mask = Some(0x0ff0);
        p.shift = Some(-4);
        assert_eq!(
            transform_read_value(&Value::Uint16(0xabcd), &p).unwrap(),
            Value::Uint16(0xbc)
        );

        let mut p = props(ValueType::Int32);
        p.base = Some(2.0);
        assert_eq!(
            transform_read_value(&Value::Int32(10), &p).unwrap(),
            Value::Int32(1024)
        );
    }

    #[test]
    fn test_overflow_is_contract_invalid() {
        let mut p = props(ValueType::Uint8);
        p.scale = Some(10.0);
        let err = transform_read_value(&Value::Uint8(200), &p).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractInvalid);

        let mut p = props(ValueType::Int8);
        p.offset = Some(100.0);
        let err = transform_write_value(&Value::Int8(-100), &p).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractInvalid);
    }

    #[test]
    fn test_write_inverts_scale_and_shift() {
        let mut p = props(ValueType::Int32);
        p.scale = Some(0.5);
        p.offset = Some(10.0);
        assert_eq!(
            transform_write_value(&Value::Int32(30), &p).unwrap(),
            Value::Int32(40)
        );

        let mut p = props(ValueType::Uint32);
        p.shift = Some(4);
        assert_eq!(
            transform_write_value(&Value::Uint32(0x120), &p).unwrap(),
            Value::Uint32(0x12)
        );
    }

    #[test]
    fn test_assertion_and_range() {
        assert!(check_assertion(&Value::Int16(0), "0").is_ok());
        assert!(check_assertion(&Value::Int16(1), "0").is_err());

        let mut p = props(ValueType::Float64);
        p.minimum = Some(-10.0);
        p.maximum = Some(10.0);
        assert!(check_range(&Value::Float64(9.5), &p).is_ok());
        assert!(check_range(&Value::Float64(10.5), &p).is_err());
        assert!(check_range(&Value::String("x".into()), &p).is_ok());
    }

    #[test]
    fn test_mappings_both_directions() {
        let device_to_user: HashMap<String, String> =
            [("1".to_string(), "on".to_string()), ("0".to_string(), "off".to_string())].into();
        assert_eq!(map_read_value("1", &device_to_user).as_deref(), Some("on"));
        assert_eq!(map_write_value("on", &device_to_user).as_deref(), Some("1"));

        let user_to_device: HashMap<String, String> =
            [("on".to_string(), "1".to_string()), ("off".to_string(), "0".to_string())].into();
        assert_eq!(map_write_value("on", &user_to_device).as_deref(), Some("1"));
        assert_eq!(map_read_value("0", &user_to_device).as_deref(), Some("off"));

        assert_eq!(map_write_value("dim", &user_to_device), None);
    }
}
