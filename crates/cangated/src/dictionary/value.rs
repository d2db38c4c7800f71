//! Conversion between JSON values and object payload bytes.
//!
//! When the dictionary declares a type, values are encoded little-endian at
//! that width. Without a type, integers travel as 32-bit words where they
//! fit, strings as their UTF-8 bytes and arrays as raw bytes; payloads of up
//! to four bytes decode as unsigned integers and anything longer as a byte
//! array.

use serde_json::Value;
use thiserror::Error;

use super::DataType;

/// A value that cannot be represented in the requested type.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValueError {
    /// The value does not fit the type's range.
    #[error("value {value} is out of range for {data_type}")]
    OutOfRange {
        /// Rendered value.
        value: String,
        /// Target type.
        data_type: DataType,
    },
    /// The value has the wrong JSON shape.
    #[error("expected {expected}, got {found}")]
    Unsupported {
        /// Accepted shape.
        expected: &'static str,
        /// Rendered value.
        found: String,
    },
}

/// Encodes `value` for transfer.
///
/// # Errors
///
/// Returns [`ValueError`] when the value does not fit the type.
pub fn encode(value: &Value, data_type: Option<DataType>) -> Result<Vec<u8>, ValueError> {
    match data_type {
        Some(data_type) => encode_typed(value, data_type),
        None => encode_untyped(value),
    }
}

/// Decodes a payload into a JSON value.
#[must_use]
pub fn decode(bytes: &[u8], data_type: Option<DataType>) -> Value {
    match data_type {
        Some(data_type) => decode_typed(bytes, data_type),
        None if (1..=4).contains(&bytes.len()) => Value::from(u32::from_le_bytes(padded(bytes))),
        None => byte_array(bytes),
    }
}

fn encode_typed(value: &Value, data_type: DataType) -> Result<Vec<u8>, ValueError> {
    let bytes = match data_type {
        DataType::Boolean => vec![u8::from(boolean(value)?)],
        DataType::Integer8 => narrow::<i8>(value, data_type)?.to_le_bytes().to_vec(),
        DataType::Integer16 => narrow::<i16>(value, data_type)?.to_le_bytes().to_vec(),
        DataType::Integer32 => narrow::<i32>(value, data_type)?.to_le_bytes().to_vec(),
        DataType::Integer64 => narrow::<i64>(value, data_type)?.to_le_bytes().to_vec(),
        DataType::Unsigned8 => narrow::<u8>(value, data_type)?.to_le_bytes().to_vec(),
        DataType::Unsigned16 => narrow::<u16>(value, data_type)?.to_le_bytes().to_vec(),
        DataType::Unsigned32 => narrow::<u32>(value, data_type)?.to_le_bytes().to_vec(),
        DataType::Unsigned64 => narrow::<u64>(value, data_type)?.to_le_bytes().to_vec(),
        DataType::Real32 => {
            let real = real(value)?;
            if real.is_finite() && real.abs() > f64::from(f32::MAX) {
                return Err(out_of_range(value, data_type));
            }
            // Range checked against f32::MAX above.
            let narrowed = real as f32;
            narrowed.to_le_bytes().to_vec()
        }
        DataType::Real64 => real(value)?.to_le_bytes().to_vec(),
        DataType::VisibleString => text(value)?.into_bytes(),
        DataType::UnicodeString => text(value)?
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect(),
        DataType::OctetString | DataType::Domain => raw_bytes(value)?,
    };
    Ok(bytes)
}

fn encode_untyped(value: &Value) -> Result<Vec<u8>, ValueError> {
    match value {
        Value::Bool(flag) => Ok(vec![u8::from(*flag)]),
        Value::Number(number) if number.is_f64() => {
            encode_typed(value, DataType::Real32)
        }
        Value::Number(_) => {
            let integer = integer(value)?;
            if let Ok(word) = u32::try_from(integer) {
                Ok(word.to_le_bytes().to_vec())
            } else if let Ok(word) = i32::try_from(integer) {
                Ok(word.to_le_bytes().to_vec())
            } else if let Ok(long) = u64::try_from(integer) {
                Ok(long.to_le_bytes().to_vec())
            } else {
                encode_typed(value, DataType::Integer64)
            }
        }
        Value::String(text) => Ok(text.clone().into_bytes()),
        Value::Array(_) => raw_bytes(value),
        Value::Null | Value::Object(_) => Err(unsupported("a number, string or byte array", value)),
    }
}

fn decode_typed(bytes: &[u8], data_type: DataType) -> Value {
    match data_type {
        DataType::Boolean => Value::Bool(bytes.first().is_some_and(|byte| *byte != 0)),
        DataType::Integer8 => Value::from(i8::from_le_bytes(padded(bytes))),
        DataType::Integer16 => Value::from(i16::from_le_bytes(padded(bytes))),
        DataType::Integer32 => Value::from(i32::from_le_bytes(padded(bytes))),
        DataType::Integer64 => Value::from(i64::from_le_bytes(padded(bytes))),
        DataType::Unsigned8 => Value::from(u8::from_le_bytes(padded(bytes))),
        DataType::Unsigned16 => Value::from(u16::from_le_bytes(padded(bytes))),
        DataType::Unsigned32 => Value::from(u32::from_le_bytes(padded(bytes))),
        DataType::Unsigned64 => Value::from(u64::from_le_bytes(padded(bytes))),
        DataType::Real32 => Value::from(f64::from(f32::from_le_bytes(padded(bytes)))),
        DataType::Real64 => Value::from(f64::from_le_bytes(padded(bytes))),
        DataType::VisibleString => Value::from(
            String::from_utf8_lossy(bytes)
                .trim_end_matches('\0')
                .to_owned(),
        ),
        DataType::UnicodeString => {
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes(padded(pair)))
                .collect();
            Value::from(String::from_utf16_lossy(&units).trim_end_matches('\0').to_owned())
        }
        DataType::OctetString | DataType::Domain => byte_array(bytes),
    }
}

/// Parses decimal or `0x` prefixed hexadecimal text, with an optional sign.
pub(crate) fn parse_integer(text: &str) -> Option<i128> {
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i128::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i128>().ok()?,
    };
    Some(if negative { -magnitude } else { magnitude })
}

fn integer(value: &Value) -> Result<i128, ValueError> {
    match value {
        Value::Number(number) => {
            if let Some(signed) = number.as_i64() {
                return Ok(i128::from(signed));
            }
            if let Some(unsigned) = number.as_u64() {
                return Ok(i128::from(unsigned));
            }
            match number.as_f64() {
                Some(real) if real.is_finite() && real.fract() == 0.0 => Ok(real as i128),
                _ => Err(unsupported("an integer", value)),
            }
        }
        Value::String(text) => parse_integer(text).ok_or_else(|| unsupported("an integer", value)),
        Value::Bool(flag) => Ok(i128::from(*flag)),
        Value::Null | Value::Array(_) | Value::Object(_) => Err(unsupported("an integer", value)),
    }
}

fn narrow<T: TryFrom<i128>>(value: &Value, data_type: DataType) -> Result<T, ValueError> {
    T::try_from(integer(value)?).map_err(|_| out_of_range(value, data_type))
}

fn boolean(value: &Value) -> Result<bool, ValueError> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::String(text) if text.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(text) if text.eq_ignore_ascii_case("false") => Ok(false),
        _ => match integer(value) {
            Ok(0) => Ok(false),
            Ok(1) => Ok(true),
            _ => Err(unsupported("a boolean", value)),
        },
    }
}

fn real(value: &Value) -> Result<f64, ValueError> {
    match value {
        Value::Number(number) => number.as_f64().ok_or_else(|| unsupported("a number", value)),
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| unsupported("a number", value)),
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => {
            Err(unsupported("a number", value))
        }
    }
}

fn text(value: &Value) -> Result<String, ValueError> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => {
            Err(unsupported("a string", value))
        }
    }
}

fn raw_bytes(value: &Value) -> Result<Vec<u8>, ValueError> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|byte| u8::try_from(byte).ok())
                    .ok_or_else(|| unsupported("bytes in 0..=255", item))
            })
            .collect(),
        Value::String(text) => Ok(text.clone().into_bytes()),
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::Object(_) => {
            Err(unsupported("a byte array", value))
        }
    }
}

fn byte_array(bytes: &[u8]) -> Value {
    Value::Array(bytes.iter().copied().map(Value::from).collect())
}

fn padded<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut buffer = [0_u8; N];
    for (slot, byte) in buffer.iter_mut().zip(bytes) {
        *slot = *byte;
    }
    buffer
}

fn out_of_range(value: &Value, data_type: DataType) -> ValueError {
    ValueError::OutOfRange {
        value: value.to_string(),
        data_type,
    }
}

fn unsupported(expected: &'static str, value: &Value) -> ValueError {
    ValueError::Unsupported {
        expected,
        found: value.to_string(),
    }
}
