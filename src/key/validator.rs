//! Key Validator
//!
//! Classifies caller-supplied key values against a level's semantic type and
//! shape. Strict mode rejects anything a container key would silently
//! re-type: integer-like strings used as string container keys, floats,
//! booleans, nulls and negative numbers used as integer keys.
//!
//! Lenient mode (`validate: false`) coerces between numbers and numeric
//! strings and only fails on values that cannot be converted at all.

use serde_json::Value;

use super::{KeyType, Level, Segment, Shape};
use crate::error::{Error, Result};

/// Check `value` against a semantic type and shape without converting it.
///
/// An empty set is valid. A set with any offending member is rejected whole.
pub fn validate(key_type: KeyType, shape: Shape, value: &Value) -> Result<()> {
    match shape {
        Shape::Scalar => check_scalar(key_type, value),
        Shape::Set => {
            let items = value.as_array().ok_or_else(|| {
                Error::invalid_key(format!(
                    "expected a set of {} keys, got {}",
                    key_type,
                    kind(value)
                ))
            })?;
            for item in items {
                check_member(key_type, item)?;
            }
            Ok(())
        }
    }
}

/// Validate and convert one scalar key for `level`
pub fn segment(level: Level, value: &Value, strict: bool) -> Result<Segment> {
    if strict {
        check_scalar(level.key_type(), value)?;
    }
    coerce(level, value)
}

/// Validate and convert a set of keys for `level`
pub fn segments(level: Level, value: &Value, strict: bool) -> Result<Vec<Segment>> {
    if strict {
        validate(level.key_type(), Shape::Set, value)?;
    }
    let items = value.as_array().ok_or_else(|| {
        Error::invalid_key(format!("expected a set of {} keys, got {}", level, kind(value)))
    })?;
    items.iter().map(|item| coerce(level, item)).collect()
}

/// Validate and convert a JSON object key found at `level` of a trie.
///
/// Object keys are always strings on the wire, so int levels require a
/// canonical decimal rendering and string levels follow the container rule.
pub fn map_key(level: Level, key: &str, strict: bool) -> Result<Segment> {
    match level.key_type() {
        KeyType::Int => {
            if strict && !is_canonical_uint(key) {
                return Err(Error::invalid_key(format!(
                    "{} key '{}' is not a non-negative integer",
                    level, key
                )));
            }
            key.trim().parse::<u64>().map(Segment::Int).map_err(|_| {
                Error::invalid_key(format!("{} key '{}' is not a non-negative integer", level, key))
            })
        }
        KeyType::Str => {
            if strict && is_integer_like(key) {
                return Err(Error::invalid_key(format!(
                    "{} key '{}' would be coerced to an integer",
                    level, key
                )));
            }
            Ok(Segment::Str(key.to_string()))
        }
    }
}

/// True for strings a PHP-style container would store as an integer key:
/// an optional minus sign followed by a decimal with no leading zero.
pub fn is_integer_like(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return false;
    }
    if s.starts_with('-') && digits == "0" {
        return false;
    }
    s.parse::<i64>().is_ok()
}

/// Decimal digits with no leading zero that fit a `u64`
fn is_canonical_uint(s: &str) -> bool {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    (s.len() == 1 || !s.starts_with('0')) && s.parse::<u64>().is_ok()
}

fn check_scalar(key_type: KeyType, value: &Value) -> Result<()> {
    match key_type {
        KeyType::Int => match value {
            Value::Number(n) if n.is_u64() => Ok(()),
            other => Err(Error::invalid_key(format!(
                "expected a non-negative integer key, got {}",
                kind(other)
            ))),
        },
        KeyType::Str => match value {
            Value::String(_) => Ok(()),
            other => Err(Error::invalid_key(format!(
                "expected a string key, got {}",
                kind(other)
            ))),
        },
    }
}

fn check_member(key_type: KeyType, value: &Value) -> Result<()> {
    check_scalar(key_type, value)?;
    if let Value::String(s) = value {
        if is_integer_like(s) {
            return Err(Error::invalid_key(format!(
                "set member '{}' would be coerced to an integer",
                s
            )));
        }
    }
    Ok(())
}

fn coerce(level: Level, value: &Value) -> Result<Segment> {
    let converted = match (level.key_type(), value) {
        (KeyType::Int, Value::Number(n)) => n.as_u64().map(Segment::Int),
        (KeyType::Int, Value::String(s)) => s.trim().parse::<u64>().ok().map(Segment::Int),
        (KeyType::Str, Value::String(s)) => Some(Segment::Str(s.clone())),
        (KeyType::Str, Value::Number(n)) => Some(Segment::Str(n.to_string())),
        _ => None,
    };
    converted.ok_or_else(|| {
        Error::invalid_key(format!(
            "{} key must be {}, got {}",
            level,
            level.key_type(),
            kind(value)
        ))
    })
}

fn kind(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {}", b),
        Value::Number(n) => format!("number {}", n),
        Value::String(s) => format!("string '{}'", s),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "map".to_string(),
    }
}
