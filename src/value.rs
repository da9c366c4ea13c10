//! Tagged value model.
//!
//! Every cell a table can hold is a [`Value`]. The engine works on tagged
//! values internally and maps them to plain JSON at the storage and
//! result boundaries: numbers, strings, booleans and null keep their
//! native JSON form, arrays travel as a `[array][v1:||:v2:||:...]`
//! string, and a char is a one-character string.

use crate::error::Error;
use crate::schema::ColumnType;
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Marker suffix forcing an explicit boolean, produced by the binder.
pub(crate) const TO_BOOL: &str = ":JSONDB::TO_BOOL:";
/// Marker suffix forcing an explicit null, produced by the binder.
pub(crate) const TO_NULL: &str = ":JSONDB::TO_NULL:";
/// Marker suffix forcing an explicit array, produced by the binder.
pub(crate) const TO_ARRAY: &str = ":JSONDB::TO_ARRAY:";

const ARRAY_PREFIX: &str = "[array][";
const ARRAY_SEP: &str = ":||:";

/// Characters that are structural in the query language, and the
/// placeholders `quote()` turns them into.
const ESCAPES: [(char, &str); 6] = [
    ('\'', "{{quot}}"),
    (',', "{{comm}}"),
    ('.', "{{dot}}"),
    ('(', "{{pto}}"),
    (')', "{{ptc}}"),
    (';', "{{semi}}"),
];

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Char(char),
    Bool(bool),
    Array(Vec<Value>),
    Null,
}

impl Value {
    /// The textual form used in array serialization, string coercion and
    /// loose comparisons.
    pub fn to_text(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Str(v) => v.clone(),
            Value::Char(v) => v.to_string(),
            Value::Bool(v) => v.to_string(),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(Value::to_text).collect();
                format!("{}{}]", ARRAY_PREFIX, parts.join(ARRAY_SEP))
            }
            Value::Null => "null".to_string(),
        }
    }

    /// Numeric view, when one exists. Booleans count as 0/1.
    pub(crate) fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Non-empty / non-zero truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Char(c) => *c != '\0',
            Value::Bool(b) => *b,
            Value::Array(items) => !items.is_empty(),
            Value::Null => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Loose ordering used by `order`, filters, integrity checks and link
    /// lookups: null sorts first, numerics compare numerically, everything
    /// else by textual form. A reloaded document (where a char comes back
    /// as a one-character string) compares identically to a fresh one.
    pub fn cmp_loose(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        }
        self.to_text().cmp(&other.to_text())
    }

    /// Loose equality; see [`Value::cmp_loose`].
    pub fn eq_loose(&self, other: &Value) -> bool {
        self.cmp_loose(other) == Ordering::Equal
    }

    /// JSON form for result rows.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Str(v) => serializer.serialize_str(v),
            Value::Char(v) => serializer.serialize_str(&v.to_string()),
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Array(_) => serializer.serialize_str(&self.to_text()),
            Value::Null => serializer.serialize_unit(),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a jsondb cell value")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
                Ok(Value::Int(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
                Ok(Value::Int(v as i64))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
                Ok(Value::Float(v))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
                Ok(Value::Bool(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
                Ok(parse_array_literal(v).unwrap_or_else(|| Value::Str(v.to_string())))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
                Ok(Value::Null)
            }

            fn visit_none<E: de::Error>(self) -> Result<Value, E> {
                Ok(Value::Null)
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

/// Escape `s` for safe embedding in a query: wraps in single quotes and
/// replaces the six structural characters with their placeholders.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match ESCAPES.iter().find(|(c, _)| *c == ch) {
            Some((_, placeholder)) => out.push_str(placeholder),
            None => out.push(ch),
        }
    }
    out.push('\'');
    out
}

/// Reverse of the `quote()` escapes. Applied in quoted contexts only.
pub(crate) fn unescape(s: &str) -> String {
    let mut out = s.to_string();
    for (ch, placeholder) in ESCAPES {
        out = out.replace(placeholder, &ch.to_string());
    }
    out
}

/// Parse a raw query token into a [`Value`].
///
/// Type-marker suffixes win, then the quoted form, then the bare
/// `true|false|null` literals, then base-10 integers. Anything else is a
/// string: the query language has no bare-word type of its own, and
/// schema coercion decides what a string becomes.
pub fn parse_value(raw: &str) -> Value {
    let s = raw.trim();

    if let Some(rest) = s.strip_suffix(TO_BOOL) {
        return match rest.trim().parse::<i64>() {
            Ok(n) => Value::Bool(n != 0),
            Err(_) => Value::Bool(!rest.is_empty()),
        };
    }
    if s.strip_suffix(TO_NULL).is_some() {
        return Value::Null;
    }
    if let Some(rest) = s.strip_suffix(TO_ARRAY) {
        let inner = match strip_quotes(rest.trim()) {
            Some(q) => unescape(q),
            None => rest.trim().to_string(),
        };
        return parse_array_literal(&inner)
            .unwrap_or_else(|| Value::Array(vec![parse_element(&inner)]));
    }

    if let Some(inner) = strip_quotes(s) {
        return Value::Str(unescape(inner));
    }

    match s {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => match s.parse::<i64>() {
            Ok(n) => Value::Int(n),
            Err(_) => Value::Str(s.to_string()),
        },
    }
}

fn strip_quotes(s: &str) -> Option<&str> {
    if s.len() >= 2 && s.starts_with('\'') && s.ends_with('\'') {
        Some(&s[1..s.len() - 1])
    } else {
        None
    }
}

/// Parse the `[array][v1:||:v2:||:...]` serialized form, if `s` has it.
pub(crate) fn parse_array_literal(s: &str) -> Option<Value> {
    let inner = s.strip_prefix(ARRAY_PREFIX)?.strip_suffix(']')?;
    if inner.is_empty() {
        return Some(Value::Array(Vec::new()));
    }
    let items = inner.split(ARRAY_SEP).map(parse_element).collect();
    Some(Value::Array(items))
}

/// Parse one array element from its textual form.
fn parse_element(s: &str) -> Value {
    if let Some(nested) = parse_array_literal(s) {
        return nested;
    }
    match s {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => {
            if let Ok(n) = s.parse::<i64>() {
                Value::Int(n)
            } else if let Ok(f) = s.parse::<f64>() {
                Value::Float(f)
            } else {
                Value::Str(s.to_string())
            }
        }
    }
}

fn bad_type(column: &str, value: &Value, expected: &str) -> Error {
    Error::BadType {
        column: column.to_string(),
        value: value.to_text(),
        expected: expected.to_string(),
    }
}

/// Coerce `value` to a column's scalar type.
///
/// Link columns pass through untouched: resolving them needs the target
/// table, which is the executor's job. Null handling (defaults,
/// `not_null`) also lives with the caller so the same rules run before
/// link resolution.
pub fn coerce_scalar(
    value: Value,
    column: &str,
    ty: &ColumnType,
    max_length: Option<u32>,
) -> Result<Value, Error> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match ty {
        ColumnType::Int => coerce_int(value, column).map(Value::Int),
        ColumnType::Float => {
            let f = coerce_float(value, column)?;
            Ok(Value::Float(match max_length {
                Some(digits) => {
                    let factor = 10f64.powi(digits as i32);
                    (f * factor).round() / factor
                }
                None => f,
            }))
        }
        ColumnType::String => {
            let mut s = value.to_text();
            if let Some(max) = max_length {
                if s.chars().count() > max as usize {
                    s = s.chars().take(max as usize).collect();
                }
            }
            Ok(Value::Str(s))
        }
        ColumnType::Char => match value.to_text().chars().next() {
            Some(c) => Ok(Value::Char(c)),
            None => Err(bad_type(column, &value, "char")),
        },
        ColumnType::Bool => Ok(Value::Bool(value.is_truthy())),
        ColumnType::Array => match value {
            Value::Array(_) => Ok(value),
            Value::Str(ref s) => {
                parse_array_literal(s).ok_or_else(|| bad_type(column, &value, "array"))
            }
            _ => Err(bad_type(column, &value, "array")),
        },
        ColumnType::Link { .. } => Ok(value),
    }
}

fn coerce_int(value: Value, column: &str) -> Result<i64, Error> {
    match &value {
        Value::Int(v) => Ok(*v),
        Value::Float(v) => Ok(*v as i64),
        Value::Bool(v) => Ok(*v as i64),
        Value::Char(c) => c
            .to_digit(10)
            .map(|d| d as i64)
            .ok_or_else(|| bad_type(column, &value, "int")),
        Value::Str(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .or_else(|_| s.parse::<f64>().map(|f| f as i64))
                .map_err(|_| bad_type(column, &value, "int"))
        }
        _ => Err(bad_type(column, &value, "int")),
    }
}

fn coerce_float(value: Value, column: &str) -> Result<f64, Error> {
    match &value {
        Value::Int(v) => Ok(*v as f64),
        Value::Float(v) => Ok(*v),
        Value::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
        Value::Char(c) => c
            .to_digit(10)
            .map(|d| d as f64)
            .ok_or_else(|| bad_type(column, &value, "decimal")),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| bad_type(column, &value, "decimal")),
        _ => Err(bad_type(column, &value, "decimal")),
    }
}
