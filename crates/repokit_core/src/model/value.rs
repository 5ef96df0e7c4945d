//! Weakly-typed field values and typed coercion.
//!
//! # Responsibility
//! - Represent payload cells and SQLite parameters with one `Value` enum.
//! - Coerce `Value`s into concrete field types without lossy conversions.
//!
//! # Invariants
//! - Numeric coercion never truncates: out-of-range and non-integral inputs
//!   are rejected.
//! - `Null` into a field yields that field's default (`None` for `Option`).

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// One weakly-typed payload cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short source-type name used in coercion errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Uuid(_) => "uuid",
            Self::Timestamp(_) => "timestamp",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::UInt(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
            Self::Uuid(value) => write!(f, "{value}"),
            Self::Timestamp(value) => f.write_str(&format_timestamp(value)),
            Self::Bytes(value) => write!(f, "<{} bytes>", value.len()),
        }
    }
}

/// Storage text form for timestamps: RFC 3339, UTC, microsecond precision.
pub(crate) fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as SqlValue;

        Ok(match self {
            Self::Null => ToSqlOutput::Owned(SqlValue::Null),
            Self::Bool(value) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*value))),
            Self::Int(value) => ToSqlOutput::Owned(SqlValue::Integer(*value)),
            Self::UInt(value) => match i64::try_from(*value) {
                Ok(value) => ToSqlOutput::Owned(SqlValue::Integer(value)),
                Err(_) => {
                    return Err(rusqlite::Error::ToSqlConversionFailure(Box::new(
                        CoerceError::OutOfRange {
                            value: value.to_string(),
                            target: "i64",
                        },
                    )))
                }
            },
            Self::Float(value) => ToSqlOutput::Owned(SqlValue::Real(*value)),
            Self::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
            Self::Uuid(value) => ToSqlOutput::Owned(SqlValue::Text(value.to_string())),
            Self::Timestamp(value) => ToSqlOutput::Owned(SqlValue::Text(format_timestamp(value))),
            Self::Bytes(value) => ToSqlOutput::Borrowed(ValueRef::Blob(value)),
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(value) => Self::Int(value),
            ValueRef::Real(value) => Self::Float(value),
            ValueRef::Text(bytes) => Self::Text(
                std::str::from_utf8(bytes)
                    .map_err(|err| FromSqlError::Other(Box::new(err)))?
                    .to_string(),
            ),
            ValueRef::Blob(bytes) => Self::Bytes(bytes.to_vec()),
        })
    }
}

macro_rules! value_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for Value {
                fn from(value: $source) -> Self {
                    Self::$variant(value.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => UInt,
    u16 => UInt,
    u32 => UInt,
    u64 => UInt,
    f32 => Float,
    f64 => Float,
    String => Text,
    Uuid => Uuid,
    DateTime<Utc> => Timestamp,
    Vec<u8> => Bytes,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Value family a field stores; reported in model metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Bool,
    Int,
    UInt,
    Float,
    Text,
    Uuid,
    Timestamp,
    Bytes,
}

impl ValueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Float => "float",
            Self::Text => "text",
            Self::Uuid => "uuid",
            Self::Timestamp => "timestamp",
            Self::Bytes => "bytes",
        }
    }
}

/// Failure converting a `Value` into a concrete field type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoerceError {
    #[error("cannot assign {from} to {to}")]
    UnsupportedSource {
        from: &'static str,
        to: &'static str,
    },
    #[error("value {value} is out of range for {target}")]
    OutOfRange { value: String, target: &'static str },
    #[error("value {value} is not an exact {target}")]
    InexactNumber { value: String, target: &'static str },
    #[error("invalid {kind} value {value:?}")]
    MalformedText { kind: &'static str, value: String },
}

/// Field types the descriptor can read and write through `Value`.
///
/// `from_value` receives non-null input; `Null` is routed through
/// `from_value_or_default`.
pub trait FieldType: Default + Clone + Send + Sync + 'static {
    const KIND: ValueKind;
    const NULLABLE: bool = false;

    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> Result<Self, CoerceError>;

    fn from_value_or_default(value: Value) -> Result<Self, CoerceError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Self::from_value(value)
    }
}

impl<T> FieldType for Option<T>
where
    T: FieldType,
{
    const KIND: ValueKind = T::KIND;
    const NULLABLE: bool = true;

    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, FieldType::to_value)
    }

    fn from_value(value: Value) -> Result<Self, CoerceError> {
        if value.is_null() {
            return Ok(None);
        }
        T::from_value(value).map(Some)
    }
}

fn unsupported(value: &Value, target: &'static str) -> CoerceError {
    CoerceError::UnsupportedSource {
        from: value.type_name(),
        to: target,
    }
}

fn integer_from_float(value: f64, target: &'static str) -> Result<i128, CoerceError> {
    if !value.is_finite() {
        return Err(CoerceError::OutOfRange {
            value: value.to_string(),
            target,
        });
    }
    if value.fract() != 0.0 {
        return Err(CoerceError::InexactNumber {
            value: value.to_string(),
            target,
        });
    }
    // Every finite integral f64 below 2^127 fits i128.
    if value.abs() >= 1.7e38 {
        return Err(CoerceError::OutOfRange {
            value: value.to_string(),
            target,
        });
    }
    Ok(value as i128)
}

fn integer_from_value(value: &Value, target: &'static str) -> Result<i128, CoerceError> {
    match value {
        Value::Int(value) => Ok(i128::from(*value)),
        Value::UInt(value) => Ok(i128::from(*value)),
        Value::Float(value) => integer_from_float(*value, target),
        Value::Text(text) => {
            let trimmed = text.trim();
            trimmed
                .parse::<i128>()
                .or_else(|_| {
                    trimmed
                        .parse::<f64>()
                        .map_err(|_| ())
                        .and_then(|float| integer_from_float(float, target).map_err(|_| ()))
                })
                .map_err(|_| CoerceError::MalformedText {
                    kind: target,
                    value: text.clone(),
                })
        }
        other => Err(unsupported(other, target)),
    }
}

macro_rules! integer_field_type {
    ($($target:ty => $kind:ident),* $(,)?) => {
        $(
            impl FieldType for $target {
                const KIND: ValueKind = ValueKind::$kind;

                fn to_value(&self) -> Value {
                    Value::from(*self)
                }

                fn from_value(value: Value) -> Result<Self, CoerceError> {
                    let wide = integer_from_value(&value, stringify!($target))?;
                    <$target>::try_from(wide).map_err(|_| CoerceError::OutOfRange {
                        value: value.to_string(),
                        target: stringify!($target),
                    })
                }
            }
        )*
    };
}

integer_field_type! {
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => UInt,
    u16 => UInt,
    u32 => UInt,
    u64 => UInt,
}

fn float_from_value(value: &Value, target: &'static str) -> Result<f64, CoerceError> {
    match value {
        Value::Float(value) => Ok(*value),
        Value::Int(value) => Ok(*value as f64),
        Value::UInt(value) => Ok(*value as f64),
        Value::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| CoerceError::MalformedText {
                kind: target,
                value: text.clone(),
            }),
        other => Err(unsupported(other, target)),
    }
}

impl FieldType for f64 {
    const KIND: ValueKind = ValueKind::Float;

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> Result<Self, CoerceError> {
        float_from_value(&value, "f64")
    }
}

impl FieldType for f32 {
    const KIND: ValueKind = ValueKind::Float;

    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }

    fn from_value(value: Value) -> Result<Self, CoerceError> {
        let wide = float_from_value(&value, "f32")?;
        if wide.is_finite() && wide.abs() > f64::from(f32::MAX) {
            return Err(CoerceError::OutOfRange {
                value: wide.to_string(),
                target: "f32",
            });
        }
        Ok(wide as f32)
    }
}

/// Text accepted as a boolean, matching the common `1/t/true/0/f/false` set.
fn parse_bool_text(text: &str) -> Option<bool> {
    match text {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

impl FieldType for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self, CoerceError> {
        match value {
            Value::Bool(value) => Ok(value),
            // SQLite stores booleans as 0/1 integers.
            Value::Int(0) | Value::UInt(0) => Ok(false),
            Value::Int(1) | Value::UInt(1) => Ok(true),
            Value::Text(text) => parse_bool_text(&text).ok_or(CoerceError::MalformedText {
                kind: "bool",
                value: text,
            }),
            other => Err(unsupported(&other, "bool")),
        }
    }
}

impl FieldType for String {
    const KIND: ValueKind = ValueKind::Text;

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, CoerceError> {
        match value {
            Value::Text(value) => Ok(value),
            Value::Bytes(_) | Value::Null => Err(unsupported(&value, "string")),
            other => Ok(other.to_string()),
        }
    }
}

impl FieldType for Uuid {
    const KIND: ValueKind = ValueKind::Uuid;

    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }

    fn from_value(value: Value) -> Result<Self, CoerceError> {
        match value {
            Value::Uuid(value) => Ok(value),
            Value::Text(text) => {
                Uuid::parse_str(text.trim()).map_err(|_| CoerceError::MalformedText {
                    kind: "uuid",
                    value: text,
                })
            }
            other => Err(unsupported(&other, "uuid")),
        }
    }
}

/// Parses timestamp text against the accepted layouts, first match wins.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, layout) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
}

impl FieldType for DateTime<Utc> {
    const KIND: ValueKind = ValueKind::Timestamp;

    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }

    fn from_value(value: Value) -> Result<Self, CoerceError> {
        match value {
            Value::Timestamp(value) => Ok(value),
            Value::Text(text) => parse_timestamp(&text).ok_or(CoerceError::MalformedText {
                kind: "timestamp",
                value: text,
            }),
            other => Err(unsupported(&other, "timestamp")),
        }
    }
}

impl FieldType for Vec<u8> {
    const KIND: ValueKind = ValueKind::Bytes;

    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, CoerceError> {
        match value {
            Value::Bytes(value) => Ok(value),
            Value::Text(text) => Ok(text.into_bytes()),
            other => Err(unsupported(&other, "bytes")),
        }
    }
}
