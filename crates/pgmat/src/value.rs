//! Dynamically typed parameter and column values.
//!
//! [`Value`] is the currency between the binder, the command and the row
//! readers. Rust values enter through [`ToValue`] and leave through
//! [`FromValue`]; at the Postgres boundary `Value` implements `ToSql` and
//! coerces itself to the parameter type the server inferred.

use bytes::BytesMut;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use std::error::Error;
use std::fmt;
use thiserror::Error;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use uuid::Uuid;

/// Display format used for timestamps in diagnostic SQL.
const DISPLAY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const DISPLAY_TIME_FORMAT: &str = "%H:%M:%S%.3f";

/// A nullable scalar value bound to a command or read from a row.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// SQL `NULL`
    #[default]
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    #[cfg(feature = "rust_decimal")]
    Decimal(rust_decimal::Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    /// `timestamp` (without time zone)
    Timestamp(NaiveDateTime),
    /// `timestamptz`, normalized to UTC
    TimestampTz(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    /// `json` / `jsonb` document
    Json(serde_json::Value),
}

impl Value {
    /// Whether this is SQL `NULL`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// A short name of the variant, used in conversion errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "bool",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            #[cfg(feature = "rust_decimal")]
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Json(_) => "json",
        }
    }

    /// Render the value as a SQL-looking literal for logs and diagnostics.
    ///
    /// The output is never used to build executable SQL.
    pub fn to_display_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Timestamp(ts) => format!("'{}'", ts.format(DISPLAY_TIMESTAMP_FORMAT)),
            Value::TimestampTz(ts) => format!("'{}'", ts.format(DISPLAY_TIMESTAMP_FORMAT)),
            Value::Date(d) => format!(
                "'{}'",
                d.and_time(NaiveTime::MIN).format(DISPLAY_TIMESTAMP_FORMAT)
            ),
            Value::Time(t) => format!("'{}'", t.format(DISPLAY_TIME_FORMAT)),
            Value::Uuid(u) => format!("'{u}'"),
            Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::I16(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            #[cfg(feature = "rust_decimal")]
            Value::Decimal(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
            Value::Bytes(v) => {
                f.write_str("\\x")?;
                for b in v {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Value::Uuid(v) => write!(f, "{v}"),
            Value::Timestamp(v) => write!(f, "{v}"),
            Value::TimestampTz(v) => write!(f, "{v}"),
            Value::Date(v) => write!(f, "{v}"),
            Value::Time(v) => write!(f, "{v}"),
            Value::Json(v) => write!(f, "{v}"),
        }
    }
}

// ─── Rust -> Value ──────────────────────────────────────────────────────────

/// Conversion of a single Rust value into a [`Value`].
///
/// `u8` deliberately has no implementation: byte sequences (`[u8]`, `Vec<u8>`)
/// are scalar `bytea` values, never lists of small integers.
pub trait ToValue {
    fn to_value(&self) -> Value;
}

macro_rules! impl_to_value {
    ($($ty:ty => |$v:ident| $body:expr),* $(,)?) => {
        $(
            impl ToValue for $ty {
                fn to_value(&self) -> Value {
                    let $v = self;
                    $body
                }
            }
        )*
    };
}

impl_to_value! {
    Value => |v| v.clone(),
    bool => |v| Value::Bool(*v),
    i8 => |v| Value::I16(i16::from(*v)),
    i16 => |v| Value::I16(*v),
    i32 => |v| Value::I32(*v),
    i64 => |v| Value::I64(*v),
    u16 => |v| Value::I32(i32::from(*v)),
    u32 => |v| Value::I64(i64::from(*v)),
    f32 => |v| Value::F32(*v),
    f64 => |v| Value::F64(*v),
    str => |v| Value::Text(v.to_string()),
    String => |v| Value::Text(v.clone()),
    [u8] => |v| Value::Bytes(v.to_vec()),
    Vec<u8> => |v| Value::Bytes(v.clone()),
    bytes::Bytes => |v| Value::Bytes(v.to_vec()),
    Uuid => |v| Value::Uuid(*v),
    NaiveDateTime => |v| Value::Timestamp(*v),
    DateTime<Utc> => |v| Value::TimestampTz(*v),
    DateTime<FixedOffset> => |v| Value::TimestampTz(v.with_timezone(&Utc)),
    NaiveDate => |v| Value::Date(*v),
    NaiveTime => |v| Value::Time(*v),
    serde_json::Value => |v| json_to_value(v),
}

#[cfg(feature = "rust_decimal")]
impl ToValue for rust_decimal::Decimal {
    fn to_value(&self) -> Value {
        Value::Decimal(*self)
    }
}

impl<const N: usize> ToValue for [u8; N] {
    fn to_value(&self) -> Value {
        Value::Bytes(self.to_vec())
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
}

impl<T: ToValue + ?Sized> ToValue for &T {
    fn to_value(&self) -> Value {
        (**self).to_value()
    }
}

/// JSON primitives map onto their natural SQL counterpart; arrays and objects
/// stay JSON documents.
pub(crate) fn json_to_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => Value::I64(i),
            (None, Some(u)) => large_unsigned(u),
            (None, None) => n.as_f64().map_or_else(|| Value::Text(n.to_string()), Value::F64),
        },
        serde_json::Value::String(s) => Value::Text(s.clone()),
        other => Value::Json(other.clone()),
    }
}

/// Integers above `i64::MAX` keep every digit: `NUMERIC` when decimals are
/// available, text otherwise.
#[cfg(feature = "rust_decimal")]
fn large_unsigned(u: u64) -> Value {
    Value::Decimal(rust_decimal::Decimal::from(u))
}

#[cfg(not(feature = "rust_decimal"))]
fn large_unsigned(u: u64) -> Value {
    Value::Text(u.to_string())
}

// ─── Value -> Rust ──────────────────────────────────────────────────────────

/// A [`Value`] could not be converted into the requested Rust type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot convert {found} value to {expected}")]
pub struct ConversionError {
    pub expected: &'static str,
    pub found: &'static str,
}

impl ConversionError {
    fn new(expected: &'static str, value: &Value) -> Self {
        Self {
            expected,
            found: value.type_name(),
        }
    }
}

/// Conversion of a [`Value`] back into a Rust type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, ConversionError>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        Ok(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Bool(v) => Ok(*v),
            other => Err(ConversionError::new("bool", other)),
        }
    }
}

impl FromValue for i16 {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::I16(v) => Ok(*v),
            other => Err(ConversionError::new("i16", other)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::I16(v) => Ok(i32::from(*v)),
            Value::I32(v) => Ok(*v),
            other => Err(ConversionError::new("i32", other)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::I16(v) => Ok(i64::from(*v)),
            Value::I32(v) => Ok(i64::from(*v)),
            Value::I64(v) => Ok(*v),
            other => Err(ConversionError::new("i64", other)),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::F32(v) => Ok(*v),
            other => Err(ConversionError::new("f32", other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::F32(v) => Ok(f64::from(*v)),
            Value::F64(v) => Ok(*v),
            Value::I16(v) => Ok(f64::from(*v)),
            Value::I32(v) => Ok(f64::from(*v)),
            other => Err(ConversionError::new("f64", other)),
        }
    }
}

#[cfg(feature = "rust_decimal")]
impl FromValue for rust_decimal::Decimal {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Decimal(v) => Ok(*v),
            Value::I16(v) => Ok((*v).into()),
            Value::I32(v) => Ok((*v).into()),
            Value::I64(v) => Ok((*v).into()),
            other => Err(ConversionError::new("decimal", other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Text(v) => Ok(v.clone()),
            other => Err(ConversionError::new("text", other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Bytes(v) => Ok(v.clone()),
            other => Err(ConversionError::new("bytes", other)),
        }
    }
}

impl FromValue for Uuid {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Uuid(v) => Ok(*v),
            other => Err(ConversionError::new("uuid", other)),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Timestamp(v) => Ok(*v),
            Value::TimestampTz(v) => Ok(v.naive_utc()),
            Value::Date(v) => Ok(v.and_time(NaiveTime::MIN)),
            other => Err(ConversionError::new("timestamp", other)),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::TimestampTz(v) => Ok(*v),
            Value::Timestamp(v) => Ok(v.and_utc()),
            other => Err(ConversionError::new("timestamptz", other)),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Date(v) => Ok(*v),
            other => Err(ConversionError::new("date", other)),
        }
    }
}

impl FromValue for NaiveTime {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Time(v) => Ok(*v),
            other => Err(ConversionError::new("time", other)),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Json(v) => Ok(v.clone()),
            Value::Null => Ok(serde_json::Value::Null),
            Value::Bool(v) => Ok((*v).into()),
            Value::I16(v) => Ok((*v).into()),
            Value::I32(v) => Ok((*v).into()),
            Value::I64(v) => Ok((*v).into()),
            Value::Text(v) => Ok(v.clone().into()),
            other => Err(ConversionError::new("json", other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

// ─── Value -> Postgres ──────────────────────────────────────────────────────

type BoxError = Box<dyn Error + Sync + Send>;

fn int_to_sql(v: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(v)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(v)?.to_sql(ty, out),
        Type::INT8 => v.to_sql(ty, out),
        Type::OID => u32::try_from(v)?.to_sql(ty, out),
        Type::FLOAT4 => (v as f32).to_sql(ty, out),
        Type::FLOAT8 => (v as f64).to_sql(ty, out),
        #[cfg(feature = "rust_decimal")]
        Type::NUMERIC => rust_decimal::Decimal::from(v).to_sql(ty, out),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR => v.to_string().to_sql(ty, out),
        _ => v.to_sql_checked(ty, out),
    }
}

fn float_to_sql(v: f64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::FLOAT4 => (v as f32).to_sql(ty, out),
        Type::FLOAT8 => v.to_sql(ty, out),
        #[cfg(feature = "rust_decimal")]
        Type::NUMERIC => rust_decimal::Decimal::try_from(v)?.to_sql(ty, out),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR => v.to_string().to_sql(ty, out),
        _ => v.to_sql_checked(ty, out),
    }
}

fn text_to_sql(v: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::JSON | Type::JSONB => serde_json::from_str::<serde_json::Value>(v)?.to_sql(ty, out),
        Type::UUID => Uuid::parse_str(v)?.to_sql(ty, out),
        _ if matches!(ty.kind(), tokio_postgres::types::Kind::Enum(_)) => {
            out.extend_from_slice(v.as_bytes());
            Ok(IsNull::No)
        }
        _ => v.to_sql_checked(ty, out),
    }
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) => v.to_sql_checked(ty, out),
            Value::I16(v) => int_to_sql(i64::from(*v), ty, out),
            Value::I32(v) => int_to_sql(i64::from(*v), ty, out),
            Value::I64(v) => int_to_sql(*v, ty, out),
            Value::F32(v) => float_to_sql(f64::from(*v), ty, out),
            Value::F64(v) => float_to_sql(*v, ty, out),
            #[cfg(feature = "rust_decimal")]
            Value::Decimal(v) => v.to_sql_checked(ty, out),
            Value::Text(v) => text_to_sql(v, ty, out),
            Value::Bytes(v) => v.as_slice().to_sql_checked(ty, out),
            Value::Uuid(v) => match *ty {
                Type::TEXT | Type::VARCHAR => v.to_string().to_sql(ty, out),
                _ => v.to_sql_checked(ty, out),
            },
            Value::Timestamp(v) => match *ty {
                Type::TIMESTAMPTZ => Utc.from_utc_datetime(v).to_sql(ty, out),
                Type::DATE => v.date().to_sql(ty, out),
                _ => v.to_sql_checked(ty, out),
            },
            Value::TimestampTz(v) => match *ty {
                Type::TIMESTAMP => v.naive_utc().to_sql(ty, out),
                Type::DATE => v.date_naive().to_sql(ty, out),
                _ => v.to_sql_checked(ty, out),
            },
            Value::Date(v) => match *ty {
                Type::TIMESTAMP => v.and_time(NaiveTime::MIN).to_sql(ty, out),
                _ => v.to_sql_checked(ty, out),
            },
            Value::Time(v) => v.to_sql_checked(ty, out),
            Value::Json(v) => match *ty {
                Type::TEXT | Type::VARCHAR => v.to_string().to_sql(ty, out),
                _ => v.to_sql_checked(ty, out),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
