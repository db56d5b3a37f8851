//! Converts bind values into the parameter types PostgreSQL inferred when it
//! prepared the statement.
//!
//! Statements are prepared without declared parameter types, so the server
//! decides what each `$N` is from context (`WHERE id = $1` makes `$1` an
//! integer if `id` is one). Every value is then encoded as exactly that type.
//! The cached statement and the bound arguments can never disagree, whatever
//! JSON kind a later request sends for the same text.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgTypeInfo, PgTypeKind, Postgres};
use sqlx::query::Query;
use sqlx::types::ipnetwork::IpNetwork;
use sqlx::TypeInfo;
use uuid::Uuid;

use crate::params::{BindError, BindValue, BoundStatement};

/// One argument, already in the Rust type matching its parameter. `None` is
/// SQL NULL of that type.
#[derive(Clone, Debug, PartialEq)]
pub enum PgParam {
    Bool(Option<bool>),
    Int2(Option<i16>),
    Int4(Option<i32>),
    Int8(Option<i64>),
    Float4(Option<f32>),
    Float8(Option<f64>),
    Numeric(Option<Decimal>),
    Text(Option<String>),
    Uuid(Option<Uuid>),
    Json(Option<Value>),
    Date(Option<NaiveDate>),
    Time(Option<NaiveTime>),
    Timestamp(Option<NaiveDateTime>),
    Timestamptz(Option<DateTime<Utc>>),
    Bytea(Option<Vec<u8>>),
    Inet(Option<IpNetwork>),
    BoolArray(Option<Vec<Option<bool>>>),
    Int2Array(Option<Vec<Option<i16>>>),
    Int4Array(Option<Vec<Option<i32>>>),
    Int8Array(Option<Vec<Option<i64>>>),
    Float8Array(Option<Vec<Option<f64>>>),
    NumericArray(Option<Vec<Option<Decimal>>>),
    TextArray(Option<Vec<Option<String>>>),
    UuidArray(Option<Vec<Option<Uuid>>>),
    DateArray(Option<Vec<Option<NaiveDate>>>),
    TimestampArray(Option<Vec<Option<NaiveDateTime>>>),
    TimestamptzArray(Option<Vec<Option<DateTime<Utc>>>>),
}

impl PgParam {
    pub fn bind_to<'q>(
        self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        match self {
            Self::Bool(value) => query.bind(value),
            Self::Int2(value) => query.bind(value),
            Self::Int4(value) => query.bind(value),
            Self::Int8(value) => query.bind(value),
            Self::Float4(value) => query.bind(value),
            Self::Float8(value) => query.bind(value),
            Self::Numeric(value) => query.bind(value),
            Self::Text(value) => query.bind(value),
            Self::Uuid(value) => query.bind(value),
            Self::Json(value) => query.bind(value),
            Self::Date(value) => query.bind(value),
            Self::Time(value) => query.bind(value),
            Self::Timestamp(value) => query.bind(value),
            Self::Timestamptz(value) => query.bind(value),
            Self::Bytea(value) => query.bind(value),
            Self::Inet(value) => query.bind(value),
            Self::BoolArray(value) => query.bind(value),
            Self::Int2Array(value) => query.bind(value),
            Self::Int4Array(value) => query.bind(value),
            Self::Int8Array(value) => query.bind(value),
            Self::Float8Array(value) => query.bind(value),
            Self::NumericArray(value) => query.bind(value),
            Self::TextArray(value) => query.bind(value),
            Self::UuidArray(value) => query.bind(value),
            Self::DateArray(value) => query.bind(value),
            Self::TimestampArray(value) => query.bind(value),
            Self::TimestamptzArray(value) => query.bind(value),
        }
    }
}

/// Pairs every bound value with the parameter type at the same position.
pub fn coerce_all(bound: &BoundStatement, types: &[PgTypeInfo]) -> Result<Vec<PgParam>, BindError> {
    if types.len() != bound.values.len() {
        return Err(BindError::ParameterCount {
            expected: types.len(),
            supplied: bound.values.len(),
        });
    }

    bound
        .values
        .iter()
        .zip(types)
        .enumerate()
        .map(|(position, (value, type_info))| coerce(bound.name(position), value, type_info))
        .collect()
}

pub fn coerce(name: &str, value: &BindValue, type_info: &PgTypeInfo) -> Result<PgParam, BindError> {
    match type_info.kind() {
        PgTypeKind::Domain(base) => return coerce(name, value, base),
        // Enum labels travel as their text in the binary protocol too.
        PgTypeKind::Enum(_) => {
            return scalar(name, value, type_info.name(), |value| match value {
                BindValue::Text(text) => Some(text.clone()),
                _ => None,
            })
            .map(PgParam::Text);
        }
        _ => {}
    }

    let label = type_info.name();
    let param = match label {
        "BOOL" => PgParam::Bool(scalar(name, value, label, to_bool)?),
        "INT2" => PgParam::Int2(scalar(name, value, label, |v| narrow(to_int(v)))?),
        "INT4" => PgParam::Int4(scalar(name, value, label, |v| narrow(to_int(v)))?),
        "INT8" => PgParam::Int8(scalar(name, value, label, to_int)?),
        "FLOAT4" => PgParam::Float4(scalar(name, value, label, |v| to_float(v).map(|f| f as f32))?),
        "FLOAT8" => PgParam::Float8(scalar(name, value, label, to_float)?),
        "NUMERIC" => PgParam::Numeric(scalar(name, value, label, to_decimal)?),
        "TEXT" | "VARCHAR" | "CHAR" | "NAME" | "UNKNOWN" | "citext" => {
            PgParam::Text(scalar(name, value, label, to_text)?)
        }
        "UUID" => PgParam::Uuid(scalar(name, value, label, to_uuid)?),
        "JSON" | "JSONB" => PgParam::Json(scalar(name, value, label, to_json)?),
        "DATE" => PgParam::Date(scalar(name, value, label, to_date)?),
        "TIME" => PgParam::Time(scalar(name, value, label, to_time)?),
        "TIMESTAMP" => PgParam::Timestamp(scalar(name, value, label, to_timestamp)?),
        "TIMESTAMPTZ" => PgParam::Timestamptz(scalar(name, value, label, to_timestamptz)?),
        "BYTEA" => PgParam::Bytea(scalar(name, value, label, to_bytes)?),
        "INET" | "CIDR" => PgParam::Inet(scalar(name, value, label, to_network)?),
        "BOOL[]" => PgParam::BoolArray(array(name, value, label, to_bool)?),
        "INT2[]" => PgParam::Int2Array(array(name, value, label, |v| narrow(to_int(v)))?),
        "INT4[]" => PgParam::Int4Array(array(name, value, label, |v| narrow(to_int(v)))?),
        "INT8[]" => PgParam::Int8Array(array(name, value, label, to_int)?),
        "FLOAT8[]" => PgParam::Float8Array(array(name, value, label, to_float)?),
        "NUMERIC[]" => PgParam::NumericArray(array(name, value, label, to_decimal)?),
        "TEXT[]" | "VARCHAR[]" | "CHAR[]" => PgParam::TextArray(array(name, value, label, to_text)?),
        "UUID[]" => PgParam::UuidArray(array(name, value, label, to_uuid)?),
        "DATE[]" => PgParam::DateArray(array(name, value, label, to_date)?),
        "TIMESTAMP[]" => PgParam::TimestampArray(array(name, value, label, to_timestamp)?),
        "TIMESTAMPTZ[]" => PgParam::TimestamptzArray(array(name, value, label, to_timestamptz)?),
        other => {
            return Err(unsupported(
                name,
                format!(
                    "parameters of type {} cannot be bound; cast the placeholder to text, \
                     for example `:{name}::text::{}`",
                    other.to_ascii_lowercase(),
                    other.to_ascii_lowercase()
                ),
            ))
        }
    };
    Ok(param)
}

fn scalar<T>(
    name: &str,
    value: &BindValue,
    label: &str,
    convert: impl Fn(&BindValue) -> Option<T>,
) -> Result<Option<T>, BindError> {
    if matches!(value, BindValue::Null) {
        return Ok(None);
    }
    convert(value).map(Some).ok_or_else(|| mismatch(name, value, label))
}

/// Arrays arrive as JSON arrays; each element converts like a scalar.
fn array<T>(
    name: &str,
    value: &BindValue,
    label: &str,
    convert: impl Fn(&BindValue) -> Option<T>,
) -> Result<Option<Vec<Option<T>>>, BindError> {
    let items = match value {
        BindValue::Null => return Ok(None),
        BindValue::Json(Value::Array(items)) => items,
        other => return Err(mismatch(name, other, label)),
    };

    items
        .iter()
        .map(|item| {
            let element = BindValue::from_json(name, item)?;
            scalar(name, &element, label, &convert)
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

fn mismatch(name: &str, value: &BindValue, label: &str) -> BindError {
    let kind = match value {
        BindValue::Null => "null".to_string(),
        BindValue::Bool(flag) => format!("boolean {flag}"),
        BindValue::Int(int) => format!("integer {int}"),
        BindValue::Float(float) => format!("number {float}"),
        BindValue::Text(text) => format!("string {text:?}"),
        BindValue::Json(json) => format!("JSON value {json}"),
    };
    unsupported(name, format!("{kind} cannot be used as {}", label.to_ascii_lowercase()))
}

fn unsupported(name: &str, reason: String) -> BindError {
    BindError::UnsupportedValue { name: name.to_string(), reason }
}

fn to_bool(value: &BindValue) -> Option<bool> {
    match value {
        BindValue::Bool(flag) => Some(*flag),
        BindValue::Int(0) => Some(false),
        BindValue::Int(1) => Some(true),
        BindValue::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "on" | "1" => Some(true),
            "false" | "f" | "no" | "n" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn to_int(value: &BindValue) -> Option<i64> {
    match value {
        BindValue::Int(int) => Some(*int),
        BindValue::Float(float) if float.fract() == 0.0 && float.abs() < i64::MAX as f64 => {
            Some(*float as i64)
        }
        BindValue::Text(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn narrow<T: TryFrom<i64>>(int: Option<i64>) -> Option<T> {
    int.and_then(|int| T::try_from(int).ok())
}

fn to_float(value: &BindValue) -> Option<f64> {
    match value {
        BindValue::Int(int) => Some(*int as f64),
        BindValue::Float(float) => Some(*float),
        BindValue::Text(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Floats go through their shortest decimal rendering, so `19.99` stays
/// `19.99` rather than the nearest binary fraction.
fn to_decimal(value: &BindValue) -> Option<Decimal> {
    match value {
        BindValue::Int(int) => Some(Decimal::from(*int)),
        BindValue::Float(float) => Decimal::from_str(&float.to_string()).ok(),
        BindValue::Text(text) => {
            let text = text.trim();
            Decimal::from_str(text).or_else(|_| Decimal::from_scientific(text)).ok()
        }
        _ => None,
    }
}

fn to_text(value: &BindValue) -> Option<String> {
    match value {
        BindValue::Text(text) => Some(text.clone()),
        BindValue::Int(int) => Some(int.to_string()),
        BindValue::Float(float) => Some(float.to_string()),
        BindValue::Bool(flag) => Some(flag.to_string()),
        BindValue::Json(json) => Some(json.to_string()),
        BindValue::Null => None,
    }
}

fn to_uuid(value: &BindValue) -> Option<Uuid> {
    match value {
        BindValue::Text(text) => Uuid::parse_str(text.trim()).ok(),
        _ => None,
    }
}

/// Strings holding JSON documents are parsed; any other string is a JSON
/// string.
fn to_json(value: &BindValue) -> Option<Value> {
    match value {
        BindValue::Json(json) => Some(json.clone()),
        BindValue::Bool(flag) => Some(Value::Bool(*flag)),
        BindValue::Int(int) => Some(Value::from(*int)),
        BindValue::Float(float) => serde_json::Number::from_f64(*float).map(Value::Number),
        BindValue::Text(text) => {
            Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone())))
        }
        BindValue::Null => None,
    }
}

fn to_date(value: &BindValue) -> Option<NaiveDate> {
    match value {
        BindValue::Text(text) => NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok(),
        _ => None,
    }
}

fn to_time(value: &BindValue) -> Option<NaiveTime> {
    match value {
        BindValue::Text(text) => {
            let text = text.trim();
            NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
                .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
                .ok()
        }
        _ => None,
    }
}

const TIMESTAMP_FORMATS: [&str; 4] =
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"];

fn to_timestamp(value: &BindValue) -> Option<NaiveDateTime> {
    let BindValue::Text(text) = value else {
        return None;
    };
    let text = text.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| to_date(value).and_then(|date| date.and_hms_opt(0, 0, 0)))
}

/// Offsets are honoured; a timestamp without one is taken as UTC.
fn to_timestamptz(value: &BindValue) -> Option<DateTime<Utc>> {
    let BindValue::Text(text) = value else {
        return None;
    };
    let text = text.trim();
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .map(|stamp| stamp.with_timezone(&Utc))
        .ok()
        .or_else(|| to_timestamp(value).map(|naive| naive.and_utc()))
}

fn to_network(value: &BindValue) -> Option<IpNetwork> {
    match value {
        BindValue::Text(text) => IpNetwork::from_str(text.trim()).ok(),
        _ => None,
    }
}

/// Hex text, with or without PostgreSQL's `\x` prefix.
fn to_bytes(value: &BindValue) -> Option<Vec<u8>> {
    match value {
        BindValue::Text(text) => {
            let text = text.trim();
            hex::decode(text.strip_prefix("\\x").unwrap_or(text)).ok()
        }
        _ => None,
    }
}
