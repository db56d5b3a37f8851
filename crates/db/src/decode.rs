//! Row to JSON record conversion.
//!
//! Numbers, booleans and NULL keep their JSON type. Decimals, money, temporal
//! values, network addresses and UUIDs render as strings; binary data as
//! lowercase hex. A PostgreSQL type with no mapping is a decode error rather
//! than a guess.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Number, Value};
use sqlx::postgres::types::{Oid, PgInterval, PgMoney, PgTimeTz};
use sqlx::postgres::{PgRow, PgTypeInfo, PgTypeKind, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::types::ipnetwork::IpNetwork;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use uuid::Uuid;

use sqlgate_core::Record;

use crate::executor::ExecutionError;

const MICROS_PER_SECOND: i64 = 1_000_000;

pub fn pg_record(row: &PgRow) -> Result<Record, ExecutionError> {
    let mut record = Record::new();
    for column in row.columns() {
        let value = pg_value(row, column.ordinal(), column.type_info())
            .map_err(|source| ExecutionError::Decode { column: column.name().to_string(), source })?;
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

/// `declared` holds the schema declaration of each column, where SQLite has
/// one; sqlx's own column type is the fallback.
pub fn sqlite_record(row: &SqliteRow, declared: &[Option<String>]) -> Result<Record, ExecutionError> {
    let mut record = Record::new();
    for column in row.columns() {
        let declaration = declared
            .get(column.ordinal())
            .and_then(Option::as_deref)
            .unwrap_or_else(|| column.type_info().name());
        let value = sqlite_value(row, column.ordinal(), declaration)
            .map_err(|source| ExecutionError::Decode { column: column.name().to_string(), source })?;
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

fn pg_value(row: &PgRow, index: usize, type_info: &PgTypeInfo) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let type_info = base_type(type_info);
    if matches!(type_info.kind(), PgTypeKind::Enum(_)) {
        return raw_text(&raw);
    }
    let name = type_info.name();
    // Rows from a multi-command script arrive in text format. Types decoded
    // below only from binary are passed through as PostgreSQL prints them.
    let text_format = matches!(raw.format(), PgValueFormat::Text);
    if text_format && matches!(name, "INTERVAL" | "MONEY" | "INET" | "CIDR" | "TIMETZ" | "\"CHAR\"") {
        return raw_text(&raw);
    }

    // Dispatch is on the resolved type, so the compatibility check that would
    // reject domains is skipped.
    macro_rules! get {
        ($ty:ty) => {
            row.try_get_unchecked::<$ty, _>(index)?
        };
    }

    let value = match name {
        "BOOL" => Value::Bool(get!(bool)),
        "\"CHAR\"" => Value::String(char::from(get!(i8) as u8).to_string()),
        "INT2" => Value::from(get!(i16)),
        "INT4" => Value::from(get!(i32)),
        "INT8" => Value::from(get!(i64)),
        "OID" => Value::from(get!(Oid).0),
        "FLOAT4" => float(f64::from(get!(f32))),
        "FLOAT8" => float(get!(f64)),
        "NUMERIC" => Value::String(get!(Decimal).to_string()),
        "MONEY" => Value::String(get!(PgMoney).to_decimal(2).to_string()),
        "TEXT" | "VARCHAR" | "CHAR" | "NAME" | "UNKNOWN" | "citext" | "xml" => Value::String(get!(String)),
        "UUID" => Value::String(get!(Uuid).to_string()),
        "JSON" | "JSONB" => get!(Value),
        "DATE" => Value::String(get!(NaiveDate).to_string()),
        "TIME" => Value::String(get!(NaiveTime).to_string()),
        "TIMETZ" => {
            let time = get!(PgTimeTz<NaiveTime, FixedOffset>);
            Value::String(format!("{}{}", time.time, time.offset))
        }
        "TIMESTAMP" => Value::String(get!(NaiveDateTime).to_string()),
        "TIMESTAMPTZ" => Value::String(get!(DateTime<Utc>).format("%Y-%m-%d %H:%M:%S%.f%:z").to_string()),
        "INTERVAL" => Value::String(interval(&get!(PgInterval))),
        "BYTEA" => Value::String(hex::encode(get!(Vec<u8>))),
        "INET" => Value::String(inet(get!(IpNetwork))),
        "CIDR" => Value::String(get!(IpNetwork).to_string()),
        "VOID" => Value::Null,
        "BOOL[]" => array(get!(Vec<Option<bool>>), Value::Bool),
        "INT2[]" => array(get!(Vec<Option<i16>>), Value::from),
        "INT4[]" => array(get!(Vec<Option<i32>>), Value::from),
        "INT8[]" => array(get!(Vec<Option<i64>>), Value::from),
        "FLOAT4[]" => array(get!(Vec<Option<f32>>), |item| float(f64::from(item))),
        "FLOAT8[]" => array(get!(Vec<Option<f64>>), float),
        "NUMERIC[]" => array(get!(Vec<Option<Decimal>>), |item| Value::String(item.to_string())),
        "TEXT[]" | "VARCHAR[]" | "CHAR[]" | "NAME[]" => array(get!(Vec<Option<String>>), Value::String),
        "UUID[]" => array(get!(Vec<Option<Uuid>>), |item| Value::String(item.to_string())),
        "JSON[]" | "JSONB[]" => array(get!(Vec<Option<Value>>), |item| item),
        "DATE[]" => array(get!(Vec<Option<NaiveDate>>), |item| Value::String(item.to_string())),
        "TIME[]" => array(get!(Vec<Option<NaiveTime>>), |item| Value::String(item.to_string())),
        "TIMESTAMP[]" => array(get!(Vec<Option<NaiveDateTime>>), |item| Value::String(item.to_string())),
        "TIMESTAMPTZ[]" => array(get!(Vec<Option<DateTime<Utc>>>), |item| {
            Value::String(item.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string())
        }),
        _ if text_format => raw_text(&raw)?,
        other => {
            return Err(sqlx::Error::Decode(
                format!("unsupported column type {}", other.to_ascii_lowercase()).into(),
            ))
        }
    };

    Ok(value)
}

fn base_type(type_info: &PgTypeInfo) -> &PgTypeInfo {
    match type_info.kind() {
        PgTypeKind::Domain(base) => base_type(base),
        _ => type_info,
    }
}

fn raw_text(raw: &PgValueRef<'_>) -> Result<Value, sqlx::Error> {
    raw.as_str().map(|text| Value::String(text.to_string())).map_err(sqlx::Error::Decode)
}

/// Host addresses print without a prefix, as PostgreSQL prints them.
fn inet(network: IpNetwork) -> String {
    let host_prefix = if network.is_ipv4() { 32 } else { 128 };
    if network.prefix() == host_prefix {
        network.ip().to_string()
    } else {
        network.to_string()
    }
}

/// SQLite has no decimal storage class; columns declared `NUMERIC` or
/// `DECIMAL` hold INTEGER or REAL values and render them as strings.
fn sqlite_value(row: &SqliteRow, index: usize, declared: &str) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let stored = raw.type_info().name().to_string();
    let decimal = is_decimal_declaration(declared);

    let value = match stored.as_str() {
        "INTEGER" if declared.eq_ignore_ascii_case("BOOLEAN") || declared.eq_ignore_ascii_case("BOOL") => {
            Value::Bool(row.try_get_unchecked::<i64, _>(index)? != 0)
        }
        "BOOLEAN" => Value::Bool(row.try_get_unchecked::<i64, _>(index)? != 0),
        "INTEGER" if decimal => Value::String(row.try_get_unchecked::<i64, _>(index)?.to_string()),
        "REAL" if decimal => Value::String(row.try_get_unchecked::<f64, _>(index)?.to_string()),
        "INTEGER" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
        "REAL" => float(row.try_get_unchecked::<f64, _>(index)?),
        "BLOB" => Value::String(hex::encode(row.try_get_unchecked::<Vec<u8>, _>(index)?)),
        _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
    };

    Ok(value)
}

fn is_decimal_declaration(declared: &str) -> bool {
    let declared = declared.trim().to_ascii_uppercase();
    declared.starts_with("NUMERIC") || declared.starts_with("DECIMAL")
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or_else(|| Value::String(value.to_string()))
}

fn array<T>(items: Vec<Option<T>>, convert: impl Fn(T) -> Value) -> Value {
    Value::Array(items.into_iter().map(|item| item.map_or(Value::Null, &convert)).collect())
}

/// ISO 8601 duration, e.g. `P1Y2M3DT4H5M6.5S`. Components keep their own
/// sign, as PostgreSQL intervals do.
fn interval(interval: &PgInterval) -> String {
    let mut text = String::from("P");
    let (years, months) = (interval.months / 12, interval.months % 12);
    for (amount, unit) in [(i64::from(years), 'Y'), (i64::from(months), 'M'), (i64::from(interval.days), 'D')] {
        if amount != 0 {
            text.push_str(&format!("{amount}{unit}"));
        }
    }

    let micros = interval.microseconds;
    if micros != 0 {
        let hours = micros / (3600 * MICROS_PER_SECOND);
        let minutes = micros % (3600 * MICROS_PER_SECOND) / (60 * MICROS_PER_SECOND);
        let seconds = micros % (60 * MICROS_PER_SECOND);
        text.push('T');
        if hours != 0 {
            text.push_str(&format!("{hours}H"));
        }
        if minutes != 0 {
            text.push_str(&format!("{minutes}M"));
        }
        if seconds != 0 {
            text.push_str(&format!("{}S", seconds_text(seconds)));
        }
    }

    if text == "P" {
        text.push_str("T0S");
    }
    text
}

fn seconds_text(micros: i64) -> String {
    let sign = if micros < 0 { "-" } else { "" };
    let micros = micros.unsigned_abs();
    let whole = micros / MICROS_PER_SECOND.unsigned_abs();
    let fraction = micros % MICROS_PER_SECOND.unsigned_abs();
    if fraction == 0 {
        format!("{sign}{whole}")
    } else {
        let digits = format!("{fraction:06}");
        format!("{sign}{whole}.{}", digits.trim_end_matches('0'))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use sqlx::sqlite::SqliteConnection;
    use sqlx::{Connection, Executor};

    use sqlx::postgres::types::PgInterval;

    use super::{array, float, inet, interval, is_decimal_declaration, sqlite_record};
    use crate::declared::column_types;

    #[test]
    fn non_finite_floats_fall_back_to_strings() {
        assert_eq!(float(1.5), json!(1.5));
        assert_eq!(float(f64::NAN), json!("NaN"));
        assert_eq!(float(f64::INFINITY), json!("inf"));
    }

    #[test]
    fn arrays_keep_null_elements() {
        assert_eq!(array(vec![Some(1_i64), None, Some(3)], serde_json::Value::from), json!([1, null, 3]));
    }

    #[test]
    fn intervals_render_as_iso_8601_durations() {
        let day = PgInterval { months: 0, days: 1, microseconds: 0 };
        assert_eq!(interval(&day), "P1D");

        let mixed = PgInterval { months: 14, days: 3, microseconds: 4 * 3_600_000_000 + 5 * 60_000_000 + 6_500_000 };
        assert_eq!(interval(&mixed), "P1Y2M3DT4H5M6.5S");

        let negative = PgInterval { months: 0, days: -2, microseconds: -90_000_000 };
        assert_eq!(interval(&negative), "P-2DT-1M-30S");

        let zero = PgInterval { months: 0, days: 0, microseconds: 0 };
        assert_eq!(interval(&zero), "PT0S");
    }

    #[test]
    fn host_addresses_drop_the_full_prefix() {
        let host: sqlx::types::ipnetwork::IpNetwork = "10.0.0.7/32".parse().expect("inet");
        assert_eq!(inet(host), "10.0.0.7");

        let subnet: sqlx::types::ipnetwork::IpNetwork = "10.0.0.0/24".parse().expect("cidr");
        assert_eq!(inet(subnet), "10.0.0.0/24");
    }

    #[test]
    fn decimal_declarations_are_recognised() {
        assert!(is_decimal_declaration("NUMERIC"));
        assert!(is_decimal_declaration("decimal(10, 2)"));
        assert!(!is_decimal_declaration("REAL"));
        assert!(!is_decimal_declaration("INTEGER"));
    }

    #[tokio::test]
    async fn sqlite_rows_map_storage_classes() {
        let mut connection = SqliteConnection::connect("sqlite::memory:").await.expect("connect");
        connection
            .execute(
                "CREATE TABLE sample (id INTEGER, active BOOLEAN, price NUMERIC, \
                 label TEXT, payload BLOB, placed_at DATETIME, missing TEXT)",
            )
            .await
            .expect("create");
        connection
            .execute(
                "INSERT INTO sample VALUES (7, 1, 19.99, 'mug', x'cafe', '2024-05-01 10:30:00', NULL)",
            )
            .await
            .expect("insert");

        let declared = column_types(&mut connection, "SELECT * FROM sample").await.expect("declared");
        let row = sqlx::query("SELECT * FROM sample").fetch_one(&mut connection).await.expect("row");
        let record = sqlite_record(&row, &declared).expect("decode");

        assert_eq!(
            serde_json::Value::Object(record),
            json!({
                "id": 7,
                "active": true,
                "price": "19.99",
                "label": "mug",
                "payload": "cafe",
                "placed_at": "2024-05-01 10:30:00",
                "missing": null
            })
        );
    }
}
