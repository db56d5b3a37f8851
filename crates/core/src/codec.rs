//! Wire shapes for `execute_query`.
//!
//! A response is exactly one of:
//! - a JSON array of row objects (`RowSet`);
//! - `{"status": "success", "rows_affected": N}` (`MutationAck`);
//! - `{"error": "<message>"}` (`Failure`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One result row: column name to value, in result-column order.
pub type Record = Map<String, Value>;

/// Named values bound to the statement's placeholders.
pub type Parameters = Map<String, Value>;

pub const CONNECTION_UNAVAILABLE: &str = "Database connection is not available.";

/// Prefix that separates failures raised by the gateway itself from errors
/// reported by the database.
pub const UNEXPECTED_ERROR_PREFIX: &str = "An unexpected error occurred: ";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub statement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Parameters>,
}

impl QueryRequest {
    pub fn new(statement: impl Into<String>) -> Self {
        Self { statement: statement.into(), parameters: None }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.get_or_insert_with(Map::new).insert(name.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueryOutcome {
    RowSet(Vec<Record>),
    MutationAck { rows_affected: u64 },
    Failure(String),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("response is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response does not match any known result shape")]
    UnknownShape,
}

#[derive(Serialize)]
struct MutationWire<'a> {
    status: &'a str,
    rows_affected: u64,
}

#[derive(Serialize)]
struct FailureWire<'a> {
    error: &'a str,
}

impl QueryOutcome {
    pub fn unavailable() -> Self {
        Self::Failure(CONNECTION_UNAVAILABLE.to_string())
    }

    pub fn unexpected(detail: impl std::fmt::Display) -> Self {
        Self::Failure(format!("{UNEXPECTED_ERROR_PREFIX}{detail}"))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    pub fn to_value(&self) -> Value {
        let encoded = match self {
            Self::RowSet(rows) => serde_json::to_value(rows),
            Self::MutationAck { rows_affected } => {
                serde_json::to_value(MutationWire { status: "success", rows_affected: *rows_affected })
            }
            Self::Failure(message) => serde_json::to_value(FailureWire { error: message }),
        };
        // Maps of `Value`s and plain structs always serialize.
        encoded.unwrap_or(Value::Null)
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(record) => Ok(record),
                    _ => Err(CodecError::UnknownShape),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Self::RowSet),
            Value::Object(mut object) => {
                if let Some(Value::String(message)) = object.remove("error") {
                    return Ok(Self::Failure(message));
                }
                let is_success = object.get("status").and_then(Value::as_str) == Some("success");
                match object.get("rows_affected").and_then(Value::as_u64) {
                    Some(rows_affected) if is_success => Ok(Self::MutationAck { rows_affected }),
                    _ => Err(CodecError::UnknownShape),
                }
            }
            _ => Err(CodecError::UnknownShape),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, CodecError> {
        Self::from_value(serde_json::from_str(raw)?)
    }
}
