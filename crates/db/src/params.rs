//! Named placeholder binding.
//!
//! Statements may reference parameters as `:name` or `%(name)s`. Both forms are
//! rewritten to positional `$N` markers, which PostgreSQL and SQLite both
//! accept, and the values are returned in marker order. A name used twice maps
//! to the same marker. String literals, quoted identifiers, dollar-quoted
//! bodies, comments and `::` casts are copied through untouched.

use serde_json::Value;
use thiserror::Error;

use sqlgate_core::Parameters;

#[derive(Clone, Debug, PartialEq)]
pub enum BindValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(Value),
}

#[derive(Clone, Debug, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub values: Vec<BindValue>,
    /// Parameter name behind each `$N` marker, in marker order.
    pub names: Vec<String>,
}

impl BoundStatement {
    /// The name bound to the zero-based marker `position`.
    pub fn name(&self, position: usize) -> &str {
        self.names.get(position).map_or("?", String::as_str)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BindError {
    #[error("missing value for parameter `{0}`")]
    MissingParameter(String),
    #[error("unsupported value for parameter `{name}`: {reason}")]
    UnsupportedValue { name: String, reason: String },
    #[error("statement expects {expected} parameters but {supplied} were supplied")]
    ParameterCount { expected: usize, supplied: usize },
}

impl BindValue {
    pub(crate) fn from_json(name: &str, value: &Value) -> Result<Self, BindError> {
        match value {
            Value::Null => Ok(Self::Null),
            Value::Bool(flag) => Ok(Self::Bool(*flag)),
            Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    Ok(Self::Int(int))
                } else if number.is_u64() {
                    Err(BindError::UnsupportedValue {
                        name: name.to_string(),
                        reason: format!("{number} does not fit in a signed 64-bit integer"),
                    })
                } else {
                    number.as_f64().map(Self::Float).ok_or_else(|| BindError::UnsupportedValue {
                        name: name.to_string(),
                        reason: format!("{number} is not representable as a float"),
                    })
                }
            }
            Value::String(text) => Ok(Self::Text(text.clone())),
            Value::Array(_) | Value::Object(_) => Ok(Self::Json(value.clone())),
        }
    }
}

/// Without parameters the statement is returned verbatim.
pub fn bind(statement: &str, parameters: Option<&Parameters>) -> Result<BoundStatement, BindError> {
    let Some(parameters) = parameters else {
        return Ok(BoundStatement {
            sql: statement.to_string(),
            values: Vec::new(),
            names: Vec::new(),
        });
    };

    let bytes = statement.as_bytes();
    let mut sql = String::with_capacity(statement.len());
    let mut names: Vec<&str> = Vec::new();
    let mut index = 0;

    while index < bytes.len() {
        if let Some(span) = skipped_span(bytes, index) {
            let end = span.end();
            sql.push_str(&statement[index..end]);
            index = end;
            continue;
        }

        let next = bytes.get(index + 1).copied();
        match bytes[index] {
            b':' if next == Some(b':') => {
                sql.push_str("::");
                index += 2;
            }
            b':' if next.is_some_and(is_identifier_start) => {
                let end = identifier_end(bytes, index + 1);
                push_marker(&mut sql, &mut names, &statement[index + 1..end]);
                index = end;
            }
            b'%' if next == Some(b'(') => match pyformat_end(bytes, index + 2) {
                Some((name_end, end)) => {
                    push_marker(&mut sql, &mut names, &statement[index + 2..name_end]);
                    index = end;
                }
                None => {
                    sql.push('%');
                    index += 1;
                }
            },
            _ => {
                let ch = statement[index..].chars().next().unwrap_or_default();
                sql.push(ch);
                index += ch.len_utf8().max(1);
            }
        }
    }

    let values = names
        .iter()
        .map(|name| {
            parameters
                .get(*name)
                .ok_or_else(|| BindError::MissingParameter((*name).to_string()))
                .and_then(|value| BindValue::from_json(name, value))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let names = names.into_iter().map(str::to_string).collect();

    Ok(BoundStatement { sql, values, names })
}

/// True when `statement` holds more than one command, ignoring separators
/// inside literals and comments and a trailing `;`.
pub fn has_multiple_statements(statement: &str) -> bool {
    let bytes = statement.as_bytes();
    let mut terminated = false;
    let mut index = 0;

    while index < bytes.len() {
        match skipped_span(bytes, index) {
            Some(Span::Comment(end)) => index = end,
            Some(Span::Literal(end)) => {
                if terminated {
                    return true;
                }
                index = end;
            }
            None => {
                let byte = bytes[index];
                if byte == b';' {
                    terminated = true;
                } else if terminated && !byte.is_ascii_whitespace() {
                    return true;
                }
                index += 1;
            }
        }
    }
    false
}

/// Text the scanners copy or skip without looking inside; holds the end offset.
enum Span {
    Literal(usize),
    Comment(usize),
}

impl Span {
    fn end(&self) -> usize {
        match self {
            Self::Literal(end) | Self::Comment(end) => *end,
        }
    }
}

fn skipped_span(bytes: &[u8], index: usize) -> Option<Span> {
    let next = bytes.get(index + 1).copied();
    match bytes[index] {
        quote @ (b'\'' | b'"') => Some(Span::Literal(quoted_end(bytes, index, quote))),
        b'-' if next == Some(b'-') => {
            Some(Span::Comment(find_from(bytes, index, b"\n").map_or(bytes.len(), |at| at + 1)))
        }
        b'/' if next == Some(b'*') => {
            Some(Span::Comment(find_from(bytes, index + 2, b"*/").map_or(bytes.len(), |at| at + 2)))
        }
        b'$' => dollar_quoted_end(bytes, index).map(Span::Literal),
        _ => None,
    }
}

/// `$tag$ ... $tag$` bodies, including the empty tag. `$1` is a positional
/// parameter and `a$b` part of an identifier, so neither opens a body.
fn dollar_quoted_end(bytes: &[u8], start: usize) -> Option<usize> {
    let inside_identifier = start > 0
        && (bytes[start - 1].is_ascii_alphanumeric() || matches!(bytes[start - 1], b'_' | b'$'));
    if inside_identifier || bytes.get(start + 1).is_some_and(u8::is_ascii_digit) {
        return None;
    }

    let tag_end = identifier_end(bytes, start + 1);
    if bytes.get(tag_end) != Some(&b'$') {
        return None;
    }
    let tag = &bytes[start..=tag_end];
    Some(find_from(bytes, tag_end + 1, tag).map_or(bytes.len(), |at| at + tag.len()))
}

fn push_marker<'a>(sql: &mut String, names: &mut Vec<&'a str>, name: &'a str) {
    let position = match names.iter().position(|known| *known == name) {
        Some(position) => position,
        None => {
            names.push(name);
            names.len() - 1
        }
    };
    sql.push('$');
    sql.push_str(&(position + 1).to_string());
}

fn is_identifier_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

fn identifier_end(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|byte| !(byte.is_ascii_alphanumeric() || *byte == b'_'))
        .map_or(bytes.len(), |offset| start + offset)
}

/// `%(name)s`: returns the end of the name and the end of the whole marker.
fn pyformat_end(bytes: &[u8], name_start: usize) -> Option<(usize, usize)> {
    let name_end = identifier_end(bytes, name_start);
    let well_formed = name_end > name_start
        && bytes.get(name_end) == Some(&b')')
        && bytes.get(name_end + 1) == Some(&b's');
    well_formed.then_some((name_end, name_end + 2))
}

/// Doubled quotes inside a literal are escapes, not terminators.
fn quoted_end(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut index = start + 1;
    while index < bytes.len() {
        if bytes[index] == quote {
            if bytes.get(index + 1) == Some(&quote) {
                index += 2;
                continue;
            }
            return index + 1;
        }
        index += 1;
    }
    bytes.len()
}

fn find_from(bytes: &[u8], start: usize, needle: &[u8]) -> Option<usize> {
    bytes
        .get(start..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| start + offset)
}
