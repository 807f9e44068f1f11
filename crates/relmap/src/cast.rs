//! Column casts.
//!
//! A cast tag names the business type of a column. `get` converts the stored
//! representation into the business value handed to callers, `set` converts a
//! business value into the stored representation. A `?` prefix makes the cast
//! nullable: NULL then passes through untouched.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use relmap_core::{CastError, Error, Result, TypeError, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    Int,
    Float,
    Bool,
    String,
    Date,
    Json,
    JsonAssoc,
}

/// A parsed cast tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cast {
    kind: CastKind,
    nullable: bool,
}

impl Cast {
    pub const fn new(kind: CastKind, nullable: bool) -> Self {
        Self { kind, nullable }
    }

    pub const fn kind(self) -> CastKind {
        self.kind
    }

    pub const fn is_nullable(self) -> bool {
        self.nullable
    }

    /// Stored representation → business value.
    pub fn get(self, value: Value, date_format: &str) -> Result<Value> {
        if self.nullable && value.is_null() {
            return Ok(Value::Null);
        }
        match self.kind {
            CastKind::Int => Ok(Value::Int(to_int(&value))),
            CastKind::Float => Ok(Value::Float(to_float(&value))),
            CastKind::Bool => Ok(Value::Bool(to_bool(&value))),
            CastKind::String => Ok(Value::Text(to_text(&value))),
            CastKind::Date => match value {
                Value::Null => Ok(Value::Null),
                other => {
                    let date = to_datetime(&other, date_format)?;
                    Ok(Value::Text(date.format(date_format).to_string()))
                }
            },
            CastKind::Json | CastKind::JsonAssoc => match value {
                Value::Text(text) => Ok(Value::Text(text)),
                other => Ok(Value::Text(serde_json::to_string(&other.to_json())?)),
            },
        }
    }

    /// Business value → stored representation.
    pub fn set(self, value: Value, date_format: &str) -> Result<Value> {
        if self.nullable && value.is_null() {
            return Ok(Value::Null);
        }
        match self.kind {
            CastKind::Int => Ok(Value::Int(to_int(&value))),
            CastKind::Float => Ok(Value::Float(to_float(&value))),
            CastKind::Bool => Ok(Value::Bool(to_bool(&value))),
            CastKind::String => Ok(Value::Text(to_text(&value))),
            CastKind::Date => match value {
                Value::Null => Ok(Value::Null),
                other => Ok(Value::Timestamp(
                    to_datetime(&other, date_format)?.timestamp_micros(),
                )),
            },
            CastKind::Json | CastKind::JsonAssoc => match value {
                Value::Text(text) => Ok(Value::Json(serde_json::from_str(&text)?)),
                Value::Json(json) => Ok(Value::Json(json)),
                Value::Null => Ok(Value::Null),
                other => Ok(Value::Json(other.to_json())),
            },
        }
    }
}

impl FromStr for Cast {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        let (nullable, name) = match tag.strip_prefix('?') {
            Some(rest) => (true, rest),
            None => (false, tag),
        };
        let kind = match name {
            "int" | "integer" => CastKind::Int,
            "float" | "double" => CastKind::Float,
            "bool" | "boolean" => CastKind::Bool,
            "string" => CastKind::String,
            "date" => CastKind::Date,
            "json" => CastKind::Json,
            "json-assoc" => CastKind::JsonAssoc,
            _ => {
                return Err(Error::Cast(CastError {
                    tag: tag.to_string(),
                }));
            }
        };
        Ok(Cast { kind, nullable })
    }
}

impl fmt::Display for Cast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.kind {
            CastKind::Int => "int",
            CastKind::Float => "float",
            CastKind::Bool => "bool",
            CastKind::String => "string",
            CastKind::Date => "date",
            CastKind::Json => "json",
            CastKind::JsonAssoc => "json-assoc",
        };
        if self.nullable {
            write!(f, "?{name}")
        } else {
            f.write_str(name)
        }
    }
}

/// The current time as a stored timestamp.
pub fn now() -> Value {
    Value::Timestamp(Utc::now().timestamp_micros())
}

fn to_int(value: &Value) -> i64 {
    match value {
        Value::Null => 0,
        Value::Bool(b) => i64::from(*b),
        Value::Int(n) | Value::Timestamp(n) => *n,
        Value::Float(f) => *f as i64,
        Value::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .or_else(|_| s.parse::<f64>().map(|f| f as i64))
                .unwrap_or(0)
        }
        Value::Bytes(_) | Value::Json(_) => i64::from(to_bool(value)),
    }
}

fn to_float(value: &Value) -> f64 {
    match value {
        Value::Float(f) => *f,
        Value::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        other => to_int(other) as f64,
    }
}

fn to_bool(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(n) | Value::Timestamp(n) => *n != 0,
        Value::Float(f) => *f != 0.0,
        Value::Text(s) => !(s.is_empty() || s == "0"),
        Value::Bytes(b) => !b.is_empty(),
        Value::Json(json) => match json {
            serde_json::Value::Null => false,
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::Array(items) => !items.is_empty(),
            serde_json::Value::Object(map) => !map.is_empty(),
            _ => true,
        },
    }
}

fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => String::new(),
        Value::Text(s) => s.clone(),
        Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        other => other.to_string(),
    }
}

fn to_datetime(value: &Value, date_format: &str) -> Result<DateTime<Utc>> {
    let invalid = || {
        Error::Type(TypeError {
            expected: "date",
            actual: value.to_string(),
            column: None,
        })
    };
    match value {
        Value::Timestamp(micros) => DateTime::from_timestamp_micros(*micros).ok_or_else(invalid),
        Value::Int(seconds) => DateTime::from_timestamp(*seconds, 0).ok_or_else(invalid),
        Value::Text(text) => parse_date(text, date_format).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Parse `text` with the manager's format, falling back to a bare date and RFC 3339.
fn parse_date(text: &str, date_format: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, date_format) {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, date_format) {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}
