//! Scalar values bound into statements and read back from rows, and the semantic column types
//! used to cast DSL literals.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use compact_str::{CompactString, ToCompactString};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::row::Row;

// =============================================================================
// ColumnType
// =============================================================================

/// Semantic type of a column, used to cast literals before binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Numeric,
    Text,
    Boolean,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
    Jsonb,
}

impl ColumnType {
    pub const fn is_textual(self) -> bool {
        matches!(self, ColumnType::Text)
    }

    /// Casts a DSL literal to a bindable value of this type.
    ///
    /// The error is a human-readable reason; callers attach the input location.
    pub fn parse_literal(self, raw: &str) -> Result<Value, String> {
        let fail = |reason: &dyn fmt::Display| format!("cannot read `{raw}` as {self}: {reason}");
        match self {
            ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt => raw
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| fail(&e)),
            ColumnType::Real | ColumnType::Double => raw
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| fail(&e)),
            ColumnType::Numeric => Decimal::from_str(raw.trim())
                .map(Value::Numeric)
                .map_err(|e| fail(&e)),
            ColumnType::Text => Ok(Value::Text(raw.to_owned())),
            ColumnType::Boolean => {
                let raw = raw.trim();
                Ok(Value::Bool(raw.eq_ignore_ascii_case("true") || raw == "1"))
            }
            ColumnType::Date => parse_date(raw).map(Value::Date).ok_or_else(|| {
                fail(&"expected YYYY-MM-DD")
            }),
            ColumnType::Time => parse_time(raw)
                .map(Value::Time)
                .ok_or_else(|| fail(&"expected HH:MM[:SS]")),
            ColumnType::Timestamp => parse_timestamp(raw)
                .map(Value::Timestamp)
                .ok_or_else(|| fail(&"expected an ISO-8601 timestamp")),
            ColumnType::TimestampTz => parse_timestamp_tz(raw)
                .map(Value::TimestampTz)
                .ok_or_else(|| fail(&"expected an ISO-8601 timestamp")),
            ColumnType::Uuid => Uuid::parse_str(raw.trim())
                .map(Value::Uuid)
                .map_err(|e| fail(&e)),
            ColumnType::Json | ColumnType::Jsonb => serde_json::from_str(raw)
                .map(Value::Json)
                .map_err(|e| fail(&e)),
        }
    }

    /// SQL type name used in `CAST(... AS <name>)`.
    pub const fn sql_name(self) -> &'static str {
        match self {
            ColumnType::SmallInt => "smallint",
            ColumnType::Integer => "integer",
            ColumnType::BigInt => "bigint",
            ColumnType::Real => "real",
            ColumnType::Double => "double precision",
            ColumnType::Numeric => "numeric",
            ColumnType::Text => "text",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Time => "time",
            ColumnType::Timestamp => "timestamp",
            ColumnType::TimestampTz => "timestamptz",
            ColumnType::Uuid => "uuid",
            ColumnType::Json => "json",
            ColumnType::Jsonb => "jsonb",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::from_str(raw)
        .ok()
        .or_else(|| parse_timestamp(raw).map(|ts| ts.date()))
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::from_str(raw)
        .ok()
        .or_else(|| NaiveTime::parse_from_str(raw, "%H:%M").ok())
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::from_str(raw)
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f").ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|ts| ts.naive_utc()))
        .or_else(|| {
            NaiveDate::from_str(raw)
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

fn parse_timestamp_tz(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
        .or_else(|| parse_timestamp(raw).map(|naive| naive.and_utc()))
}

// =============================================================================
// Value
// =============================================================================

/// A bound parameter or a fetched cell.
///
/// `Record` and `Records` only appear in rows after embed expansion; they are never bound.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Numeric(Decimal),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid(Uuid),
    Json(serde_json::Value),
    Record(Row),
    Records(Vec<Row>),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Row> {
        match self {
            Value::Record(row) => Some(row),
            _ => None,
        }
    }

    pub fn as_records(&self) -> Option<&[Row]> {
        match self {
            Value::Records(rows) => Some(rows),
            _ => None,
        }
    }

    /// Hashable identity used to match join keys across rows.
    ///
    /// Returns `None` for nested records, which never take part in joins.
    pub fn key_atom(&self) -> Option<KeyAtom> {
        Some(match self {
            Value::Null => KeyAtom::Null,
            Value::Bool(b) => KeyAtom::Bool(*b),
            Value::Int(i) => KeyAtom::Int(*i),
            Value::Float(f) => KeyAtom::Float(f.to_bits()),
            Value::Numeric(d) => KeyAtom::Text(d.normalize().to_compact_string()),
            Value::Text(s) => KeyAtom::Text(CompactString::from(s.as_str())),
            Value::Date(d) => KeyAtom::Temporal(d.to_compact_string()),
            Value::Time(t) => KeyAtom::Temporal(t.to_compact_string()),
            Value::Timestamp(ts) => KeyAtom::Temporal(ts.to_compact_string()),
            Value::TimestampTz(ts) => KeyAtom::Temporal(ts.naive_utc().to_compact_string()),
            Value::Uuid(u) => KeyAtom::Uuid(*u),
            Value::Json(json) => KeyAtom::Text(json.to_compact_string()),
            Value::Record(_) | Value::Records(_) => return None,
        })
    }

    /// Renders this value as a search-DSL literal that casts back to the same value.
    ///
    /// Strings are single-quoted with embedded quotes doubled.
    pub fn dsl_literal(&self) -> Option<String> {
        Some(match self {
            Value::Null => "~".to_owned(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Numeric(d) => d.to_string(),
            Value::Bool(b) => quote(if *b { "true" } else { "false" }),
            Value::Text(s) => quote(s),
            Value::Date(d) => quote(&d.to_string()),
            Value::Time(t) => quote(&t.format("%H:%M:%S%.f").to_string()),
            Value::Timestamp(ts) => quote(&ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Value::TimestampTz(ts) => quote(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Uuid(u) => quote(&u.to_string()),
            Value::Json(json) => quote(&json.to_string()),
            Value::Record(_) | Value::Records(_) => return None,
        })
    }
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// Hashable projection of a [`Value`] used for join-key grouping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyAtom {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Text(CompactString),
    Temporal(CompactString),
    Uuid(Uuid),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Numeric(d) => write!(f, "{d}"),
            Value::Text(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{d}"),
            Value::Time(t) => write!(f, "{t}"),
            Value::Timestamp(ts) => write!(f, "{ts}"),
            Value::TimestampTz(ts) => write!(f, "{ts}"),
            Value::Uuid(u) => write!(f, "{u}"),
            Value::Json(json) => write!(f, "{json}"),
            Value::Record(_) => f.write_str("<record>"),
            Value::Records(rows) => write!(f, "<{} records>", rows.len()),
        }
    }
}

// =============================================================================
// Conversions
// =============================================================================

macro_rules! impl_from_int {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Int(i64::from(value))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(f64::from(value))
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Numeric(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<NaiveTime> for Value {
    fn from(value: NaiveTime) -> Self {
        Value::Time(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::Timestamp(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::TimestampTz(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Uuid(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::Json(value)
    }
}

impl From<Row> for Value {
    fn from(value: Row) -> Self {
        Value::Record(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}
