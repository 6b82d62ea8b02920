//! Backend-agnostic type mappings.
//!
//! This module maps backend column types onto JSON values for result rows.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Backend-specific decoders handle the actual value extraction
//!
//! Postgres rows are decoded through sqlx; warehouse rows arrive as JSON
//! strings and are coerced by category.

use crate::models::Row;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::{Column, Decode, Row as _, Type, TypeInfo};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for backend column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Interval,
    /// Postgres array; the element type is the name without the `[]` suffix.
    Array,
    Unknown,
}

/// Classify a backend type name into a logical category.
///
/// Accepts Postgres names (`int8`, `timestamptz`, `jsonb`, ...) and warehouse
/// names (`LONG`, `STRING`, `STRUCT`, ...).
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower.ends_with("[]") {
        return TypeCategory::Array;
    }

    // "interval" would otherwise match the integer check
    if lower == "interval" {
        return TypeCategory::Interval;
    }

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    if lower.contains("int")
        || lower.contains("serial")
        || lower == "long"
        || lower == "short"
        || lower == "byte"
    {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    // Warehouse complex types are serialized as JSON text
    if lower == "json"
        || lower == "jsonb"
        || lower == "array"
        || lower == "struct"
        || lower == "map"
    {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower == "timestamptz" {
        return TypeCategory::TimestampTz;
    }
    if lower == "timestamp" {
        return TypeCategory::Timestamp;
    }
    if lower == "date" {
        return TypeCategory::Date;
    }
    if lower == "time" {
        return TypeCategory::Time;
    }

    if lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower == "text" || lower == "string" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw NUMERIC values as strings.
/// This preserves the exact database representation (prices, ratings).
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("NUMERIC")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Binary => numeric_to_string(value.as_bytes()?).map(RawDecimal),
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
        }
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Render a binary NUMERIC (base-10000 digit groups) with its display scale.
pub fn numeric_to_string(bytes: &[u8]) -> Result<String, sqlx::error::BoxDynError> {
    let word = |i: usize| -> Result<u16, sqlx::error::BoxDynError> {
        bytes
            .get(i * 2..i * 2 + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated NUMERIC value".into())
    };

    let ndigits = usize::from(word(0)?);
    let weight = i64::from(word(1)? as i16);
    let sign = word(2)?;
    let dscale = usize::from(word(3)?);
    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| word(4 + i))
        .collect::<Result<Vec<_>, _>>()?;
    let digit = |i: i64| {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit(0).to_string());
        for i in 1..=weight {
            out.push_str(&format!("{:04}", digit(i)));
        }
    }
    if dscale > 0 {
        let mut fraction = String::new();
        let mut i = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit(i)));
            i += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Ok(out)
}

// =============================================================================
// Binary Encoding
// =============================================================================

/// Decode binary data to a JSON string: UTF-8 text when valid, base64 otherwise.
pub fn decode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    match std::str::from_utf8(bytes) {
        Ok(s) => JsonValue::String(s.to_string()),
        Err(_) => JsonValue::String(STANDARD.encode(bytes)),
    }
}

// =============================================================================
// Row to JSON
// =============================================================================

/// Trait for converting backend rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> Row;
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> Row {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let value = match postgres::decode_column(self, idx, type_name) {
                    Some(value) => value,
                    None => {
                        tracing::warn!(
                            column = col.name(),
                            type_name,
                            "No JSON mapping for column type, returning null"
                        );
                        JsonValue::Null
                    }
                };
                (col.name().to_string(), value)
            })
            .collect()
    }
}

/// Render an interval the way Postgres prints it by default,
/// e.g. `1 year 2 mons 3 days 04:05:06.5`.
pub fn format_interval(months: i32, days: i32, microseconds: i64) -> String {
    fn unit(value: i64, singular: &str, plural: &str) -> String {
        let name = if value == 1 { singular } else { plural };
        format!("{} {}", value, name)
    }

    let mut parts = Vec::new();
    let (years, months) = (i64::from(months / 12), i64::from(months % 12));
    if years != 0 {
        parts.push(unit(years, "year", "years"));
    }
    if months != 0 {
        parts.push(unit(months, "mon", "mons"));
    }
    if days != 0 {
        parts.push(unit(i64::from(days), "day", "days"));
    }

    if microseconds != 0 || parts.is_empty() {
        let sign = if microseconds < 0 { "-" } else { "" };
        let total = microseconds.unsigned_abs();
        let (secs, frac) = (total / 1_000_000, total % 1_000_000);
        let mut time = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        );
        if frac != 0 {
            let digits = format!("{:06}", frac);
            time.push('.');
            time.push_str(digits.trim_end_matches('0'));
        }
        parts.push(time);
    }

    parts.join(" ")
}

mod postgres {
    //! Column decoders. Each returns `None` when the value could not be decoded
    //! as the expected Rust type; SQL NULL decodes to `Some(Null)`.

    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
    use sqlx::postgres::types::PgInterval;
    use uuid::Uuid;

    pub fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> Option<JsonValue> {
        match categorize_type(type_name) {
            TypeCategory::Decimal => get::<RawDecimal>(row, idx, |v| JsonValue::String(v.0)),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => get::<bool>(row, idx, JsonValue::Bool),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => get::<Vec<u8>>(row, idx, |v| decode_binary_value(&v)),
            TypeCategory::Json => get::<JsonValue>(row, idx, |v| v),
            TypeCategory::Uuid => get::<Uuid>(row, idx, |v| JsonValue::String(v.to_string())),
            TypeCategory::TimestampTz => {
                get::<DateTime<Utc>>(row, idx, |v| JsonValue::String(v.to_rfc3339()))
            }
            TypeCategory::Timestamp => get::<NaiveDateTime>(row, idx, |v| {
                JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }),
            TypeCategory::Date => get::<NaiveDate>(row, idx, |v| JsonValue::String(v.to_string())),
            TypeCategory::Time => get::<NaiveTime>(row, idx, |v| JsonValue::String(v.to_string())),
            TypeCategory::Interval => get::<PgInterval>(row, idx, |v| {
                JsonValue::String(format_interval(v.months, v.days, v.microseconds))
            }),
            TypeCategory::Array => decode_array(row, idx, type_name.trim_end_matches("[]")),
            _ => get::<String>(row, idx, JsonValue::String),
        }
    }

    /// Decode a nullable column as `T`, mapping present values with `f`.
    fn get<T>(row: &PgRow, idx: usize, f: impl FnOnce(T) -> JsonValue) -> Option<JsonValue>
    where
        T: for<'r> Decode<'r, sqlx::Postgres> + Type<sqlx::Postgres>,
    {
        match row.try_get::<Option<T>, _>(idx) {
            Ok(Some(v)) => Some(f(v)),
            Ok(None) => Some(JsonValue::Null),
            Err(e) => {
                tracing::debug!(error = %e, "Column decode failed");
                None
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Option<JsonValue> {
        get::<i16>(row, idx, |v| JsonValue::Number(v.into()))
            .or_else(|| get::<i32>(row, idx, |v| JsonValue::Number(v.into())))
            .or_else(|| get::<i64>(row, idx, |v| JsonValue::Number(v.into())))
    }

    fn decode_float(row: &PgRow, idx: usize) -> Option<JsonValue> {
        get::<f64>(row, idx, float_value).or_else(|| get::<f32>(row, idx, |v| float_value(v.into())))
    }

    fn decode_array(row: &PgRow, idx: usize, element_type: &str) -> Option<JsonValue> {
        fn items<T>(values: Vec<Option<T>>, f: impl Fn(T) -> JsonValue) -> JsonValue {
            JsonValue::Array(
                values
                    .into_iter()
                    .map(|v| v.map(&f).unwrap_or(JsonValue::Null))
                    .collect(),
            )
        }

        match categorize_type(element_type) {
            TypeCategory::Integer => {
                get::<Vec<Option<i16>>>(row, idx, |v| items(v, |n| JsonValue::Number(n.into())))
                    .or_else(|| {
                        get::<Vec<Option<i32>>>(row, idx, |v| {
                            items(v, |n| JsonValue::Number(n.into()))
                        })
                    })
                    .or_else(|| {
                        get::<Vec<Option<i64>>>(row, idx, |v| {
                            items(v, |n| JsonValue::Number(n.into()))
                        })
                    })
            }
            TypeCategory::Float => get::<Vec<Option<f64>>>(row, idx, |v| items(v, float_value))
                .or_else(|| {
                    get::<Vec<Option<f32>>>(row, idx, |v| items(v, |n| float_value(n.into())))
                }),
            TypeCategory::Boolean => get::<Vec<Option<bool>>>(row, idx, |v| items(v, JsonValue::Bool)),
            TypeCategory::Uuid => get::<Vec<Option<Uuid>>>(row, idx, |v| {
                items(v, |u| JsonValue::String(u.to_string()))
            }),
            TypeCategory::Json => {
                get::<Vec<Option<sqlx::types::Json<JsonValue>>>>(row, idx, |v| items(v, |j| j.0))
            }
            _ => get::<Vec<Option<String>>>(row, idx, |v| items(v, JsonValue::String)),
        }
    }
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Coerce a textual warehouse cell into a typed JSON value.
///
/// Values that fail to parse are kept as strings rather than dropped.
pub fn coerce_text_value(text: &str, category: TypeCategory) -> JsonValue {
    match category {
        TypeCategory::Integer => text
            .parse::<i64>()
            .map(|v| JsonValue::Number(v.into()))
            .unwrap_or_else(|_| JsonValue::String(text.to_string())),
        TypeCategory::Float => text
            .parse::<f64>()
            .map(float_value)
            .unwrap_or_else(|_| JsonValue::String(text.to_string())),
        TypeCategory::Boolean => match text.to_ascii_lowercase().as_str() {
            "true" => JsonValue::Bool(true),
            "false" => JsonValue::Bool(false),
            _ => JsonValue::String(text.to_string()),
        },
        TypeCategory::Json => serde_json::from_str(text)
            .unwrap_or_else(|_| JsonValue::String(text.to_string())),
        _ => JsonValue::String(text.to_string()),
    }
}
