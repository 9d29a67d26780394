//! Shared type definitions for the CRM bot console.
//!
//! Two families of types live here:
//!
//! - **Wire records** exchanged with the console backend ([`FunctionRecord`],
//!   [`FunctionPayload`], [`FunctionPage`], [`CrmField`], [`Pipeline`], [`Stage`]).
//! - **In-memory domain types** used by the editor ([`FunctionDefinition`],
//!   [`FunctionProperty`], [`LocalId`]) which never travel over the wire as-is.

mod crm;
mod format;
mod function;

pub use crm::{CrmField, EntityType, ParseEntityTypeError, Pipeline, Stage};
pub use format::FormatVersion;
pub use function::{FieldMapping, FunctionDefinition, FunctionId, FunctionPage, FunctionPayload, FunctionProperty, FunctionRecord, LocalId};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

/// Offset-free layouts the backend has been seen to emit; read as UTC.
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Deserialize an identifier the backend may send either as a JSON string or a number.
///
/// CRM identifiers (pipeline ids, record ids) are numeric on some installations
/// and string-typed on others; both are normalized to `String`.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!("expected string or number identifier, got {other}"))),
    }
}

/// Optional variant of [`string_or_number`]; `null` and missing values map to `None`.
pub(crate) fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!("expected string or number identifier, got {other}"))),
    }
}

/// Deserialize an optional timestamp without failing the surrounding record.
///
/// Accepts RFC 3339 and offset-free values (taken as UTC). Anything else is
/// logged and mapped to `None`.
pub(crate) fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(parse_timestamp(&text)),
        Some(other) => {
            debug!(value = %other, "ignoring non-string timestamp");
            Ok(None)
        }
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    let naive = NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok());
    if naive.is_none() {
        debug!(value = text, "ignoring unparseable timestamp");
    }
    naive.map(|naive| naive.and_utc())
}
