//! Result-format codec.
//!
//! A function definition persists its target stage and field mappings as one
//! opaque string. Two grammars exist:
//!
//! - **Legacy** (version 1): `Stage: <code>|Properties: <json array>`, either
//!   segment optional. This is what the backend has always stored.
//! - **Versioned** (version 2): a tagged JSON object
//!   `{"format_version":2,"stage":"...","properties":[...]}`.
//!
//! Decoding never fails. Anything unreadable degrades to an absent stage and
//! an empty property list, and the reason is reported as a [`DecodeIssue`] by
//! [`decode_detailed`] so callers can tell "empty" apart from "damaged".

use crmbot_types::{FormatVersion, FunctionProperty};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub const STAGE_PREFIX: &str = "Stage:";
pub const PROPERTIES_PREFIX: &str = "Properties:";
pub const SEGMENT_SEPARATOR: char = '|';
pub const VERSION_KEY: &str = "format_version";

/// Wire projection of one property: exactly what the codec persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedProperty {
    pub field_code: String,
    pub field_name: String,
    pub description: String,
}

impl EncodedProperty {
    pub fn new(field_code: impl Into<String>, field_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            field_code: field_code.into(),
            field_name: field_name.into(),
            description: description.into(),
        }
    }
}

/// Decoded content of a result format.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ResultFormat {
    pub stage: Option<String>,
    pub properties: Vec<EncodedProperty>,
}

impl ResultFormat {
    pub fn is_empty(&self) -> bool {
        self.stage.is_none() && self.properties.is_empty()
    }
}

/// Why part of a stored value could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeIssue {
    #[error("value has neither a 'Stage:' nor a 'Properties:' segment")]
    Unrecognized,
    #[error("properties segment is not valid JSON: {message}")]
    InvalidPropertiesJson { message: String },
    #[error("properties segment is not a JSON array")]
    PropertiesNotArray,
    #[error("unexpected text after the properties array: {text}")]
    TrailingText { text: String },
    #[error("property entry {index} skipped: {reason}")]
    SkippedEntry { index: usize, reason: String },
    #[error("unsupported result format version {version}")]
    UnsupportedVersion { version: u64 },
    #[error("versioned envelope is malformed: {message}")]
    InvalidEnvelope { message: String },
}

/// Outcome of [`decode_detailed`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodeReport {
    pub format: ResultFormat,
    /// Grammar the value was written in; `None` when the value was absent or blank.
    pub version: Option<FormatVersion>,
    pub issues: Vec<DecodeIssue>,
}

impl DecodeReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    format_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<&'a str>,
    properties: &'a [EncodedProperty],
}

/// Project editor properties onto the persisted triple.
///
/// `field_code` falls back to `name`; properties resolving to neither are
/// dropped and never reach the wire.
pub fn project(properties: &[FunctionProperty]) -> Vec<EncodedProperty> {
    properties
        .iter()
        .filter_map(|property| {
            let field_code = property.resolved_field_code()?;
            Some(EncodedProperty::new(field_code, property.field_name.trim(), property.description.clone()))
        })
        .collect()
}

/// Encode with the legacy grammar. `None` means "no format".
pub fn encode(properties: &[FunctionProperty], stage: Option<&str>) -> Option<String> {
    encode_with(FormatVersion::Legacy, properties, stage)
}

/// Encode with the versioned envelope. `None` means "no format".
pub fn encode_versioned(properties: &[FunctionProperty], stage: Option<&str>) -> Option<String> {
    encode_with(FormatVersion::Versioned, properties, stage)
}

pub fn encode_with(version: FormatVersion, properties: &[FunctionProperty], stage: Option<&str>) -> Option<String> {
    let format = ResultFormat {
        stage: normalize_stage(stage),
        properties: project(properties),
    };
    encode_format(version, &format)
}

/// Encode an already-projected [`ResultFormat`].
pub fn encode_format(version: FormatVersion, format: &ResultFormat) -> Option<String> {
    let stage = format.stage.as_deref().and_then(|stage| normalize_stage(Some(stage)));
    let properties: Vec<EncodedProperty> = format
        .properties
        .iter()
        .filter(|property| !property.field_code.trim().is_empty())
        .cloned()
        .collect();

    if stage.is_none() && properties.is_empty() {
        return None;
    }

    match version {
        FormatVersion::Legacy => encode_legacy(stage.as_deref(), &properties),
        FormatVersion::Versioned => {
            let envelope = EnvelopeOut {
                format_version: version.tag(),
                stage: stage.as_deref(),
                properties: &properties,
            };
            match serde_json::to_string(&envelope) {
                Ok(encoded) => Some(encoded),
                Err(error) => {
                    warn!(error = %error, "failed to serialize result format envelope");
                    None
                }
            }
        }
    }
}

fn encode_legacy(stage: Option<&str>, properties: &[EncodedProperty]) -> Option<String> {
    let mut segments = Vec::with_capacity(2);
    if let Some(stage) = stage {
        if stage.contains(SEGMENT_SEPARATOR) {
            warn!(stage, "stage code contains the segment separator; legacy decoding will truncate it");
        }
        segments.push(format!("{STAGE_PREFIX} {stage}"));
    }
    if !properties.is_empty() {
        match serde_json::to_string(properties) {
            Ok(json) => segments.push(format!("{PROPERTIES_PREFIX} {json}")),
            Err(error) => warn!(error = %error, "failed to serialize result format properties"),
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join(&SEGMENT_SEPARATOR.to_string()))
    }
}

/// Permissive decode: never fails, ignores diagnostics.
pub fn decode(raw: Option<&str>) -> ResultFormat {
    decode_detailed(raw).format
}

/// Decode either grammar, reporting what could not be used.
pub fn decode_detailed(raw: Option<&str>) -> DecodeReport {
    let Some(text) = raw.map(str::trim).filter(|text| !text.is_empty()) else {
        return DecodeReport::default();
    };

    let report = if text.starts_with('{')
        && let Ok(Value::Object(envelope)) = serde_json::from_str::<Value>(text)
    {
        decode_envelope(&envelope)
    } else {
        decode_legacy(text)
    };

    if !report.is_clean() {
        debug!(issues = ?report.issues, "result format decoded with issues");
    }
    report
}

fn decode_legacy(text: &str) -> DecodeReport {
    let mut issues = Vec::new();
    let properties_at = text.find(PROPERTIES_PREFIX);
    let head = &text[..properties_at.unwrap_or(text.len())];

    let stage_found = head.contains(STAGE_PREFIX);
    let mut stage = stage_segment(head);

    let properties = match properties_at {
        Some(at) => {
            let (properties, tail) = parse_properties_segment(text[at + PROPERTIES_PREFIX.len()..].trim(), &mut issues);
            let tail = tail.trim().trim_start_matches(SEGMENT_SEPARATOR).trim();
            if !tail.is_empty() {
                if !stage_found && tail.starts_with(STAGE_PREFIX) {
                    stage = stage_segment(tail);
                } else {
                    issues.push(DecodeIssue::TrailingText { text: tail.to_string() });
                }
            }
            properties
        }
        None => Vec::new(),
    };

    if !stage_found && properties_at.is_none() {
        issues.push(DecodeIssue::Unrecognized);
    }

    DecodeReport {
        format: ResultFormat { stage, properties },
        version: Some(FormatVersion::Legacy),
        issues,
    }
}

/// Stage code following the first `Stage:` in `text`, up to the next separator.
fn stage_segment(text: &str) -> Option<String> {
    let at = text.find(STAGE_PREFIX)?;
    let rest = &text[at + STAGE_PREFIX.len()..];
    let end = rest.find(SEGMENT_SEPARATOR).unwrap_or(rest.len());
    normalize_stage(Some(&rest[..end]))
}

/// Parse the JSON value opening `segment`. Returns the properties and whatever
/// text follows the value; nothing follows a value that failed to parse.
fn parse_properties_segment<'a>(segment: &'a str, issues: &mut Vec<DecodeIssue>) -> (Vec<EncodedProperty>, &'a str) {
    let mut values = serde_json::Deserializer::from_str(segment).into_iter::<Value>();
    let parsed = values.next();
    let tail = &segment[values.byte_offset()..];

    match parsed {
        Some(Ok(Value::Array(entries))) => (parse_entries(&entries, issues), tail),
        Some(Ok(_)) => {
            issues.push(DecodeIssue::PropertiesNotArray);
            (Vec::new(), tail)
        }
        Some(Err(error)) => {
            issues.push(DecodeIssue::InvalidPropertiesJson {
                message: error.to_string(),
            });
            (Vec::new(), "")
        }
        None => {
            issues.push(DecodeIssue::InvalidPropertiesJson {
                message: "segment is empty".into(),
            });
            (Vec::new(), "")
        }
    }
}

fn decode_envelope(envelope: &JsonMap<String, Value>) -> DecodeReport {
    let mut issues = Vec::new();
    let version = match envelope.get(VERSION_KEY) {
        Some(Value::Number(number)) => number.as_u64(),
        _ => None,
    };

    let Some(version) = version else {
        issues.push(DecodeIssue::InvalidEnvelope {
            message: format!("missing numeric '{VERSION_KEY}'"),
        });
        return DecodeReport {
            format: ResultFormat::default(),
            version: None,
            issues,
        };
    };

    if version != u64::from(FormatVersion::Versioned.tag()) {
        issues.push(DecodeIssue::UnsupportedVersion { version });
        return DecodeReport {
            format: ResultFormat::default(),
            version: None,
            issues,
        };
    }

    let stage = match envelope.get("stage") {
        None | Some(Value::Null) => None,
        Some(Value::String(stage)) => normalize_stage(Some(stage)),
        Some(_) => {
            issues.push(DecodeIssue::InvalidEnvelope {
                message: "'stage' is not a string".into(),
            });
            None
        }
    };

    let properties = match envelope.get("properties") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(entries)) => parse_entries(entries, &mut issues),
        Some(_) => {
            issues.push(DecodeIssue::PropertiesNotArray);
            Vec::new()
        }
    };

    DecodeReport {
        format: ResultFormat { stage, properties },
        version: Some(FormatVersion::Versioned),
        issues,
    }
}

fn parse_entries(entries: &[Value], issues: &mut Vec<DecodeIssue>) -> Vec<EncodedProperty> {
    let mut properties = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let Value::Object(object) = entry else {
            issues.push(DecodeIssue::SkippedEntry {
                index,
                reason: "not an object".into(),
            });
            continue;
        };
        let field_code = text_member(object, "field_code");
        if field_code.trim().is_empty() {
            issues.push(DecodeIssue::SkippedEntry {
                index,
                reason: "missing field_code".into(),
            });
            continue;
        }
        properties.push(EncodedProperty {
            field_code,
            field_name: text_member(object, "field_name"),
            description: text_member(object, "description"),
        });
    }
    properties
}

/// String member, accepting numbers and treating `null`/other shapes as empty.
fn text_member(object: &JsonMap<String, Value>, key: &str) -> String {
    match object.get(key) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        _ => String::new(),
    }
}

fn normalize_stage(stage: Option<&str>) -> Option<String> {
    stage.map(str::trim).filter(|stage| !stage.is_empty()).map(str::to_string)
}
