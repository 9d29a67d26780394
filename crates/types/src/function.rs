//! Function definition records and their in-memory editing counterparts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{lenient_timestamp, optional_string_or_number, string_or_number};

/// Server-side identifier of a function definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(#[serde(deserialize_with = "string_or_number")] pub String);

impl FunctionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FunctionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Structured CRM linkage sent alongside the encoded result format.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldMapping {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub crm_field_name: String,
    #[serde(default)]
    pub crm_field_code: String,
    #[serde(default)]
    pub data_type: Option<String>,
}

/// A function definition as returned by `GET functions` / `GET functions/{id}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub id: FunctionId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub trigger_instructions: String,
    #[serde(default)]
    pub bitrix_field_mappings: Vec<FieldMapping>,
    #[serde(default)]
    pub result_format: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_on: Option<DateTime<Utc>>,
    /// Pipeline last submitted for this function, when the backend echoes it.
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub pipeline: Option<String>,
    /// Stage last submitted for this function, when the backend echoes it.
    #[serde(default)]
    pub stage: Option<String>,
}

/// Body of `POST functions` and `PUT functions/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionPayload {
    pub bot: String,
    pub name: String,
    pub trigger_instructions: String,
    pub bitrix_field_mappings: Vec<FieldMapping>,
    pub pipeline: Option<String>,
    pub stage: Option<String>,
    pub result_format: Option<String>,
}

/// One page of `GET functions`.
///
/// Accepts the paginated `{count, results}` envelope (`items` is an accepted
/// alias) as well as a bare JSON array.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "FunctionPageRepr")]
pub struct FunctionPage {
    pub count: u64,
    pub results: Vec<FunctionRecord>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FunctionPageRepr {
    Paged {
        #[serde(default)]
        count: Option<u64>,
        #[serde(alias = "items")]
        results: Vec<FunctionRecord>,
    },
    Bare(Vec<FunctionRecord>),
}

impl From<FunctionPageRepr> for FunctionPage {
    fn from(repr: FunctionPageRepr) -> Self {
        match repr {
            FunctionPageRepr::Paged { count, results } => Self {
                count: count.unwrap_or(results.len() as u64),
                results,
            },
            FunctionPageRepr::Bare(results) => Self {
                count: results.len() as u64,
                results,
            },
        }
    }
}

/// Display-oriented view of a persisted function definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDefinition {
    pub id: FunctionId,
    pub name: String,
    pub instruction: String,
    pub encoded_format: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<FunctionRecord> for FunctionDefinition {
    fn from(record: FunctionRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            instruction: record.trigger_instructions,
            encoded_format: record.result_format.filter(|format| !format.trim().is_empty()),
            created_at: record.created_on,
            updated_at: record.updated_on,
        }
    }
}

/// Synthetic key for an in-progress property. Exists only to address UI state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(String);

impl LocalId {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An in-progress field mapping inside the editor.
///
/// Deliberately not `Serialize`: the wire only ever sees the codec projection
/// and [`FieldMapping`]. `required` mirrors the CRM field's flag for display and
/// does not survive an encode/decode round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionProperty {
    pub local_id: LocalId,
    pub field_code: String,
    pub field_name: String,
    pub name: String,
    pub value_type: Option<String>,
    pub description: String,
    pub required: bool,
}

impl FunctionProperty {
    /// Blank property keyed by `local_id`.
    pub fn blank(local_id: LocalId) -> Self {
        Self {
            local_id,
            field_code: String::new(),
            field_name: String::new(),
            name: String::new(),
            value_type: None,
            description: String::new(),
            required: false,
        }
    }

    /// Field code used on the wire: `field_code`, falling back to `name`.
    pub fn resolved_field_code(&self) -> Option<&str> {
        [self.field_code.trim(), self.name.trim()].into_iter().find(|candidate| !candidate.is_empty())
    }

    /// Label shown in the search box: field name, falling back to field code.
    pub fn display_label(&self) -> &str {
        if self.field_name.trim().is_empty() { self.field_code.trim() } else { self.field_name.trim() }
    }

    /// Projection sent as one entry of `bitrix_field_mappings`.
    pub fn to_field_mapping(&self) -> Option<FieldMapping> {
        let code = self.resolved_field_code()?;
        Some(FieldMapping {
            name: if self.name.trim().is_empty() { code.to_string() } else { self.name.trim().to_string() },
            description: self.description.clone(),
            crm_field_name: self.field_name.clone(),
            crm_field_code: code.to_string(),
            data_type: self.value_type.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_accepts_paginated_envelope() {
        let page: FunctionPage = serde_json::from_value(json!({
            "count": 12,
            "results": [{"id": 3, "name": "Capture budget", "result_format": "Stage: C1:NEW"}]
        }))
        .expect("page");

        assert_eq!(page.count, 12);
        assert_eq!(page.results[0].id, FunctionId::new("3"));
        assert_eq!(page.results[0].result_format.as_deref(), Some("Stage: C1:NEW"));
    }

    #[test]
    fn page_tolerates_naive_and_malformed_timestamps() {
        let page: FunctionPage = serde_json::from_value(json!({
            "count": 3,
            "results": [
                {"id": 1, "created_on": "2024-05-01T10:00:00Z"},
                {"id": 2, "created_on": "2024-05-01T10:00:00.123456", "updated_on": "2024-05-02 08:30:00"},
                {"id": 3, "created_on": "yesterday", "updated_on": 1714557600}
            ]
        }))
        .expect("page");

        let utc = |text: &str| DateTime::parse_from_rfc3339(text).expect("timestamp").with_timezone(&Utc);
        assert_eq!(page.results.len(), 3);
        assert_eq!(page.results[0].created_on, Some(utc("2024-05-01T10:00:00Z")));
        assert_eq!(page.results[1].created_on, Some(utc("2024-05-01T10:00:00.123456Z")));
        assert_eq!(page.results[1].updated_on, Some(utc("2024-05-02T08:30:00Z")));
        assert!(page.results[2].created_on.is_none());
        assert!(page.results[2].updated_on.is_none());
    }

    #[test]
    fn record_accepts_numeric_pipeline_echo() {
        let record: FunctionRecord =
            serde_json::from_value(json!({"id": 4, "pipeline": 12, "stage": "C12:NEW"})).expect("record");
        assert_eq!(record.pipeline.as_deref(), Some("12"));
        assert_eq!(record.stage.as_deref(), Some("C12:NEW"));
        assert!(record.bitrix_field_mappings.is_empty());
    }

    #[test]
    fn page_accepts_bare_array() {
        let page: FunctionPage = serde_json::from_value(json!([{"id": "a1"}, {"id": "a2"}])).expect("page");
        assert_eq!(page.count, 2);
        assert_eq!(page.results[1].id.as_str(), "a2");
    }

    #[test]
    fn definition_treats_blank_format_as_absent() {
        let record = FunctionRecord {
            id: FunctionId::new("9"),
            result_format: Some("  ".into()),
            ..FunctionRecord::default()
        };
        let definition = FunctionDefinition::from(record);
        assert!(definition.encoded_format.is_none());
    }

    #[test]
    fn field_code_falls_back_to_name() {
        let mut property = FunctionProperty::blank(LocalId::new("p-1"));
        assert!(property.resolved_field_code().is_none());
        assert!(property.to_field_mapping().is_none());

        property.name = "COMMENTS".into();
        assert_eq!(property.resolved_field_code(), Some("COMMENTS"));

        property.field_code = "TITLE".into();
        let mapping = property.to_field_mapping().expect("mapping");
        assert_eq!(mapping.crm_field_code, "TITLE");
        assert_eq!(mapping.name, "COMMENTS");
    }
}
