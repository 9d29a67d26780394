//! CRM metadata snapshots: fields, pipelines, and stages.

use std::{error::Error, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{optional_string_or_number, string_or_number};

/// CRM record category a field or pipeline applies to.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityType {
    #[default]
    Deal,
    Lead,
    Contact,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [EntityType::Deal, EntityType::Lead, EntityType::Contact];

    /// Wire spelling used in query strings (`entity_type=DEAL`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deal => "DEAL",
            Self::Lead => "LEAD",
            Self::Contact => "CONTACT",
        }
    }

    /// Only deals carry pipelines in the upstream CRM.
    pub fn has_pipelines(&self) -> bool {
        matches!(self, Self::Deal)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ParseEntityTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEAL" => Ok(Self::Deal),
            "LEAD" => Ok(Self::Lead),
            "CONTACT" => Ok(Self::Contact),
            _ => Err(ParseEntityTypeError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEntityTypeError(pub String);

impl fmt::Display for ParseEntityTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid entity type '{}'; expected one of DEAL, LEAD, CONTACT", self.0)
    }
}

impl Error for ParseEntityTypeError {}

/// A named, typed attribute exposed by the CRM for an entity type.
///
/// Snapshots are immutable once fetched. The backend has shipped both
/// snake_case and camelCase spellings, so both are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmField {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "valueType", alias = "type")]
    pub value_type: Option<String>,
    #[serde(default, alias = "entityType")]
    pub entity_type: Option<EntityType>,
    #[serde(default, alias = "isRequired")]
    pub is_required: bool,
    #[serde(default, alias = "isReadonly", alias = "isReadOnly")]
    pub is_readonly: bool,
    #[serde(default, alias = "isMultiple")]
    pub is_multiple: bool,
    #[serde(default, alias = "isCustom")]
    pub is_custom: bool,
}

impl CrmField {
    /// Human label, falling back to the field code when the CRM left the title blank.
    pub fn display_name(&self) -> &str {
        if self.title.trim().is_empty() { &self.id } else { &self.title }
    }
}

/// A CRM workflow (deal funnel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(deserialize_with = "string_or_number", alias = "pipelineId", alias = "id")]
    pub pipeline_id: String,
    #[serde(default, alias = "pipelineName", alias = "name")]
    pub pipeline_name: String,
}

/// One named step of a [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(alias = "stageCode", alias = "code")]
    pub stage_code: String,
    #[serde(default, alias = "stageName", alias = "name")]
    pub stage_name: String,
    #[serde(default, deserialize_with = "optional_string_or_number", alias = "pipelineId")]
    pub pipeline_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_type_parses_case_insensitively() {
        assert_eq!("deal".parse::<EntityType>().unwrap(), EntityType::Deal);
        assert_eq!(" Contact ".parse::<EntityType>().unwrap(), EntityType::Contact);
        assert!("company".parse::<EntityType>().is_err());
    }

    #[test]
    fn only_deals_have_pipelines() {
        let with_pipelines: Vec<_> = EntityType::ALL.iter().filter(|entity| entity.has_pipelines()).collect();
        assert_eq!(with_pipelines, vec![&EntityType::Deal]);
    }

    #[test]
    fn crm_field_accepts_camel_case_payload() {
        let field: CrmField = serde_json::from_value(json!({
            "id": "UF_CRM_BUDGET",
            "title": "Budget",
            "type": "money",
            "entityType": "DEAL",
            "isRequired": true,
            "isCustom": true
        }))
        .expect("field");

        assert_eq!(field.value_type.as_deref(), Some("money"));
        assert_eq!(field.entity_type, Some(EntityType::Deal));
        assert!(field.is_required);
        assert!(field.is_custom);
        assert!(!field.is_multiple);
    }

    #[test]
    fn pipeline_and_stage_accept_numeric_ids() {
        let pipeline: Pipeline = serde_json::from_value(json!({"pipeline_id": 7, "pipeline_name": "Sales"})).expect("pipeline");
        assert_eq!(pipeline.pipeline_id, "7");

        let stage: Stage = serde_json::from_value(json!({"stage_code": "C7:NEW", "stage_name": "New", "pipeline_id": 7})).expect("stage");
        assert_eq!(stage.pipeline_id.as_deref(), Some("7"));
    }

    #[test]
    fn display_name_falls_back_to_code() {
        let field = CrmField {
            id: "TITLE".into(),
            title: "  ".into(),
            value_type: None,
            entity_type: None,
            is_required: false,
            is_readonly: false,
            is_multiple: false,
            is_custom: false,
        };
        assert_eq!(field.display_name(), "TITLE");
    }
}
