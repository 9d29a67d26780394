use crmbot_types::{CrmField, EntityType};

/// Search CRM fields the way the field picker does.
///
/// `entity_type`, when given, is an exact-match filter applied first. The
/// remaining fields are matched case-insensitively against title and id; a
/// blank term keeps everything.
pub fn filter_fields<'a>(fields: &'a [CrmField], search_term: &str, entity_type: Option<EntityType>) -> Vec<&'a CrmField> {
    let needle = search_term.trim().to_lowercase();
    fields
        .iter()
        .filter(|field| entity_type.is_none_or(|entity| field.entity_type == Some(entity)))
        .filter(|field| needle.is_empty() || field.title.to_lowercase().contains(&needle) || field.id.to_lowercase().contains(&needle))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(id: &str, title: &str, entity_type: EntityType) -> CrmField {
        CrmField {
            id: id.into(),
            title: title.into(),
            value_type: Some("string".into()),
            entity_type: Some(entity_type),
            is_required: false,
            is_readonly: false,
            is_multiple: false,
            is_custom: false,
        }
    }

    fn sample() -> Vec<CrmField> {
        vec![
            field("TITLE", "Deal title", EntityType::Deal),
            field("UF_CRM_BUDGET", "Budget", EntityType::Deal),
            field("NAME", "First name", EntityType::Contact),
            field("SOURCE_ID", "Source", EntityType::Lead),
        ]
    }

    #[test]
    fn matches_title_and_id_case_insensitively() {
        let fields = sample();
        let ids: Vec<_> = filter_fields(&fields, "bUdGeT", None).iter().map(|field| field.id.as_str()).collect();
        assert_eq!(ids, vec!["UF_CRM_BUDGET"]);

        let ids: Vec<_> = filter_fields(&fields, "source_", None).iter().map(|field| field.id.as_str()).collect();
        assert_eq!(ids, vec!["SOURCE_ID"]);
    }

    #[test]
    fn entity_filter_applies_before_text() {
        let fields = sample();
        let ids: Vec<_> = filter_fields(&fields, "name", Some(EntityType::Deal))
            .iter()
            .map(|field| field.id.as_str())
            .collect();
        assert!(ids.is_empty());

        let ids: Vec<_> = filter_fields(&fields, "", Some(EntityType::Deal)).iter().map(|field| field.id.as_str()).collect();
        assert_eq!(ids, vec!["TITLE", "UF_CRM_BUDGET"]);
    }

    #[test]
    fn blank_term_keeps_all() {
        let fields = sample();
        assert_eq!(filter_fields(&fields, "   ", None).len(), fields.len());
    }
}
