//! Ordered collection of in-progress field mappings.
//!
//! Each entry pairs a [`FunctionProperty`] with the transient search state of
//! its CRM field picker. Both live in one [`PropertyEntry`], so removing a
//! property removes its picker state in the same step.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crmbot_types::{CrmField, EntityType, FieldMapping, FormatVersion, FunctionProperty, LocalId};
use indexmap::IndexMap;
use tracing::debug;

use crate::codec;
use crate::metadata::filter_fields;

static LOCAL_ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Mint a process-unique local id.
pub fn mint_local_id() -> LocalId {
    let sequence = LOCAL_ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    LocalId::new(format!("prop-{}-{sequence}", chrono::Utc::now().timestamp_millis()))
}

/// Picker state of one property.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertySearchState {
    pub search_term: String,
    pub dropdown_open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyEntry {
    pub property: FunctionProperty,
    pub search: PropertySearchState,
}

/// A single-field edit applied through [`PropertyStore::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyUpdate {
    FieldCode(String),
    FieldName(String),
    Name(String),
    ValueType(Option<String>),
    Description(String),
    Required(bool),
}

impl PropertyUpdate {
    fn apply(self, property: &mut FunctionProperty) {
        match self {
            Self::FieldCode(value) => property.field_code = value,
            Self::FieldName(value) => property.field_name = value,
            Self::Name(value) => property.name = value,
            Self::ValueType(value) => property.value_type = value,
            Self::Description(value) => property.description = value,
            Self::Required(value) => property.required = value,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PropertyStore {
    entries: IndexMap<LocalId, PropertyEntry>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a blank property with a closed, empty picker.
    pub fn add(&mut self) -> LocalId {
        let local_id = mint_local_id();
        self.entries.insert(
            local_id.clone(),
            PropertyEntry {
                property: FunctionProperty::blank(local_id.clone()),
                search: PropertySearchState::default(),
            },
        );
        local_id
    }

    /// Remove a property together with its picker state. Order of the rest is kept.
    pub fn remove(&mut self, local_id: &LocalId) -> bool {
        self.entries.shift_remove(local_id).is_some()
    }

    /// Replace one field of one property. Unknown ids are ignored.
    pub fn update(&mut self, local_id: &LocalId, update: PropertyUpdate) -> bool {
        match self.entries.get_mut(local_id) {
            Some(entry) => {
                update.apply(&mut entry.property);
                true
            }
            None => {
                debug!(local_id = %local_id, "ignoring update for unknown property");
                false
            }
        }
    }

    /// Fill a property from a picked CRM field and close its picker.
    pub fn select_field(&mut self, local_id: &LocalId, field: &CrmField) -> bool {
        let Some(entry) = self.entries.get_mut(local_id) else {
            return false;
        };
        let property = &mut entry.property;
        property.field_code = field.id.clone();
        property.field_name = field.title.clone();
        property.name = field.id.clone();
        property.value_type = field.value_type.clone();
        property.required = field.is_required;
        entry.search = PropertySearchState {
            search_term: property.display_label().to_string(),
            dropdown_open: false,
        };
        true
    }

    /// Replace the whole collection. Each picker is seeded with the property's
    /// label so freshly loaded rows do not show an empty search box.
    ///
    /// Duplicate or blank local ids are replaced with fresh ones.
    pub fn hydrate(&mut self, properties: Vec<FunctionProperty>) {
        let mut seen = HashSet::new();
        self.entries = properties
            .into_iter()
            .map(|mut property| {
                if property.local_id.as_str().trim().is_empty() || !seen.insert(property.local_id.clone()) {
                    property.local_id = mint_local_id();
                    seen.insert(property.local_id.clone());
                }
                let search = PropertySearchState {
                    search_term: property.display_label().to_string(),
                    dropdown_open: false,
                };
                (property.local_id.clone(), PropertyEntry { property, search })
            })
            .collect();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Update the picker's search text; typing opens the dropdown.
    pub fn set_search_term(&mut self, local_id: &LocalId, term: impl Into<String>) -> bool {
        let Some(entry) = self.entries.get_mut(local_id) else {
            return false;
        };
        entry.search.search_term = term.into();
        entry.search.dropdown_open = true;
        true
    }

    pub fn open_dropdown(&mut self, local_id: &LocalId) -> bool {
        self.set_dropdown(local_id, true)
    }

    pub fn close_dropdown(&mut self, local_id: &LocalId) -> bool {
        self.set_dropdown(local_id, false)
    }

    fn set_dropdown(&mut self, local_id: &LocalId, open: bool) -> bool {
        match self.entries.get_mut(local_id) {
            Some(entry) => {
                entry.search.dropdown_open = open;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, local_id: &LocalId) -> Option<&PropertyEntry> {
        self.entries.get(local_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &PropertyEntry> {
        self.entries.values()
    }

    /// Properties in insertion order.
    pub fn snapshot(&self) -> Vec<FunctionProperty> {
        self.entries.values().map(|entry| entry.property.clone()).collect()
    }

    /// Candidate CRM fields for a property's picker, using its current search text.
    pub fn search_results<'a>(
        &self,
        local_id: &LocalId,
        fields: &'a [CrmField],
        entity_type: Option<EntityType>,
    ) -> Vec<&'a CrmField> {
        let term = self.entries.get(local_id).map(|entry| entry.search.search_term.as_str()).unwrap_or_default();
        filter_fields(fields, term, entity_type)
    }

    /// Structured `bitrix_field_mappings` for submission. Properties without a
    /// resolvable field code are left out, matching what the codec persists.
    pub fn to_field_mappings(&self) -> Vec<FieldMapping> {
        self.entries.values().filter_map(|entry| entry.property.to_field_mapping()).collect()
    }

    pub fn encode(&self, stage: Option<&str>, version: FormatVersion) -> Option<String> {
        codec::encode_with(version, &self.snapshot(), stage)
    }
}
