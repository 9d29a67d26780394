//! Create / edit / view state machine for a single function definition.
//!
//! Entering edit or view mode is staged: metadata, the authoritative record,
//! and (when a stage was recovered) the inferred pipeline's stages are all
//! fetched first, then the editor state is replaced in one synchronous step.
//! A failure before that step leaves the previous mode and values untouched.

use std::fmt;
use std::sync::Arc;

use crmbot_types::{
    CrmField, FieldMapping, FormatVersion, FunctionId, FunctionPayload, FunctionProperty, FunctionRecord, LocalId, Stage,
};
use crmbot_util::redact_sensitive;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::codec::{self, EncodedProperty};
use crate::loader::{DependentLoader, StageRequest};
use crate::properties::{PropertyStore, PropertyUpdate, mint_local_id};
use crate::records::FunctionRecordService;
use crate::validate::{ValidationError, validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditorMode {
    #[default]
    Create,
    Edit,
    View,
}

impl fmt::Display for EditorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Edit => "edit",
            Self::View => "view",
        })
    }
}

#[derive(Debug, Error)]
pub enum EditorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("function is open read-only")]
    ReadOnly,
    #[error("requested function {requested} but the backend returned {received}")]
    RecordMismatch { requested: FunctionId, received: FunctionId },
    /// Network or backend failure. Displays the backend's own message; the
    /// full context chain is logged when the save fails.
    #[error("{}", .0.root_cause())]
    Submission(anyhow::Error),
}

pub struct FunctionEditor {
    records: Arc<dyn FunctionRecordService>,
    loader: DependentLoader,
    properties: PropertyStore,
    mode: EditorMode,
    target: Option<FunctionId>,
    name: String,
    instructions: String,
    stage: Option<String>,
    format_version: FormatVersion,
    dirty: bool,
}

impl fmt::Debug for FunctionEditor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionEditor")
            .field("mode", &self.mode)
            .field("target", &self.target)
            .field("name", &self.name)
            .field("stage", &self.stage)
            .field("property_count", &self.properties.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}

/// Everything gathered while entering edit/view, applied in one step.
struct Population {
    record: FunctionRecord,
    properties: Vec<FunctionProperty>,
    stage: Option<String>,
    pipeline: Option<String>,
    stages: Vec<Stage>,
}

impl FunctionEditor {
    pub fn new(records: Arc<dyn FunctionRecordService>, loader: DependentLoader, format_version: FormatVersion) -> Self {
        Self {
            records,
            loader,
            properties: PropertyStore::new(),
            mode: EditorMode::Create,
            target: None,
            name: String::new(),
            instructions: String::new(),
            stage: None,
            format_version,
            dirty: false,
        }
    }

    pub fn mode(&self) -> EditorMode {
        self.mode
    }

    pub fn target(&self) -> Option<&FunctionId> {
        self.target.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn stage(&self) -> Option<&str> {
        self.stage.as_deref()
    }

    pub fn pipeline(&self) -> Option<&str> {
        self.loader.selected_pipeline()
    }

    pub fn properties(&self) -> &PropertyStore {
        &self.properties
    }

    pub fn loader(&self) -> &DependentLoader {
        &self.loader
    }

    /// Mutable access for driving the stage cascade with the two-phase API.
    pub fn loader_mut(&mut self) -> &mut DependentLoader {
        &mut self.loader
    }

    pub fn format_version(&self) -> FormatVersion {
        self.format_version
    }

    /// True when the form holds edits that have not been saved.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_read_only(&self) -> bool {
        self.mode == EditorMode::View
    }

    /// Open `snapshot` for editing.
    ///
    /// Re-entering the record that is already open with unsaved changes keeps
    /// those changes and fetches nothing.
    pub async fn enter_edit(&mut self, snapshot: &FunctionRecord) -> Result<(), EditorError> {
        if self.mode == EditorMode::Edit && self.dirty && self.target.as_ref() == Some(&snapshot.id) {
            debug!(function_id = %snapshot.id, "function already open with unsaved changes");
            return Ok(());
        }
        self.enter(EditorMode::Edit, snapshot).await
    }

    pub async fn enter_view(&mut self, snapshot: &FunctionRecord) -> Result<(), EditorError> {
        self.enter(EditorMode::View, snapshot).await
    }

    async fn enter(&mut self, mode: EditorMode, snapshot: &FunctionRecord) -> Result<(), EditorError> {
        let population = self.populate(snapshot).await?;
        self.commit(mode, population);
        info!(
            function_id = ?self.target,
            %mode,
            property_count = self.properties.len(),
            stage = ?self.stage,
            "function opened"
        );
        Ok(())
    }

    async fn populate(&mut self, snapshot: &FunctionRecord) -> Result<Population, EditorError> {
        self.loader.ensure_metadata().await;

        let record = match self.records.fetch_function(&snapshot.id).await {
            Ok(record) if record.id != snapshot.id => {
                return Err(EditorError::RecordMismatch {
                    requested: snapshot.id.clone(),
                    received: record.id,
                });
            }
            Ok(record) => record,
            Err(error) => {
                warn!(
                    function_id = %snapshot.id,
                    error = %redact_sensitive(&format!("{error:#}")),
                    "failed to fetch function; using the listed copy"
                );
                snapshot.clone()
            }
        };

        let report = codec::decode_detailed(record.result_format.as_deref());
        for issue in &report.issues {
            warn!(function_id = %record.id, %issue, "stored result format is damaged");
        }

        let properties = report
            .format
            .properties
            .iter()
            .map(|encoded| enrich(encoded, &record.bitrix_field_mappings, self.loader.fields()))
            .collect();

        let stage = report
            .format
            .stage
            .or_else(|| non_blank(record.stage.as_deref()))
            .or_else(|| non_blank(snapshot.stage.as_deref()));

        let pipeline = match &stage {
            Some(stage) => self.infer_pipeline(&record, stage),
            None => None,
        };
        let stages = match &pipeline {
            Some(pipeline_id) => {
                let request = StageRequest {
                    token: self.loader.current_token(),
                    bot_id: self.loader.bot_id().to_string(),
                    pipeline_id: pipeline_id.clone(),
                };
                let cache = Arc::clone(self.loader.cache());
                DependentLoader::fetch_stages(&cache, &request).await.unwrap_or_else(|error| {
                    warn!(pipeline_id = %pipeline_id, error = %format!("{error:#}"), "failed to load stages");
                    Vec::new()
                })
            }
            None => Vec::new(),
        };

        Ok(Population {
            record,
            properties,
            stage,
            pipeline,
            stages,
        })
    }

    /// Pipeline owning a recovered stage.
    ///
    /// A pipeline echoed on the record is used when it is known. Otherwise the
    /// first cached pipeline is taken, which is only correct when stage codes
    /// are unique across pipelines.
    fn infer_pipeline(&self, record: &FunctionRecord, stage: &str) -> Option<String> {
        let pipelines = self.loader.pipelines();
        if let Some(echoed) = non_blank(record.pipeline.as_deref())
            && pipelines.iter().any(|pipeline| pipeline.pipeline_id == echoed)
        {
            return Some(echoed);
        }
        let first = pipelines.first()?;
        if pipelines.len() > 1 {
            warn!(
                stage,
                pipeline_id = %first.pipeline_id,
                pipeline_count = pipelines.len(),
                "stage owner is ambiguous; assuming the first pipeline"
            );
        }
        Some(first.pipeline_id.clone())
    }

    fn commit(&mut self, mode: EditorMode, population: Population) {
        let Population {
            record,
            properties,
            stage,
            pipeline,
            stages,
        } = population;
        self.loader.adopt_pipeline(pipeline, stages);
        self.properties.hydrate(properties);
        self.name = record.name;
        self.instructions = record.trigger_instructions;
        self.stage = stage;
        self.target = Some(record.id);
        self.mode = mode;
        self.dirty = false;
    }

    /// Back to an empty create form. In-flight lookups are discarded.
    pub fn reset(&mut self) {
        self.loader.reset();
        self.properties.clear();
        self.name.clear();
        self.instructions.clear();
        self.stage = None;
        self.target = None;
        self.mode = EditorMode::Create;
        self.dirty = false;
    }

    fn writable(&self, action: &str) -> bool {
        if self.is_read_only() {
            debug!(action, "ignoring edit in view mode");
            return false;
        }
        true
    }

    fn touched(&mut self, changed: bool) -> bool {
        self.dirty |= changed;
        changed
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> bool {
        if !self.writable("set_name") {
            return false;
        }
        self.name = name.into();
        self.touched(true)
    }

    pub fn set_instructions(&mut self, instructions: impl Into<String>) -> bool {
        if !self.writable("set_instructions") {
            return false;
        }
        self.instructions = instructions.into();
        self.touched(true)
    }

    pub fn select_stage(&mut self, stage: Option<String>) -> bool {
        if !self.writable("select_stage") {
            return false;
        }
        self.stage = stage.map(|stage| stage.trim().to_string()).filter(|stage| !stage.is_empty());
        self.touched(true)
    }

    /// Change the pipeline. The stage belongs to the old pipeline and is
    /// cleared. Returns the stage request to issue, if any.
    pub fn select_pipeline(&mut self, pipeline_id: Option<String>) -> Option<StageRequest> {
        if !self.writable("select_pipeline") {
            return None;
        }
        self.stage = None;
        self.dirty = true;
        self.loader.select_pipeline(pipeline_id)
    }

    /// Change the pipeline and wait for its stages.
    pub async fn change_pipeline(&mut self, pipeline_id: Option<String>) {
        let Some(request) = self.select_pipeline(pipeline_id) else {
            return;
        };
        let cache = Arc::clone(self.loader.cache());
        let result = DependentLoader::fetch_stages(&cache, &request).await;
        self.loader.apply_stages(&request, result);
    }

    pub fn add_property(&mut self) -> Option<LocalId> {
        if !self.writable("add_property") {
            return None;
        }
        self.dirty = true;
        Some(self.properties.add())
    }

    pub fn remove_property(&mut self, local_id: &LocalId) -> bool {
        if !self.writable("remove_property") {
            return false;
        }
        let changed = self.properties.remove(local_id);
        self.touched(changed)
    }

    pub fn update_property(&mut self, local_id: &LocalId, update: PropertyUpdate) -> bool {
        if !self.writable("update_property") {
            return false;
        }
        let changed = self.properties.update(local_id, update);
        self.touched(changed)
    }

    pub fn select_property_field(&mut self, local_id: &LocalId, field: &CrmField) -> bool {
        if !self.writable("select_property_field") {
            return false;
        }
        let changed = self.properties.select_field(local_id, field);
        self.touched(changed)
    }

    /// Picker state is not part of the definition and does not mark the form dirty.
    pub fn set_property_search(&mut self, local_id: &LocalId, term: impl Into<String>) -> bool {
        self.writable("set_property_search") && self.properties.set_search_term(local_id, term)
    }

    pub fn close_property_dropdown(&mut self, local_id: &LocalId) -> bool {
        self.properties.close_dropdown(local_id)
    }

    /// Candidate CRM fields for a property's picker.
    pub fn field_candidates(&self, local_id: &LocalId) -> Vec<&CrmField> {
        self.properties.search_results(local_id, self.loader.fields(), None)
    }

    /// Validate and assemble the request body. The structured mappings and the
    /// encoded format come from the same property snapshot.
    pub fn build_payload(&self) -> Result<FunctionPayload, ValidationError> {
        let snapshot = self.properties.snapshot();
        let pipeline = self.loader.selected_pipeline();
        let stage = self.stage.as_deref();
        validate(&self.name, &snapshot, pipeline, stage)?;

        let bitrix_field_mappings: Vec<FieldMapping> =
            snapshot.iter().filter_map(FunctionProperty::to_field_mapping).collect();
        Ok(FunctionPayload {
            bot: self.loader.bot_id().to_string(),
            name: self.name.trim().to_string(),
            trigger_instructions: self.instructions.clone(),
            bitrix_field_mappings,
            pipeline: pipeline.map(str::to_string),
            stage: stage.map(str::to_string),
            result_format: codec::encode_with(self.format_version, &snapshot, stage),
        })
    }

    /// Validate, encode, and submit. Creates when no record is open, updates
    /// otherwise. On success `on_persisted` runs and the editor resets; on
    /// failure every entered value is kept for a retry.
    pub async fn save<F>(&mut self, on_persisted: F) -> Result<FunctionRecord, EditorError>
    where
        F: FnOnce(&FunctionRecord),
    {
        if self.is_read_only() {
            return Err(EditorError::ReadOnly);
        }
        let payload = self.build_payload()?;

        let submitted = match &self.target {
            Some(id) => self.records.update_function(id, &payload).await,
            None => self.records.create_function(&payload).await,
        };
        let saved = submitted.map_err(|error| {
            warn!(
                function_id = ?self.target,
                error = %redact_sensitive(&format!("{error:#}")),
                "failed to save function"
            );
            EditorError::Submission(error)
        })?;

        info!(function_id = %saved.id, created = self.target.is_none(), "function saved");
        on_persisted(&saved);
        self.reset();
        Ok(saved)
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|value| !value.is_empty()).map(str::to_string)
}

/// Rebuild an editable property from its persisted triple, recovering what the
/// flat encoding dropped from the structured mappings and the CRM field list.
fn enrich(encoded: &EncodedProperty, mappings: &[FieldMapping], fields: &[CrmField]) -> FunctionProperty {
    let code = encoded.field_code.trim();
    let mapping = mappings.iter().find(|mapping| mapping.crm_field_code.trim() == code);
    let field = fields.iter().find(|field| field.id == code);

    let mut property = FunctionProperty::blank(mint_local_id());
    property.field_code = code.to_string();
    property.field_name = [
        Some(encoded.field_name.trim()),
        mapping.map(|mapping| mapping.crm_field_name.trim()),
        field.map(|field| field.title.trim()),
    ]
    .into_iter()
    .flatten()
    .find(|candidate| !candidate.is_empty())
    .unwrap_or_default()
    .to_string();
    property.name = mapping
        .map(|mapping| mapping.name.trim())
        .filter(|name| !name.is_empty())
        .unwrap_or(code)
        .to_string();
    property.value_type = mapping
        .and_then(|mapping| mapping.data_type.clone())
        .or_else(|| field.and_then(|field| field.value_type.clone()));
    property.description = encoded.description.clone();
    property.required = field.is_some_and(|field| field.is_required);
    property
}
