//! Cascading CRM lookups for one bot session.
//!
//! Fields and pipelines are loaded together on first need. Stages hang off
//! the selected pipeline and are reloaded on every selection change.
//!
//! Every request carries a [`LoadToken`]. Selecting a pipeline bumps the
//! generation and [`DependentLoader::reset`] bumps the session, so a response
//! that arrives after either is recognised as stale and dropped. Callers that
//! need to drive the network themselves use the two-phase API
//! (`select_pipeline` → `fetch_stages` → `apply_stages`); everyone else uses
//! the async wrappers.

use std::sync::Arc;

use anyhow::Result;
use crmbot_types::{CrmField, Pipeline, Stage};
use tracing::{debug, info, warn};

use crate::metadata::MetadataCache;

/// Identity of an in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadToken {
    pub session: u64,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRequest {
    pub token: LoadToken,
    pub bot_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRequest {
    pub token: LoadToken,
    pub bot_id: String,
    pub pipeline_id: String,
}

/// Raw results of a fields + pipelines round trip.
#[derive(Debug)]
pub struct MetadataOutcome {
    pub fields: Result<Vec<CrmField>>,
    pub pipelines: Result<Vec<Pipeline>>,
}

#[derive(Debug)]
pub struct DependentLoader {
    cache: Arc<MetadataCache>,
    bot_id: String,
    session: u64,
    generation: u64,
    loading: bool,
    metadata_loaded: bool,
    fields: Vec<CrmField>,
    pipelines: Vec<Pipeline>,
    selected_pipeline: Option<String>,
    stages: Vec<Stage>,
    stages_loading: bool,
}

impl DependentLoader {
    pub fn new(cache: Arc<MetadataCache>, bot_id: impl Into<String>) -> Self {
        Self {
            cache,
            bot_id: bot_id.into(),
            session: 0,
            generation: 0,
            loading: false,
            metadata_loaded: false,
            fields: Vec::new(),
            pipelines: Vec::new(),
            selected_pipeline: None,
            stages: Vec::new(),
            stages_loading: false,
        }
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    pub fn fields(&self) -> &[CrmField] {
        &self.fields
    }

    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn selected_pipeline(&self) -> Option<&str> {
        self.selected_pipeline.as_deref()
    }

    /// True while a fields + pipelines load is outstanding.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_loading_stages(&self) -> bool {
        self.stages_loading
    }

    /// True once fields and pipelines have both loaded successfully.
    pub fn is_metadata_loaded(&self) -> bool {
        self.metadata_loaded
    }

    pub fn current_token(&self) -> LoadToken {
        LoadToken {
            session: self.session,
            generation: self.generation,
        }
    }

    /// Start a fields + pipelines load and raise the loading flag.
    pub fn begin_metadata_load(&mut self) -> MetadataRequest {
        self.loading = true;
        MetadataRequest {
            token: self.current_token(),
            bot_id: self.bot_id.clone(),
        }
    }

    /// Fetch fields and pipelines concurrently.
    pub async fn fetch_metadata(cache: &MetadataCache, request: &MetadataRequest) -> MetadataOutcome {
        let (fields, pipelines) = tokio::join!(cache.load_fields(&request.bot_id), cache.load_pipelines(&request.bot_id));
        MetadataOutcome { fields, pipelines }
    }

    /// Apply a metadata outcome. Failures keep whatever was loaded before.
    /// Returns `false` when the request belongs to an earlier session.
    pub fn apply_metadata(&mut self, request: &MetadataRequest, outcome: MetadataOutcome) -> bool {
        if request.token.session != self.session || request.bot_id != self.bot_id {
            debug!(bot_id = %request.bot_id, "dropping metadata response from a previous session");
            return false;
        }
        self.loading = false;

        let mut complete = true;
        match outcome.fields {
            Ok(fields) => self.fields = fields,
            Err(error) => {
                complete = false;
                warn!(bot_id = %self.bot_id, error = %format!("{error:#}"), "failed to load CRM fields; keeping previous values");
            }
        }
        match outcome.pipelines {
            Ok(pipelines) => self.pipelines = pipelines,
            Err(error) => {
                complete = false;
                warn!(bot_id = %self.bot_id, error = %format!("{error:#}"), "failed to load pipelines; keeping previous values");
            }
        }
        self.metadata_loaded = complete;
        debug!(
            bot_id = %self.bot_id,
            field_count = self.fields.len(),
            pipeline_count = self.pipelines.len(),
            complete,
            "crm metadata applied"
        );
        true
    }

    /// Load fields and pipelines unless both are already loaded.
    pub async fn ensure_metadata(&mut self) {
        if self.metadata_loaded {
            return;
        }
        let request = self.begin_metadata_load();
        let cache = Arc::clone(&self.cache);
        let outcome = Self::fetch_metadata(&cache, &request).await;
        self.apply_metadata(&request, outcome);
    }

    /// Drop this bot's cached metadata and load it again.
    pub async fn refresh_metadata(&mut self) {
        self.cache.invalidate(&self.bot_id);
        self.metadata_loaded = false;
        self.ensure_metadata().await;
    }

    /// Change the selected pipeline.
    ///
    /// Stages are cleared immediately and any earlier stage request becomes
    /// stale. Returns the request to issue, or `None` when the selection was
    /// cleared and nothing needs fetching.
    pub fn select_pipeline(&mut self, pipeline_id: Option<String>) -> Option<StageRequest> {
        let pipeline_id = pipeline_id.map(|id| id.trim().to_string()).filter(|id| !id.is_empty());
        self.generation += 1;
        self.stages.clear();
        self.selected_pipeline = pipeline_id.clone();
        self.stages_loading = pipeline_id.is_some();

        let pipeline_id = pipeline_id?;
        debug!(bot_id = %self.bot_id, pipeline_id = %pipeline_id, generation = self.generation, "pipeline selected");
        Some(StageRequest {
            token: self.current_token(),
            bot_id: self.bot_id.clone(),
            pipeline_id,
        })
    }

    pub async fn fetch_stages(cache: &MetadataCache, request: &StageRequest) -> Result<Vec<Stage>> {
        cache.load_stages(&request.bot_id, &request.pipeline_id).await
    }

    /// Apply a stage response if it answers the latest selection.
    ///
    /// A failed fetch leaves the stage list empty rather than stale.
    pub fn apply_stages(&mut self, request: &StageRequest, result: Result<Vec<Stage>>) -> bool {
        if request.token != self.current_token() {
            debug!(
                pipeline_id = %request.pipeline_id,
                generation = request.token.generation,
                current_generation = self.generation,
                "dropping stale stage response"
            );
            return false;
        }
        self.stages_loading = false;
        match result {
            Ok(stages) => {
                debug!(pipeline_id = %request.pipeline_id, item_count = stages.len(), "stages applied");
                self.stages = stages;
            }
            Err(error) => {
                warn!(pipeline_id = %request.pipeline_id, error = %format!("{error:#}"), "failed to load stages");
                self.stages.clear();
            }
        }
        true
    }

    /// Select a pipeline and load its stages.
    pub async fn change_pipeline(&mut self, pipeline_id: Option<String>) {
        let Some(request) = self.select_pipeline(pipeline_id) else {
            return;
        };
        let cache = Arc::clone(&self.cache);
        let result = Self::fetch_stages(&cache, &request).await;
        self.apply_stages(&request, result);
    }

    /// Install a pipeline together with stages fetched out of band.
    pub(crate) fn adopt_pipeline(&mut self, pipeline_id: Option<String>, stages: Vec<Stage>) {
        self.generation += 1;
        self.stages_loading = false;
        self.stages = if pipeline_id.is_some() { stages } else { Vec::new() };
        self.selected_pipeline = pipeline_id;
    }

    /// Forget the selection and discard every in-flight response.
    /// Loaded fields and pipelines stay.
    pub fn reset(&mut self) {
        self.session += 1;
        self.generation += 1;
        self.loading = false;
        self.stages_loading = false;
        self.selected_pipeline = None;
        self.stages.clear();
    }

    /// Point the loader at another bot. Nothing of the previous bot survives.
    pub fn switch_bot(&mut self, bot_id: impl Into<String>) {
        let bot_id = bot_id.into();
        if bot_id == self.bot_id {
            return;
        }
        info!(from = %self.bot_id, to = %bot_id, "switching bot");
        self.reset();
        self.bot_id = bot_id;
        self.fields.clear();
        self.pipelines.clear();
        self.metadata_loaded = false;
    }
}
