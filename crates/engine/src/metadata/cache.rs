use anyhow::Result;
use crmbot_types::{CrmField, EntityType, Pipeline, Stage};
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tracing::{debug, info};

use super::{CrmMetadataSource, PIPELINE_ENTITY_TYPE};

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    fetched_at: Instant,
    items: Vec<T>,
}

impl<T: Clone> CacheEntry<T> {
    fn new(items: Vec<T>) -> Self {
        Self {
            fetched_at: Instant::now(),
            items,
        }
    }

    fn fresh_items(&self, max_age: Option<Duration>) -> Option<Vec<T>> {
        match max_age {
            Some(max_age) if self.fetched_at.elapsed() >= max_age => None,
            _ => Some(self.items.clone()),
        }
    }
}

#[derive(Debug, Default)]
struct BotMetadata {
    fields: Option<CacheEntry<CrmField>>,
    pipelines: Option<CacheEntry<Pipeline>>,
}

/// Per-bot cache of CRM fields and pipelines.
///
/// Fields and pipelines are fetched once per bot and served from memory until
/// [`invalidate`](Self::invalidate) is called or the optional `max_age`
/// elapses. Stages are pipeline-scoped and cheap, so they always go to the
/// source. Failed fetches never touch cached values.
///
/// The lock is only held for lookups and stores, never across an `.await`.
pub struct MetadataCache {
    source: Arc<dyn CrmMetadataSource>,
    entries: Mutex<HashMap<String, BotMetadata>>,
    max_age: Option<Duration>,
}

impl fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataCache").field("max_age", &self.max_age).finish()
    }
}

impl MetadataCache {
    pub fn new(source: Arc<dyn CrmMetadataSource>, max_age: Option<Duration>) -> Self {
        Self {
            source,
            entries: Mutex::new(HashMap::new()),
            max_age,
        }
    }

    /// Cached fields for `bot_id`, if present and fresh. Never fetches.
    pub fn cached_fields(&self, bot_id: &str) -> Option<Vec<CrmField>> {
        let entries = self.entries.lock().expect("metadata cache lock");
        entries.get(bot_id)?.fields.as_ref()?.fresh_items(self.max_age)
    }

    /// Cached pipelines for `bot_id`, if present and fresh. Never fetches.
    pub fn cached_pipelines(&self, bot_id: &str) -> Option<Vec<Pipeline>> {
        let entries = self.entries.lock().expect("metadata cache lock");
        entries.get(bot_id)?.pipelines.as_ref()?.fresh_items(self.max_age)
    }

    pub async fn load_fields(&self, bot_id: &str) -> Result<Vec<CrmField>> {
        if let Some(items) = self.cached_fields(bot_id) {
            debug!(bot_id, item_count = items.len(), "crm field cache hit");
            return Ok(items);
        }

        debug!(bot_id, "crm field cache miss");
        let items = self.source.fetch_fields(bot_id).await?;
        info!(bot_id, item_count = items.len(), "crm fields fetched");
        self.entries.lock().expect("metadata cache lock").entry(bot_id.to_string()).or_default().fields =
            Some(CacheEntry::new(items.clone()));
        Ok(items)
    }

    /// Pipelines of the pipeline-bearing entity type.
    pub async fn load_pipelines(&self, bot_id: &str) -> Result<Vec<Pipeline>> {
        self.load_pipelines_for(bot_id, PIPELINE_ENTITY_TYPE).await
    }

    /// Pipelines for `entity_type`. Entity types without pipelines yield an
    /// empty list without a request.
    pub async fn load_pipelines_for(&self, bot_id: &str, entity_type: EntityType) -> Result<Vec<Pipeline>> {
        if !entity_type.has_pipelines() {
            debug!(bot_id, %entity_type, "entity type has no pipelines");
            return Ok(Vec::new());
        }

        if let Some(items) = self.cached_pipelines(bot_id) {
            debug!(bot_id, item_count = items.len(), "pipeline cache hit");
            return Ok(items);
        }

        debug!(bot_id, "pipeline cache miss");
        let items = self.source.fetch_pipelines(bot_id, entity_type).await?;
        info!(bot_id, item_count = items.len(), "pipelines fetched");
        self.entries.lock().expect("metadata cache lock").entry(bot_id.to_string()).or_default().pipelines =
            Some(CacheEntry::new(items.clone()));
        Ok(items)
    }

    /// Stages of `pipeline_id`. Not cached; an empty id yields an empty list
    /// without a request. Stages the source returned without a pipeline id are
    /// attributed to the requested pipeline.
    pub async fn load_stages(&self, bot_id: &str, pipeline_id: &str) -> Result<Vec<Stage>> {
        let pipeline_id = pipeline_id.trim();
        if pipeline_id.is_empty() {
            return Ok(Vec::new());
        }

        let mut stages = self.source.fetch_stages(bot_id, pipeline_id, PIPELINE_ENTITY_TYPE).await?;
        for stage in &mut stages {
            if stage.pipeline_id.is_none() {
                stage.pipeline_id = Some(pipeline_id.to_string());
            }
        }
        debug!(bot_id, pipeline_id, item_count = stages.len(), "stages fetched");
        Ok(stages)
    }

    pub fn invalidate(&self, bot_id: &str) {
        if self.entries.lock().expect("metadata cache lock").remove(bot_id).is_some() {
            debug!(bot_id, "crm metadata cache invalidated");
        }
    }

    pub fn invalidate_all(&self) {
        self.entries.lock().expect("metadata cache lock").clear();
    }
}
