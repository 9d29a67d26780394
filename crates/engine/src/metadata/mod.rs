//! CRM metadata: collaborator seam, per-bot cache, and field filtering.
//!
//! Modules:
//! - `cache`: Bot-keyed cache of fields and pipelines with explicit invalidation
//! - `fetch`: HTTP-backed implementation of [`CrmMetadataSource`]
//! - `filter`: Client-side search over CRM fields

mod cache;
mod fetch;
mod filter;

use anyhow::Result;
use async_trait::async_trait;
use crmbot_types::{CrmField, EntityType, Pipeline, Stage};

pub use cache::MetadataCache;
pub use filter::filter_fields;

/// The only entity type that carries pipelines in the upstream CRM.
pub const PIPELINE_ENTITY_TYPE: EntityType = EntityType::Deal;

/// Source of CRM fields, pipelines, and stages for a bot.
#[async_trait]
pub trait CrmMetadataSource: Send + Sync {
    async fn fetch_fields(&self, bot_id: &str) -> Result<Vec<CrmField>>;
    async fn fetch_pipelines(&self, bot_id: &str, entity_type: EntityType) -> Result<Vec<Pipeline>>;
    async fn fetch_stages(&self, bot_id: &str, pipeline_id: &str, entity_type: EntityType) -> Result<Vec<Stage>>;
}
