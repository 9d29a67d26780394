use anyhow::Context;
use async_trait::async_trait;
use crmbot_api::ConsoleClient;
use crmbot_types::{CrmField, EntityType, Pipeline, Stage};

use super::CrmMetadataSource;

#[async_trait]
impl CrmMetadataSource for ConsoleClient {
    async fn fetch_fields(&self, bot_id: &str) -> anyhow::Result<Vec<CrmField>> {
        self.crm_fields(bot_id)
            .await
            .with_context(|| format!("fetch CRM fields for bot {bot_id}"))
    }

    async fn fetch_pipelines(&self, bot_id: &str, entity_type: EntityType) -> anyhow::Result<Vec<Pipeline>> {
        self.pipelines(bot_id, entity_type)
            .await
            .with_context(|| format!("fetch {entity_type} pipelines for bot {bot_id}"))
    }

    async fn fetch_stages(&self, bot_id: &str, pipeline_id: &str, entity_type: EntityType) -> anyhow::Result<Vec<Stage>> {
        self.stages(bot_id, pipeline_id, entity_type)
            .await
            .with_context(|| format!("fetch stages of pipeline {pipeline_id} for bot {bot_id}"))
    }
}
