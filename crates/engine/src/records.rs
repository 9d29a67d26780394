//! Persistence seam for function definitions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use crmbot_api::ConsoleClient;
use crmbot_types::{FunctionId, FunctionPage, FunctionPayload, FunctionRecord};

/// CRUD over persisted function definitions.
#[async_trait]
pub trait FunctionRecordService: Send + Sync {
    async fn list_functions(&self, bot_id: &str, page_number: u32, page_size: u32) -> Result<FunctionPage>;
    async fn fetch_function(&self, id: &FunctionId) -> Result<FunctionRecord>;
    async fn create_function(&self, payload: &FunctionPayload) -> Result<FunctionRecord>;
    async fn update_function(&self, id: &FunctionId, payload: &FunctionPayload) -> Result<FunctionRecord>;
    async fn delete_function(&self, id: &FunctionId) -> Result<()>;
}

#[async_trait]
impl FunctionRecordService for ConsoleClient {
    async fn list_functions(&self, bot_id: &str, page_number: u32, page_size: u32) -> Result<FunctionPage> {
        ConsoleClient::list_functions(self, bot_id, page_number, page_size)
            .await
            .with_context(|| format!("list functions of bot {bot_id} (page {page_number})"))
    }

    async fn fetch_function(&self, id: &FunctionId) -> Result<FunctionRecord> {
        self.get_function(id).await.with_context(|| format!("fetch function {id}"))
    }

    async fn create_function(&self, payload: &FunctionPayload) -> Result<FunctionRecord> {
        ConsoleClient::create_function(self, payload)
            .await
            .with_context(|| format!("create function '{}'", payload.name))
    }

    async fn update_function(&self, id: &FunctionId, payload: &FunctionPayload) -> Result<FunctionRecord> {
        ConsoleClient::update_function(self, id, payload)
            .await
            .with_context(|| format!("update function {id}"))
    }

    async fn delete_function(&self, id: &FunctionId) -> Result<()> {
        ConsoleClient::delete_function(self, id)
            .await
            .with_context(|| format!("delete function {id}"))
    }
}
