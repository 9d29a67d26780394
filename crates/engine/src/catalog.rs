//! Paginated listing of a bot's function definitions.

use std::sync::Arc;

use anyhow::Result;
use crmbot_types::{FunctionDefinition, FunctionId, FunctionRecord};
use tracing::{debug, info};

use crate::records::FunctionRecordService;

pub const DEFAULT_PAGE_SIZE: u32 = 20;

pub struct FunctionCatalog {
    records: Arc<dyn FunctionRecordService>,
    bot_id: String,
    page_number: u32,
    page_size: u32,
    total: u64,
    items: Vec<FunctionRecord>,
    stale: bool,
}

impl std::fmt::Debug for FunctionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionCatalog")
            .field("bot_id", &self.bot_id)
            .field("page_number", &self.page_number)
            .field("page_size", &self.page_size)
            .field("total", &self.total)
            .field("item_count", &self.items.len())
            .finish()
    }
}

impl FunctionCatalog {
    pub fn new(records: Arc<dyn FunctionRecordService>, bot_id: impl Into<String>, page_size: u32) -> Self {
        Self {
            records,
            bot_id: bot_id.into(),
            page_number: 1,
            page_size: if page_size == 0 { DEFAULT_PAGE_SIZE } else { page_size },
            total: 0,
            items: Vec::new(),
            stale: true,
        }
    }

    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    /// 1-based.
    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn page_count(&self) -> u32 {
        let pages = self.total.div_ceil(u64::from(self.page_size));
        u32::try_from(pages).unwrap_or(u32::MAX).max(1)
    }

    pub fn items(&self) -> &[FunctionRecord] {
        &self.items
    }

    pub fn definitions(&self) -> Vec<FunctionDefinition> {
        self.items.iter().cloned().map(FunctionDefinition::from).collect()
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Mark the listing out of date, typically after a save.
    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    /// Reload the current page. A page left past the end by a delete steps
    /// back to the last page.
    pub async fn refresh(&mut self) -> Result<()> {
        loop {
            let page = self.records.list_functions(&self.bot_id, self.page_number, self.page_size).await?;
            debug!(
                bot_id = %self.bot_id,
                page_number = self.page_number,
                item_count = page.results.len(),
                total = page.count,
                "function page loaded"
            );
            self.total = page.count;
            self.items = page.results;
            self.stale = false;

            if self.items.is_empty() && self.page_number > self.page_count() {
                self.page_number = self.page_count();
                continue;
            }
            return Ok(());
        }
    }

    /// Refresh only if something marked the listing stale.
    pub async fn ensure_fresh(&mut self) -> Result<()> {
        if self.stale { self.refresh().await } else { Ok(()) }
    }

    pub async fn goto_page(&mut self, page_number: u32) -> Result<()> {
        self.page_number = page_number.max(1);
        self.refresh().await
    }

    /// Returns `false` when already on the last page.
    pub async fn next_page(&mut self) -> Result<bool> {
        if self.page_number >= self.page_count() {
            return Ok(false);
        }
        self.goto_page(self.page_number + 1).await?;
        Ok(true)
    }

    /// Returns `false` when already on the first page.
    pub async fn prev_page(&mut self) -> Result<bool> {
        if self.page_number <= 1 {
            return Ok(false);
        }
        self.goto_page(self.page_number - 1).await?;
        Ok(true)
    }

    pub async fn delete(&mut self, id: &FunctionId) -> Result<()> {
        self.records.delete_function(id).await?;
        info!(bot_id = %self.bot_id, function_id = %id, "function deleted");
        self.refresh().await
    }
}
