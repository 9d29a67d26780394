//! In-memory collaborators shared by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use crmbot_types::{CrmField, EntityType, FunctionId, FunctionPage, FunctionPayload, FunctionRecord, Pipeline, Stage};

use crate::metadata::CrmMetadataSource;
use crate::records::FunctionRecordService;

pub(crate) fn crm_field(id: &str, title: &str, required: bool) -> CrmField {
    CrmField {
        id: id.into(),
        title: title.into(),
        value_type: Some("string".into()),
        entity_type: Some(EntityType::Deal),
        is_required: required,
        is_readonly: false,
        is_multiple: false,
        is_custom: id.starts_with("UF_"),
    }
}

pub(crate) fn stage(code: &str, name: &str, pipeline_id: &str) -> Stage {
    Stage {
        stage_code: code.into(),
        stage_name: name.into(),
        pipeline_id: Some(pipeline_id.into()),
    }
}

#[derive(Default)]
pub(crate) struct FakeMetadataSource {
    fields: Vec<CrmField>,
    pipelines: Vec<Pipeline>,
    stages: HashMap<String, Vec<Stage>>,
    field_calls: AtomicUsize,
    pipeline_calls: AtomicUsize,
    stage_calls: AtomicUsize,
    fail_fields: AtomicBool,
    fail_pipelines: AtomicBool,
    fail_stages: AtomicBool,
}

impl FakeMetadataSource {
    pub(crate) fn sample() -> Self {
        let mut stages = HashMap::new();
        stages.insert("1".to_string(), vec![stage("C1:NEW", "New", "1"), stage("C1:WON", "Won", "1")]);
        stages.insert("2".to_string(), vec![stage("C2:NEW", "New partner", "2")]);
        Self {
            fields: vec![
                crm_field("TITLE", "Deal title", true),
                crm_field("UF_CRM_BUDGET", "Budget", false),
                crm_field("COMMENTS", "Comments", false),
            ],
            pipelines: vec![
                Pipeline {
                    pipeline_id: "1".into(),
                    pipeline_name: "Sales".into(),
                },
                Pipeline {
                    pipeline_id: "2".into(),
                    pipeline_name: "Partners".into(),
                },
            ],
            stages,
            ..Self::default()
        }
    }

    pub(crate) fn field_calls(&self) -> usize {
        self.field_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn pipeline_calls(&self) -> usize {
        self.pipeline_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn stage_calls(&self) -> usize {
        self.stage_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_fields(&self, fail: bool) {
        self.fail_fields.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_pipelines(&self, fail: bool) {
        self.fail_pipelines.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_stages(&self, fail: bool) {
        self.fail_stages.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CrmMetadataSource for FakeMetadataSource {
    async fn fetch_fields(&self, _bot_id: &str) -> Result<Vec<CrmField>> {
        self.field_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fields.load(Ordering::SeqCst) {
            bail!("crm-fields unavailable");
        }
        Ok(self.fields.clone())
    }

    async fn fetch_pipelines(&self, _bot_id: &str, _entity_type: EntityType) -> Result<Vec<Pipeline>> {
        self.pipeline_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_pipelines.load(Ordering::SeqCst) {
            bail!("pipelines unavailable");
        }
        Ok(self.pipelines.clone())
    }

    async fn fetch_stages(&self, _bot_id: &str, pipeline_id: &str, _entity_type: EntityType) -> Result<Vec<Stage>> {
        self.stage_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stages.load(Ordering::SeqCst) {
            bail!("stages unavailable");
        }
        Ok(self.stages.get(pipeline_id).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub(crate) struct FakeRecordService {
    records: Mutex<HashMap<FunctionId, FunctionRecord>>,
    submitted: Mutex<Vec<FunctionPayload>>,
    fetch_calls: AtomicUsize,
    fail_fetch: AtomicBool,
    fail_submit: AtomicBool,
    next_id: AtomicUsize,
}

impl FakeRecordService {
    pub(crate) fn with_records(records: Vec<FunctionRecord>) -> Self {
        let service = Self::default();
        {
            let mut stored = service.records.lock().unwrap();
            for record in records {
                stored.insert(record.id.clone(), record);
            }
        }
        service.next_id.store(100, Ordering::SeqCst);
        service
    }

    pub(crate) fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_submit(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn submitted(&self) -> Vec<FunctionPayload> {
        self.submitted.lock().unwrap().clone()
    }

    pub(crate) fn record(&self, id: &str) -> Option<FunctionRecord> {
        self.records.lock().unwrap().get(&FunctionId::new(id)).cloned()
    }

    pub(crate) fn insert(&self, record: FunctionRecord) {
        self.records.lock().unwrap().insert(record.id.clone(), record);
    }

    /// Store `record` under `id` regardless of the id it carries.
    pub(crate) fn insert_as(&self, id: &FunctionId, record: FunctionRecord) {
        self.records.lock().unwrap().insert(id.clone(), record);
    }

    fn store(&self, id: FunctionId, payload: &FunctionPayload) -> FunctionRecord {
        let record = FunctionRecord {
            id: id.clone(),
            name: payload.name.clone(),
            trigger_instructions: payload.trigger_instructions.clone(),
            bitrix_field_mappings: payload.bitrix_field_mappings.clone(),
            result_format: payload.result_format.clone(),
            pipeline: payload.pipeline.clone(),
            stage: payload.stage.clone(),
            ..FunctionRecord::default()
        };
        self.records.lock().unwrap().insert(id, record.clone());
        record
    }
}

#[async_trait]
impl FunctionRecordService for FakeRecordService {
    async fn list_functions(&self, _bot_id: &str, page_number: u32, page_size: u32) -> Result<FunctionPage> {
        let mut all: Vec<FunctionRecord> = self.records.lock().unwrap().values().cloned().collect();
        all.sort_by(|left, right| left.id.as_str().cmp(right.id.as_str()));
        let count = all.len() as u64;
        let start = (page_number.saturating_sub(1) * page_size) as usize;
        let results = all.into_iter().skip(start).take(page_size as usize).collect();
        Ok(FunctionPage { count, results })
    }

    async fn fetch_function(&self, id: &FunctionId) -> Result<FunctionRecord> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            bail!("HTTP 503: backend unavailable");
        }
        self.records
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("HTTP 404: function {id} not found"))
    }

    async fn create_function(&self, payload: &FunctionPayload) -> Result<FunctionRecord> {
        self.submitted.lock().unwrap().push(payload.clone());
        if self.fail_submit.load(Ordering::SeqCst) {
            bail!("HTTP 401: session expired");
        }
        let id = FunctionId::new(self.next_id.fetch_add(1, Ordering::SeqCst).to_string());
        Ok(self.store(id, payload))
    }

    async fn update_function(&self, id: &FunctionId, payload: &FunctionPayload) -> Result<FunctionRecord> {
        self.submitted.lock().unwrap().push(payload.clone());
        if self.fail_submit.load(Ordering::SeqCst) {
            bail!("HTTP 401: session expired");
        }
        Ok(self.store(id.clone(), payload))
    }

    async fn delete_function(&self, id: &FunctionId) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("HTTP 404: function {id} not found"))
    }
}
