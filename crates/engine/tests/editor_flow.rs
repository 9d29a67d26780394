use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use crmbot_engine::{
    CrmMetadataSource, DependentLoader, EditorMode, FunctionCatalog, FunctionEditor, FunctionRecordService, MetadataCache,
    PropertyUpdate, codec,
};
use crmbot_types::{
    CrmField, EntityType, FormatVersion, FunctionId, FunctionPage, FunctionPayload, FunctionRecord, Pipeline, Stage,
};
use tokio::sync::{Notify, mpsc};

/// Backend double serving both metadata and records. Stage requests for the
/// gated pipeline wait until the test releases them.
struct Backend {
    records: Mutex<BTreeMap<String, FunctionRecord>>,
    next_id: AtomicU64,
    gated_pipeline: Option<String>,
    gate: Notify,
}

impl Backend {
    fn new(gated_pipeline: Option<&str>) -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            gated_pipeline: gated_pipeline.map(str::to_string),
            gate: Notify::new(),
        }
    }

    fn persist(&self, id: String, payload: &FunctionPayload) -> FunctionRecord {
        let record = FunctionRecord {
            id: FunctionId::new(id.clone()),
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

fn field(id: &str, title: &str) -> CrmField {
    CrmField {
        id: id.into(),
        title: title.into(),
        value_type: Some("string".into()),
        entity_type: Some(EntityType::Deal),
        is_required: false,
        is_readonly: false,
        is_multiple: false,
        is_custom: false,
    }
}

#[async_trait]
impl CrmMetadataSource for Backend {
    async fn fetch_fields(&self, _bot_id: &str) -> Result<Vec<CrmField>> {
        Ok(vec![field("TITLE", "Title"), field("OPPORTUNITY", "Amount")])
    }

    async fn fetch_pipelines(&self, _bot_id: &str, _entity_type: EntityType) -> Result<Vec<Pipeline>> {
        Ok(vec![
            Pipeline {
                pipeline_id: "10".into(),
                pipeline_name: "Sales".into(),
            },
            Pipeline {
                pipeline_id: "20".into(),
                pipeline_name: "Renewals".into(),
            },
        ])
    }

    async fn fetch_stages(&self, _bot_id: &str, pipeline_id: &str, _entity_type: EntityType) -> Result<Vec<Stage>> {
        if self.gated_pipeline.as_deref() == Some(pipeline_id) {
            self.gate.notified().await;
        }
        Ok(vec![Stage {
            stage_code: format!("C{pipeline_id}:NEW"),
            stage_name: "New".into(),
            pipeline_id: None,
        }])
    }
}

#[async_trait]
impl FunctionRecordService for Backend {
    async fn list_functions(&self, _bot_id: &str, page_number: u32, page_size: u32) -> Result<FunctionPage> {
        let records = self.records.lock().unwrap();
        let skip = ((page_number.max(1) - 1) * page_size) as usize;
        Ok(FunctionPage {
            count: records.len() as u64,
            results: records.values().skip(skip).take(page_size as usize).cloned().collect(),
        })
    }

    async fn fetch_function(&self, id: &FunctionId) -> Result<FunctionRecord> {
        self.records
            .lock()
            .unwrap()
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| anyhow!("function {id} not found"))
    }

    async fn create_function(&self, payload: &FunctionPayload) -> Result<FunctionRecord> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        Ok(self.persist(id, payload))
    }

    async fn update_function(&self, id: &FunctionId, payload: &FunctionPayload) -> Result<FunctionRecord> {
        Ok(self.persist(id.to_string(), payload))
    }

    async fn delete_function(&self, id: &FunctionId) -> Result<()> {
        self.records.lock().unwrap().remove(id.as_str());
        Ok(())
    }
}

fn editor(backend: &Arc<Backend>, format_version: FormatVersion) -> FunctionEditor {
    let cache = MetadataCache::new(Arc::clone(backend) as Arc<dyn CrmMetadataSource>, None);
    let loader = DependentLoader::new(Arc::new(cache), "bot-1");
    FunctionEditor::new(Arc::clone(backend) as Arc<dyn FunctionRecordService>, loader, format_version)
}

#[tokio::test]
async fn create_list_edit_and_save_round_trip() {
    let backend = Arc::new(Backend::new(None));
    let mut editor = editor(&backend, FormatVersion::Legacy);
    let mut catalog = FunctionCatalog::new(Arc::clone(&backend) as Arc<dyn FunctionRecordService>, "bot-1", 10);

    editor.loader_mut().ensure_metadata().await;
    editor.set_name("Capture amount");
    editor.set_instructions("When the client names a budget");
    editor.change_pipeline(Some("10".into())).await;
    editor.select_stage(Some("C10:NEW".into()));
    let id = editor.add_property().expect("create mode is writable");
    editor.set_property_search(&id, "amo");
    let amount = editor.field_candidates(&id)[0].clone();
    editor.select_property_field(&id, &amount);
    editor.update_property(&id, PropertyUpdate::Description("Budget in USD".into()));

    editor.save(|_| catalog.invalidate()).await.expect("create");
    assert_eq!(editor.mode(), EditorMode::Create);

    catalog.ensure_fresh().await.expect("list");
    let listed = catalog.items()[0].clone();
    assert_eq!(catalog.total(), 1);
    assert_eq!(
        listed.result_format.as_deref(),
        Some(r#"Stage: C10:NEW|Properties: [{"field_code":"OPPORTUNITY","field_name":"Amount","description":"Budget in USD"}]"#)
    );

    editor.enter_edit(&listed).await.expect("edit");
    assert_eq!(editor.mode(), EditorMode::Edit);
    assert_eq!(editor.stage(), Some("C10:NEW"));
    assert_eq!(editor.pipeline(), Some("10"));
    let entry = editor.properties().entries().next().expect("one property").clone();
    assert_eq!(entry.property.field_name, "Amount");
    assert_eq!(entry.search.search_term, "Amount");

    editor.remove_property(&entry.property.local_id);
    editor.save(|_| catalog.invalidate()).await.expect("update");

    catalog.ensure_fresh().await.expect("list");
    assert_eq!(catalog.total(), 1);
    assert_eq!(catalog.items()[0].result_format.as_deref(), Some("Stage: C10:NEW"));
    assert!(catalog.items()[0].bitrix_field_mappings.is_empty());
}

#[tokio::test]
async fn versioned_writes_are_readable_after_reload() {
    let backend = Arc::new(Backend::new(None));
    let mut editor = editor(&backend, FormatVersion::Versioned);

    editor.set_name("Capture title");
    let id = editor.add_property().expect("writable");
    editor.update_property(&id, PropertyUpdate::FieldCode("TITLE".into()));
    let saved = editor.save(|_| {}).await.expect("create");

    let report = codec::decode_detailed(saved.result_format.as_deref());
    assert!(report.is_clean());
    assert_eq!(report.version, Some(FormatVersion::Versioned));

    editor.enter_view(&saved).await.expect("view");
    let entry = editor.properties().entries().next().expect("one property");
    assert_eq!(entry.property.field_name, "Title");
    assert!(editor.pipeline().is_none());
}

#[tokio::test]
async fn late_stage_response_for_previous_pipeline_is_dropped() {
    let backend = Arc::new(Backend::new(Some("10")));
    let mut editor = editor(&backend, FormatVersion::Legacy);
    let cache = Arc::clone(editor.loader().cache());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let first = editor.select_pipeline(Some("10".into())).expect("stage request");
    let second = editor.select_pipeline(Some("20".into())).expect("stage request");
    for request in [first, second] {
        let cache = Arc::clone(&cache);
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = DependentLoader::fetch_stages(&cache, &request).await;
            let _ = tx.send((request, result));
        });
    }

    let (request, result) = rx.recv().await.expect("first response");
    assert_eq!(request.pipeline_id, "20");
    assert!(editor.loader_mut().apply_stages(&request, result));

    backend.gate.notify_one();
    let (request, result) = rx.recv().await.expect("second response");
    assert_eq!(request.pipeline_id, "10");
    assert!(!editor.loader_mut().apply_stages(&request, result));

    let codes: Vec<_> = editor.loader().stages().iter().map(|stage| stage.stage_code.as_str()).collect();
    assert_eq!(codes, vec!["C20:NEW"]);
    assert_eq!(editor.pipeline(), Some("20"));
}

#[tokio::test]
async fn reset_discards_pending_stage_response() {
    let backend = Arc::new(Backend::new(Some("10")));
    let mut editor = editor(&backend, FormatVersion::Legacy);
    let cache = Arc::clone(editor.loader().cache());

    let request = editor.select_pipeline(Some("10".into())).expect("stage request");
    let pending = tokio::spawn(async move {
        let result = DependentLoader::fetch_stages(&cache, &request).await;
        (request, result)
    });

    editor.reset();
    backend.gate.notify_one();
    let (request, result) = pending.await.expect("task");

    assert!(!editor.loader_mut().apply_stages(&request, result));
    assert!(editor.loader().stages().is_empty());
    assert!(editor.pipeline().is_none());
}
