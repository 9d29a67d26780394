use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use crmbot_api::{ClientSettings, ConsoleClient, DEFAULT_API_BASE};
use crmbot_engine::codec::{self, EncodedProperty, ResultFormat};
use crmbot_engine::{
    CrmMetadataSource, DependentLoader, FunctionCatalog, FunctionEditor, FunctionRecordService, MetadataCache,
    PropertyUpdate, filter_fields,
};
use crmbot_types::{EntityType, FormatVersion, FunctionId, FunctionRecord};
use crmbot_util::{ConfigStore, ConsoleConfig, redact_sensitive};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Parser)]
#[command(name = "crmbot", version, about = "Manage CRM bot function definitions")]
struct Cli {
    /// Bot to operate on; defaults to `default_bot_id` from the config.
    #[arg(long, global = true)]
    bot: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(flatten)]
    Backend(BackendCommand),
    /// Encode or decode result-format strings offline.
    #[command(subcommand)]
    Format(FormatCommand),
    /// Show or change persisted configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Commands that talk to the console backend.
#[derive(Debug, Subcommand)]
enum BackendCommand {
    /// List, inspect, and edit function definitions.
    #[command(subcommand)]
    Functions(FunctionsCommand),
    /// Inspect CRM fields.
    #[command(subcommand)]
    Fields(FieldsCommand),
    /// List CRM pipelines.
    Pipelines {
        #[arg(long, default_value = "DEAL")]
        entity: EntityType,
    },
    /// List the stages of a pipeline.
    Stages { pipeline_id: String },
}

#[derive(Debug, Subcommand)]
enum FunctionsCommand {
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        page_size: Option<u32>,
    },
    Show {
        id: String,
        /// Include the decoded result format.
        #[arg(long)]
        decode: bool,
    },
    Create(FunctionArgs),
    Edit {
        id: String,
        #[command(flatten)]
        changes: FunctionArgs,
        /// Remove the mapping for a CRM field code. Repeatable.
        #[arg(long = "remove-field", value_name = "CODE")]
        remove_fields: Vec<String>,
        /// Drop pipeline and stage.
        #[arg(long, conflicts_with_all = ["pipeline", "stage"])]
        clear_stage: bool,
    },
    Delete {
        id: String,
    },
}

#[derive(Debug, Args)]
struct FunctionArgs {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    instructions: Option<String>,
    #[arg(long)]
    pipeline: Option<String>,
    #[arg(long)]
    stage: Option<String>,
    /// Map a CRM field, as `CODE` or `CODE=description`. Repeatable.
    #[arg(long = "field", value_name = "CODE[=DESCRIPTION]")]
    fields: Vec<String>,
    /// Write the versioned result format instead of the configured one.
    #[arg(long)]
    versioned: bool,
}

#[derive(Debug, Subcommand)]
enum FieldsCommand {
    Search {
        #[arg(default_value = "")]
        term: String,
        #[arg(long)]
        entity: Option<EntityType>,
    },
}

#[derive(Debug, Subcommand)]
enum FormatCommand {
    Encode {
        #[arg(long)]
        stage: Option<String>,
        /// `CODE=NAME=DESCRIPTION`; name and description are optional. Repeatable.
        #[arg(long = "property", value_name = "CODE[=NAME[=DESCRIPTION]]")]
        properties: Vec<String>,
        #[arg(long)]
        versioned: bool,
    },
    Decode {
        value: String,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    Show,
    Set { key: String, value: String },
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let store = ConfigStore::new().unwrap_or_else(|error| {
        warn!(error = %error, "failed to open config; using in-memory defaults");
        ConfigStore::ephemeral()
    });

    match cli.command {
        Command::Format(command) => run_format(command),
        Command::Config(command) => run_config(&store, command),
        Command::Backend(command) => {
            let session = Session::open(&store.effective(), cli.bot.as_deref())?;
            session.run(command).await
        }
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = log_subscriber(&filter).try_init();
}

fn log_subscriber(filter: &str) -> impl tracing::Subscriber + Send + Sync + 'static {
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).finish()
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

struct Session {
    config: ConsoleConfig,
    bot_id: String,
    client: Arc<ConsoleClient>,
    cache: Arc<MetadataCache>,
}

impl Session {
    fn open(config: &ConsoleConfig, bot: Option<&str>) -> Result<Self> {
        let bot_id = bot
            .or(config.default_bot_id.as_deref())
            .map(str::trim)
            .filter(|bot_id| !bot_id.is_empty())
            .context("no bot selected; pass --bot or run `crmbot config set default_bot_id <id>`")?
            .to_string();

        let settings = ClientSettings {
            base_url: config.api_base_url.clone().unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_token: config.api_token.clone(),
            ..ClientSettings::default()
        };
        let client = Arc::new(ConsoleClient::new(settings)?);
        let cache = Arc::new(MetadataCache::new(
            Arc::clone(&client) as Arc<dyn CrmMetadataSource>,
            config.metadata_cache_ttl(),
        ));
        debug!(%bot_id, base_url = %client.base_url, "session opened");

        Ok(Self {
            config: config.clone(),
            bot_id,
            client,
            cache,
        })
    }

    fn records(&self) -> Arc<dyn FunctionRecordService> {
        Arc::clone(&self.client) as Arc<dyn FunctionRecordService>
    }

    fn editor(&self, versioned: bool) -> FunctionEditor {
        let loader = DependentLoader::new(Arc::clone(&self.cache), self.bot_id.clone());
        let format_version = if versioned { FormatVersion::Versioned } else { self.config.result_format };
        FunctionEditor::new(self.records(), loader, format_version)
    }

    async fn run(&self, command: BackendCommand) -> Result<()> {
        match command {
            BackendCommand::Functions(command) => self.run_functions(command).await,
            BackendCommand::Fields(FieldsCommand::Search { term, entity }) => {
                let fields = self.cache.load_fields(&self.bot_id).await?;
                print_json(&filter_fields(&fields, &term, entity))
            }
            BackendCommand::Pipelines { entity } => print_json(&self.cache.load_pipelines_for(&self.bot_id, entity).await?),
            BackendCommand::Stages { pipeline_id } => print_json(&self.cache.load_stages(&self.bot_id, &pipeline_id).await?),
        }
    }

    async fn run_functions(&self, command: FunctionsCommand) -> Result<()> {
        match command {
            FunctionsCommand::List { page, page_size } => {
                let mut catalog =
                    FunctionCatalog::new(self.records(), self.bot_id.clone(), page_size.unwrap_or(self.config.page_size));
                catalog.goto_page(page).await?;
                print_json(&json!({
                    "page": catalog.page_number(),
                    "page_count": catalog.page_count(),
                    "total": catalog.total(),
                    "functions": catalog.definitions(),
                }))
            }
            FunctionsCommand::Show { id, decode } => {
                let record = self.client.get_function(&FunctionId::new(id)).await?;
                if !decode {
                    return print_json(&record);
                }
                let report = codec::decode_detailed(record.result_format.as_deref());
                let issues: Vec<String> = report.issues.iter().map(ToString::to_string).collect();
                print_json(&json!({
                    "function": record,
                    "decoded": report.format,
                    "format_version": report.version,
                    "issues": issues,
                }))
            }
            FunctionsCommand::Create(args) => {
                let mut editor = self.editor(args.versioned);
                editor.loader_mut().ensure_metadata().await;
                apply_changes(&mut editor, &args).await;
                self.save(&mut editor).await
            }
            FunctionsCommand::Edit {
                id,
                changes,
                remove_fields,
                clear_stage,
            } => {
                // The editor fetches the authoritative copy itself.
                let snapshot = FunctionRecord {
                    id: FunctionId::new(id),
                    ..FunctionRecord::default()
                };
                let mut editor = self.editor(changes.versioned);
                editor.enter_edit(&snapshot).await?;
                // A saved function always has a name; a blank one means the
                // fetch failed and the editor fell back to the bare snapshot.
                if editor.name().trim().is_empty() {
                    return Err(anyhow!("function {} could not be loaded", snapshot.id));
                }

                for code in &remove_fields {
                    let doomed: Vec<_> = editor
                        .properties()
                        .entries()
                        .filter(|entry| entry.property.field_code == *code)
                        .map(|entry| entry.property.local_id.clone())
                        .collect();
                    if doomed.is_empty() {
                        warn!(field_code = %code, "no mapping for field; nothing removed");
                    }
                    for local_id in doomed {
                        editor.remove_property(&local_id);
                    }
                }
                if clear_stage {
                    editor.select_pipeline(None);
                }
                apply_changes(&mut editor, &changes).await;
                self.save(&mut editor).await
            }
            FunctionsCommand::Delete { id } => {
                let mut catalog = FunctionCatalog::new(self.records(), self.bot_id.clone(), self.config.page_size);
                catalog.delete(&FunctionId::new(id)).await?;
                print_json(&json!({ "deleted": true, "remaining": catalog.total() }))
            }
        }
    }

    async fn save(&self, editor: &mut FunctionEditor) -> Result<()> {
        let saved = editor
            .save(|record| debug!(function_id = %record.id, "function list is stale"))
            .await
            .map_err(|error| anyhow!(redact_sensitive(&error.to_string())))?;
        print_json(&saved)
    }
}

async fn apply_changes(editor: &mut FunctionEditor, args: &FunctionArgs) {
    if let Some(name) = &args.name {
        editor.set_name(name.clone());
    }
    if let Some(instructions) = &args.instructions {
        editor.set_instructions(instructions.clone());
    }
    if let Some(pipeline) = &args.pipeline {
        editor.change_pipeline(Some(pipeline.clone())).await;
    }
    if let Some(stage) = &args.stage {
        editor.select_stage(Some(stage.clone()));
    }

    for spec in &args.fields {
        let (code, description) = match spec.split_once('=') {
            Some((code, description)) => (code.trim(), Some(description.trim())),
            None => (spec.trim(), None),
        };
        let Some(local_id) = editor.add_property() else {
            return;
        };
        match editor.loader().fields().iter().find(|field| field.id == code).cloned() {
            Some(field) => {
                editor.select_property_field(&local_id, &field);
            }
            None => {
                warn!(field_code = %code, "field is not among the bot's CRM fields; mapping it as given");
                editor.update_property(&local_id, PropertyUpdate::FieldCode(code.to_string()));
            }
        }
        if let Some(description) = description {
            editor.update_property(&local_id, PropertyUpdate::Description(description.to_string()));
        }
    }
}

fn run_format(command: FormatCommand) -> Result<()> {
    match command {
        FormatCommand::Encode {
            stage,
            properties,
            versioned,
        } => {
            let format = ResultFormat {
                stage,
                properties: properties.iter().map(|spec| parse_encoded_property(spec)).collect(),
            };
            let version = if versioned { FormatVersion::Versioned } else { FormatVersion::Legacy };
            match codec::encode_format(version, &format) {
                Some(encoded) => println!("{encoded}"),
                None => warn!("nothing to encode"),
            }
            Ok(())
        }
        FormatCommand::Decode { value } => {
            let report = codec::decode_detailed(Some(value.as_str()));
            let issues: Vec<String> = report.issues.iter().map(ToString::to_string).collect();
            print_json(&json!({
                "stage": report.format.stage,
                "properties": report.format.properties,
                "format_version": report.version,
                "issues": issues,
            }))
        }
    }
}

fn parse_encoded_property(spec: &str) -> EncodedProperty {
    let mut parts = spec.splitn(3, '=').map(str::trim);
    let field_code = parts.next().unwrap_or_default();
    let field_name = parts.next().unwrap_or_default();
    let description = parts.next().unwrap_or_default();
    EncodedProperty::new(field_code, field_name, description)
}

fn run_config(store: &ConfigStore, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let mut effective = store.effective();
            if effective.api_token.is_some() {
                effective.api_token = Some("<redacted>".into());
            }
            print_json(&effective)
        }
        ConfigCommand::Set { key, value } => {
            store.update(|config| config.set_value(&key, &value))?;
            println!("{key} updated in {}", store.path().display());
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", store.path().display());
            Ok(())
        }
    }
}
