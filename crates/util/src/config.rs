//! Console configuration persistence.
//!
//! A tiny JSON-backed store recording where the console backend lives, which
//! bot is used by default, and a few editor knobs. The file is written to the
//! standard configuration directory (`~/.config/crmbot/config.json` on most
//! platforms). Environment variables override file values at read time and are
//! never written back.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crmbot_types::FormatVersion;
use dirs_next::{config_dir, home_dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Environment variable allowing callers to override the config file path.
pub const CONFIG_PATH_ENV: &str = "CRMBOT_CONFIG_PATH";
/// Environment variable overriding the API base URL.
pub const API_BASE_ENV: &str = "CRMBOT_API_BASE";
/// Environment variable overriding the API token.
pub const API_TOKEN_ENV: &str = "CRMBOT_API_TOKEN";
/// Environment variable overriding the default bot.
pub const BOT_ID_ENV: &str = "CRMBOT_BOT_ID";

/// Default filename for the JSON payload.
pub const CONFIG_FILE_NAME: &str = "config.json";

const DEFAULT_PAGE_SIZE: u32 = 20;

/// Error surfaced when reading or writing configuration fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure (for example, permissions or missing directory).
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization or deserialization failure.
    #[error("config serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A value failed validation.
    #[error("invalid config value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Persisted configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Base URL of the console backend (for example `https://console.example.com/api`).
    pub api_base_url: Option<String>,
    /// Bearer token. Usually supplied through `CRMBOT_API_TOKEN` instead.
    pub api_token: Option<String>,
    /// Bot used when a command does not name one.
    pub default_bot_id: Option<String>,
    /// Page size for function listings.
    pub page_size: u32,
    /// Maximum age of cached CRM metadata; `None` keeps it until invalidated.
    pub metadata_cache_ttl_secs: Option<u64>,
    /// Grammar used when writing result formats.
    pub result_format: FormatVersion,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            api_token: None,
            default_bot_id: None,
            page_size: DEFAULT_PAGE_SIZE,
            metadata_cache_ttl_secs: None,
            result_format: FormatVersion::default(),
        }
    }
}

impl ConsoleConfig {
    /// Apply `CRMBOT_*` environment overrides on top of the file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(base) = non_blank_env(API_BASE_ENV) {
            self.api_base_url = Some(base);
        }
        if let Some(token) = non_blank_env(API_TOKEN_ENV) {
            self.api_token = Some(token);
        }
        if let Some(bot_id) = non_blank_env(BOT_ID_ENV) {
            self.default_bot_id = Some(bot_id);
        }
        self
    }

    pub fn metadata_cache_ttl(&self) -> Option<Duration> {
        self.metadata_cache_ttl_secs.map(Duration::from_secs)
    }

    /// Set a value by its JSON key, as used by `crmbot config set`.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        let optional = |value: &str| {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        };
        match key {
            "api_base_url" => self.api_base_url = optional(value),
            "api_token" => self.api_token = optional(value),
            "default_bot_id" => self.default_bot_id = optional(value),
            "page_size" => {
                let size: u32 = value.trim().parse().map_err(|_| invalid("expected a positive integer"))?;
                if size == 0 {
                    return Err(invalid("page size must be at least 1"));
                }
                self.page_size = size;
            }
            "metadata_cache_ttl_secs" => {
                self.metadata_cache_ttl_secs = match optional(value) {
                    None => None,
                    Some(text) => Some(text.parse().map_err(|_| invalid("expected seconds as an integer"))?),
                }
            }
            "result_format" => {
                self.result_format = serde_json::from_value(serde_json::Value::String(value.trim().to_lowercase()))
                    .map_err(|_| invalid("expected 'legacy' or 'versioned'"))?;
            }
            _ => return Err(invalid("unknown key")),
        }
        Ok(())
    }
}

/// Thread-safe configuration store backed by a JSON file.
#[derive(Debug, Default)]
pub struct ConfigStore {
    path: PathBuf,
    payload: Mutex<ConsoleConfig>,
    persist_to_disk: bool,
}

impl ConfigStore {
    /// Open the store at the default path (or `CRMBOT_CONFIG_PATH`).
    pub fn new() -> Result<Self, ConfigError> {
        Self::open(default_config_path())
    }

    /// Open the store rooted at `path`; a missing file yields defaults.
    pub fn open(path: PathBuf) -> Result<Self, ConfigError> {
        let payload = load_payload(&path)?;
        Ok(Self {
            path,
            payload: Mutex::new(payload),
            persist_to_disk: true,
        })
    }

    /// Build an in-memory store used as a fallback when the config directory cannot be accessed.
    pub fn ephemeral() -> Self {
        Self {
            path: PathBuf::new(),
            payload: Mutex::new(ConsoleConfig::default()),
            persist_to_disk: false,
        }
    }

    /// Path to the underlying JSON file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File values only, without environment overrides.
    pub fn stored(&self) -> ConsoleConfig {
        self.payload.lock().expect("config lock poisoned").clone()
    }

    /// Effective configuration: file values with environment overrides applied.
    pub fn effective(&self) -> ConsoleConfig {
        self.stored().with_env_overrides()
    }

    /// Mutate the stored configuration and persist it.
    pub fn update<F>(&self, mutate: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut ConsoleConfig) -> Result<(), ConfigError>,
    {
        let mut payload = self.payload.lock().expect("config lock poisoned");
        let mut next = payload.clone();
        mutate(&mut next)?;
        if self.persist_to_disk {
            save(&self.path, &next)?;
        }
        *payload = next;
        Ok(())
    }
}

fn save(path: &Path, payload: &ConsoleConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(payload)?;
    fs::write(path, data)?;
    Ok(())
}

fn non_blank_env(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn default_config_path() -> PathBuf {
    if let Some(path) = non_blank_env(CONFIG_PATH_ENV) {
        return expand_home(&path);
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("crmbot")
        .join(CONFIG_FILE_NAME)
}

/// `~/` at the start of an override path means the home directory.
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")), home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ if path == "~" => home_dir().unwrap_or_else(|| PathBuf::from(path)),
        _ => PathBuf::from(path),
    }
}

fn load_payload(path: &Path) -> Result<ConsoleConfig, ConfigError> {
    match fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(payload) => Ok(payload),
            Err(error) => {
                warn!(
                    path = %path.display(),
                    error = %error,
                    "Failed to parse config file; using defaults"
                );
                Ok(ConsoleConfig::default())
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(ConsoleConfig::default()),
        Err(error) => Err(ConfigError::Io(error)),
    }
}
