//! CRM bot console API client.
//!
//! This module provides a lightweight client for the console backend. It
//! focuses on:
//!
//! - Constructing an HTTP client with sensible defaults
//! - Discovering the bearer token from settings or `CRMBOT_API_TOKEN`
//! - Validating the base URL for safety
//! - Typed helpers for the function, CRM field, pipeline, and stage endpoints
//!
//! The primary entry point is [`ConsoleClient`].
//!
//! # Example
//!
//! ```ignore
//! use crmbot_api::{ClientSettings, ConsoleClient};
//!
//! async fn run() -> Result<(), crmbot_api::ApiError> {
//!     let client = ConsoleClient::new(ClientSettings::from_env())?;
//!     let page = client.list_functions("bot-1", 1, 20).await?;
//!     println!("{} functions", page.count);
//!     Ok(())
//! }
//! ```

use std::env;
use std::time::Duration;

use crmbot_types::{CrmField, EntityType, FunctionId, FunctionPage, FunctionPayload, FunctionRecord, Pipeline, Stage};
use reqwest::{Client, Method, RequestBuilder, StatusCode, header};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Environment variable holding the API base URL.
pub const API_BASE_ENV: &str = "CRMBOT_API_BASE";
/// Environment variable holding the bearer token.
pub const API_TOKEN_ENV: &str = "CRMBOT_API_TOKEN";
/// Base URL used when nothing else is configured.
pub const DEFAULT_API_BASE: &str = "http://localhost:8000/api";

/// Hostnames allowed to use plain HTTP.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1", "[::1]"];
/// Longest response body excerpt carried into an error message.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Errors surfaced by [`ConsoleClient`].
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid API base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("invalid API token header: {0}")]
    InvalidToken(#[from] header::InvalidHeaderValue),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("failed to decode response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    /// True for 401/403 responses.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403, .. })
    }

    /// True when the backend reported the resource missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

/// Inputs for building a [`ConsoleClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub api_token: Option<String>,
    pub timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            api_token: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ClientSettings {
    /// Settings resolved purely from `CRMBOT_API_BASE` and `CRMBOT_API_TOKEN`.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(base) = env::var(API_BASE_ENV)
            && !base.trim().is_empty()
        {
            settings.base_url = base.trim().to_string();
        }
        settings.api_token = env::var(API_TOKEN_ENV).ok().filter(|token| !token.trim().is_empty());
        settings
    }
}

#[derive(Debug, Clone)]
/// Thin wrapper around a configured `reqwest::Client` for the console backend.
///
/// Default headers (Accept, Authorization) are installed once at construction;
/// every request is resolved relative to the validated base URL.
pub struct ConsoleClient {
    pub base_url: Url,
    pub http: Client,
    pub user_agent: String,
}

impl ConsoleClient {
    pub fn new(settings: ClientSettings) -> Result<Self, ApiError> {
        let base_url = validate_base_url(&settings.base_url)?;

        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(api_token) = settings.api_token.as_deref() {
            let mut authorization = header::HeaderValue::from_str(&format!("Bearer {}", api_token.trim()))?;
            authorization.set_sensitive(true);
            default_headers.insert(header::AUTHORIZATION, authorization);
        }

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(settings.timeout)
            .build()
            .map_err(ApiError::Client)?;

        Ok(Self {
            base_url,
            http,
            user_agent: format!("crmbot/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS),
        })
    }

    /// Build a `reqwest::RequestBuilder` for a method and API-relative path.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path.trim_start_matches('/'));
        debug!(%url, %method, "building request");

        self.http.request(method, url).header(header::USER_AGENT, &self.user_agent)
    }

    /// `GET functions?bot_id=&pageNumber=&pageSize=`
    pub async fn list_functions(&self, bot_id: &str, page_number: u32, page_size: u32) -> Result<FunctionPage, ApiError> {
        self.send_json("functions", self.list_functions_request(bot_id, page_number, page_size)).await
    }

    /// `GET functions/{id}`
    pub async fn get_function(&self, id: &FunctionId) -> Result<FunctionRecord, ApiError> {
        self.send_json("functions/{id}", self.request(Method::GET, &function_path(id))).await
    }

    /// `POST functions`
    pub async fn create_function(&self, payload: &FunctionPayload) -> Result<FunctionRecord, ApiError> {
        self.send_json("functions", self.request(Method::POST, "functions").json(payload)).await
    }

    /// `PUT functions/{id}`
    pub async fn update_function(&self, id: &FunctionId, payload: &FunctionPayload) -> Result<FunctionRecord, ApiError> {
        self.send_json("functions/{id}", self.request(Method::PUT, &function_path(id)).json(payload))
            .await
    }

    /// `DELETE functions/{id}`
    pub async fn delete_function(&self, id: &FunctionId) -> Result<(), ApiError> {
        self.send_empty(self.request(Method::DELETE, &function_path(id))).await
    }

    /// `GET crm-fields?bot_id=`
    pub async fn crm_fields(&self, bot_id: &str) -> Result<Vec<CrmField>, ApiError> {
        self.send_json("crm-fields", self.request(Method::GET, "crm-fields").query(&[("bot_id", bot_id)]))
            .await
    }

    /// `GET pipelines?bot_id=&entity_type=`
    pub async fn pipelines(&self, bot_id: &str, entity_type: EntityType) -> Result<Vec<Pipeline>, ApiError> {
        self.send_json("pipelines", self.pipelines_request(bot_id, entity_type)).await
    }

    /// `GET stages?bot_id=&pipeline_id=&entity_type=`
    pub async fn stages(&self, bot_id: &str, pipeline_id: &str, entity_type: EntityType) -> Result<Vec<Stage>, ApiError> {
        self.send_json("stages", self.stages_request(bot_id, pipeline_id, entity_type)).await
    }

    fn list_functions_request(&self, bot_id: &str, page_number: u32, page_size: u32) -> RequestBuilder {
        self.request(Method::GET, "functions").query(&[
            ("bot_id", bot_id.to_string()),
            ("pageNumber", page_number.to_string()),
            ("pageSize", page_size.to_string()),
        ])
    }

    fn pipelines_request(&self, bot_id: &str, entity_type: EntityType) -> RequestBuilder {
        self.request(Method::GET, "pipelines")
            .query(&[("bot_id", bot_id), ("entity_type", entity_type.as_str())])
    }

    fn stages_request(&self, bot_id: &str, pipeline_id: &str, entity_type: EntityType) -> RequestBuilder {
        self.request(Method::GET, "stages").query(&[
            ("bot_id", bot_id),
            ("pipeline_id", pipeline_id),
            ("entity_type", entity_type.as_str()),
        ])
    }

    async fn send_json<T: DeserializeOwned>(&self, endpoint: &str, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = builder.send().await.map_err(ApiError::Network)?;
        let status = response.status();
        let text = response.text().await.map_err(ApiError::Network)?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        serde_json::from_str(&text).map_err(|source| {
            warn!(endpoint, error = %source, "response body did not match the expected shape");
            ApiError::Decode {
                endpoint: endpoint.to_string(),
                source,
            }
        })
    }

    async fn send_empty(&self, builder: RequestBuilder) -> Result<(), ApiError> {
        let response = builder.send().await.map_err(ApiError::Network)?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(status_error(status, &text))
    }
}

fn function_path(id: &FunctionId) -> String {
    format!("functions/{}", id.as_str())
}

/// Build an [`ApiError::Status`], preferring the backend's `detail`/`message`/`error` field.
fn status_error(status: StatusCode, body: &str) -> ApiError {
    let from_json = serde_json::from_str::<serde_json::Value>(body).ok().and_then(|value| {
        ["detail", "message", "error"]
            .iter()
            .find_map(|key| value.get(*key).and_then(|field| field.as_str()).map(str::to_string))
    });
    let message = from_json.unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
        }
    });
    ApiError::Status {
        status: status.as_u16(),
        message,
    }
}

/// Validate that a base URL is acceptable for use by the client.
///
/// Rules:
/// - `localhost` / loopback: any of `http` or `https`
/// - otherwise: scheme must be HTTPS
fn validate_base_url(base: &str) -> Result<Url, ApiError> {
    let invalid = |reason: String| ApiError::InvalidBaseUrl {
        url: base.to_string(),
        reason,
    };
    let parsed = Url::parse(base).map_err(|error| invalid(error.to_string()))?;
    let host_name = parsed.host_str().ok_or_else(|| invalid("missing host".into()))?;

    if LOCALHOST_DOMAINS.iter().any(|&allowed| host_name.eq_ignore_ascii_case(allowed)) {
        return match parsed.scheme() {
            "http" | "https" => Ok(parsed),
            other => Err(invalid(format!("unsupported scheme '{other}://'"))),
        };
    }

    if parsed.scheme() != "https" {
        return Err(invalid(format!("non-localhost hosts must use https; got '{}://'", parsed.scheme())));
    }

    Ok(parsed)
}
