use std::time::Duration;

use datapac_core::config::BackendConfig;
use datapac_core::domain::catalog::TableDescriptor;
use datapac_core::domain::query::QueryPayload;
use datapac_core::domain::schema::SchemaField;
use datapac_core::errors::{ApplicationError, DomainError};
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::outcome::{QueryBody, QueryData, SchemaBody, TablesBody, ToolOutcome};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid backend base url `{url}`: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("could not build http client: {0}")]
    ClientBuild(String),
    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },
    #[error("{endpoint} returned HTTP {status}: {message}")]
    Status { endpoint: String, status: u16, message: String },
    #[error("unexpected response body from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
    #[error(transparent)]
    InvalidPayload(#[from] DomainError),
}

impl From<BackendError> for ApplicationError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::InvalidPayload(domain) => Self::Domain(domain),
            BackendError::InvalidBaseUrl { .. } | BackendError::ClientBuild(_) => {
                Self::Configuration(error.to_string())
            }
            other => Self::Integration(other.to_string()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SchemaResponse {
    Bare(Vec<SchemaField>),
    Wrapped { schema: Vec<SchemaField> },
}

impl SchemaResponse {
    fn into_fields(self) -> Vec<SchemaField> {
        match self {
            Self::Bare(fields) | Self::Wrapped { schema: fields } => fields,
        }
    }
}

/// Thin client over the three data service endpoints. One attempt per call.
#[derive(Clone, Debug)]
pub struct BackendClient {
    http: Client,
    base_url: Url,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let base_url = Url::parse(config.base_url.trim()).map_err(|error| {
            BackendError::InvalidBaseUrl { url: config.base_url.clone(), reason: error.to_string() }
        })?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidBaseUrl {
                url: config.base_url.clone(),
                reason: "url cannot carry path segments".to_string(),
            });
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| BackendError::ClientBuild(error.to_string()))?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    pub fn tables_url(&self) -> Url {
        self.endpoint(&["data_pac", "tables"])
    }

    pub fn schema_url(&self, dataset: &str, table: &str) -> Url {
        self.endpoint(&["bigquery", "schema", dataset, table])
    }

    pub fn easy_query_url(&self, dataset: &str, table: &str) -> Url {
        let mut url = self.endpoint(&["bigquery", "easy-query", dataset, table]);
        url.set_query(Some("format=json"));
        url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        url.set_query(None);
        url.set_fragment(None);
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub async fn tables(&self) -> Result<Vec<TableDescriptor>, BackendError> {
        let url = self.tables_url();
        let response = self.http.get(url.clone()).send().await.map_err(|error| transport(&url, error))?;
        let Value::Array(entries) = read_json(&url, response).await? else {
            return Err(BackendError::Decode {
                endpoint: url.to_string(),
                message: "expected a JSON array of tables".to_string(),
            });
        };

        // One undecodable entry must not hide the rest of the catalog.
        let mut tables = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<TableDescriptor>(entry) {
                Ok(table) => tables.push(table),
                Err(error) => warn!(
                    event_name = "backend.tables.entry_skipped",
                    endpoint = %url,
                    index,
                    error = %error,
                    "skipping undecodable catalog entry"
                ),
            }
        }

        info!(
            event_name = "backend.tables.fetched",
            endpoint = %url,
            table_count = tables.len(),
            "table catalog fetched"
        );
        Ok(tables)
    }

    pub async fn schema(&self, dataset: &str, table: &str) -> Result<Vec<SchemaField>, BackendError> {
        let url = self.schema_url(dataset, table);
        let response = self.http.get(url.clone()).send().await.map_err(|error| transport(&url, error))?;
        let body = read_json(&url, response).await?;
        let fields = serde_json::from_value::<SchemaResponse>(body)
            .map_err(|error| BackendError::Decode { endpoint: url.to_string(), message: error.to_string() })?
            .into_fields();

        info!(
            event_name = "backend.schema.fetched",
            endpoint = %url,
            dataset,
            table,
            field_count = fields.len(),
            "table schema fetched"
        );
        Ok(fields)
    }

    /// Validates `payload` and posts it unchanged. Returns the raw result body.
    pub async fn execute(
        &self,
        dataset: &str,
        table: &str,
        payload: &QueryPayload,
    ) -> Result<Value, BackendError> {
        payload.validate()?;

        let url = self.easy_query_url(dataset, table);
        debug!(
            event_name = "backend.query.payload",
            endpoint = %url,
            payload = %serde_json::to_string(payload).unwrap_or_default(),
            "posting easy-query payload"
        );

        let response = self
            .http
            .post(url.clone())
            .json(payload)
            .send()
            .await
            .map_err(|error| transport(&url, error))?;
        let results = read_json(&url, response).await?;

        info!(
            event_name = "backend.query.executed",
            endpoint = %url,
            dataset,
            table,
            row_count = results.as_array().map(Vec::len),
            "easy-query executed"
        );
        Ok(results)
    }

    pub async fn list_tables(&self) -> ToolOutcome<TablesBody> {
        match self.tables().await {
            Ok(tables) => ToolOutcome::Success(TablesBody { tables }),
            Err(error) => {
                warn!(event_name = "backend.tables.error", error = %error, "table catalog unavailable");
                ToolOutcome::error(format!("Erro ao obter tabelas: {error}"))
            }
        }
    }

    pub async fn table_schema(&self, dataset: &str, table: &str) -> ToolOutcome<SchemaBody> {
        match self.schema(dataset, table).await {
            Ok(schema) => ToolOutcome::Success(SchemaBody { schema }),
            Err(error) => {
                warn!(
                    event_name = "backend.schema.error",
                    dataset,
                    table,
                    error = %error,
                    "table schema unavailable"
                );
                ToolOutcome::error(format!("Erro ao obter esquema da tabela {dataset}.{table}: {error}"))
            }
        }
    }

    pub async fn execute_query(
        &self,
        dataset: &str,
        table: &str,
        payload: &QueryPayload,
    ) -> ToolOutcome<QueryBody> {
        match self.execute(dataset, table, payload).await {
            Ok(results) => ToolOutcome::Success(QueryBody {
                message: "Consulta executada com sucesso".to_string(),
                data: QueryData::new(
                    dataset,
                    table,
                    results,
                    self.easy_query_url(dataset, table).to_string(),
                ),
            }),
            Err(error) => {
                warn!(
                    event_name = "backend.query.error",
                    dataset,
                    table,
                    error = %error,
                    "easy-query failed"
                );
                ToolOutcome::error(format!("Erro ao executar consulta: {error}"))
            }
        }
    }
}

fn transport(url: &Url, error: reqwest::Error) -> BackendError {
    BackendError::Transport { endpoint: url.to_string(), message: error.to_string() }
}

/// Reads the body as JSON. Non-2xx responses surface the body's `message` when present.
async fn read_json(url: &Url, response: Response) -> Result<Value, BackendError> {
    let status = response.status();
    let text = response.text().await.map_err(|error| transport(url, error))?;

    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|body| body.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_string()
                } else {
                    trimmed.chars().take(300).collect()
                }
            });
        return Err(BackendError::Status { endpoint: url.to_string(), status: status.as_u16(), message });
    }

    serde_json::from_str(&text)
        .map_err(|error| BackendError::Decode { endpoint: url.to_string(), message: error.to_string() })
}
