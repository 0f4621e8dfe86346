use datapac_core::domain::catalog::TableDescriptor;
use datapac_core::domain::schema::SchemaField;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope handed to the language model for every backend tool call.
///
/// Serializes as `{"status": "success", ...body}` or
/// `{"status": "error", "message": "..."}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome<T> {
    Success(T),
    Error { message: String },
}

impl<T> ToolOutcome<T> {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn success(&self) -> Option<&T> {
        match self {
            Self::Success(body) => Some(body),
            Self::Error { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Error { message } => Some(message),
        }
    }
}

impl<T: Serialize> ToolOutcome<T> {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|error| {
            serde_json::json!({"status": "error", "message": format!("serialization failed: {error}")})
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TablesBody {
    pub tables: Vec<TableDescriptor>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaBody {
    pub schema: Vec<SchemaField>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryBody {
    pub message: String,
    pub data: QueryData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryData {
    pub dataset: String,
    pub table: String,
    pub results: Value,
    /// Row count when the backend answered with a list, `null` otherwise.
    pub result_count: Option<usize>,
    pub api_endpoint: String,
}

impl QueryData {
    pub fn new(dataset: &str, table: &str, results: Value, api_endpoint: String) -> Self {
        let result_count = results.as_array().map(Vec::len);
        Self {
            dataset: dataset.to_string(),
            table: table.to_string(),
            results,
            result_count,
            api_endpoint,
        }
    }
}
