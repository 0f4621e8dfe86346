use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A table advertised by the backend catalog (`GET /data_pac/tables`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    pub table_dataset: String,
    pub table_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub alias: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub table_fields: Vec<TableField>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    /// Catalog keys this type does not model, kept so the catalog round-trips unchanged.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableField {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
}

/// The catalog sends `null` for optional keys it has no value for.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl TableDescriptor {
    pub fn new(dataset: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            table_dataset: dataset.into(),
            table_name: table_name.into(),
            alias: String::new(),
            description: None,
            table_fields: Vec::new(),
            tags: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.table_dataset, self.table_name)
    }

    /// Alias when the catalog provides one, otherwise the qualified name.
    pub fn display_name(&self) -> String {
        if self.alias.trim().is_empty() {
            self.qualified_name()
        } else {
            self.alias.clone()
        }
    }

    /// Field descriptions keyed by lower-cased field name. Entries with an
    /// empty name or description are skipped.
    pub fn field_descriptions(&self) -> BTreeMap<String, String> {
        self.table_fields
            .iter()
            .filter(|field| !field.name.trim().is_empty() && !field.description.trim().is_empty())
            .map(|field| (field.name.to_lowercase(), field.description.clone()))
            .collect()
    }

    pub fn field_description(&self, field_name: &str) -> Option<&str> {
        let wanted = field_name.to_lowercase();
        self.table_fields
            .iter()
            .find(|field| field.name.to_lowercase() == wanted && !field.description.is_empty())
            .map(|field| field.description.as_str())
    }
}
