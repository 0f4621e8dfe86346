use serde::{Deserialize, Serialize};

use crate::domain::catalog::TableDescriptor;

const GROUPING_TYPES: [&str; 3] = ["STRING", "TEXT", "VARCHAR"];
const NUMERIC_TYPES: [&str; 4] = ["INTEGER", "FLOAT", "NUMERIC", "DECIMAL"];
const DATE_TYPES: [&str; 3] = ["DATE", "DATETIME", "TIMESTAMP"];

/// A column as reported by `GET /bigquery/schema/{dataset}/{table}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Grouping,
    Numeric,
    Date,
    Unclassified,
}

impl FieldKind {
    /// Case-insensitive substring match, checked grouping, numeric, date in that order.
    pub fn classify(field_type: &str) -> Self {
        let upper = field_type.to_ascii_uppercase();
        if GROUPING_TYPES.iter().any(|candidate| upper.contains(candidate)) {
            Self::Grouping
        } else if NUMERIC_TYPES.iter().any(|candidate| upper.contains(candidate)) {
            Self::Numeric
        } else if DATE_TYPES.iter().any(|candidate| upper.contains(candidate)) {
            Self::Date
        } else {
            Self::Unclassified
        }
    }
}

impl SchemaField {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self { name: name.into(), field_type: field_type.into() }
    }

    pub fn kind(&self) -> FieldKind {
        FieldKind::classify(&self.field_type)
    }
}

/// A schema field joined with the catalog's human-readable description.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DescribedField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub kind: FieldKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl DescribedField {
    pub fn as_schema_field(&self) -> SchemaField {
        SchemaField::new(self.name.clone(), self.field_type.clone())
    }
}

pub fn describe_schema(table: &TableDescriptor, schema: &[SchemaField]) -> Vec<DescribedField> {
    let descriptions = table.field_descriptions();
    schema
        .iter()
        .map(|field| DescribedField {
            name: field.name.clone(),
            field_type: field.field_type.clone(),
            kind: field.kind(),
            description: descriptions.get(&field.name.to_lowercase()).cloned(),
        })
        .collect()
}

pub fn find_field<'a>(schema: &'a [SchemaField], name: &str) -> Option<&'a SchemaField> {
    schema.iter().find(|field| field.name.eq_ignore_ascii_case(name))
}

/// Schema fields split into the three selection buckets; unclassified fields are dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassifiedSchema {
    pub grouping: Vec<DescribedField>,
    pub numeric: Vec<DescribedField>,
    pub date: Vec<DescribedField>,
}

impl ClassifiedSchema {
    pub fn from_described(fields: &[DescribedField]) -> Self {
        let mut classified = Self::default();
        for field in fields {
            match field.kind {
                FieldKind::Grouping => classified.grouping.push(field.clone()),
                FieldKind::Numeric => classified.numeric.push(field.clone()),
                FieldKind::Date => classified.date.push(field.clone()),
                FieldKind::Unclassified => {}
            }
        }
        classified
    }
}
