use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dates::parse_iso_date;
use crate::domain::schema::SchemaField;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    GtEq,
    #[serde(rename = "<=")]
    LtEq,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "IN")]
    In,
}

impl Comparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::GtEq => ">=",
            Self::LtEq => "<=",
            Self::Like => "LIKE",
            Self::In => "IN",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateFunction {
    Sum,
    Count,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Count => "COUNT",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }

    /// SUM and AVG only make sense over numeric columns.
    pub fn requires_numeric(&self) -> bool {
        matches!(self, Self::Sum | Self::Avg)
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub name: String,
    pub comparator: Comparator,
    pub target: Value,
    #[serde(default)]
    pub negation: bool,
    #[serde(rename = "type")]
    pub field_type: String,
}

impl QueryFilter {
    pub fn equals(field: &SchemaField, target: impl Into<Value>) -> Self {
        Self {
            name: field.name.clone(),
            comparator: Comparator::Eq,
            target: target.into(),
            negation: false,
            field_type: field.field_type.clone(),
        }
    }

    pub fn negated(mut self) -> Self {
        self.negation = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub function: AggregateFunction,
}

impl AggregationField {
    pub fn new(field: &SchemaField, function: AggregateFunction) -> Self {
        Self { name: field.name.clone(), field_type: field.field_type.clone(), function }
    }
}

/// Body of `POST /bigquery/easy-query/{dataset}/{table}`.
///
/// Outer filter groups are OR'd by the backend, conditions inside a group are AND'd.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPayload {
    #[serde(default)]
    pub fields: Vec<SchemaField>,
    #[serde(default)]
    pub agg_fields: Vec<AggregationField>,
    #[serde(default)]
    pub filters: Vec<Vec<QueryFilter>>,
    #[serde(default)]
    pub date_field: String,
    #[serde(default)]
    pub date_range: Vec<String>,
    #[serde(default)]
    pub force_date: bool,
    #[serde(default)]
    pub use_partition: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl QueryPayload {
    pub fn has_date_filter(&self) -> bool {
        !self.date_field.trim().is_empty() && !self.date_range.is_empty()
    }

    /// Value `forceDate` must carry for this payload.
    pub fn expected_force_date(&self) -> bool {
        self.has_date_filter()
    }

    pub fn with_date_filter(mut self, date_field: impl Into<String>, range: [String; 2]) -> Self {
        self.date_field = date_field.into();
        self.date_range = range.to_vec();
        self.force_date = self.expected_force_date();
        self
    }

    pub fn referenced_field_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        names.extend(self.fields.iter().map(|field| field.name.as_str()));
        names.extend(self.agg_fields.iter().map(|field| field.name.as_str()));
        names.extend(self.filters.iter().flatten().map(|filter| filter.name.as_str()));
        if !self.date_field.trim().is_empty() {
            names.push(self.date_field.as_str());
        }
        names
    }

    /// Shape checks performed before the payload goes on the wire. Never mutates.
    pub fn validate(&self) -> Result<(), DomainError> {
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(DomainError::InvalidPayload("fields entry with empty name".into()));
            }
        }
        for field in &self.agg_fields {
            if field.name.trim().is_empty() {
                return Err(DomainError::InvalidPayload("aggFields entry with empty name".into()));
            }
        }
        for group in &self.filters {
            if group.is_empty() {
                return Err(DomainError::InvalidPayload("empty filter group".into()));
            }
            for filter in group {
                if filter.name.trim().is_empty() {
                    return Err(DomainError::InvalidPayload("filter with empty name".into()));
                }
                if filter.comparator == Comparator::In && !filter.target.is_array() {
                    return Err(DomainError::InvalidPayload(format!(
                        "filter on `{}` uses IN with a non-list target",
                        filter.name
                    )));
                }
            }
        }

        match self.date_range.as_slice() {
            [] => {}
            [start, end] => {
                let start_date = parse_iso_date(start)?;
                let end_date = parse_iso_date(end)?;
                if start_date > end_date {
                    return Err(DomainError::InvalidPayload(format!(
                        "dateRange starts after it ends ({start} > {end})"
                    )));
                }
            }
            other => {
                return Err(DomainError::InvalidPayload(format!(
                    "dateRange must be empty or hold two dates, got {} entries",
                    other.len()
                )));
            }
        }

        if self.force_date != self.expected_force_date() {
            return Err(DomainError::InvariantViolation(format!(
                "forceDate is {} but dateField/dateRange {} both set",
                self.force_date,
                if self.has_date_filter() { "are" } else { "are not" }
            )));
        }

        Ok(())
    }
}
