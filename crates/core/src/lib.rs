pub mod config;
pub mod dates;
pub mod domain;
pub mod errors;
pub mod text;

pub use config::{AppConfig, ConfigError, LlmProvider, LoadOptions, LogFormat};
pub use dates::{DateRange, RelativeDate};
pub use domain::catalog::{TableDescriptor, TableField};
pub use domain::query::{
    AggregateFunction, AggregationField, Comparator, QueryFilter, QueryPayload,
};
pub use domain::schema::{ClassifiedSchema, DescribedField, FieldKind, SchemaField};
pub use errors::{ApplicationError, DomainError, InterfaceError};
