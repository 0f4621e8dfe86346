//! HTTP client for the data service: table catalog, schema introspection and
//! easy-query execution, plus the status envelopes handed to the agent tools.

pub mod client;
pub mod outcome;

pub use client::{BackendClient, BackendError};
pub use outcome::{QueryBody, QueryData, SchemaBody, TablesBody, ToolOutcome};
