use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use datapac_backend::BackendClient;
use datapac_core::dates::{current_date, format_date, today};
use datapac_core::domain::catalog::TableDescriptor;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::executor::{ExecutionRequest, QueryExecutor};
use crate::llm::ToolSpec;
use crate::session::SessionHandle;

pub const GET_DATE: &str = "get_date";
pub const GET_TABLES: &str = "get_tables";
pub const GET_TABLE_SCHEMA: &str = "get_table_schema";
pub const QUERY_EXECUTOR: &str = "query_executor";
pub const EXECUTE_QUERY_JSON: &str = "execute_query_json";

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn parameters(&self) -> Value;
    async fn execute(&self, input: Value) -> Result<Value>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|tool| tool.spec()).collect()
    }

    pub async fn call(&self, name: &str, input: Value) -> Result<Value> {
        let tool = self.tools.get(name).ok_or_else(|| anyhow!("unknown tool `{name}`"))?;
        tool.execute(input).await
    }
}

/// Where "today" comes from. Tests pin it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Clock {
    #[default]
    System,
    Fixed(NaiveDate),
}

impl Clock {
    pub fn today(&self) -> NaiveDate {
        match self {
            Self::System => today(),
            Self::Fixed(date) => *date,
        }
    }

    /// `YYYY-MM-DD`, as handed to the model.
    pub fn current_date(&self) -> String {
        match self {
            Self::System => current_date(),
            Self::Fixed(date) => format_date(*date),
        }
    }
}

fn no_parameters() -> Value {
    json!({"type": "object", "properties": {}})
}

fn table_parameters(extra: Option<(&str, &str)>) -> Value {
    let mut properties = json!({
        "dataset": {"type": "string", "description": "Dataset da tabela (tableDataset)"},
        "table_name": {"type": "string", "description": "Nome da tabela (tableName)"},
    });
    let mut required = vec!["dataset", "table_name"];
    if let Some((name, description)) = extra {
        properties[name] = json!({"type": "string", "description": description});
        required.push(name);
    }
    json!({"type": "object", "properties": properties, "required": required})
}

#[derive(Deserialize)]
struct TableArguments {
    dataset: String,
    table_name: String,
}

pub struct GetDateTool {
    clock: Clock,
}

impl GetDateTool {
    pub fn new(clock: Clock) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl Tool for GetDateTool {
    fn name(&self) -> &'static str {
        GET_DATE
    }

    fn description(&self) -> &'static str {
        "Retorna a data atual no formato AAAA-MM-DD."
    }

    fn parameters(&self) -> Value {
        no_parameters()
    }

    async fn execute(&self, _input: Value) -> Result<Value> {
        Ok(json!({"current_date": self.clock.current_date()}))
    }
}

pub struct GetTablesTool {
    backend: BackendClient,
    session: SessionHandle,
}

impl GetTablesTool {
    pub fn new(backend: BackendClient, session: SessionHandle) -> Self {
        Self { backend, session }
    }
}

#[async_trait]
impl Tool for GetTablesTool {
    fn name(&self) -> &'static str {
        GET_TABLES
    }

    fn description(&self) -> &'static str {
        "Lista as tabelas disponíveis com dataset, nome, alias, descrição dos campos e tags."
    }

    fn parameters(&self) -> Value {
        no_parameters()
    }

    async fn execute(&self, _input: Value) -> Result<Value> {
        let outcome = self.backend.list_tables().await;
        if let Some(body) = outcome.success() {
            self.session.lock().catalog = body.tables.clone();
        }
        Ok(outcome.to_value())
    }
}

pub struct GetTableSchemaTool {
    backend: BackendClient,
    session: SessionHandle,
}

impl GetTableSchemaTool {
    pub fn new(backend: BackendClient, session: SessionHandle) -> Self {
        Self { backend, session }
    }
}

#[async_trait]
impl Tool for GetTableSchemaTool {
    fn name(&self) -> &'static str {
        GET_TABLE_SCHEMA
    }

    fn description(&self) -> &'static str {
        "Retorna o esquema (nome e tipo das colunas) de uma tabela."
    }

    fn parameters(&self) -> Value {
        table_parameters(None)
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let arguments: TableArguments =
            serde_json::from_value(input).context("get_table_schema expects dataset and table_name")?;
        let outcome = self.backend.table_schema(&arguments.dataset, &arguments.table_name).await;
        if let Some(body) = outcome.success() {
            let key = format!("{}.{}", arguments.dataset, arguments.table_name);
            self.session.lock().schemas.insert(key, body.schema.clone());
        }
        Ok(outcome.to_value())
    }
}

#[derive(Deserialize)]
struct QueryExecutorArguments {
    dataset: String,
    table_name: String,
    question: String,
}

/// Delegates to the query-construction sub-agent.
pub struct QueryExecutorTool {
    executor: Arc<QueryExecutor>,
    session: SessionHandle,
    clock: Clock,
}

impl QueryExecutorTool {
    pub fn new(executor: Arc<QueryExecutor>, session: SessionHandle, clock: Clock) -> Self {
        Self { executor, session, clock }
    }
}

#[async_trait]
impl Tool for QueryExecutorTool {
    fn name(&self) -> &'static str {
        QUERY_EXECUTOR
    }

    fn description(&self) -> &'static str {
        "Subagente que monta o payload easy-query para a pergunta, executa na tabela indicada e devolve o resultado."
    }

    fn parameters(&self) -> Value {
        table_parameters(Some(("question", "Pergunta original do usuário")))
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let arguments: QueryExecutorArguments = serde_json::from_value(input)
            .context("query_executor expects dataset, table_name and question")?;

        let (table, schema) = {
            let session = self.session.lock();
            let table = session
                .catalog_entry(&arguments.dataset, &arguments.table_name)
                .cloned()
                .unwrap_or_else(|| TableDescriptor::new(arguments.dataset.clone(), arguments.table_name.clone()));
            let schema = session.cached_schema(&arguments.dataset, &arguments.table_name).map(<[_]>::to_vec);
            (table, schema)
        };

        let report = self
            .executor
            .execute(
                &self.session,
                ExecutionRequest {
                    question: arguments.question,
                    table,
                    schema,
                    current_date: self.clock.today(),
                },
            )
            .await;
        Ok(report.to_tool_value())
    }
}

/// Function the query-construction model calls to hand over its payload.
pub fn execute_query_json_spec() -> ToolSpec {
    ToolSpec {
        name: EXECUTE_QUERY_JSON.to_string(),
        description: "Executa uma consulta na API POST /bigquery/easy-query/{dataset}/{table}.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "dataset": {"type": "string"},
                "table_name": {"type": "string"},
                "payload": {
                    "type": "object",
                    "description": "Consulta easy-query: fields, aggFields, filters, dateField, dateRange, forceDate, usePartition",
                    "properties": {
                        "fields": {"type": "array", "items": {"type": "object"}},
                        "aggFields": {"type": "array", "items": {"type": "object"}},
                        "filters": {"type": "array", "items": {"type": "array", "items": {"type": "object"}}},
                        "dateField": {"type": "string"},
                        "dateRange": {"type": "array", "items": {"type": "string"}},
                        "forceDate": {"type": "boolean"},
                        "usePartition": {"type": "boolean"}
                    }
                }
            },
            "required": ["dataset", "table_name", "payload"]
        }),
    }
}
