use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use datapac_backend::{BackendClient, QueryBody, ToolOutcome};
use datapac_core::domain::catalog::TableDescriptor;
use datapac_core::domain::query::QueryPayload;
use datapac_core::domain::schema::SchemaField;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::guardrails::{GuardrailDecision, PayloadGuardrail};
use crate::planner::{PlanRequest, QueryPlanner};
use crate::session::{LastQuery, SessionHandle};

#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    pub question: String,
    pub table: TableDescriptor,
    /// Fetched from the backend when absent.
    pub schema: Option<Vec<SchemaField>>,
    pub current_date: NaiveDate,
}

#[derive(Clone, Debug)]
pub struct ExecutionReport {
    pub table: TableDescriptor,
    pub payload: Option<QueryPayload>,
    pub outcome: ToolOutcome<QueryBody>,
    /// Set when the guardrail corrected the planned payload.
    pub note: Option<String>,
}

impl ExecutionReport {
    fn failed(table: TableDescriptor, payload: Option<QueryPayload>, message: String) -> Self {
        Self { table, payload, outcome: ToolOutcome::error(message), note: None }
    }

    /// The backend envelope, plus the correction note when there is one.
    pub fn to_tool_value(&self) -> Value {
        let mut value = self.outcome.to_value();
        if let (Some(note), Some(object)) = (&self.note, value.as_object_mut()) {
            object.insert("note".to_string(), Value::String(note.clone()));
        }
        value
    }
}

/// Query-construction sub-agent: plan, check, execute, remember.
pub struct QueryExecutor {
    backend: BackendClient,
    planner: Arc<dyn QueryPlanner>,
    guardrail: PayloadGuardrail,
}

impl QueryExecutor {
    pub fn new(backend: BackendClient, planner: Arc<dyn QueryPlanner>) -> Self {
        Self { backend, planner, guardrail: PayloadGuardrail::default() }
    }

    pub async fn execute(&self, session: &SessionHandle, request: ExecutionRequest) -> ExecutionReport {
        let correlation_id = session.correlation_id();
        let ExecutionRequest { question, table, schema, current_date } = request;
        let dataset = table.table_dataset.clone();
        let table_name = table.table_name.clone();

        let schema = match schema {
            Some(schema) => schema,
            None => match self.backend.table_schema(&dataset, &table_name).await {
                ToolOutcome::Success(body) => body.schema,
                ToolOutcome::Error { message } => return ExecutionReport::failed(table, None, message),
            },
        };

        let plan_request =
            PlanRequest { question: &question, table: &table, schema: &schema, current_date };
        let planned = match self.planner.plan(&plan_request).await {
            Ok(payload) => payload,
            Err(error) => {
                warn!(
                    event_name = "agent.executor.plan_failed",
                    correlation_id = %correlation_id,
                    table = %table.qualified_name(),
                    error = %error,
                    "could not plan query"
                );
                let message = format!("Erro ao montar a consulta: {error}");
                return ExecutionReport::failed(table, None, message);
            }
        };

        let (payload, note) = match self.guardrail.evaluate(&planned, &schema) {
            GuardrailDecision::Allow => (planned, None),
            GuardrailDecision::Degrade { reason_code, user_message, corrected, .. } => {
                info!(
                    event_name = "agent.guardrail.degrade",
                    correlation_id = %correlation_id,
                    reason_code,
                    "planned payload corrected"
                );
                (*corrected, Some(user_message))
            }
            GuardrailDecision::Deny { reason_code, user_message, fallback_path } => {
                warn!(
                    event_name = "agent.guardrail.deny",
                    correlation_id = %correlation_id,
                    reason_code,
                    fallback_path,
                    "planned payload rejected"
                );
                return ExecutionReport::failed(table, Some(planned), user_message);
            }
        };

        debug!(
            event_name = "agent.executor.payload",
            correlation_id = %correlation_id,
            payload = %serde_json::to_string(&payload).unwrap_or_default(),
            "executing payload"
        );
        let outcome = self.backend.execute_query(&dataset, &table_name, &payload).await;

        if let ToolOutcome::Success(body) = &outcome {
            info!(
                event_name = "agent.executor.completed",
                correlation_id = %correlation_id,
                table = %table.qualified_name(),
                result_count = ?body.data.result_count,
                "query executed"
            );
            session.lock().last_query = Some(LastQuery {
                dataset: dataset.clone(),
                table: table_name.clone(),
                table_alias: table.alias.clone(),
                question: question.clone(),
                timestamp: Utc::now(),
                payload: payload.clone(),
                result_count: body.data.result_count,
                field_descriptions_used: table.field_descriptions(),
            });
        }

        ExecutionReport { table, payload: Some(payload), outcome, note }
    }
}
