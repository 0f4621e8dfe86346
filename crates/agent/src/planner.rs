use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use datapac_core::domain::catalog::TableDescriptor;
use datapac_core::domain::query::{
    AggregateFunction, AggregationField, Comparator, QueryFilter, QueryPayload,
};
use datapac_core::domain::schema::{describe_schema, ClassifiedSchema, DescribedField, SchemaField};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::conversation::{singular, term_variants, QuestionAnalyzer, QuestionIntent};
use crate::llm::{strip_code_fence, ChatMessage, LlmClient, LlmError, LlmReply};
use crate::prompts;
use crate::tools::{execute_query_json_spec, EXECUTE_QUERY_JSON};

/// Everything a planner needs to turn a question into a payload.
#[derive(Clone, Copy, Debug)]
pub struct PlanRequest<'a> {
    pub question: &'a str,
    pub table: &'a TableDescriptor,
    pub schema: &'a [SchemaField],
    pub current_date: NaiveDate,
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("table `{table}` has no columns")]
    EmptySchema { table: String },
    #[error("table `{table}` has no numeric column for {function}")]
    NoNumericField { table: String, function: AggregateFunction },
    #[error("table `{table}` has no date column to apply the requested period to")]
    NoDateField { table: String },
    #[error(transparent)]
    Model(#[from] LlmError),
    #[error("model did not produce a usable query payload: {0}")]
    InvalidModelOutput(String),
}

#[async_trait]
pub trait QueryPlanner: Send + Sync {
    async fn plan(&self, request: &PlanRequest<'_>) -> Result<QueryPayload, PlanError>;
}

/// Asks the model to call `execute_query_json` and takes the payload from its arguments.
pub struct LlmQueryPlanner {
    llm: Arc<dyn LlmClient>,
}

impl LlmQueryPlanner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl QueryPlanner for LlmQueryPlanner {
    async fn plan(&self, request: &PlanRequest<'_>) -> Result<QueryPayload, PlanError> {
        let messages = vec![
            ChatMessage::system(prompts::QUERY_EXECUTOR_INSTRUCTION),
            ChatMessage::user(prompts::query_executor_context(request)),
        ];
        let tools = vec![execute_query_json_spec()];

        let arguments = match self.llm.chat(&messages, &tools).await? {
            LlmReply::ToolCalls(calls) => {
                let call = calls
                    .iter()
                    .find(|call| call.name == EXECUTE_QUERY_JSON)
                    .ok_or_else(|| {
                        PlanError::InvalidModelOutput(format!(
                            "expected a call to {EXECUTE_QUERY_JSON}, got {:?}",
                            calls.iter().map(|call| call.name.as_str()).collect::<Vec<_>>()
                        ))
                    })?;
                call.parsed_arguments()?
            }
            LlmReply::Text(text) => serde_json::from_str(strip_code_fence(&text))
                .map_err(|_| PlanError::InvalidModelOutput(text.chars().take(200).collect()))?,
        };

        let payload = payload_from_arguments(arguments)?;
        debug!(
            event_name = "agent.planner.llm_payload",
            table = %request.table.qualified_name(),
            payload = %serde_json::to_string(&payload).unwrap_or_default(),
            "model planned payload"
        );
        Ok(payload)
    }
}

/// Accepts `{dataset, table_name, payload}`, a JSON-encoded `payload` string,
/// or the bare payload object.
pub fn payload_from_arguments(arguments: Value) -> Result<QueryPayload, PlanError> {
    let raw = match arguments.get("payload") {
        Some(Value::String(encoded)) => serde_json::from_str(strip_code_fence(encoded))
            .map_err(|error| PlanError::InvalidModelOutput(error.to_string()))?,
        Some(payload) => payload.clone(),
        None => arguments,
    };
    if !raw.is_object() {
        return Err(PlanError::InvalidModelOutput(format!("payload is not an object: {raw}")));
    }
    serde_json::from_value(raw).map_err(|error| PlanError::InvalidModelOutput(error.to_string()))
}

/// Keyword-driven planner used when no model is configured.
#[derive(Clone, Debug, Default)]
pub struct HeuristicQueryPlanner {
    analyzer: QuestionAnalyzer,
}

impl HeuristicQueryPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan_sync(&self, request: &PlanRequest<'_>) -> Result<QueryPayload, PlanError> {
        let table_name = request.table.qualified_name();
        if request.schema.is_empty() {
            return Err(PlanError::EmptySchema { table: table_name });
        }

        let intent = self.analyzer.analyze(request.question);
        let described = describe_schema(request.table, request.schema);
        let classified = ClassifiedSchema::from_described(&described);

        let fields = grouping_fields(&intent, &classified);
        let agg_field = aggregation_field(&intent, &described, &classified, &table_name)?;
        let conditions = filter_conditions(&intent, &classified);

        let mut payload = QueryPayload {
            fields,
            agg_fields: vec![agg_field],
            filters: if conditions.is_empty() { Vec::new() } else { vec![conditions] },
            limit: intent.limit,
            ..QueryPayload::default()
        };

        if let Some(relative) = intent.relative_date {
            let date_field = preferred_date_field(&classified)
                .ok_or_else(|| PlanError::NoDateField { table: table_name.clone() })?;
            let range = relative.resolve(request.current_date).to_strings();
            payload = payload.with_date_filter(date_field.name.clone(), range);
        }

        info!(
            event_name = "agent.planner.heuristic_payload",
            table = %table_name,
            group_count = payload.fields.len(),
            filter_count = payload.filters.iter().map(Vec::len).sum::<usize>(),
            has_date_filter = payload.has_date_filter(),
            "heuristic planner built payload"
        );
        Ok(payload)
    }
}

#[async_trait]
impl QueryPlanner for HeuristicQueryPlanner {
    async fn plan(&self, request: &PlanRequest<'_>) -> Result<QueryPayload, PlanError> {
        self.plan_sync(request)
    }
}

fn grouping_fields(intent: &QuestionIntent, classified: &ClassifiedSchema) -> Vec<SchemaField> {
    let mut fields: Vec<SchemaField> = Vec::new();
    for term in &intent.group_terms {
        match best_field(&classified.grouping, term) {
            Some(field) if !fields.iter().any(|existing| existing.name == field.name) => {
                fields.push(field.as_schema_field());
            }
            Some(_) => {}
            None => debug!(event_name = "agent.planner.unmatched_group", term = %term, "no grouping column matched"),
        }
    }
    fields
}

fn aggregation_field(
    intent: &QuestionIntent,
    described: &[DescribedField],
    classified: &ClassifiedSchema,
    table_name: &str,
) -> Result<AggregationField, PlanError> {
    let function = intent.aggregate.unwrap_or(AggregateFunction::Sum);
    if function == AggregateFunction::Count {
        return Ok(AggregationField::new(&count_target(intent, described), AggregateFunction::Count));
    }

    let measure_terms = intent.terms.iter().filter(|term| {
        !intent.group_terms.contains(*term) && !intent.filters.iter().any(|filter| &filter.term == *term)
    });
    let measure = measure_terms
        .filter_map(|term| best_field(&classified.numeric, term))
        .next()
        .or_else(|| classified.numeric.first());

    match measure {
        Some(field) => Ok(AggregationField::new(&field.as_schema_field(), function)),
        // "vendas por marca" on a table without measures still has a sensible answer.
        None if intent.aggregate.is_none() => {
            Ok(AggregationField::new(&count_target(intent, described), AggregateFunction::Count))
        }
        None => Err(PlanError::NoNumericField { table: table_name.to_string(), function }),
    }
}

fn count_target(intent: &QuestionIntent, described: &[DescribedField]) -> SchemaField {
    let id_fields: Vec<DescribedField> =
        described.iter().filter(|field| is_identifier(&field.name)).cloned().collect();

    let by_subject = intent.count_subject.as_deref().and_then(|subject| {
        best_field(&id_fields, subject).or_else(|| best_field(described, subject))
    });

    by_subject
        .or_else(|| id_fields.first())
        .or_else(|| described.first())
        .map(DescribedField::as_schema_field)
        .unwrap_or_else(|| SchemaField::new("*", "STRING"))
}

fn is_identifier(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "id" || lower.ends_with("_id") || lower.starts_with("id_")
}

fn filter_conditions(intent: &QuestionIntent, classified: &ClassifiedSchema) -> Vec<QueryFilter> {
    intent
        .filters
        .iter()
        .filter_map(|mention| {
            let Some(field) = best_field(&classified.grouping, &mention.term) else {
                debug!(
                    event_name = "agent.planner.unmatched_filter",
                    term = %mention.term,
                    "no text column matched filter"
                );
                return None;
            };
            let mut filter = QueryFilter::equals(&field.as_schema_field(), mention.value.clone());
            if mention.value.contains('%') {
                filter.comparator = Comparator::Like;
            }
            Some(if mention.negated { filter.negated() } else { filter })
        })
        .collect()
}

fn preferred_date_field(classified: &ClassifiedSchema) -> Option<&DescribedField> {
    classified
        .date
        .iter()
        .find(|field| {
            let lower = field.name.to_ascii_lowercase();
            lower.contains("created") || lower.contains("criad")
        })
        .or_else(|| classified.date.first())
}

/// Best column for a question term: exact name token beats a description
/// word, which beats a substring of the name.
fn best_field<'a>(candidates: &'a [DescribedField], term: &str) -> Option<&'a DescribedField> {
    let variants = term_variants(term);
    candidates
        .iter()
        .map(|field| (field_score(field, &variants), field))
        .filter(|(score, _)| *score > 0)
        .fold(None, |best: Option<(u32, &DescribedField)>, candidate| match best {
            Some((score, _)) if score >= candidate.0 => best,
            _ => Some(candidate),
        })
        .map(|(_, field)| field)
}

fn field_score(field: &DescribedField, variants: &[String]) -> u32 {
    let lower_name = field.name.to_ascii_lowercase();
    let name_tokens: Vec<String> = lower_name.split('_').map(singular).collect();
    if variants.iter().any(|variant| name_tokens.contains(variant)) {
        return 3;
    }
    let description_words: Vec<String> = field
        .description
        .as_deref()
        .map(|description| datapac_core::text::words(description).iter().map(|word| singular(word)).collect())
        .unwrap_or_default();
    if variants.iter().any(|variant| description_words.contains(variant)) {
        return 2;
    }
    if variants.iter().any(|variant| variant.len() >= 4 && lower_name.contains(variant.as_str())) {
        return 1;
    }
    0
}
