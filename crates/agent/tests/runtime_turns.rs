use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use datapac_agent::llm::{ChatMessage, LlmClient, LlmError, LlmReply, Role, ToolCall, ToolSpec};
use datapac_agent::{AgentRuntime, Clock, SessionHandle};
use datapac_backend::BackendClient;
use datapac_core::config::BackendConfig;
use datapac_core::errors::InterfaceError;
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct Recorder {
    executed: Arc<Mutex<Vec<(String, String, Value)>>>,
    schema_fetches: Arc<Mutex<usize>>,
}

impl Recorder {
    fn executed(&self) -> Vec<(String, String, Value)> {
        self.executed.lock().expect("lock").clone()
    }

    fn schema_fetches(&self) -> usize {
        *self.schema_fetches.lock().expect("lock")
    }
}

fn catalog() -> Value {
    json!([
        {
            "tableDataset": "eatopia_all_orders",
            "tableName": "orders_eatopia",
            "alias": "Pedidos Eatopia",
            "description": "Pedidos de todas as marcas",
            "tableFields": [
                {"name": "brand_name", "description": "Nome da marca"},
                {"name": "total_items", "description": "Itens vendidos no pedido"}
            ],
            "tags": ["pedidos", "vendas"]
        },
        {
            "tableDataset": "finance",
            "tableName": "revenue_daily",
            "alias": "Faturamento diário",
            "tags": ["financeiro"]
        }
    ])
}

fn orders_schema() -> Value {
    json!([
        {"name": "order_id", "type": "STRING"},
        {"name": "brand_name", "type": "STRING"},
        {"name": "total_items", "type": "FLOAT"},
        {"name": "created_at_sp", "type": "TIMESTAMP"}
    ])
}

async fn spawn_backend(recorder: Recorder) -> String {
    let router = Router::new()
        .route("/data_pac/tables", get(|| async { Json(catalog()) }))
        .route(
            "/bigquery/schema/{dataset}/{table}",
            get(|State(recorder): State<Recorder>| async move {
                *recorder.schema_fetches.lock().expect("lock") += 1;
                Json(orders_schema())
            }),
        )
        .route(
            "/bigquery/easy-query/{dataset}/{table}",
            post(
                |State(recorder): State<Recorder>,
                 Path((dataset, table)): Path<(String, String)>,
                 Json(body): Json<Value>| async move {
                    recorder.executed.lock().expect("lock").push((dataset, table, body));
                    Json(json!([{"count_order_id": 3}]))
                },
            ),
        )
        .with_state(recorder);
    spawn(router).await
}

async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let address = listener.local_addr().expect("local address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{address}")
}

fn backend(base_url: &str) -> BackendClient {
    BackendClient::new(&BackendConfig { base_url: base_url.to_string(), timeout_secs: 5 })
        .expect("client builds")
}

fn friday() -> Clock {
    Clock::Fixed(NaiveDate::from_ymd_opt(2025, 7, 18).expect("valid date"))
}

/// Replays canned replies and keeps every conversation it was shown.
#[derive(Default)]
struct ScriptedLlm {
    replies: Mutex<VecDeque<LlmReply>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    fn new(replies: Vec<LlmReply>) -> Self {
        Self { replies: Mutex::new(replies.into()), seen: Mutex::default() }
    }

    fn seen(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().expect("lock").clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(&self, messages: &[ChatMessage], _tools: &[ToolSpec]) -> Result<LlmReply, LlmError> {
        self.seen.lock().expect("lock").push(messages.to_vec());
        self.replies.lock().expect("lock").pop_front().ok_or(LlmError::Empty)
    }
}

fn call(id: &str, name: &str, arguments: Value) -> LlmReply {
    LlmReply::ToolCalls(vec![ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    }])
}

#[tokio::test]
async fn deterministic_turn_selects_table_plans_and_records_last_query() {
    let recorder = Recorder::default();
    let base = spawn_backend(recorder.clone()).await;
    let session = SessionHandle::new();
    let runtime = AgentRuntime::deterministic(backend(&base), session.clone(), friday());

    let answer = runtime
        .handle_turn("Quantos pedidos da marca Patties na semana passada")
        .await
        .expect("turn succeeds");

    assert!(answer.starts_with("Consulta em Pedidos Eatopia (eatopia_all_orders.orders_eatopia)"), "{answer}");
    assert!(answer.contains("período de 2025-07-06 a 2025-07-12"), "{answer}");
    assert!(answer.ends_with("count_order_id: 3"), "{answer}");

    let executed = recorder.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(recorder.schema_fetches(), 1);
    assert_eq!(executed[0].0, "eatopia_all_orders");
    assert_eq!(executed[0].1, "orders_eatopia");
    assert_eq!(
        executed[0].2,
        json!({
            "fields": [],
            "aggFields": [{"name": "order_id", "type": "STRING", "function": "COUNT"}],
            "filters": [[{
                "name": "brand_name",
                "comparator": "=",
                "target": "Patties",
                "negation": false,
                "type": "STRING"
            }]],
            "dateField": "created_at_sp",
            "dateRange": ["2025-07-06", "2025-07-12"],
            "forceDate": true,
            "usePartition": false
        })
    );

    let last = session.last_query().expect("last query recorded");
    assert_eq!(last.table_alias, "Pedidos Eatopia");
    assert_eq!(last.result_count, Some(1));
    assert_eq!(last.field_descriptions_used.get("brand_name").map(String::as_str), Some("Nome da marca"));
    assert_eq!(session.lock().catalog.len(), 2);
}

#[tokio::test]
async fn ambiguous_question_waits_for_the_user_to_pick_a_table() {
    let recorder = Recorder::default();
    let base = spawn_backend(recorder.clone()).await;
    let session = SessionHandle::new();
    let runtime = AgentRuntime::deterministic(backend(&base), session.clone(), friday());

    let prompt = runtime.handle_turn("previsão do tempo").await.expect("turn succeeds");
    assert!(prompt.contains("1. Pedidos Eatopia (eatopia_all_orders.orders_eatopia)"), "{prompt}");
    assert!(prompt.contains("2. Faturamento diário (finance.revenue_daily)"), "{prompt}");
    assert!(recorder.executed().is_empty());
    assert!(session.lock().pending_choice.is_some());

    let answer = runtime.handle_turn("1").await.expect("choice accepted");
    assert!(answer.starts_with("Consulta em Pedidos Eatopia"), "{answer}");
    assert_eq!(recorder.executed().len(), 1);
    assert!(session.lock().pending_choice.is_none());
    assert_eq!(session.last_query().expect("recorded").question, "previsão do tempo");
}

#[tokio::test]
async fn unavailable_catalog_fails_the_turn_with_session_correlation_id() {
    let base = spawn(Router::new()).await;
    let session = SessionHandle::new();
    let runtime = AgentRuntime::deterministic(backend(&base), session.clone(), friday());

    let error = runtime.handle_turn("vendas por marca").await.expect_err("catalog is missing");

    assert!(matches!(error, InterfaceError::ServiceUnavailable { .. }), "{error:?}");
    assert_eq!(error.correlation_id(), session.correlation_id());
}

#[tokio::test]
async fn model_driven_turn_runs_tools_and_corrects_planned_payload() {
    let recorder = Recorder::default();
    let base = spawn_backend(recorder.clone()).await;
    let session = SessionHandle::new();
    let table_arguments = json!({"dataset": "eatopia_all_orders", "table_name": "orders_eatopia"});
    let llm = Arc::new(ScriptedLlm::new(vec![
        call("c1", "get_tables", json!({})),
        call("c2", "get_table_schema", table_arguments.clone()),
        call("c3", "get_date", json!({})),
        call(
            "c4",
            "query_executor",
            json!({
                "dataset": "eatopia_all_orders",
                "table_name": "orders_eatopia",
                "question": "Quantos pedidos da marca Patties ontem?"
            }),
        ),
        // The query-construction model forgets forceDate.
        call(
            "p1",
            "execute_query_json",
            json!({
                "dataset": "eatopia_all_orders",
                "table_name": "orders_eatopia",
                "payload": {
                    "fields": [],
                    "aggFields": [{"name": "order_id", "type": "STRING", "function": "COUNT"}],
                    "filters": [[{"name": "brand_name", "comparator": "=", "target": "Patties", "negation": false, "type": "STRING"}]],
                    "dateField": "created_at_sp",
                    "dateRange": ["2025-07-17", "2025-07-17"],
                    "forceDate": false,
                    "usePartition": false
                }
            }),
        ),
        LlmReply::Text("Ontem foram 3 pedidos da Patties.".to_string()),
    ]));
    let runtime = AgentRuntime::model_driven(backend(&base), llm.clone(), 8, session.clone(), friday());

    let answer = runtime.handle_turn("Quantos pedidos da marca Patties ontem?").await.expect("turn succeeds");
    assert_eq!(answer, "Ontem foram 3 pedidos da Patties.");

    let executed = recorder.executed();
    assert_eq!(executed.len(), 1);
    // The executor reuses the schema the orchestrator already fetched.
    assert_eq!(recorder.schema_fetches(), 1);
    assert_eq!(executed[0].2["forceDate"], json!(true));
    assert_eq!(executed[0].2["dateRange"], json!(["2025-07-17", "2025-07-17"]));

    let seen = llm.seen();
    assert_eq!(seen.len(), 6);
    // Fifth call is the query-construction model, with its own instruction.
    assert_eq!(seen[4].len(), 2);
    assert!(seen[4][1].content.as_deref().unwrap_or_default().contains("\"current_date\": \"2025-07-18\""));

    let last_orchestrator_view = &seen[5];
    let tool_results: Vec<Value> = last_orchestrator_view
        .iter()
        .filter(|message| message.role == Role::Tool)
        .map(|message| serde_json::from_str(message.content.as_deref().unwrap_or("null")).expect("tool json"))
        .collect();
    assert_eq!(tool_results.len(), 4);
    assert_eq!(tool_results[0]["status"], json!("success"));
    assert_eq!(tool_results[1]["schema"][3]["name"], json!("created_at_sp"));
    assert_eq!(tool_results[2], json!({"current_date": "2025-07-18"}));
    assert_eq!(tool_results[3]["data"]["result_count"], json!(1));
    assert!(tool_results[3]["note"].as_str().unwrap_or_default().contains("forceDate"));

    let session_state = session.lock();
    assert_eq!(session_state.history.first().map(|message| message.role), Some(Role::System));
    assert_eq!(session_state.history.last().map(|message| message.role), Some(Role::Assistant));
    assert_eq!(session_state.catalog.len(), 2);
    assert_eq!(session_state.cached_schema("eatopia_all_orders", "orders_eatopia").map(<[_]>::len), Some(4));
    assert!(session_state.last_query.is_some());
}

#[tokio::test]
async fn model_driven_turn_gives_up_after_step_budget() {
    let base = spawn(Router::new()).await;
    let session = SessionHandle::new();
    let llm = Arc::new(ScriptedLlm::new(vec![
        call("c1", "get_date", json!({})),
        call("c2", "get_date", json!({})),
        call("c3", "get_date", json!({})),
    ]));
    let runtime = AgentRuntime::model_driven(backend(&base), llm.clone(), 2, session.clone(), friday());

    let error = runtime.handle_turn("que dia é hoje?").await.expect_err("budget exhausted");

    assert!(matches!(error, InterfaceError::ServiceUnavailable { .. }), "{error:?}");
    assert_eq!(llm.seen().len(), 2);
    // Only the instruction survives a failed turn.
    assert_eq!(session.lock().history.len(), 1);
}

#[tokio::test]
async fn unknown_tool_is_reported_back_to_the_model() {
    let base = spawn(Router::new()).await;
    let llm = Arc::new(ScriptedLlm::new(vec![
        call("c1", "drop_table", json!({})),
        LlmReply::Text("Não consigo fazer isso.".to_string()),
    ]));
    let runtime = AgentRuntime::model_driven(backend(&base), llm.clone(), 4, SessionHandle::new(), friday());

    let answer = runtime.handle_turn("apague a tabela").await.expect("turn succeeds");
    assert_eq!(answer, "Não consigo fazer isso.");

    let seen = llm.seen();
    let tool_message = seen[1].last().expect("tool result");
    assert_eq!(tool_message.role, Role::Tool);
    assert!(tool_message.content.as_deref().unwrap_or_default().contains("unknown tool"));
}
