use std::env;
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::routing::{get, post};
use axum::{Json, Router};
use datapac_agent::Answerer;
use datapac_backend::BackendClient;
use datapac_cli::commands::{ask, chat, config, doctor, query, schema, tables};
use datapac_core::config::BackendConfig;
use datapac_core::errors::InterfaceError;
use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, BufReader};

const ENV_KEYS: [&str; 12] = [
    "DATAPAC_BACKEND_BASE_URL",
    "DATAPAC_BACKEND_TIMEOUT_SECS",
    "DATAPAC_LLM_PROVIDER",
    "DATAPAC_LLM_API_KEY",
    "DATAPAC_LLM_BASE_URL",
    "DATAPAC_LLM_MODEL",
    "DATAPAC_LLM_TIMEOUT_SECS",
    "DATAPAC_LLM_MAX_STEPS",
    "DATAPAC_LOGGING_LEVEL",
    "DATAPAC_LOGGING_FORMAT",
    "DATAPAC_LOG_LEVEL",
    "DATAPAC_LOG_FORMAT",
];

/// Holds the env lock, and restores the previous values when dropped.
struct EnvGuard {
    previous: Vec<(&'static str, Option<String>)>,
    _lock: MutexGuard<'static, ()>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(value) => env::set_var(key, value),
                None => env::remove_var(key),
            }
        }
    }
}

fn with_env(vars: &[(&str, &str)]) -> EnvGuard {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let lock = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let previous = ENV_KEYS.iter().map(|key| (*key, env::var(key).ok())).collect();
    for key in ENV_KEYS {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }
    EnvGuard { previous, _lock: lock }
}

#[derive(Default)]
struct StubAnswerer {
    questions: Mutex<Vec<String>>,
}

impl StubAnswerer {
    fn questions(&self) -> Vec<String> {
        self.questions.lock().expect("lock").clone()
    }
}

#[async_trait]
impl Answerer for StubAnswerer {
    async fn answer(&self, question: &str) -> Result<String, InterfaceError> {
        self.questions.lock().expect("lock").push(question.to_string());
        if question == "falha" {
            return Err(InterfaceError::ServiceUnavailable {
                message: "backend offline".to_string(),
                correlation_id: "session-1".to_string(),
            });
        }
        Ok(format!("resposta para {question}"))
    }
}

async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let address = listener.local_addr().expect("local address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{address}")
}

async fn mock_backend() -> String {
    spawn(
        Router::new()
            .route(
                "/data_pac/tables",
                get(|| async { Json(json!([{"tableDataset": "ds", "tableName": "orders", "alias": "Pedidos"}])) }),
            )
            .route(
                "/bigquery/schema/{dataset}/{table}",
                get(|| async { Json(json!([{"name": "order_id", "type": "STRING"}])) }),
            )
            .route(
                "/bigquery/easy-query/{dataset}/{table}",
                post(|Json(body): Json<Value>| async move { Json(json!([{"echo": body["aggFields"][0]["name"]}])) }),
            ),
    )
    .await
}

fn backend(base_url: &str) -> BackendClient {
    BackendClient::new(&BackendConfig { base_url: base_url.to_string(), timeout_secs: 5 })
        .expect("client builds")
}

fn parse(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

#[tokio::test]
async fn repl_answers_skips_blank_lines_reports_errors_and_stops_on_exit_word() {
    let answerer = StubAnswerer::default();
    let input: &[u8] = "\n   \nMostre vendas por marca\nfalha\nSAIR\nnunca lida\n".as_bytes();
    let mut output = Vec::new();

    chat::run_repl(&answerer, input, &mut output).await.expect("repl runs");

    let transcript = String::from_utf8(output).expect("utf8");
    assert_eq!(answerer.questions(), vec!["Mostre vendas por marca", "falha"]);
    assert!(transcript.contains("🤖 resposta para Mostre vendas por marca"), "{transcript}");
    assert!(
        transcript.contains("❌ Erro: service unavailable: backend offline (correlation_id: session-1)"),
        "{transcript}"
    );
    assert!(transcript.trim_end().ends_with("👋 Até logo!"), "{transcript}");
    assert!(!transcript.contains("nunca lida"));
}

#[tokio::test]
async fn repl_exits_cleanly_at_end_of_input() {
    let answerer = StubAnswerer::default();
    let input: &[u8] = "pergunta".as_bytes();
    let mut output = Vec::new();

    chat::run_repl(&answerer, input, &mut output).await.expect("repl runs");

    let transcript = String::from_utf8(output).expect("utf8");
    assert_eq!(answerer.questions(), vec!["pergunta"]);
    assert!(transcript.trim_end().ends_with("👋 Encerrando..."), "{transcript}");
}

#[tokio::test]
async fn repl_survives_a_line_that_is_not_utf8() {
    let answerer = StubAnswerer::default();
    let input: &[u8] = b"caf\xe9 por marca\nMostre vendas por marca\nsair\n";
    let mut output = Vec::new();

    chat::run_repl(&answerer, input, &mut output).await.expect("repl runs");

    let questions = answerer.questions();
    assert_eq!(questions.len(), 2);
    assert_eq!(questions[0], "caf\u{fffd} por marca");
    assert_eq!(questions[1], "Mostre vendas por marca");
    let transcript = String::from_utf8(output).expect("utf8");
    assert!(transcript.contains("🤖 resposta para Mostre vendas por marca"), "{transcript}");
    assert!(transcript.trim_end().ends_with("👋 Até logo!"), "{transcript}");
}

#[tokio::test]
async fn repl_ends_cleanly_when_interrupted_while_waiting_for_input() {
    let answerer = StubAnswerer::default();
    let (mut terminal, input) = tokio::io::duplex(64);
    terminal.write_all(b"pergunta\n").await.expect("write question");
    let mut output = Vec::new();

    chat::run_repl_until(
        &answerer,
        BufReader::new(input),
        &mut output,
        tokio::time::sleep(Duration::from_millis(50)),
    )
    .await
    .expect("repl runs");

    assert_eq!(answerer.questions(), vec!["pergunta"]);
    let transcript = String::from_utf8(output).expect("utf8");
    assert!(transcript.trim_end().ends_with("👋 Encerrando..."), "{transcript}");
    drop(terminal);
}

#[tokio::test]
async fn ask_prints_answer_or_error() {
    let answerer = StubAnswerer::default();

    let result = ask::run(&answerer, "  vendas de ontem ").await;
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.output, "resposta para vendas de ontem");

    let result = ask::run(&answerer, "falha").await;
    assert_eq!(result.exit_code, 1);
    assert!(result.output.starts_with("❌ Erro:"));

    let result = ask::run(&answerer, "   ").await;
    assert_eq!(result.exit_code, 2);
    assert_eq!(parse(&result.output)["error_class"], "empty_question");
    assert_eq!(answerer.questions().len(), 2);
}

#[tokio::test]
async fn backend_commands_print_envelopes() {
    let base = mock_backend().await;
    let client = backend(&base);

    let result = tables::run(&client).await;
    assert_eq!(result.exit_code, 0);
    assert_eq!(parse(&result.output)["tables"][0]["alias"], "Pedidos");

    let result = schema::run(&client, "ds", "orders").await;
    assert_eq!(result.exit_code, 0);
    assert_eq!(parse(&result.output)["schema"][0]["name"], "order_id");

    let payload = r#"{"aggFields": [{"name": "order_id", "type": "STRING", "function": "COUNT"}]}"#;
    let result = query::run(&client, "ds", "orders", payload).await;
    assert_eq!(result.exit_code, 0);
    let envelope = parse(&result.output);
    assert_eq!(envelope["message"], "Consulta executada com sucesso");
    assert_eq!(envelope["data"]["results"], json!([{"echo": "order_id"}]));
    assert_eq!(envelope["data"]["result_count"], 1);
}

#[tokio::test]
async fn backend_command_failures_are_reported_not_raised() {
    let base = spawn(Router::new()).await;
    let client = backend(&base);

    let result = tables::run(&client).await;
    assert_eq!(result.exit_code, 1);
    assert_eq!(parse(&result.output)["status"], "error");

    let result = query::run(&client, "ds", "orders", "{not json").await;
    assert_eq!(result.exit_code, 2);
    assert_eq!(parse(&result.output)["error_class"], "invalid_payload");

    // forceDate without a date filter never reaches the backend.
    let result = query::run(&client, "ds", "orders", r#"{"forceDate": true}"#).await;
    assert_eq!(result.exit_code, 1);
    let envelope = parse(&result.output);
    assert!(envelope["message"].as_str().unwrap_or_default().contains("forceDate"), "{envelope}");
}

#[test]
fn config_reports_sources_and_redacts_api_key() {
    let _env = with_env(&[
        ("DATAPAC_BACKEND_BASE_URL", "http://warehouse.internal:8080"),
        ("DATAPAC_LLM_API_KEY", "gm-super-secret"),
        ("DATAPAC_LOG_LEVEL", "debug"),
    ]);

    let output = config::run(None);

    assert!(output.contains(
        "- backend.base_url = http://warehouse.internal:8080 (source: env (DATAPAC_BACKEND_BASE_URL))"
    ));
    assert!(output.contains("- llm.api_key = <redacted> (source: env (DATAPAC_LLM_API_KEY))"));
    assert!(output.contains("- logging.level = debug (source: env (DATAPAC_LOG_LEVEL))"));
    assert!(output.contains("- llm.max_steps = 8 (source: default)"));
    assert!(!output.contains("gm-super-secret"));
}

#[test]
fn config_reports_validation_failure() {
    let _env = with_env(&[("DATAPAC_LLM_PROVIDER", "openai")]);

    let output = config::run(None);

    assert!(output.starts_with("config validation failed:"), "{output}");
}

#[tokio::test]
async fn doctor_passes_with_reachable_backend_and_offline_planner() {
    let base = mock_backend().await;
    let _env = with_env(&[("DATAPAC_BACKEND_BASE_URL", base.as_str()), ("DATAPAC_LLM_PROVIDER", "disabled")]);

    let result = doctor::run(true, None).await;

    assert_eq!(result.exit_code, 0, "{}", result.output);
    let report = parse(&result.output);
    assert_eq!(report["overall_status"], "pass");
    assert_eq!(report["checks"][1]["name"], "backend_reachability");
    assert_eq!(report["checks"][1]["status"], "pass");
    assert_eq!(report["checks"][2]["status"], "skipped");
}

#[tokio::test]
async fn doctor_fails_when_backend_is_down() {
    let unreachable = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        drop(listener);
        format!("http://{address}")
    };
    let _env = with_env(&[("DATAPAC_BACKEND_BASE_URL", unreachable.as_str()), ("DATAPAC_LLM_PROVIDER", "disabled")]);

    let result = doctor::run(false, None).await;

    assert_eq!(result.exit_code, 1);
    assert!(result.output.starts_with("doctor: one or more readiness checks failed"));
    assert!(result.output.contains("- [fail] backend_reachability:"));
    assert!(result.output.contains("- [skip] model_readiness:"));
}

#[tokio::test]
async fn doctor_skips_dependent_checks_on_invalid_config() {
    let _env = with_env(&[("DATAPAC_BACKEND_BASE_URL", "localhost:8080")]);

    let result = doctor::run(true, None).await;

    let report = parse(&result.output);
    assert_eq!(result.exit_code, 1);
    assert_eq!(report["checks"][0]["status"], "fail");
    assert_eq!(report["checks"][1]["status"], "skipped");
    assert_eq!(report["checks"][2]["status"], "skipped");
}
