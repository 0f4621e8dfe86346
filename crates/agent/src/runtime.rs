use std::sync::Arc;

use async_trait::async_trait;
use datapac_backend::{BackendClient, ToolOutcome};
use datapac_core::config::AppConfig;
use datapac_core::domain::catalog::TableDescriptor;
use datapac_core::errors::{ApplicationError, InterfaceError};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::conversation::QuestionAnalyzer;
use crate::executor::{ExecutionRequest, QueryExecutor};
use crate::llm::{ChatMessage, LlmClient, LlmReply, OpenAiCompatibleClient, Role};
use crate::planner::{HeuristicQueryPlanner, LlmQueryPlanner};
use crate::prompts::ORCHESTRATOR_INSTRUCTION;
use crate::render::{render_catalog_choice, render_report};
use crate::selection::{TableSelection, TableSelector};
use crate::session::{PendingChoice, SessionHandle};
use crate::tools::{
    Clock, GetDateTool, GetTableSchemaTool, GetTablesTool, QueryExecutorTool, ToolRegistry,
};

/// Completed turns the model-driven history keeps besides the instruction.
const MAX_HISTORY_TURNS: usize = 6;

/// Anything that can answer one user turn. The CLI drives this.
#[async_trait]
pub trait Answerer: Send + Sync {
    async fn answer(&self, question: &str) -> Result<String, InterfaceError>;
}

enum Strategy {
    ModelDriven { llm: Arc<dyn LlmClient>, tools: ToolRegistry, max_steps: usize },
    Deterministic { analyzer: QuestionAnalyzer, selector: TableSelector },
}

pub struct AgentRuntime {
    backend: BackendClient,
    executor: Arc<QueryExecutor>,
    session: SessionHandle,
    clock: Clock,
    strategy: Strategy,
}

impl AgentRuntime {
    /// Model-driven when a provider is configured, deterministic otherwise.
    pub fn from_config(config: &AppConfig) -> Result<Self, ApplicationError> {
        let backend = BackendClient::new(&config.backend)?;
        let session = SessionHandle::new();
        if !config.llm.is_enabled() {
            return Ok(Self::deterministic(backend, session, Clock::System));
        }
        let llm = OpenAiCompatibleClient::from_config(&config.llm)?;
        info!(
            event_name = "agent.runtime.model_configured",
            provider = ?config.llm.provider,
            model = %llm.model(),
            "model-driven runtime"
        );
        Ok(Self::model_driven(
            backend,
            Arc::new(llm),
            config.llm.max_steps as usize,
            session,
            Clock::System,
        ))
    }

    pub fn model_driven(
        backend: BackendClient,
        llm: Arc<dyn LlmClient>,
        max_steps: usize,
        session: SessionHandle,
        clock: Clock,
    ) -> Self {
        let executor =
            Arc::new(QueryExecutor::new(backend.clone(), Arc::new(LlmQueryPlanner::new(llm.clone()))));

        let mut tools = ToolRegistry::default();
        tools.register(GetTablesTool::new(backend.clone(), session.clone()));
        tools.register(GetTableSchemaTool::new(backend.clone(), session.clone()));
        tools.register(GetDateTool::new(clock));
        tools.register(QueryExecutorTool::new(executor.clone(), session.clone(), clock));

        Self {
            backend,
            executor,
            session,
            clock,
            strategy: Strategy::ModelDriven { llm, tools, max_steps: max_steps.max(1) },
        }
    }

    pub fn deterministic(backend: BackendClient, session: SessionHandle, clock: Clock) -> Self {
        let executor =
            Arc::new(QueryExecutor::new(backend.clone(), Arc::new(HeuristicQueryPlanner::new())));
        Self {
            backend,
            executor,
            session,
            clock,
            strategy: Strategy::Deterministic {
                analyzer: QuestionAnalyzer::new(),
                selector: TableSelector::new(),
            },
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn strategy_name(&self) -> &'static str {
        match self.strategy {
            Strategy::ModelDriven { .. } => "model",
            Strategy::Deterministic { .. } => "deterministic",
        }
    }

    pub async fn handle_turn(&self, question: &str) -> Result<String, InterfaceError> {
        let correlation_id = self.session.correlation_id();
        debug!(
            event_name = "agent.turn.started",
            correlation_id = %correlation_id,
            strategy = self.strategy_name(),
            "handling turn"
        );

        let result = match &self.strategy {
            Strategy::ModelDriven { llm, tools, max_steps } => {
                self.model_turn(llm.as_ref(), tools, *max_steps, question).await
            }
            Strategy::Deterministic { analyzer, selector } => {
                self.deterministic_turn(analyzer, selector, question).await
            }
        };

        result.map_err(|error| {
            warn!(
                event_name = "agent.turn.failed",
                correlation_id = %correlation_id,
                error = %error,
                "turn failed"
            );
            error.into_interface(correlation_id)
        })
    }

    async fn model_turn(
        &self,
        llm: &dyn LlmClient,
        tools: &ToolRegistry,
        max_steps: usize,
        question: &str,
    ) -> Result<String, ApplicationError> {
        let (turn_start, mut messages) = {
            let mut session = self.session.lock();
            if session.history.is_empty() {
                session.history.push(ChatMessage::system(ORCHESTRATOR_INSTRUCTION));
            }
            (session.history.len(), session.history.clone())
        };
        messages.push(ChatMessage::user(question));
        let specs = tools.specs();

        for step in 0..max_steps {
            let reply = match llm.chat(&messages, &specs).await {
                Ok(reply) => reply,
                Err(error) => {
                    self.session.lock().history.truncate(turn_start);
                    return Err(error.into());
                }
            };

            match reply {
                LlmReply::Text(text) => {
                    messages.push(ChatMessage::assistant(text.clone()));
                    trim_history(&mut messages, MAX_HISTORY_TURNS);
                    self.session.lock().history = messages;
                    return Ok(text);
                }
                LlmReply::ToolCalls(calls) => {
                    messages.push(ChatMessage::assistant_tool_calls(calls.clone()));
                    for call in &calls {
                        debug!(
                            event_name = "agent.tool.called",
                            correlation_id = %self.session.correlation_id(),
                            step,
                            tool = %call.name,
                            "model called tool"
                        );
                        let result = match call.parsed_arguments() {
                            Ok(arguments) => tools.call(&call.name, arguments).await,
                            Err(error) => Err(error.into()),
                        };
                        let content = result.unwrap_or_else(|error| {
                            json!({"status": "error", "message": error.to_string()})
                        });
                        messages.push(ChatMessage::tool_result(call, content.to_string()));
                    }
                }
            }
        }

        self.session.lock().history.truncate(turn_start);
        Err(ApplicationError::Model(format!("no final answer after {max_steps} tool steps")))
    }

    async fn deterministic_turn(
        &self,
        analyzer: &QuestionAnalyzer,
        selector: &TableSelector,
        question: &str,
    ) -> Result<String, ApplicationError> {
        let pending = self.session.lock().pending_choice.take();
        if let Some(pending) = pending {
            if let Some(table) = pending.resolve(question).cloned() {
                info!(
                    event_name = "agent.selection.user_choice",
                    correlation_id = %self.session.correlation_id(),
                    table = %table.qualified_name(),
                    "user picked table"
                );
                return Ok(self.answer_with_table(&pending.question, table).await);
            }
        }

        let catalog = match self.backend.list_tables().await {
            ToolOutcome::Success(body) => body.tables,
            ToolOutcome::Error { message } => return Err(ApplicationError::Integration(message)),
        };
        self.session.lock().catalog = catalog.clone();

        let intent = analyzer.analyze(question);
        match selector.select(&intent, &catalog) {
            TableSelection::EmptyCatalog => {
                Ok("Nenhuma tabela está disponível no catálogo no momento.".to_string())
            }
            TableSelection::Ambiguous(candidates) => {
                let scores = selector.scores(&intent, &catalog);
                debug!(
                    event_name = "agent.selection.ambiguous",
                    correlation_id = %self.session.correlation_id(),
                    candidate_count = candidates.len(),
                    scores = ?scores,
                    "asking user to pick a table"
                );
                let text = render_catalog_choice(&candidates);
                self.session.lock().pending_choice =
                    Some(PendingChoice { question: question.to_string(), candidates });
                Ok(text)
            }
            TableSelection::Selected(table) => Ok(self.answer_with_table(question, table).await),
        }
    }

    async fn answer_with_table(&self, question: &str, table: TableDescriptor) -> String {
        let report = self
            .executor
            .execute(
                &self.session,
                ExecutionRequest {
                    question: question.to_string(),
                    table,
                    schema: None,
                    current_date: self.clock.today(),
                },
            )
            .await;
        render_report(&report)
    }
}

#[async_trait]
impl Answerer for AgentRuntime {
    async fn answer(&self, question: &str) -> Result<String, InterfaceError> {
        self.handle_turn(question).await
    }
}

/// Drops the oldest turns so at most `max_turns` remain. Turns are cut at user
/// messages, so a tool call never loses its result. Messages before the first
/// user message (the instruction) are kept.
fn trim_history(history: &mut Vec<ChatMessage>, max_turns: usize) {
    let turn_starts: Vec<usize> = history
        .iter()
        .enumerate()
        .filter(|(_, message)| message.role == Role::User)
        .map(|(index, _)| index)
        .collect();
    if turn_starts.len() <= max_turns {
        return;
    }
    let keep_from = turn_starts[turn_starts.len() - max_turns];
    history.drain(turn_starts[0]..keep_from);
}
