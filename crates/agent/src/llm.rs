use std::time::Duration;

use async_trait::async_trait;
use datapac_core::config::LlmConfig;
use datapac_core::errors::ApplicationError;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model. `arguments` is the raw JSON text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn parsed_arguments(&self) -> Result<Value, LlmError> {
        let trimmed = self.arguments.trim();
        if trimmed.is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(trimmed).map_err(|error| {
            LlmError::Decode(format!("arguments for `{}` are not valid JSON: {error}", self.name))
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self { role: Role::Assistant, content: None, tool_calls, tool_call_id: None }
    }

    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call.id.clone()),
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: Some(content.into()), tool_calls: Vec::new(), tool_call_id: None }
    }
}

/// Function definition advertised to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LlmReply {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("language model is not configured: {0}")]
    NotConfigured(String),
    #[error("language model request failed: {0}")]
    Transport(String),
    #[error("language model returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("could not decode language model response: {0}")]
    Decode(String),
    #[error("language model returned neither text nor tool calls")]
    Empty,
}

impl From<LlmError> for ApplicationError {
    fn from(error: LlmError) -> Self {
        match error {
            LlmError::NotConfigured(message) => Self::Configuration(message),
            other => Self::Model(other.to_string()),
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolSpec])
        -> Result<LlmReply, LlmError>;
}

/// Chat-completions client for OpenAI-compatible endpoints (OpenAI, Gemini, Ollama).
pub struct OpenAiCompatibleClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = config.effective_base_url().ok_or_else(|| {
            LlmError::NotConfigured("llm.provider is disabled".to_string())
        })?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        Ok(Self { http, base_url, model: config.model.clone(), api_key: config.api_key.clone() })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Value {
        let api_messages: Vec<Value> = messages.iter().map(wire_message).collect();
        let mut body = json!({
            "model": self.model,
            "messages": api_messages,
            "temperature": 0.1,
        });

        if !tools.is_empty() {
            let api_tools: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(api_tools);
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<LlmReply, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.http.post(&url).json(&self.request_body(messages, tools));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        debug!(
            event_name = "llm.chat.request",
            model = %self.model,
            message_count = messages.len(),
            tool_count = tools.len(),
            "sending chat completion"
        );

        let response = request.send().await.map_err(|error| LlmError::Transport(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            warn!(event_name = "llm.chat.error", status = status.as_u16(), "chat completion rejected");
            return Err(LlmError::Status { status: status.as_u16(), message });
        }

        let body: Value =
            response.json().await.map_err(|error| LlmError::Decode(error.to_string()))?;
        parse_reply(&body)
    }
}

fn wire_message(message: &ChatMessage) -> Value {
    let mut wire = json!({ "role": message.role, "content": message.content });
    if !message.tool_calls.is_empty() {
        wire["tool_calls"] = Value::Array(
            message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {"name": call.name, "arguments": call.arguments},
                    })
                })
                .collect(),
        );
    }
    if let Some(tool_call_id) = &message.tool_call_id {
        wire["tool_call_id"] = json!(tool_call_id);
    }
    wire
}

/// Extracts the first choice of a chat-completions response.
pub fn parse_reply(body: &Value) -> Result<LlmReply, LlmError> {
    if let Some(error) = body.get("error") {
        return Err(LlmError::Decode(format!("provider error: {error}")));
    }

    let message = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| LlmError::Decode("no choices in response".to_string()))?;

    let tool_calls: Vec<ToolCall> = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .filter_map(|(index, call)| {
                    let function = call.get("function")?;
                    let name = function.get("name")?.as_str()?.to_string();
                    let arguments = match function.get("arguments") {
                        Some(Value::String(raw)) => raw.clone(),
                        Some(Value::Null) | None => String::new(),
                        Some(other) => other.to_string(),
                    };
                    let id = call
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("call_{index}"));
                    Some(ToolCall { id, name, arguments })
                })
                .collect()
        })
        .unwrap_or_default();

    if !tool_calls.is_empty() {
        return Ok(LlmReply::ToolCalls(tool_calls));
    }

    match message.get("content").and_then(Value::as_str).map(str::trim) {
        Some(content) if !content.is_empty() => Ok(LlmReply::Text(content.to_string())),
        _ => Err(LlmError::Empty),
    }
}

/// Strips a surrounding Markdown code fence (```json ... ```) from model text.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_reply, strip_code_fence, wire_message, ChatMessage, LlmError, LlmReply, ToolCall};

    #[test]
    fn parses_text_reply() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": " Foram 42 pedidos. "}}]});
        assert_eq!(parse_reply(&body).expect("reply"), LlmReply::Text("Foram 42 pedidos.".into()));
    }

    #[test]
    fn parses_tool_calls_with_string_or_object_arguments() {
        let body = json!({"choices": [{"message": {
            "role": "assistant",
            "content": null,
            "tool_calls": [
                {"id": "call_a", "type": "function", "function": {"name": "get_tables", "arguments": "{}"}},
                {"type": "function", "function": {"name": "get_table_schema", "arguments": {"dataset": "ds", "table_name": "t"}}}
            ]
        }}]});

        let LlmReply::ToolCalls(calls) = parse_reply(&body).expect("reply") else {
            panic!("expected tool calls");
        };
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[1].id, "call_1");
        assert_eq!(calls[1].parsed_arguments().expect("json")["table_name"], json!("t"));
    }

    #[test]
    fn empty_or_error_responses_are_errors() {
        assert!(matches!(
            parse_reply(&json!({"choices": [{"message": {"content": ""}}]})),
            Err(LlmError::Empty)
        ));
        assert!(matches!(
            parse_reply(&json!({"error": {"message": "quota"}})),
            Err(LlmError::Decode(_))
        ));
    }

    #[test]
    fn tool_messages_serialize_in_chat_completions_shape() {
        let call = ToolCall { id: "call_1".into(), name: "get_date".into(), arguments: "{}".into() };
        let assistant = wire_message(&ChatMessage::assistant_tool_calls(vec![call.clone()]));
        assert_eq!(assistant["tool_calls"][0]["function"]["name"], json!("get_date"));
        assert_eq!(assistant["content"], json!(null));

        let result = wire_message(&ChatMessage::tool_result(&call, "{\"current_date\":\"2025-07-18\"}"));
        assert_eq!(result["role"], json!("tool"));
        assert_eq!(result["tool_call_id"], json!("call_1"));
    }

    #[test]
    fn strips_json_code_fences() {
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("{\"a\": 1}"), "{\"a\": 1}");
    }
}
