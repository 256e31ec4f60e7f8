use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::gateway::{
    ChatMessage, GatewayError, GatewayFuture, GenerationRequest, GenerationResponse, ModelGateway,
    ModelTier, TokenUsage,
};
use super::tools::{MAX_TOOL_ROUNDS, ToolHandler};
use crate::config_env::optional_trimmed_env;

const DEFAULT_CHAT_COMPLETIONS_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_GENERATE_MODEL: &str = "google/gemini-2.5-flash";
const DEFAULT_ASSIST_MODEL: &str = "google/gemini-2.5-flash-lite";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const QUOTA_RETRY_AFTER_SECONDS: u64 = 60;
const QUOTA_ERROR_CODE: &str = "RESOURCE_EXHAUSTED";

#[derive(Debug, Clone)]
pub struct OpenRouterModelRoute {
    pub generate_model: String,
    pub assist_model: String,
}

impl OpenRouterModelRoute {
    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Generate => &self.generate_model,
            ModelTier::Assist => &self.assist_model,
        }
    }
}

impl Default for OpenRouterModelRoute {
    fn default() -> Self {
        Self {
            generate_model: DEFAULT_GENERATE_MODEL.to_string(),
            assist_model: DEFAULT_ASSIST_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenRouterGatewayConfig {
    pub chat_completions_url: String,
    pub api_key: String,
    pub model_route: OpenRouterModelRoute,
}

impl OpenRouterGatewayConfig {
    pub fn from_env() -> Result<Self, OpenRouterConfigError> {
        let api_key = optional_trimmed_env("OPENROUTER_API_KEY")
            .ok_or_else(|| OpenRouterConfigError::MissingVar("OPENROUTER_API_KEY".to_string()))?;
        let chat_completions_url = optional_trimmed_env("OPENROUTER_CHAT_COMPLETIONS_URL")
            .unwrap_or_else(|| DEFAULT_CHAT_COMPLETIONS_URL.to_string());
        let parsed_url = Url::parse(&chat_completions_url).map_err(|err| {
            OpenRouterConfigError::InvalidConfiguration(format!(
                "OPENROUTER_CHAT_COMPLETIONS_URL is not a valid url: {err}"
            ))
        })?;
        if !matches!(parsed_url.scheme(), "http" | "https") {
            return Err(OpenRouterConfigError::InvalidConfiguration(
                "OPENROUTER_CHAT_COMPLETIONS_URL must use http or https".to_string(),
            ));
        }

        Ok(Self {
            chat_completions_url,
            api_key,
            model_route: OpenRouterModelRoute {
                generate_model: optional_trimmed_env("OPENROUTER_MODEL_GENERATE")
                    .unwrap_or_else(|| DEFAULT_GENERATE_MODEL.to_string()),
                assist_model: optional_trimmed_env("OPENROUTER_MODEL_ASSIST")
                    .unwrap_or_else(|| DEFAULT_ASSIST_MODEL.to_string()),
            },
        })
    }
}

#[derive(Debug, Error)]
pub enum OpenRouterConfigError {
    #[error("missing required env var {0}")]
    MissingVar(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to build OpenRouter http client: {0}")]
    HttpClient(String),
}

/// Single-attempt chat-completions client. Timeouts and retries live in
/// [`super::retry::RetryingGateway`].
#[derive(Clone)]
pub struct OpenRouterGateway {
    client: reqwest::Client,
    config: OpenRouterGatewayConfig,
}

impl OpenRouterGateway {
    pub fn new(config: OpenRouterGatewayConfig) -> Result<Self, OpenRouterConfigError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|err| OpenRouterConfigError::HttpClient(err.to_string()))?;

        Ok(Self { client, config })
    }

    async fn complete(&self, request: GenerationRequest) -> Result<GenerationResponse, GatewayError> {
        let model = self.config.model_route.model_for(request.tier).to_string();
        let mut messages = initial_messages(request.system_prompt.as_deref(), &request.messages);
        let tool_declarations = request.tools.as_ref().map(|tools| tool_payload(tools.as_ref()));
        let mut usage = TokenUsage::default();
        let mut saw_usage = false;

        for round in 0..=MAX_TOOL_ROUNDS {
            let mut body = json!({
                "model": model,
                "messages": messages,
                "max_tokens": request.max_output_tokens,
                "temperature": request.temperature,
            });
            let tools_offered = round < MAX_TOOL_ROUNDS;
            if let (true, Some(declarations)) = (tools_offered, tool_declarations.as_ref()) {
                body["tools"] = declarations.clone();
            }

            let (parsed, header_request_id) = self.send_once(&body).await?;
            if let Some(round_usage) = parsed.usage.as_ref() {
                saw_usage = true;
                usage.prompt_tokens = usage
                    .prompt_tokens
                    .saturating_add(clamp_u64_to_u32(round_usage.prompt_tokens.unwrap_or(0)));
                usage.completion_tokens = usage.completion_tokens.saturating_add(
                    clamp_u64_to_u32(round_usage.completion_tokens.unwrap_or(0)),
                );
                usage.total_tokens = usage
                    .total_tokens
                    .saturating_add(clamp_u64_to_u32(round_usage.total_tokens.unwrap_or(0)));
            }

            let message = parsed
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| GatewayError::InvalidProviderPayload("missing_choice".to_string()))?
                .message;

            let tool_calls = message.tool_calls.unwrap_or_default();
            if let (true, false, Some(handler)) =
                (tools_offered, tool_calls.is_empty(), request.tools.as_ref())
            {
                debug!(round, calls = tool_calls.len(), "model requested tool calls");
                messages.push(json!({
                    "role": "assistant",
                    "content": message.content.clone().unwrap_or(Value::Null),
                    "tool_calls": tool_calls
                        .iter()
                        .map(OpenRouterToolCall::to_wire)
                        .collect::<Vec<_>>(),
                }));
                for call in &tool_calls {
                    messages.push(json!({
                        "role": "tool",
                        "tool_call_id": call.id,
                        "content": run_tool(handler.as_ref(), call).to_string(),
                    }));
                }
                continue;
            }

            let text = content_text(message.content.as_ref());
            if text.trim().is_empty() {
                return Err(GatewayError::InvalidProviderPayload(
                    "empty_content".to_string(),
                ));
            }

            return Ok(GenerationResponse {
                model: parsed.model.unwrap_or(model),
                provider_request_id: header_request_id.or(parsed.id),
                text,
                usage: saw_usage.then_some(usage),
            });
        }

        Err(GatewayError::InvalidProviderPayload(
            "tool_rounds_exhausted".to_string(),
        ))
    }

    async fn send_once(
        &self,
        body: &Value,
    ) -> Result<(OpenRouterSuccessResponse, Option<String>), GatewayError> {
        let response = self
            .client
            .post(&self.config.chat_completions_url)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Unavailable("request_unavailable".to_string())
                }
            })?;

        let status = response.status();
        let header_request_id = header_request_id(response.headers());
        let body = response.text().await.map_err(|_| {
            GatewayError::InvalidProviderPayload("response_body_read_failed".to_string())
        })?;

        if !status.is_success() {
            let provider_code = parse_provider_error_code(&body);
            if status == StatusCode::TOO_MANY_REQUESTS || provider_code == QUOTA_ERROR_CODE {
                warn!(status = status.as_u16(), code = %provider_code, "llm provider quota exhausted");
                return Err(GatewayError::QuotaExhausted {
                    retry_after_seconds: QUOTA_RETRY_AFTER_SECONDS,
                });
            }
            let detail = format!("status={} code={provider_code}", status.as_u16());
            if is_retryable_status(status) {
                return Err(GatewayError::Unavailable(detail));
            }
            return Err(GatewayError::ProviderFailure(detail));
        }

        let parsed = serde_json::from_str::<OpenRouterSuccessResponse>(&body).map_err(|_| {
            GatewayError::InvalidProviderPayload("response_json_parse_failed".to_string())
        })?;
        Ok((parsed, header_request_id))
    }
}

impl ModelGateway for OpenRouterGateway {
    fn generate<'a>(&'a self, request: GenerationRequest) -> GatewayFuture<'a> {
        Box::pin(self.complete(request))
    }
}

fn initial_messages(system_prompt: Option<&str>, history: &[ChatMessage]) -> Vec<Value> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    if let Some(system_prompt) = system_prompt {
        messages.push(json!({ "role": "system", "content": system_prompt }));
    }
    messages.extend(
        history
            .iter()
            .map(|message| json!({ "role": message.role.as_str(), "content": message.content })),
    );
    messages
}

fn tool_payload(handler: &dyn ToolHandler) -> Value {
    Value::Array(
        handler
            .declarations()
            .into_iter()
            .map(|declaration| {
                json!({
                    "type": "function",
                    "function": {
                        "name": declaration.name,
                        "description": declaration.description,
                        "parameters": declaration.parameters,
                    }
                })
            })
            .collect(),
    )
}

fn run_tool(handler: &dyn ToolHandler, call: &OpenRouterToolCall) -> Value {
    let arguments = match &call.function.arguments {
        Some(Value::String(raw)) if raw.trim().is_empty() => Value::Null,
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(parsed) => parsed,
            Err(_) => return json!({ "error": "tool arguments are not valid json" }),
        },
        Some(other) => other.clone(),
        None => Value::Null,
    };

    match handler.invoke(&call.function.name, &arguments) {
        Ok(result) => result,
        Err(err) => {
            warn!(tool = %call.function.name, error = %err, "tool invocation rejected");
            json!({ "error": err.to_string() })
        }
    }
}

fn content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

#[derive(Debug, Deserialize)]
struct OpenRouterSuccessResponse {
    id: Option<String>,
    model: Option<String>,
    choices: Vec<OpenRouterChoice>,
    usage: Option<OpenRouterUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterChoice {
    message: OpenRouterMessage,
}

#[derive(Debug, Deserialize)]
struct OpenRouterMessage {
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenRouterToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterToolCall {
    id: String,
    function: OpenRouterFunctionCall,
}

impl OpenRouterToolCall {
    fn to_wire(&self) -> Value {
        json!({
            "id": self.id,
            "type": "function",
            "function": {
                "name": self.function.name,
                "arguments": match &self.function.arguments {
                    Some(Value::String(raw)) => raw.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                },
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenRouterFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn header_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

fn parse_provider_error_code(body: &str) -> String {
    #[derive(Deserialize)]
    struct ProviderErrorEnvelope {
        error: Option<ProviderErrorDetails>,
    }

    #[derive(Deserialize)]
    struct ProviderErrorDetails {
        code: Option<Value>,
        status: Option<String>,
    }

    let parsed = serde_json::from_str::<ProviderErrorEnvelope>(body).ok();
    let Some(details) = parsed.and_then(|envelope| envelope.error) else {
        return "unknown".to_string();
    };

    if let Some(status) = details
        .status
        .filter(|status| status == QUOTA_ERROR_CODE)
    {
        return status;
    }

    match details.code {
        Some(Value::String(code)) => code,
        Some(Value::Number(code)) => code.to_string(),
        _ => "unknown".to_string(),
    }
}

fn clamp_u64_to_u32(value: u64) -> u32 {
    value.min(u32::MAX as u64) as u32
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::{QUOTA_ERROR_CODE, is_retryable_status, parse_provider_error_code};

    #[test]
    fn provider_error_code_prefers_quota_status() {
        assert_eq!(
            parse_provider_error_code(
                r#"{"error":{"code":400,"status":"RESOURCE_EXHAUSTED","message":"quota"}}"#
            ),
            QUOTA_ERROR_CODE
        );
        assert_eq!(
            parse_provider_error_code(r#"{"error":{"code":"invalid_model"}}"#),
            "invalid_model"
        );
        assert_eq!(parse_provider_error_code("not json"), "unknown");
    }

    #[test]
    fn throttling_is_not_a_retryable_status() {
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
    }
}
