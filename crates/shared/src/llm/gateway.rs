use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::tools::ToolHandler;

pub const GENERATE_MAX_OUTPUT_TOKENS: u32 = 2048;
pub const ASSIST_MAX_OUTPUT_TOKENS: u32 = 256;
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

pub type GatewayFuture<'a> =
    Pin<Box<dyn Future<Output = Result<GenerationResponse, GatewayError>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Primary conversational model with tool calling.
    Generate,
    /// Cheaper model used for corrective regeneration.
    Assist,
}

impl ModelTier {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Assist => "assist",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Clone)]
pub struct GenerationRequest {
    pub tier: ModelTier,
    pub system_prompt: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub tools: Option<Arc<dyn ToolHandler>>,
    pub cancel: CancellationToken,
}

impl GenerationRequest {
    /// Primary-tier request: system prompt, prior history and the contextual user message.
    pub fn generate(
        system_prompt: impl Into<String>,
        messages: Vec<ChatMessage>,
        tools: Option<Arc<dyn ToolHandler>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tier: ModelTier::Generate,
            system_prompt: Some(system_prompt.into()),
            messages,
            max_output_tokens: GENERATE_MAX_OUTPUT_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            tools,
            cancel,
        }
    }

    /// Assist-tier request: a single user prompt, no tools.
    pub fn assist(prompt: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            tier: ModelTier::Assist,
            system_prompt: None,
            messages: vec![ChatMessage::user(prompt)],
            max_output_tokens: ASSIST_MAX_OUTPUT_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            tools: None,
            cancel,
        }
    }
}

impl std::fmt::Debug for GenerationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationRequest")
            .field("tier", &self.tier)
            .field("messages", &self.messages.len())
            .field("max_output_tokens", &self.max_output_tokens)
            .field("temperature", &self.temperature)
            .field("tools", &self.tools.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub model: String,
    pub provider_request_id: Option<String>,
    pub text: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("llm provider request timed out")]
    Timeout,
    #[error("llm request was cancelled")]
    Cancelled,
    #[error("llm request exceeded its overall deadline")]
    DeadlineExceeded,
    #[error("llm provider quota exhausted")]
    QuotaExhausted { retry_after_seconds: u64 },
    #[error("llm provider temporarily unavailable: {0}")]
    Unavailable(String),
    #[error("llm provider request failed: {0}")]
    ProviderFailure(String),
    #[error("llm provider returned an invalid payload: {0}")]
    InvalidProviderPayload(String),
}

impl GatewayError {
    /// Transport failures and timeouts are worth another attempt; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_))
    }
}

pub trait ModelGateway: Send + Sync {
    fn generate<'a>(&'a self, request: GenerationRequest) -> GatewayFuture<'a>;
}
