pub mod context;
pub mod gateway;
pub mod openrouter;
pub mod prompts;
pub mod response;
pub mod retry;
pub mod safety;
pub mod tools;
pub mod validation;

pub use gateway::{
    ChatMessage, ChatRole, GatewayError, GatewayFuture, GenerationRequest, GenerationResponse,
    ModelGateway, ModelTier, TokenUsage,
};
pub use openrouter::{
    OpenRouterConfigError, OpenRouterGateway, OpenRouterGatewayConfig, OpenRouterModelRoute,
};
pub use retry::{RetryPolicy, RetryingGateway};
pub use safety::{InjectionGate, Sanitizer, SignatureError, SignatureSet, normalize_message};
pub use tools::{CatalogTools, ToolError, ToolHandler};
